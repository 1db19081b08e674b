use crate::core::duplicate::{Cluster, ClusterId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ORIGINALS_DIR: &str = "originals";
pub const HISTORY_FILE: &str = ".history.jsonl";

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to move {from} → {to}: {source}")]
    Transfer {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

impl TransferMode {
    fn action(self) -> &'static str {
        match self {
            TransferMode::Move => "moved",
            TransferMode::Copy => "copied",
        }
    }
}

/// One planned relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveTask {
    /// `None` for files that go to the originals bucket.
    pub cluster: Option<ClusterId>,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug)]
pub enum MoveOutcome {
    Done(MoveTask),
    Failed(MoveTask, MoveError),
    Cancelled(MoveTask),
}

/// Destination directory for a cluster: singletons share the originals
/// bucket, real groups get `Group_<id>`.
pub fn cluster_dir(output: &Path, cluster: &Cluster) -> PathBuf {
    if cluster.is_singleton() {
        output.join(ORIGINALS_DIR)
    } else {
        output.join(format!("Group_{}", cluster.id))
    }
}

/// Turn clusters (plus files that could not be clustered) into concrete
/// source → destination pairs.
///
/// Destination names are unique per directory: a clash with an earlier task
/// or an existing file gets a `_1`, `_2`, ... suffix before the extension.
pub fn plan_moves(
    output: &Path,
    clusters: &BTreeMap<ClusterId, Cluster>,
    unclusterable: &[PathBuf],
) -> Vec<MoveTask> {
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut tasks = Vec::new();

    let mut push = |cluster: Option<ClusterId>, dir: PathBuf, source: &Path| {
        let Some(file_name) = source.file_name() else {
            log::warn!("Skipping path without a file name: {}", source.display());
            return;
        };
        let destination = unique_destination(&dir, Path::new(file_name), &claimed);
        claimed.insert(destination.clone());
        tasks.push(MoveTask {
            cluster,
            source: source.to_path_buf(),
            destination,
        });
    };

    for cluster in clusters.values() {
        let dir = cluster_dir(output, cluster);
        let id = (!cluster.is_singleton()).then_some(cluster.id);
        for source in &cluster.files {
            push(id, dir.clone(), source);
        }
    }
    for source in unclusterable {
        push(None, output.join(ORIGINALS_DIR), source);
    }

    tasks
}

fn unique_destination(dir: &Path, file_name: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
    let candidate = dir.join(file_name);
    if !claimed.contains(&candidate) && !candidate.exists() {
        return candidate;
    }

    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = file_name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{stem}_{n}{extension}")))
        .find(|p| !claimed.contains(p) && !p.exists())
        .unwrap_or(candidate)
}

/// Performs the filesystem side of a [`MoveTask`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Relocator {
    pub mode: TransferMode,
    pub dry_run: bool,
}

impl Relocator {
    pub fn new(mode: TransferMode, dry_run: bool) -> Self {
        Self { mode, dry_run }
    }

    pub fn relocate(&self, task: &MoveTask) -> Result<(), MoveError> {
        if self.dry_run {
            log::info!(
                "[dry-run] {} {} → {}",
                self.mode.action(),
                task.source.display(),
                task.destination.display()
            );
            return Ok(());
        }

        if let Some(parent) = task.destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let transfer = |e: std::io::Error| MoveError::Transfer {
            from: task.source.clone(),
            to: task.destination.clone(),
            source: e,
        };

        match self.mode {
            TransferMode::Copy => {
                fs::copy(&task.source, &task.destination).map_err(transfer)?;
            }
            TransferMode::Move => {
                if let Err(e) = fs::rename(&task.source, &task.destination) {
                    // rename cannot cross filesystems; fall back to copy + remove
                    log::debug!(
                        "rename {} failed ({}), copying instead",
                        task.source.display(),
                        e
                    );
                    fs::copy(&task.source, &task.destination).map_err(transfer)?;
                    fs::remove_file(&task.source).map_err(transfer)?;
                }
            }
        }
        log::debug!(
            "{} {} → {}",
            self.mode.action(),
            task.source.display(),
            task.destination.display()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub cluster: Option<ClusterId>,
    pub destination: String,
    pub files: Vec<(String, String)>,
    pub action: String,
}

/// Append one record per destination directory to `<output>/.history.jsonl`.
pub fn record_history(
    output: &Path,
    mode: TransferMode,
    completed: &[MoveTask],
) -> Result<usize, MoveError> {
    let mut by_dir: BTreeMap<PathBuf, (Option<ClusterId>, Vec<(String, String)>)> =
        BTreeMap::new();
    for task in completed {
        let dir = task
            .destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let entry = by_dir.entry(dir).or_insert((task.cluster, Vec::new()));
        entry.1.push((
            task.source.to_string_lossy().into_owned(),
            task.destination.to_string_lossy().into_owned(),
        ));
    }

    if by_dir.is_empty() {
        return Ok(0);
    }

    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output.join(HISTORY_FILE))?;

    let timestamp = Utc::now().to_rfc3339();
    for (dir, (cluster, files)) in &by_dir {
        let record = HistoryRecord {
            timestamp: timestamp.clone(),
            cluster: *cluster,
            destination: dir.to_string_lossy().into_owned(),
            files: files.clone(),
            action: mode.action().to_string(),
        };
        writeln!(out, "{}", serde_json::to_string(&record)?)?;
    }
    Ok(by_dir.len())
}
