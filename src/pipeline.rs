use crate::config::{ConfigError, RunConfig};
use crate::core::bktree::SimilarityIndex;
use crate::core::duplicate::{self, Cluster, ClusterId};
use crate::core::fingerprint::{FingerprintError, FingerprintedFile};
use crate::core::frames::FfmpegFrameExtractor;
use crate::core::hash::MediaHasher;
use crate::core::mover::{self, MoveOutcome, MoveTask, Relocator};
use crate::core::scanner;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Similarity index error: {0}")]
    Index(#[from] FingerprintError),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to write move history: {0}")]
    History(#[from] mover::MoveError),
}

/// What a run did, for the final report.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub fingerprinted: usize,
    pub unclusterable: usize,
    pub clusters: usize,
    pub groups: usize,
    pub grouped_files: usize,
    pub originals: usize,
    pub moved: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub dry_run: bool,
}

/// Result of the fingerprint phase.
#[derive(Debug, Default)]
pub struct HashedFiles {
    pub fingerprinted: Vec<FingerprintedFile>,
    pub unclusterable: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct RelocationReport {
    completed: Vec<MoveTask>,
    failed: usize,
    cancelled: Vec<MoveTask>,
}

impl RelocationReport {
    fn record(&mut self, outcome: MoveOutcome) {
        match outcome {
            MoveOutcome::Done(task) => self.completed.push(task),
            MoveOutcome::Failed(task, e) => {
                log::warn!("Error moving file {}: {}", task.source.display(), e);
                self.failed += 1;
            }
            MoveOutcome::Cancelled(task) => {
                log::warn!("Cancelled move of {}", task.source.display());
                self.cancelled.push(task);
            }
        }
    }
}

/// Runs discovery, fingerprinting, grouping and relocation over one worker
/// pool.
pub struct Pipeline {
    config: RunConfig,
    hasher: MediaHasher,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Result<Self, PipelineError> {
        let hasher = MediaHasher::with_frame_extractor(FfmpegFrameExtractor::new(&config.ffmpeg));
        Self::with_hasher(config, hasher)
    }

    pub fn with_hasher(config: RunConfig, hasher: MediaHasher) -> Result<Self, PipelineError> {
        if config.threads == 0 {
            return Err(ConfigError::ZeroThreads.into());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("mediasort-worker-{i}"))
            .build()?;
        Ok(Self {
            config,
            hasher,
            pool,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        self.config.prepare()?;

        let files = self.discover();
        let discovered = files.len();
        log::info!("Discovered {} files in {}", discovered, self.config.input.display());

        let hashed = benchmark("fingerprinting", || self.fingerprint_all(files));
        log::info!(
            "Fingerprinted {} files, {} unclusterable",
            hashed.fingerprinted.len(),
            hashed.unclusterable.len()
        );

        let clusters = benchmark("grouping", || self.cluster(&hashed.fingerprinted))?;

        let tasks = mover::plan_moves(&self.config.output, &clusters, &hashed.unclusterable);
        let report = benchmark("relocating", || self.relocate_all(tasks));

        if !self.config.dry_run {
            mover::record_history(&self.config.output, self.config.mode, &report.completed)?;
        }

        let groups: Vec<&Cluster> = clusters.values().filter(|c| !c.is_singleton()).collect();
        let grouped_files = groups.iter().map(|c| c.files.len()).sum();
        Ok(RunSummary {
            discovered,
            fingerprinted: hashed.fingerprinted.len(),
            unclusterable: hashed.unclusterable.len(),
            clusters: clusters.len(),
            groups: groups.len(),
            grouped_files,
            originals: clusters.len() - groups.len() + hashed.unclusterable.len(),
            moved: report.completed.len(),
            failed: report.failed,
            cancelled: report.cancelled.len(),
            dry_run: self.config.dry_run,
        })
    }

    fn discover(&self) -> Vec<PathBuf> {
        let input = self
            .config
            .input
            .canonicalize()
            .unwrap_or_else(|_| self.config.input.clone());
        let output = self.config.output.canonicalize().ok();
        let exclude = output.as_deref().filter(|o| o.starts_with(&input));
        scanner::discover_files(&input, exclude)
    }

    /// Phase 1: fingerprint every file on the pool. Output order matches
    /// input order.
    pub fn fingerprint_all(&self, files: Vec<PathBuf>) -> HashedFiles {
        let progress = self.progress_bar(files.len() as u64, "Fingerprinting");
        let results: Vec<FingerprintedFile> = self.pool.install(|| {
            files
                .into_par_iter()
                .map(|path| {
                    let file = self.hasher.fingerprint_file(path);
                    progress.inc(1);
                    file
                })
                .collect()
        });
        progress.finish_and_clear();

        let mut hashed = HashedFiles::default();
        for file in results {
            if file.is_clusterable() {
                hashed.fingerprinted.push(file);
            } else {
                log::debug!("No fingerprint for {}", file.path.display());
                hashed.unclusterable.push(file.path);
            }
        }
        hashed
    }

    /// Phase 2: build the index, then group in file order.
    pub fn cluster(
        &self,
        files: &[FingerprintedFile],
    ) -> Result<BTreeMap<ClusterId, Cluster>, PipelineError> {
        let index = SimilarityIndex::new();
        for fingerprint in files.iter().filter_map(|f| f.fingerprint.as_ref()) {
            index.insert(fingerprint.clone())?;
        }
        log::debug!("Index holds {} distinct fingerprints", index.len());

        // Every insert is done; warm the query cache in parallel.
        let radius = self.config.radius;
        self.pool.install(|| {
            files
                .par_iter()
                .filter_map(|f| f.fingerprint.as_ref())
                .try_for_each(|fp| index.search(fp, radius).map(drop))
        })?;

        Ok(duplicate::group_files(&index, files, radius)?)
    }

    /// Phase 3: relocate every planned file on the pool.
    ///
    /// Outcomes are drained as they arrive. If nothing arrives for a whole
    /// grace period, the tasks that have not started yet are cancelled; the
    /// ones already running still report how they ended.
    fn relocate_all(&self, tasks: Vec<MoveTask>) -> RelocationReport {
        let total = tasks.len();
        let progress = self.progress_bar(total as u64, "Relocating");
        let relocator = Relocator::new(self.config.mode, self.config.dry_run);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        for task in tasks {
            let tx = tx.clone();
            let cancelled = Arc::clone(&cancelled);
            self.pool.spawn(move || {
                let outcome = if cancelled.load(Ordering::Relaxed) {
                    MoveOutcome::Cancelled(task)
                } else {
                    match relocator.relocate(&task) {
                        Ok(()) => MoveOutcome::Done(task),
                        Err(e) => MoveOutcome::Failed(task, e),
                    }
                };
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        let mut report = RelocationReport::default();
        loop {
            let outcome = match rx.recv_timeout(self.config.grace_period) {
                Ok(outcome) => outcome,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    cancelled.store(true, Ordering::Relaxed);
                    log::warn!(
                        "No move finished within {:?}; cancelling tasks that have not started",
                        self.config.grace_period
                    );
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            };
            progress.inc(1);
            report.record(outcome);
        }

        // Every spawned task holds a sender, so this ends once each one has
        // reported.
        for outcome in rx {
            progress.inc(1);
            report.record(outcome);
        }
        progress.finish_and_clear();
        report
    }

    fn progress_bar(&self, len: u64, label: &'static str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        let template = "{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})";
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(label);
        bar
    }
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
