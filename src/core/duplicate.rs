// Similarity grouping: turns per-file neighbour queries into clusters.

use crate::core::bktree::SimilarityIndex;
use crate::core::fingerprint::{Fingerprint, FingerprintError, FingerprintedFile};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

pub type ClusterId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub files: Vec<PathBuf>,
}

impl Cluster {
    fn new(id: ClusterId) -> Self {
        Self {
            id,
            files: Vec::new(),
        }
    }

    /// A cluster holding a single file found no near-duplicate.
    pub fn is_singleton(&self) -> bool {
        self.files.len() == 1
    }
}

/// Assigns files to clusters one at a time against a populated index.
///
/// All state lives behind `&mut self`, so the lookup, allocation and
/// recording for one file happen as a single step.
pub struct SimilarityGrouper<'a> {
    index: &'a SimilarityIndex,
    radius: u32,
    next_id: ClusterId,
    clusters: BTreeMap<ClusterId, Cluster>,
    assignments: HashMap<Fingerprint, ClusterId>,
}

impl<'a> SimilarityGrouper<'a> {
    pub fn new(index: &'a SimilarityIndex, radius: u32) -> Self {
        Self {
            index,
            radius,
            next_id: 1,
            clusters: BTreeMap::new(),
            assignments: HashMap::new(),
        }
    }

    /// Place one file. Files without a fingerprint are skipped and yield
    /// `None`.
    pub fn assign(
        &mut self,
        file: &FingerprintedFile,
    ) -> Result<Option<ClusterId>, FingerprintError> {
        let Some(fingerprint) = &file.fingerprint else {
            return Ok(None);
        };

        let similar = self.index.search(fingerprint, self.radius)?;
        // First already-assigned hit in traversal order wins.
        let existing = similar
            .iter()
            .find_map(|hit| self.assignments.get(hit).copied());

        let id = match existing {
            Some(id) => id,
            None => self.allocate(),
        };

        if let Some(cluster) = self.clusters.get_mut(&id) {
            cluster.files.push(file.path.clone());
        }
        self.assignments.insert(fingerprint.clone(), id);
        Ok(Some(id))
    }

    fn allocate(&mut self) -> ClusterId {
        let id = self.next_id;
        self.next_id += 1;
        self.clusters.insert(id, Cluster::new(id));
        id
    }

    pub fn into_clusters(self) -> BTreeMap<ClusterId, Cluster> {
        self.clusters
    }
}

/// Group `files` in order against `index`.
pub fn group_files(
    index: &SimilarityIndex,
    files: &[FingerprintedFile],
    radius: u32,
) -> Result<BTreeMap<ClusterId, Cluster>, FingerprintError> {
    let mut grouper = SimilarityGrouper::new(index, radius);
    for file in files {
        grouper.assign(file)?;
    }
    Ok(grouper.into_clusters())
}
