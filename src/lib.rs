pub mod config;
pub mod core;
pub mod logging;
pub mod pipeline;

pub use config::{ConfigError, RunConfig};
pub use crate::core::bktree::{DEFAULT_RADIUS, SimilarityIndex};
pub use crate::core::duplicate::{Cluster, ClusterId, SimilarityGrouper};
pub use crate::core::fingerprint::{Fingerprint, FingerprintError, FingerprintedFile};
pub use crate::core::hash::MediaHasher;
pub use pipeline::{Pipeline, PipelineError, RunSummary};
