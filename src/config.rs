use crate::core::bktree::DEFAULT_RADIUS;
use crate::core::mover::TransferMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid input folder path: {}", path.display())]
    InvalidInput { path: PathBuf },

    #[error("Failed to create output folder {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Thread count must be at least 1")]
    ZeroThreads,
}

/// Settings for one clustering run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Maximum Hamming distance for two files to count as similar.
    pub radius: u32,
    pub threads: usize,
    /// How long the move phase waits for a straggling task before cancelling
    /// what is left.
    #[serde(with = "duration_secs")]
    pub grace_period: Duration,
    pub mode: TransferMode,
    pub dry_run: bool,
    pub ffmpeg: PathBuf,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("input"),
            output: PathBuf::from("output"),
            radius: DEFAULT_RADIUS,
            threads: num_cpus::get(),
            grace_period: Duration::from_secs(10),
            mode: TransferMode::Move,
            dry_run: false,
            ffmpeg: PathBuf::from("ffmpeg"),
            show_progress: true,
        }
    }
}

impl RunConfig {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(input: P, output: Q) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Check the input folder and make sure the output folder exists.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        if !self.input.is_dir() {
            return Err(ConfigError::InvalidInput {
                path: self.input.clone(),
            });
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if !self.dry_run {
            ensure_dir(&self.output)?;
        }
        Ok(())
    }
}

fn ensure_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(path).map_err(|source| ConfigError::OutputDir {
        path: path.to_path_buf(),
        source,
    })
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.input, PathBuf::from("input"));
        assert_eq!(config.output, PathBuf::from("output"));
        assert_eq!(config.radius, 5);
        assert!(config.threads >= 1);
        assert_eq!(config.mode, TransferMode::Move);
    }

    #[test]
    fn test_missing_input_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = RunConfig::new(temp_dir.path().join("nope"), temp_dir.path().join("out"));
        let err = config.prepare().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInput { .. }));
        assert!(err.to_string().starts_with("Invalid input folder path"));
        assert!(!temp_dir.path().join("out").exists());
    }

    #[test]
    fn test_file_as_input_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.jpg");
        std::fs::write(&file, b"x").unwrap();
        let config = RunConfig::new(&file, temp_dir.path().join("out"));
        assert!(matches!(config.prepare(), Err(ConfigError::InvalidInput { .. })));
    }

    #[test]
    fn test_output_is_created() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("nested/out");
        let config = RunConfig::new(temp_dir.path(), &output);
        config.prepare().unwrap();
        assert!(output.is_dir());
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = RunConfig::new("in", "out");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"grace_period\":10"));
        assert!(json.contains("\"mode\":\"move\""));
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.grace_period, config.grace_period);
        assert_eq!(back.input, config.input);
    }
}
