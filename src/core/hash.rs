use crate::core::fingerprint::{Fingerprint, FingerprintedFile};
use crate::core::frames::{FfmpegFrameExtractor, FrameExtractor};
use image::{DynamicImage, imageops::FilterType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Side length of the downsampled grid; fingerprints are `GRID_SIZE²` bits.
pub const GRID_SIZE: u32 = 8;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "flv", "wmv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return MediaKind::Unsupported;
        };
        let ext = ext.to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Unsupported
        }
    }
}

/// Computes perceptual fingerprints for images and videos.
pub struct MediaHasher {
    frames: Box<dyn FrameExtractor>,
}

impl MediaHasher {
    pub fn new() -> Self {
        Self::with_frame_extractor(FfmpegFrameExtractor::default())
    }

    pub fn with_frame_extractor<F: FrameExtractor + 'static>(frames: F) -> Self {
        Self {
            frames: Box::new(frames),
        }
    }

    /// Fingerprint a media file, dispatching on its extension.
    ///
    /// Returns `None` for unsupported extensions, undecodable images and
    /// videos that yield no usable frames.
    pub fn extract(&self, path: &Path) -> Option<Fingerprint> {
        match MediaKind::from_path(path) {
            MediaKind::Image => self.hash_image_file(path),
            MediaKind::Video => self.hash_video_file(path),
            MediaKind::Unsupported => None,
        }
    }

    pub fn fingerprint_file(&self, path: PathBuf) -> FingerprintedFile {
        let fingerprint = self.extract(&path);
        FingerprintedFile::new(path, fingerprint)
    }

    fn hash_image_file(&self, path: &Path) -> Option<Fingerprint> {
        match image::open(path) {
            Ok(img) => Some(average_hash(&img)),
            Err(e) => {
                log::debug!("Failed to decode {}: {}", path.display(), e);
                None
            }
        }
    }

    fn hash_video_file(&self, path: &Path) -> Option<Fingerprint> {
        let frames = self.frames.key_frames(path);
        if frames.is_empty() {
            log::debug!("No key frames extracted from {}", path.display());
            return None;
        }
        combine_frames(frames.iter().map(average_hash))
    }
}

impl Default for MediaHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Average hash: shrink to an 8×8 luminance grid and threshold each cell
/// against the grid mean, row-major.
pub fn average_hash(img: &DynamicImage) -> Fingerprint {
    let grid = img
        .resize_exact(GRID_SIZE, GRID_SIZE, FilterType::Triangle)
        .to_luma8();

    let samples: Vec<u32> = grid.pixels().map(|p| u32::from(p.0[0])).collect();
    let mean = samples.iter().sum::<u32>() / samples.len() as u32;

    Fingerprint::from_u64(
        samples
            .iter()
            .fold(0u64, |acc, &s| (acc << 1) | u64::from(s >= mean)),
    )
}

/// Fold per-frame fingerprints into one by XOR, left to right.
///
/// Returns `None` when there are no frames. All frame fingerprints come from
/// [`average_hash`] and share its length.
pub fn combine_frames<I: IntoIterator<Item = Fingerprint>>(frames: I) -> Option<Fingerprint> {
    frames.into_iter().reduce(|acc, next| match acc.xor(&next) {
        Ok(combined) => combined,
        Err(e) => {
            log::warn!("Skipping frame with mismatched fingerprint: {}", e);
            acc
        }
    })
}
