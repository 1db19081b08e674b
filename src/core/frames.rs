use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const IEND: &[u8; 4] = b"IEND";

/// Source of representative frames for a video file.
///
/// Implementations swallow their own failures: a video that cannot be read
/// simply yields no frames.
pub trait FrameExtractor: Send + Sync {
    fn key_frames(&self, video_path: &Path) -> Vec<DynamicImage>;
}

/// Pulls I-frames out of a video by piping ffmpeg's PNG output.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    binary: PathBuf,
}

impl FfmpegFrameExtractor {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, video_path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        let output = Command::new(&self.binary)
            .arg("-i")
            .arg(video_path)
            .args([
                "-vf",
                "select=eq(pict_type\\,I)",
                "-vsync",
                "vfr",
                "-f",
                "image2pipe",
                "-vcodec",
                "png",
                "-",
            ])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;

        // A failed run may still have written complete frames before dying;
        // they are discarded so a half-read video never gets a fingerprint.
        if !output.status.success() {
            log::debug!(
                "ffmpeg exited with {} for {}",
                output.status,
                video_path.display()
            );
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FrameExtractor for FfmpegFrameExtractor {
    fn key_frames(&self, video_path: &Path) -> Vec<DynamicImage> {
        let stdout = match self.run(video_path) {
            Ok(Some(stdout)) => stdout,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::debug!(
                    "Failed to run {} for {}: {}",
                    self.binary.display(),
                    video_path.display(),
                    e
                );
                return Vec::new();
            }
        };

        split_png_stream(&stdout)
            .into_iter()
            .filter_map(|frame| {
                image::load_from_memory_with_format(frame, ImageFormat::Png)
                    .map_err(|e| log::debug!("Dropping undecodable frame: {}", e))
                    .ok()
            })
            .collect()
    }
}

/// Split a stream of back-to-back PNG files into one slice per image.
///
/// Walks the chunk layout of each image up to its `IEND` chunk. Anything
/// after the last complete image (truncated data, trailing garbage) is
/// ignored.
pub fn split_png_stream(bytes: &[u8]) -> Vec<&[u8]> {
    let mut images = Vec::new();
    let mut start = 0;

    while bytes[start..].starts_with(&PNG_SIGNATURE) {
        match png_end(&bytes[start..]) {
            Some(len) => {
                images.push(&bytes[start..start + len]);
                start += len;
            }
            None => break,
        }
    }

    images
}

/// Byte length of the PNG at the head of `bytes`, if it is complete.
fn png_end(bytes: &[u8]) -> Option<usize> {
    let mut pos = PNG_SIGNATURE.len();
    loop {
        let header = bytes.get(pos..pos + 8)?;
        let data_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let chunk_type = &header[4..8];
        // length + type + data + crc
        let chunk_end = pos.checked_add(12)?.checked_add(data_len)?;
        if chunk_end > bytes.len() {
            return None;
        }
        pos = chunk_end;
        if chunk_type == IEND {
            return Some(pos);
        }
    }
}
