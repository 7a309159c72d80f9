//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Frame representation and the RAM-backed spool that [`crate::producer`]
//! drains. Pixel storage follows the teacher's `Arc<Vec<u8>>`-backed buffer
//! so cloning a handle across stages never copies pixel data.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use image::{ImageBuffer, Rgb};

use crate::error::PipelineError;

/// Owned RGB8 pixel buffer behind an `Arc`, cheap to clone across stage
/// boundaries. Width/height are redundant with `buf.len()` but kept explicit
/// to avoid recomputation on every access.
#[derive(Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub rgb: Arc<Vec<u8>>,
}

impl PixelBuffer {
    pub fn from_image(img: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Self {
        let (width, height) = img.dimensions();
        PixelBuffer {
            width,
            height,
            rgb: Arc::new(img.into_raw()),
        }
    }

    pub fn decode_jpeg(bytes: &[u8]) -> Result<Self, PipelineError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?
            .to_rgb8();
        Ok(Self::from_image(img))
    }

    pub fn as_image_buffer(&self) -> ImageBuffer<Rgb<u8>, &[u8]> {
        ImageBuffer::from_raw(self.width, self.height, self.rgb.as_slice())
            .expect("width/height always match rgb.len()")
    }

    /// Converts a `video-rs`-decoded RGB frame (shape `[height, width, 3]`)
    /// into a `PixelBuffer`, for the in-process `file://` decode path used
    /// when no external decoder subprocess is available.
    #[cfg(feature = "file_mode")]
    pub fn from_video_rs_frame(frame: &video_rs::frame::Frame) -> Result<Self, PipelineError> {
        let shape = frame.shape();
        let (height, width) = (shape[0] as u32, shape[1] as u32);
        let slice = frame
            .as_slice()
            .ok_or_else(|| PipelineError::Io(std::io::Error::other("decoded frame not contiguous")))?;
        Ok(PixelBuffer {
            width,
            height,
            rgb: Arc::new(slice.to_vec()),
        })
    }
}

/// A handle to a single decoded frame, exclusively owned by whichever stage
/// currently holds it and passed by move through channels. `seq` is the
/// monotonic frame number assigned by [`crate::producer::FrameProducer`].
#[derive(Clone)]
pub struct FrameRef {
    pub seq: u64,
    pub captured_at: SystemTime,
    pub pixels: PixelBuffer,
    pub source_path: Option<PathBuf>,
}

impl FrameRef {
    pub fn new(seq: u64, pixels: PixelBuffer) -> Self {
        FrameRef {
            seq,
            captured_at: SystemTime::now(),
            pixels,
            source_path: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width
    }

    pub fn height(&self) -> u32 {
        self.pixels.height
    }
}

/// Lists spool frames in ascending sequence order, named `frame_NNNNNN.jpg`.
pub fn list_spool_frames(spool_path: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut out = Vec::new();
    if !spool_path.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(spool_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name
            .strip_prefix("frame_")
            .and_then(|s| s.strip_suffix(".jpg"))
            && let Ok(n) = rest.parse::<u64>()
        {
            out.push((n, entry.path()));
        }
    }
    out.sort_by_key(|(n, _)| *n);
    Ok(out)
}

/// Removes spool frames numbered below `keep_above` (retention cleanup),
/// mirroring the "drop oldest" behavior of the continuous capture spool.
pub fn cleanup_spool(spool_path: &Path, keep_above: u64) -> std::io::Result<()> {
    for (n, path) in list_spool_frames(spool_path)? {
        if n + 1 <= keep_above {
            let _ = std::fs::remove_file(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_listing_sorts_and_parses_sequence_numbers() {
        let dir = std::env::temp_dir().join(format!("lucidwatch-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("frame_000003.jpg"), b"c").unwrap();
        std::fs::write(dir.join("frame_000001.jpg"), b"a").unwrap();
        std::fs::write(dir.join("frame_000002.jpg"), b"b").unwrap();
        std::fs::write(dir.join("not_a_frame.txt"), b"x").unwrap();

        let frames = list_spool_frames(&dir).unwrap();
        assert_eq!(
            frames.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        cleanup_spool(&dir, 3).unwrap();
        let remaining = list_spool_frames(&dir).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, 3);

        std::fs::remove_dir_all(&dir).ok();
    }
}
