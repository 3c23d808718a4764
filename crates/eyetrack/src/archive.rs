//! Raw-frame persistence hook.

use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};

use crate::error::ArchiveError;
use crate::frame::Frame;

/// Receives every frame the worker acquires, before tracking.
pub trait FrameSink: Send {
    fn persist(&mut self, frame: &Frame, timestamp: f64, frame_number: u64)
        -> Result<(), ArchiveError>;
}

/// Writes frames as 16-bit grayscale PNGs named by frame number.
///
/// Samples are clamped to `[0, 1]` before quantisation.
#[derive(Debug, Clone)]
pub struct PngArchive {
    dir: PathBuf,
    stride: u64,
    written: u64,
}

impl PngArchive {
    /// Archive into `dir`, creating it if needed.
    pub fn create(dir: &Path) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(dir).map_err(|source| ArchiveError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            stride: 1,
            written: 0,
        })
    }

    /// Keep only every `stride`-th frame (by frame number).
    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride.max(1);
        self
    }

    /// Files written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Output path for a frame number.
    pub fn path_for(&self, frame_number: u64) -> PathBuf {
        self.dir.join(format!("frame_{frame_number:08}.png"))
    }
}

impl FrameSink for PngArchive {
    fn persist(
        &mut self,
        frame: &Frame,
        timestamp: f64,
        frame_number: u64,
    ) -> Result<(), ArchiveError> {
        if frame_number % self.stride != 0 {
            return Ok(());
        }
        let (w, h) = frame.dimensions();
        let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(w, h, |x, y| {
            let v = frame.get_pixel(x, y)[0];
            let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
            Luma([(v * u16::MAX as f32).round() as u16])
        });
        let path = self.path_for(frame_number);
        img.save(&path)
            .map_err(|source| ArchiveError::Write { path: path.clone(), source })?;
        self.written += 1;
        tracing::trace!(path = %path.display(), timestamp, "archived frame");
        Ok(())
    }
}
