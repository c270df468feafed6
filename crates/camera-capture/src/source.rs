//! Frame sources
//!
//! The live V4L2/CSI driver lives outside this workspace; it only has to
//! implement [`FrameSource`]. The sources here replay recorded frames.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::frame::{PixelFormat, VideoFrame};
use crate::{CaptureConfig, CaptureError};

const IMAGE_EXTENSIONS: &[&str] = &["png", "pgm", "ppm", "jpg", "jpeg", "bmp"];

/// Yields frames one at a time, in capture order
pub trait FrameSource {
    /// Next frame, or `CaptureError::NoFrameAvailable` at end of stream
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError>;
}

/// Replays a directory of still images in file-name order
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    config: CaptureConfig,
}

impl ImageSequenceSource {
    /// Index the image files of `dir`
    pub fn open(dir: &Path, config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CaptureError::Capture(format!(
                "no image frames in {}",
                dir.display()
            )));
        }

        info!(
            "Replaying {} frames from {} at {} fps (crop {:.2})",
            paths.len(),
            dir.display(),
            config.fps,
            config.crop_ratio
        );

        Ok(Self {
            paths,
            cursor: 0,
            config,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn load(&self, path: &Path, sequence: u32) -> Result<VideoFrame, CaptureError> {
        let img = image::open(path)?;
        let timestamp_ns = u64::from(sequence) * self.config.frame_interval_ns();

        let frame = if self.config.grayscale {
            let gray = img.to_luma8();
            let (w, h) = gray.dimensions();
            VideoFrame::new(gray.into_raw(), w, h, PixelFormat::Gray8, timestamp_ns, sequence)?
        } else {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            VideoFrame::new(rgb.into_raw(), w, h, PixelFormat::Rgb24, timestamp_ns, sequence)?
        };

        Ok(frame.center_crop(self.config.crop_ratio))
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Err(CaptureError::NoFrameAvailable);
        };
        let sequence = self.cursor as u32;
        self.cursor += 1;
        debug!("Loading frame {} from {}", sequence, path.display());
        self.load(path, sequence)
    }
}

/// In-memory frame queue (synthetic streams, replay buffers)
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<VideoFrame>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = VideoFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn push(&mut self, frame: VideoFrame) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
        self.frames.pop_front().ok_or(CaptureError::NoFrameAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_memory_source_drains_in_order() {
        let mut source = MemorySource::new(vec![
            VideoFrame::filled(4, 4, 1, 0),
            VideoFrame::filled(4, 4, 2, 10),
        ]);
        assert_eq!(source.next_frame().unwrap().data[0], 1);
        assert_eq!(source.next_frame().unwrap().data[0], 2);
        assert!(matches!(
            source.next_frame(),
            Err(CaptureError::NoFrameAvailable)
        ));
    }

    #[test]
    fn test_image_sequence_source() {
        let dir = tempfile::tempdir().unwrap();
        for (i, value) in [10u8, 20, 30].iter().enumerate() {
            let img = GrayImage::from_pixel(8, 6, Luma([*value]));
            img.save(dir.path().join(format!("frame_{:03}.png", i))).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config = CaptureConfig {
            fps: 10,
            ..Default::default()
        };
        let mut source = ImageSequenceSource::open(dir.path(), config).unwrap();
        assert_eq!(source.len(), 3);

        let first = source.next_frame().unwrap();
        assert_eq!(first.timestamp_ns, 0);
        assert_eq!(first.format, PixelFormat::Gray8);
        assert_eq!(first.data[0], 10);

        let second = source.next_frame().unwrap();
        assert_eq!(second.timestamp_ns, 100_000_000);
        assert_eq!(second.sequence, 1);

        source.next_frame().unwrap();
        assert!(matches!(
            source.next_frame(),
            Err(CaptureError::NoFrameAvailable)
        ));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageSequenceSource::open(dir.path(), CaptureConfig::default());
        assert!(matches!(result, Err(CaptureError::Capture(_))));
    }
}
