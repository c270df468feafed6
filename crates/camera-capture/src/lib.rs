//! Camera Capture Library for the fatigue monitor
//!
//! Provides the frame model handed from acquisition to the perception stage:
//! - Cabin IR camera frames (low resolution, grayscale or RGB)
//! - Center crop for wide-FOV lenses
//! - Region intensity measurements used by the mouth tracker
//! - `FrameSource` contract with image-sequence and in-memory sources

pub mod frame;
pub mod source;

pub use frame::{PixelFormat, VideoFrame};
pub use source::{FrameSource, ImageSequenceSource, MemorySource};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capture error types
#[derive(Error, Debug)]
pub enum CaptureError {
    /// End of stream
    #[error("No frame available")]
    NoFrameAvailable,

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Nominal frame rate, used to timestamp replayed frames
    pub fps: u32,
    /// Fraction of the frame kept by the center crop (1.0 = no crop)
    pub crop_ratio: f32,
    /// Convert frames to single-channel luma on load
    pub grayscale: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            crop_ratio: 1.0,
            grayscale: true,
        }
    }
}

impl CaptureConfig {
    /// Cabin camera behind a 160° lens, keeps the central 65 %
    pub fn wide_angle() -> Self {
        Self {
            crop_ratio: 0.65,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.fps == 0 || self.fps > 240 {
            return Err(CaptureError::Config(format!(
                "fps {} is out of range [1, 240]",
                self.fps
            )));
        }
        if !(self.crop_ratio > 0.0 && self.crop_ratio <= 1.0) {
            return Err(CaptureError::Config(format!(
                "crop_ratio {} is out of range (0, 1]",
                self.crop_ratio
            )));
        }
        Ok(())
    }

    /// Interval between two frames at the nominal rate (nanoseconds)
    pub fn frame_interval_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.fps.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CaptureConfig::default().validate().is_ok());
        assert!(CaptureConfig::wide_angle().validate().is_ok());
    }

    #[test]
    fn test_invalid_crop_ratio() {
        let config = CaptureConfig {
            crop_ratio: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CaptureConfig {
            crop_ratio: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_interval() {
        let config = CaptureConfig {
            fps: 10,
            ..Default::default()
        };
        assert_eq!(config.frame_interval_ns(), 100_000_000);
    }
}
