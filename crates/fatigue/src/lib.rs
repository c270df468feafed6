//! Fatigue fusion engine
//!
//! Turns noisy per-frame perception outputs into one fatigue state per frame:
//! - Per-eye calibration of the open/closed threshold
//! - PERCLOS over a sliding time window
//! - Microsleep detection on continuous closure
//! - Yawn counting from mouth-region intensity
//! - Gaze (head drop) tracking from the face position
//! - Head-nod counting from the face box motion
//!
//! Everything here is causal and single-threaded: callers feed frames in
//! strictly increasing timestamp order.

pub mod analysis;
pub mod calibration;
pub mod config;
pub mod gaze;
pub mod monitor;
pub mod nod;
pub mod state;
pub mod window;
pub mod yawn;

pub use analysis::FatigueAnalysis;
pub use calibration::{
    CalibrationError, CalibrationOutcome, CalibrationProfile, CalibrationSession, Calibrator,
    EyeCalibration,
};
pub use config::{
    Aggregate, CalibrationConfig, ConfigError, FatigueConfig, GazeConfig, NodConfig, YawnConfig,
};
pub use gaze::{GazeMonitor, GazeState, GazeStatus};
pub use monitor::{EyeObservation, FatigueMonitor};
pub use nod::{FacePosition, HeadNodDetector, NodStatus};
pub use state::FatigueState;
pub use window::{ClosureSample, ClosureWindow};
pub use yawn::{YawnDetector, YawnState, YawnStatus};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatigue engine error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FatigueError {
    /// Non-monotonic timestamp reached the monitor (upstream contract violation)
    #[error("Timestamp out of order: received {received:?} after {previous:?}")]
    TimestampOrder {
        previous: Duration,
        received: Duration,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Which eye a reading or region belongs to (camera point of view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EyeSide {
    Left,
    Right,
}

impl EyeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            EyeSide::Left => "left",
            EyeSide::Right => "right",
        }
    }
}

/// Classifier output for one eye on one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeReading {
    pub side: EyeSide,
    /// Probability that the eye is open, in [0, 1]
    pub prob_open: f32,
    pub timestamp: Duration,
}

impl EyeReading {
    pub fn new(side: EyeSide, prob_open: f32, timestamp: Duration) -> Self {
        Self {
            side,
            prob_open,
            timestamp,
        }
    }

    /// A reading is usable only if it is a probability
    pub fn is_valid(&self) -> bool {
        self.prob_open.is_finite() && (0.0..=1.0).contains(&self.prob_open)
    }
}
