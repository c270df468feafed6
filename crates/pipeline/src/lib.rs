//! Fatigue monitoring pipeline
//!
//! Glues the stages together for one driver session:
//! frame source -> perception -> calibration / yawn / gaze / nod -> fatigue monitor -> alerts.
//! Also owns system configuration loading and logging setup for the binary.

pub mod control;
pub mod session;
pub mod settings;

pub use control::{run, ControlCommand, RunSummary};
pub use session::{FatigueSession, FrameReport, SessionStats};
pub use settings::{LoggingConfig, SessionConfig, SystemConfig};

use alerting::AlertError;
use camera_capture::CaptureError;
use fatigue::FatigueError;
use perception::PerceptionError;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Invalid fatigue configuration: {0}")]
    FatigueConfig(#[from] fatigue::ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Perception error: {0}")]
    Perception(#[from] PerceptionError),

    #[error("Fatigue engine error: {0}")]
    Fatigue(#[from] FatigueError),

    #[error("Alerting error: {0}")]
    Alert(#[from] AlertError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `info` level.
pub fn init_logging(json: bool) -> Result<(), PipelineError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| PipelineError::Logging(e.to_string()))
}
