//! Alerting
//!
//! Maps the fatigue state to an alert pattern, drives the configured sinks
//! (buzzer, LED, log) and throttles the console report.

mod manager;
mod pattern;
mod sink;

pub use manager::{AlertConfig, AlertManager, AlertState};
pub use pattern::AlertPattern;
pub use sink::{AlertSink, LogSink, RecordingSink};

use thiserror::Error;

/// Alerting error types
#[derive(Error, Debug)]
pub enum AlertError {
    /// A sink could not switch pattern (driver fault, GPIO busy, ...)
    #[error("Alert sink {sink} failed: {reason}")]
    Sink { sink: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
