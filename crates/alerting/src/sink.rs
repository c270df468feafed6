//! Alert sinks: where patterns end up

use std::sync::{Arc, Mutex};

use fatigue::FatigueState;
use tracing::{info, warn};

use crate::{AlertError, AlertPattern};

/// Output device for alert patterns.
///
/// `apply` is called on every pattern change, never once per frame;
/// the device is expected to keep playing the pattern until told otherwise.
pub trait AlertSink: Send {
    fn name(&self) -> &str;

    fn apply(&mut self, pattern: AlertPattern, state: FatigueState) -> Result<(), AlertError>;
}

/// Writes pattern changes to the log; the default sink when no hardware is present
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn apply(&mut self, pattern: AlertPattern, state: FatigueState) -> Result<(), AlertError> {
        match pattern {
            AlertPattern::Off => info!("Alert off ({})", state),
            AlertPattern::FaultBlink => warn!("Alert pattern {}: {}", pattern, state),
            _ => warn!(
                "Alert pattern {} at {}% duty: {}",
                pattern,
                pattern.duty_percent(),
                state
            ),
        }
        Ok(())
    }
}

/// Keeps every applied pattern; clones share the same history
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    applied: Arc<Mutex<Vec<(AlertPattern, FatigueState)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patterns(&self) -> Vec<AlertPattern> {
        self.history().into_iter().map(|(p, _)| p).collect()
    }

    pub fn history(&self) -> Vec<(AlertPattern, FatigueState)> {
        match self.applied.lock() {
            Ok(applied) => applied.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<AlertPattern> {
        self.patterns().last().copied()
    }
}

impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn apply(&mut self, pattern: AlertPattern, state: FatigueState) -> Result<(), AlertError> {
        let mut applied = self.applied.lock().map_err(|_| AlertError::Sink {
            sink: "recording".into(),
            reason: "history lock poisoned".into(),
        })?;
        applied.push((pattern, state));
        Ok(())
    }
}
