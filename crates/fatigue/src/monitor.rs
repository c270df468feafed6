//! Fusion core: closure evidence, PERCLOS, microsleep and the state machine

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analysis::FatigueAnalysis;
use crate::calibration::CalibrationProfile;
use crate::config::FatigueConfig;
use crate::gaze::GazeStatus;
use crate::nod::NodStatus;
use crate::state::FatigueState;
use crate::window::{ClosureSample, ClosureWindow};
use crate::yawn::YawnStatus;
use crate::{EyeReading, FatigueError};

/// Eye classifier outputs for one frame, `None` when a ROI was invalid or
/// classification failed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeObservation {
    pub left: Option<EyeReading>,
    pub right: Option<EyeReading>,
}

impl EyeObservation {
    pub fn new(left: Option<EyeReading>, right: Option<EyeReading>) -> Self {
        Self { left, right }
    }

    /// No reading at all (face lost)
    pub fn none() -> Self {
        Self::default()
    }
}

/// Signals the state decision is made from
#[derive(Debug, Clone, Copy)]
struct Signals {
    closed_duration: Duration,
    perclos: f64,
    yawn_warning: bool,
    gaze_warning: bool,
    nod_warning: bool,
    /// Head held down, too many nods, or a nod on top of the yawn warning
    nod_alert: bool,
}

/// Fatigue monitor
pub struct FatigueMonitor {
    config: FatigueConfig,
    window: ClosureWindow,
    last_timestamp: Option<Duration>,
    /// Onset of the current continuous closure
    closed_since: Option<Duration>,
    closed_streak: u32,
    state: FatigueState,
    last_analysis: Option<FatigueAnalysis>,
}

impl FatigueMonitor {
    /// Create a new fatigue monitor
    pub fn new(config: FatigueConfig) -> Result<Self, FatigueError> {
        config.validate()?;
        info!("Creating fatigue monitor with config: {:?}", config);

        Ok(Self {
            window: ClosureWindow::new(config.window()),
            config,
            last_timestamp: None,
            closed_since: None,
            closed_streak: 0,
            state: FatigueState::Normal,
            last_analysis: None,
        })
    }

    pub fn config(&self) -> &FatigueConfig {
        &self.config
    }

    /// State reported on the last accepted frame
    pub fn state(&self) -> FatigueState {
        self.state
    }

    pub fn last_analysis(&self) -> Option<&FatigueAnalysis> {
        self.last_analysis.as_ref()
    }

    pub fn window(&self) -> &ClosureWindow {
        &self.window
    }

    /// Process one frame.
    ///
    /// Timestamps must be strictly increasing; a frame at or before the
    /// previous one is rejected and leaves every piece of state untouched.
    pub fn update(
        &mut self,
        timestamp: Duration,
        eyes: &EyeObservation,
        profile: &CalibrationProfile,
        yawn: &YawnStatus,
        gaze: &GazeStatus,
        nod: &NodStatus,
    ) -> Result<FatigueAnalysis, FatigueError> {
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                warn!(
                    "Rejecting frame at {:?}: not after previous frame at {:?}",
                    timestamp, previous
                );
                return Err(FatigueError::TimestampOrder {
                    previous,
                    received: timestamp,
                });
            }
        }
        self.last_timestamp = Some(timestamp);

        let left_closed = eyes.left.and_then(|r| profile.left.is_closed(&r));
        let right_closed = eyes.right.and_then(|r| profile.right.is_closed(&r));

        let eyes_closed = if profile.has_evidence() {
            self.record(timestamp, fuse(left_closed, right_closed))?
        } else {
            None
        };
        self.window.evict(timestamp);

        let signals = Signals {
            closed_duration: self.closed_duration(),
            perclos: self.window.perclos(),
            yawn_warning: yawn.warning,
            gaze_warning: gaze.warning,
            nod_warning: nod.warning,
            nod_alert: nod.alert || (nod.count > 0 && yawn.warning),
        };
        let state = if profile.has_evidence() {
            resolve_state(&self.config, &signals)
        } else {
            FatigueState::InsufficientEvidence
        };

        let analysis = FatigueAnalysis {
            timestamp,
            state,
            perclos: signals.perclos,
            closed_duration: signals.closed_duration,
            left_closed,
            right_closed,
            eyes_closed,
            yawn_count: yawn.count,
            yawn_warning: yawn.warning,
            gaze_deviation: gaze.deviation,
            gaze_warning: gaze.warning,
            nod_count: nod.count,
            head_down: nod.head_down,
        };

        if analysis.is_transition_from(self.state) {
            info!(
                "Fatigue state {} -> {} (perclos={:.1}%, closed={:.1}s, yawns={}, gaze={:.2}, nods={})",
                self.state,
                state,
                signals.perclos * 100.0,
                signals.closed_duration.as_secs_f32(),
                yawn.count,
                gaze.deviation,
                nod.count
            );
        }
        self.state = state;
        self.last_analysis = Some(analysis.clone());
        Ok(analysis)
    }

    /// Clear closure history and timers. The calibration profile is owned
    /// elsewhere and never touched; timestamp ordering stays enforced.
    pub fn reset(&mut self) {
        info!("Fatigue monitor reset");
        self.window.clear();
        self.closed_since = None;
        self.closed_streak = 0;
        self.state = FatigueState::Normal;
        self.last_analysis = None;
    }

    /// Apply the confirmation streak and feed the window.
    /// Returns the closure value that was recorded.
    fn record(&mut self, timestamp: Duration, vote: Option<bool>) -> Result<Option<bool>, FatigueError> {
        let Some(vote) = vote else {
            debug!("No closure evidence at {:?}", timestamp);
            // a closure cannot span frames nobody observed
            self.window.push_gap(timestamp)?;
            self.closed_since = None;
            self.closed_streak = 0;
            return Ok(None);
        };

        let closed = if vote {
            self.closed_streak = self.closed_streak.saturating_add(1);
            self.closed_streak >= self.config.closed_confirm_frames
        } else {
            self.closed_streak = 0;
            false
        };

        self.window.push(ClosureSample { timestamp, closed })?;
        if closed {
            self.closed_since.get_or_insert(timestamp);
        } else {
            self.closed_since = None;
        }
        Ok(Some(closed))
    }

    /// Continuous closure up to the current frame
    fn closed_duration(&self) -> Duration {
        match (self.closed_since, self.last_timestamp) {
            (Some(since), Some(now)) => now.saturating_sub(since),
            _ => Duration::ZERO,
        }
    }
}

/// A frame is closed if any usable eye votes closed; `None` without votes
fn fuse(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (None, None) => None,
        (l, r) => Some(l == Some(true) || r == Some(true)),
    }
}

/// Descending priority, first match wins
fn resolve_state(config: &FatigueConfig, signals: &Signals) -> FatigueState {
    if signals.closed_duration >= config.microsleep() {
        FatigueState::Microsleep
    } else if signals.perclos >= config.perclos_alert || signals.nod_alert {
        FatigueState::Alert
    } else if signals.perclos >= config.perclos_warn
        || signals.yawn_warning
        || signals.gaze_warning
        || signals.nod_warning
    {
        FatigueState::Attention
    } else {
        FatigueState::Normal
    }
}
