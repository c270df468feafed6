//! Per-frame fatigue output

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::FatigueState;

/// Fatigue state plus the diagnostics behind it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FatigueAnalysis {
    /// Frame timestamp
    pub timestamp: Duration,

    /// Current fatigue state
    pub state: FatigueState,

    /// Closed fraction of the PERCLOS window
    pub perclos: f64,

    /// Current continuous closure
    pub closed_duration: Duration,

    /// Per-eye closed votes (None = disabled or no reading)
    pub left_closed: Option<bool>,
    pub right_closed: Option<bool>,

    /// Fused closure sample fed to the window (None = no evidence this frame)
    pub eyes_closed: Option<bool>,

    /// Yawns in the current period
    pub yawn_count: u32,
    pub yawn_warning: bool,

    /// Downward face offset, fraction of frame height
    pub gaze_deviation: f32,
    pub gaze_warning: bool,

    /// Head nods in the counting window
    pub nod_count: u32,
    /// Head held down past the nod limit
    pub head_down: bool,
}

impl FatigueAnalysis {
    /// Whether the state changed relative to `previous`
    pub fn is_transition_from(&self, previous: FatigueState) -> bool {
        self.state != previous
    }
}
