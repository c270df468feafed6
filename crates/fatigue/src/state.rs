//! Fatigue state

use serde::{Deserialize, Serialize};

/// Discrete fatigue state, recomputed every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FatigueState {
    #[default]
    Normal,
    /// PERCLOS above the warn threshold, frequent yawns, or gaze dropped
    Attention,
    /// PERCLOS above the alert threshold
    Alert,
    /// Continuous closure above the microsleep threshold
    Microsleep,
    /// No calibrated eye left to decide from; never reported as NORMAL
    InsufficientEvidence,
}

impl FatigueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FatigueState::Normal => "NORMAL",
            FatigueState::Attention => "ATTENTION",
            FatigueState::Alert => "ALERT",
            FatigueState::Microsleep => "MICROSLEEP",
            FatigueState::InsufficientEvidence => "INSUFFICIENT_EVIDENCE",
        }
    }

    /// Whether the driver should be warned
    pub fn is_fatigued(&self) -> bool {
        matches!(
            self,
            FatigueState::Attention | FatigueState::Alert | FatigueState::Microsleep
        )
    }

    /// States the hardware alert driver must signal
    pub fn is_critical(&self) -> bool {
        matches!(self, FatigueState::Alert | FatigueState::Microsleep)
    }
}

impl std::fmt::Display for FatigueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
