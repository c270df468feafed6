//! Alert patterns

use std::time::Duration;

use fatigue::FatigueState;
use serde::{Deserialize, Serialize};

/// What the hardware alert should do for a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPattern {
    #[default]
    Off,
    /// 1 s on, 1 s off
    SlowIntermittent,
    /// 250 ms on, 250 ms off
    FastIntermittent,
    Continuous,
    /// 100 ms blip every 2 s: the monitor cannot see the eyes
    FaultBlink,
}

impl AlertPattern {
    pub fn for_state(state: FatigueState) -> Self {
        match state {
            FatigueState::Normal => AlertPattern::Off,
            FatigueState::Attention => AlertPattern::SlowIntermittent,
            FatigueState::Alert => AlertPattern::FastIntermittent,
            FatigueState::Microsleep => AlertPattern::Continuous,
            FatigueState::InsufficientEvidence => AlertPattern::FaultBlink,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPattern::Off => "off",
            AlertPattern::SlowIntermittent => "slow_intermittent",
            AlertPattern::FastIntermittent => "fast_intermittent",
            AlertPattern::Continuous => "continuous",
            AlertPattern::FaultBlink => "fault_blink",
        }
    }

    /// PWM duty cycle (percent) while the signal is on
    pub fn duty_percent(&self) -> u8 {
        match self {
            AlertPattern::Off => 0,
            AlertPattern::SlowIntermittent => 30,
            AlertPattern::FastIntermittent => 50,
            AlertPattern::Continuous => 80,
            AlertPattern::FaultBlink => 20,
        }
    }

    /// Signal level `elapsed` after the pattern started
    pub fn is_on(&self, elapsed: Duration) -> bool {
        let ms = elapsed.as_millis();
        match self {
            AlertPattern::Off => false,
            AlertPattern::SlowIntermittent => (ms / 1000) % 2 == 0,
            AlertPattern::FastIntermittent => (ms / 250) % 2 == 0,
            AlertPattern::Continuous => true,
            AlertPattern::FaultBlink => ms % 2000 < 100,
        }
    }
}

impl std::fmt::Display for AlertPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
