//! Fatigue engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Value out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Values inconsistent with each other
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

/// How collected calibration probabilities are reduced to a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Mean,
    #[default]
    Median,
}

impl Aggregate {
    /// Reduce `values`; `None` when empty
    pub fn apply(self, values: &[f32]) -> Option<f32> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregate::Mean => Some(values.iter().sum::<f32>() / values.len() as f32),
            Aggregate::Median => Some(median(values)),
        }
    }
}

pub(crate) fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Per-eye calibration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Open-probability threshold used when calibration is skipped
    pub default_threshold: f32,
    /// Threshold = baseline * ratio
    pub ratio: f32,
    /// Threshold floor
    pub min_threshold: f32,
    /// Threshold ceiling
    pub max_threshold: f32,
    /// Baselines below this mean the ROI is not on an eye
    pub min_baseline: f32,
    /// Valid readings required per eye
    pub min_samples: usize,
    /// Readings kept per eye (memory bound, ends the session early)
    pub max_samples: usize,
    /// Calibration timeout (milliseconds)
    pub duration_ms: u64,
    pub aggregate: Aggregate,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.45,
            ratio: 0.40,
            min_threshold: 0.12,
            max_threshold: 0.38,
            min_baseline: 0.20,
            min_samples: 5,
            max_samples: 300,
            duration_ms: 5000,
            aggregate: Aggregate::Median,
        }
    }
}

impl CalibrationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Default threshold held to the same clamp as calibrated thresholds
    pub fn fallback_threshold(&self) -> f32 {
        self.default_threshold.clamp(self.min_threshold, self.max_threshold)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("calibration.default_threshold", self.default_threshold as f64, 0.0, 1.0)?;
        check_range("calibration.ratio", self.ratio as f64, 0.01, 1.0)?;
        check_range("calibration.min_threshold", self.min_threshold as f64, 0.0, 1.0)?;
        check_range("calibration.max_threshold", self.max_threshold as f64, 0.0, 1.0)?;
        check_range("calibration.min_baseline", self.min_baseline as f64, 0.0, 1.0)?;
        check_range("calibration.min_samples", self.min_samples as f64, 1.0, 10_000.0)?;
        check_range("calibration.duration_ms", self.duration_ms as f64, 100.0, 120_000.0)?;
        if self.min_threshold > self.max_threshold {
            return Err(ConfigError::Invalid {
                field: "calibration.min_threshold",
                reason: format!(
                    "floor {} is above ceiling {}",
                    self.min_threshold, self.max_threshold
                ),
            });
        }
        if self.max_samples < self.min_samples {
            return Err(ConfigError::Invalid {
                field: "calibration.max_samples",
                reason: format!(
                    "{} is below min_samples {}",
                    self.max_samples, self.min_samples
                ),
            });
        }
        Ok(())
    }
}

/// Yawn detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YawnConfig {
    /// Intensity drop (fraction of baseline) that counts as an open mouth
    pub drop_ratio: f32,
    /// Continuous open-mouth time for a yawn (milliseconds)
    pub min_duration_ms: u64,
    /// Rebounds shorter than this do not end a dip (milliseconds)
    pub rebound_tolerance_ms: u64,
    /// Pause between two counted yawns (milliseconds)
    pub cooldown_ms: u64,
    /// Yawns per period that raise the warning
    pub warn_count: u32,
    /// Counting period, the count resets on rollover (milliseconds)
    pub period_ms: u64,
    /// Closed-mouth samples needed to fix the baseline
    pub min_baseline_samples: usize,
    /// EMA weight of closed-mouth frames on the running baseline
    pub baseline_alpha: f32,
}

impl Default for YawnConfig {
    fn default() -> Self {
        Self {
            drop_ratio: 0.30,
            min_duration_ms: 2500,
            rebound_tolerance_ms: 500,
            cooldown_ms: 10_000,
            warn_count: 3,
            period_ms: 600_000, // 10 minutes
            min_baseline_samples: 6,
            baseline_alpha: 0.02,
        }
    }
}

impl YawnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("yawn.drop_ratio", self.drop_ratio as f64, 0.01, 0.99)?;
        check_range("yawn.min_duration_ms", self.min_duration_ms as f64, 100.0, 60_000.0)?;
        check_range("yawn.rebound_tolerance_ms", self.rebound_tolerance_ms as f64, 0.0, 10_000.0)?;
        check_range("yawn.cooldown_ms", self.cooldown_ms as f64, 0.0, 600_000.0)?;
        check_range("yawn.warn_count", self.warn_count as f64, 1.0, 1000.0)?;
        check_range("yawn.period_ms", self.period_ms as f64, 1000.0, 86_400_000.0)?;
        check_range("yawn.min_baseline_samples", self.min_baseline_samples as f64, 1.0, 10_000.0)?;
        check_range("yawn.baseline_alpha", self.baseline_alpha as f64, 0.0, 1.0)?;
        Ok(())
    }
}

/// Gaze (head drop) parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Downward offset of the face center, as a fraction of frame height
    pub deviation_threshold: f32,
    /// Continuous deviation time before the warning (milliseconds)
    pub duration_ms: u64,
    /// Confirmed episodes per session that also raise the warning (0 = off)
    pub episode_warn_count: u32,
    /// Moving-average length on the face position
    pub smoothing_frames: usize,
    /// Calibration samples needed for a baseline
    pub min_baseline_samples: usize,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: 0.10,
            duration_ms: 3000,
            episode_warn_count: 3,
            smoothing_frames: 5,
            min_baseline_samples: 5,
        }
    }
}

impl GazeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("gaze.deviation_threshold", self.deviation_threshold as f64, 0.01, 1.0)?;
        check_range("gaze.duration_ms", self.duration_ms as f64, 0.0, 60_000.0)?;
        check_range("gaze.smoothing_frames", self.smoothing_frames as f64, 1.0, 300.0)?;
        check_range("gaze.min_baseline_samples", self.min_baseline_samples as f64, 1.0, 10_000.0)?;
        Ok(())
    }
}

/// Head-nod parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodConfig {
    /// EMA weight of the newest face position (1 = no smoothing)
    pub smoothing_alpha: f32,
    /// Downward offset of the face center, in face heights, that counts as head down
    pub down_threshold: f32,
    /// Head-down run that counts as a nod once the head comes back (milliseconds)
    pub min_nod_ms: u64,
    pub max_nod_ms: u64,
    /// Quiet time after a head-down run ends (milliseconds)
    pub cooldown_ms: u64,
    /// Head held down this long raises an alert (milliseconds)
    pub head_down_ms: u64,
    /// Sliding window for counting nods (milliseconds)
    pub window_ms: u64,
    /// Nods in the window that raise ATTENTION
    pub warn_count: u32,
    /// Nods in the window that raise ALERT
    pub alert_count: u32,
    /// Face boxes smaller than this fraction of the frame height are ignored
    pub min_face_height: f32,
    /// Face absence after which the head-down tracking restarts (milliseconds)
    pub face_loss_reset_ms: u64,
    /// Calibration samples needed for a baseline
    pub min_baseline_samples: usize,
}

impl Default for NodConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.35,
            down_threshold: 0.12,
            min_nod_ms: 300,
            max_nod_ms: 3000,
            cooldown_ms: 2000,
            head_down_ms: 3000,
            window_ms: 300_000,
            warn_count: 2,
            alert_count: 4,
            min_face_height: 0.02,
            face_loss_reset_ms: 30_000,
            min_baseline_samples: 5,
        }
    }
}

impl NodConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("nod.smoothing_alpha", self.smoothing_alpha as f64, 0.01, 1.0)?;
        check_range("nod.down_threshold", self.down_threshold as f64, 0.01, 2.0)?;
        check_range("nod.max_nod_ms", self.max_nod_ms as f64, 1.0, 60_000.0)?;
        check_range("nod.head_down_ms", self.head_down_ms as f64, 100.0, 60_000.0)?;
        check_range("nod.window_ms", self.window_ms as f64, 1000.0, 3_600_000.0)?;
        check_range("nod.warn_count", self.warn_count as f64, 1.0, 1000.0)?;
        check_range("nod.min_face_height", self.min_face_height as f64, 0.0, 1.0)?;
        check_range("nod.min_baseline_samples", self.min_baseline_samples as f64, 1.0, 10_000.0)?;
        if self.min_nod_ms > self.max_nod_ms {
            return Err(ConfigError::Invalid {
                field: "nod.min_nod_ms",
                reason: format!("{} is above max_nod_ms {}", self.min_nod_ms, self.max_nod_ms),
            });
        }
        if self.warn_count > self.alert_count {
            return Err(ConfigError::Invalid {
                field: "nod.warn_count",
                reason: format!("{} is above alert_count {}", self.warn_count, self.alert_count),
            });
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Fatigue engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FatigueConfig {
    /// PERCLOS sliding window (milliseconds)
    pub window_ms: u64,

    /// PERCLOS at or above this raises ATTENTION
    pub perclos_warn: f64,

    /// PERCLOS at or above this raises ALERT
    pub perclos_alert: f64,

    /// Continuous closure that counts as a microsleep (milliseconds)
    pub microsleep_ms: u64,

    /// Consecutive closed votes before a frame is recorded closed (1 = off)
    pub closed_confirm_frames: u32,

    pub calibration: CalibrationConfig,
    pub yawn: YawnConfig,
    pub gaze: GazeConfig,
    pub nod: NodConfig,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            perclos_warn: 0.15,
            perclos_alert: 0.30,
            microsleep_ms: 1500,
            closed_confirm_frames: 1,
            calibration: CalibrationConfig::default(),
            yawn: YawnConfig::default(),
            gaze: GazeConfig::default(),
            nod: NodConfig::default(),
        }
    }
}

impl FatigueConfig {
    /// Create strict config (lower thresholds)
    pub fn strict() -> Self {
        Self {
            perclos_warn: 0.10,
            perclos_alert: 0.20,
            microsleep_ms: 1000,
            gaze: GazeConfig {
                duration_ms: 2000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create lenient config (higher thresholds)
    pub fn lenient() -> Self {
        Self {
            perclos_warn: 0.25,
            perclos_alert: 0.40,
            microsleep_ms: 3500,
            closed_confirm_frames: 3,
            gaze: GazeConfig {
                duration_ms: 5000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn microsleep(&self) -> Duration {
        Duration::from_millis(self.microsleep_ms)
    }

    /// Range-check every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("window_ms", self.window_ms as f64, 1000.0, 3_600_000.0)?;
        check_range("perclos_warn", self.perclos_warn, 0.0, 1.0)?;
        check_range("perclos_alert", self.perclos_alert, 0.0, 1.0)?;
        check_range("microsleep_ms", self.microsleep_ms as f64, 100.0, 60_000.0)?;
        check_range("closed_confirm_frames", self.closed_confirm_frames as f64, 1.0, 100.0)?;
        if self.perclos_warn > self.perclos_alert {
            return Err(ConfigError::Invalid {
                field: "perclos_warn",
                reason: format!(
                    "warn threshold {} is above alert threshold {}",
                    self.perclos_warn, self.perclos_alert
                ),
            });
        }
        self.calibration.validate()?;
        self.yawn.validate()?;
        self.gaze.validate()?;
        self.nod.validate()?;
        Ok(())
    }
}
