//! Yawn detection from mouth-region intensity
//!
//! An open mouth shows up as a dark cavity in the mouth ROI, so the mean
//! intensity drops relative to the closed-mouth baseline. A dip that lasts
//! `min_duration` is a yawn. Rebounds above the threshold shorter than
//! `rebound_tolerance` do not end the dip, and one dip counts at most once.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{median, YawnConfig};

/// Snapshot of the yawn counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YawnState {
    /// Yawns counted in the current period
    pub count: u32,
    /// Start of the dip in progress
    pub dip_started: Option<Duration>,
    /// No new yawn is counted before this instant
    pub cooldown_until: Option<Duration>,
    /// Start of the current counting period
    pub period_started: Option<Duration>,
}

/// Per-frame yawn output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct YawnStatus {
    pub count: u32,
    /// Count reached the configured threshold within the period
    pub warning: bool,
    pub mouth_open: bool,
    /// Relative darkening against the baseline, 0 = baseline
    pub drop_ratio: f32,
    /// A yawn was counted on this frame
    pub yawn_detected: bool,
}

#[derive(Debug)]
pub struct YawnDetector {
    config: YawnConfig,
    baseline: Option<f32>,
    baseline_samples: Vec<f32>,
    state: YawnState,
    rebound_started: Option<Duration>,
    counted_in_dip: bool,
}

impl YawnDetector {
    pub fn new(config: YawnConfig) -> Self {
        Self {
            config,
            baseline: None,
            baseline_samples: Vec::new(),
            state: YawnState::default(),
            rebound_started: None,
            counted_in_dip: false,
        }
    }

    /// Collect a closed-mouth intensity during calibration
    pub fn observe_baseline(&mut self, intensity: f32) {
        if is_valid_intensity(intensity) {
            self.baseline_samples.push(intensity);
        }
    }

    /// Fix the baseline from the collected samples.
    ///
    /// Returns whether yawn detection is active. With too few samples a
    /// previous baseline is kept, otherwise detection stays disabled.
    pub fn finalize_baseline(&mut self) -> bool {
        let samples = std::mem::take(&mut self.baseline_samples);
        if samples.len() >= self.config.min_baseline_samples {
            let baseline = median(&samples);
            info!(
                "Yawn baseline: intensity={:.1} ({} samples), open below {:.1}",
                baseline,
                samples.len(),
                baseline * (1.0 - self.config.drop_ratio)
            );
            self.baseline = Some(baseline);
        } else if self.baseline.is_some() {
            warn!(
                "Yawn baseline: {} samples, keeping previous baseline",
                samples.len()
            );
        } else {
            warn!(
                "Yawn baseline: {} samples ({} required), yawn detection disabled",
                samples.len(),
                self.config.min_baseline_samples
            );
        }
        self.baseline.is_some()
    }

    pub fn baseline(&self) -> Option<f32> {
        self.baseline
    }

    pub fn is_active(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn state(&self) -> &YawnState {
        &self.state
    }

    /// Feed one frame. `None` means no mouth ROI (face lost) and ends any dip.
    pub fn update(&mut self, intensity: Option<f32>, now: Duration) -> YawnStatus {
        self.roll_period(now);

        let Some(baseline) = self.baseline else {
            return self.status(false, 0.0, false);
        };
        let Some(current) = intensity.filter(|v| is_valid_intensity(*v)) else {
            self.end_dip();
            return self.status(false, 0.0, false);
        };

        let drop_ratio = (1.0 - current / baseline).max(0.0);
        let mouth_open = drop_ratio > self.config.drop_ratio;
        let mut detected = false;

        if mouth_open {
            self.rebound_started = None;
            let started = *self.state.dip_started.get_or_insert(now);
            let duration = now.saturating_sub(started);
            let cooled = self.state.cooldown_until.map_or(true, |until| now >= until);

            if !self.counted_in_dip && duration >= self.min_duration() && cooled {
                self.state.count += 1;
                self.state.cooldown_until = Some(now + Duration::from_millis(self.config.cooldown_ms));
                self.counted_in_dip = true;
                detected = true;
                info!(
                    "Yawn #{} detected (intensity={:.0}/{:.0}, drop={:.0}%, duration={:.1}s)",
                    self.state.count,
                    current,
                    baseline,
                    drop_ratio * 100.0,
                    duration.as_secs_f32()
                );
            }
        } else if self.state.dip_started.is_some() {
            let rebound = *self.rebound_started.get_or_insert(now);
            if now.saturating_sub(rebound) >= Duration::from_millis(self.config.rebound_tolerance_ms) {
                debug!("Yawn dip ended after rebound");
                self.end_dip();
            }
        } else {
            // Track slow lighting changes on closed-mouth frames only
            let alpha = self.config.baseline_alpha;
            self.baseline = Some(baseline * (1.0 - alpha) + current * alpha);
        }

        self.status(mouth_open, drop_ratio, detected)
    }

    /// Clear counters and any dip in progress; the baseline is kept
    pub fn reset(&mut self) {
        self.state = YawnState::default();
        self.rebound_started = None;
        self.counted_in_dip = false;
    }

    fn min_duration(&self) -> Duration {
        Duration::from_millis(self.config.min_duration_ms)
    }

    fn end_dip(&mut self) {
        self.state.dip_started = None;
        self.rebound_started = None;
        self.counted_in_dip = false;
    }

    fn roll_period(&mut self, now: Duration) {
        let period = Duration::from_millis(self.config.period_ms);
        match self.state.period_started {
            None => self.state.period_started = Some(now),
            Some(started) if now.saturating_sub(started) >= period => {
                if self.state.count > 0 {
                    info!("Yawn period rolled over, {} yawns cleared", self.state.count);
                }
                self.state.count = 0;
                self.state.period_started = Some(now);
            }
            Some(_) => {}
        }
    }

    fn status(&self, mouth_open: bool, drop_ratio: f32, yawn_detected: bool) -> YawnStatus {
        YawnStatus {
            count: self.state.count,
            warning: self.state.count >= self.config.warn_count,
            mouth_open,
            drop_ratio,
            yawn_detected,
        }
    }
}

fn is_valid_intensity(value: f32) -> bool {
    value.is_finite() && value > 0.0
}
