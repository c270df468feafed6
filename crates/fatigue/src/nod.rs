//! Head-nod detection from the face box
//!
//! A drowsy driver's head drops and snaps back up. The vertical center of the
//! face box is smoothed and compared with the calibrated neutral position, in
//! units of face height. A head-down run that ends within the nod duration
//! range counts one nod; a head held down past `head_down_ms` is reported on
//! its own. Nods are counted over a sliding window.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{median, NodConfig};

/// Face box position as fractions of the frame height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacePosition {
    pub center_y: f32,
    pub height: f32,
}

impl FacePosition {
    /// Normalize a pixel position; `None` on an empty frame or non-finite input
    pub fn from_pixels(center_y: f32, height: f32, frame_height: u32) -> Option<Self> {
        if frame_height == 0 || !center_y.is_finite() || !height.is_finite() || height <= 0.0 {
            return None;
        }
        let h = frame_height as f32;
        Some(Self {
            center_y: center_y / h,
            height: height / h,
        })
    }
}

/// Per-frame head-nod output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodStatus {
    /// Smoothed downward offset in face heights
    pub deviation: f32,
    /// Current head-down run
    pub down_duration: Duration,
    /// Nods inside the counting window
    pub count: u32,
    /// Head held down past the configured limit
    pub head_down: bool,
    pub warning: bool,
    pub alert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Down { since: Duration },
    Cooldown { until: Duration },
}

#[derive(Debug)]
pub struct HeadNodDetector {
    config: NodConfig,
    baseline: Option<f32>,
    face_height: f32,
    baseline_samples: Vec<FacePosition>,
    smoothed: Option<f32>,
    phase: Phase,
    nods: VecDeque<Duration>,
    face_lost_since: Option<Duration>,
    deviation: f32,
}

impl HeadNodDetector {
    pub fn new(config: NodConfig) -> Self {
        Self {
            config,
            baseline: None,
            face_height: 0.15,
            baseline_samples: Vec::new(),
            smoothed: None,
            phase: Phase::Idle,
            nods: VecDeque::new(),
            face_lost_since: None,
            deviation: 0.0,
        }
    }

    /// Collect a neutral face position during calibration
    pub fn observe_baseline(&mut self, face: FacePosition) {
        self.baseline_samples.push(face);
    }

    /// Fix the neutral position; returns whether detection is active
    pub fn finalize_baseline(&mut self) -> bool {
        let samples = std::mem::take(&mut self.baseline_samples);
        if samples.len() >= self.config.min_baseline_samples {
            let ys: Vec<f32> = samples.iter().map(|f| f.center_y).collect();
            let hs: Vec<f32> = samples.iter().map(|f| f.height).collect();
            let baseline = median(&ys);
            self.face_height = median(&hs);
            info!(
                "Head-nod baseline: Y={:.3}, face height {:.3} ({} samples)",
                baseline,
                self.face_height,
                samples.len()
            );
            self.baseline = Some(baseline);
        } else if self.baseline.is_some() {
            warn!("Head-nod baseline: {} samples, keeping previous baseline", samples.len());
        } else {
            warn!(
                "Head-nod baseline: {} samples ({} required), nod detection disabled",
                samples.len(),
                self.config.min_baseline_samples
            );
        }
        self.baseline.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.baseline.is_some()
    }

    /// Feed one frame; `None` means no face
    pub fn update(&mut self, face: Option<FacePosition>, now: Duration) -> NodStatus {
        let Some(baseline) = self.baseline else {
            return NodStatus::default();
        };
        self.evict(now);

        let Some(face) = face else {
            let lost_since = *self.face_lost_since.get_or_insert(now);
            if now.saturating_sub(lost_since) >= Duration::from_millis(self.config.face_loss_reset_ms) {
                debug!("Face absent for {:?}, head-nod tracking restarted", now - lost_since);
                self.clear_tracking();
            }
            self.deviation = 0.0;
            return self.status(now);
        };
        self.face_lost_since = None;

        if face.height < self.config.min_face_height {
            return self.status(now);
        }

        self.face_height = 0.95 * self.face_height + 0.05 * face.height;
        let alpha = self.config.smoothing_alpha;
        let smoothed = match self.smoothed {
            Some(prev) => alpha * face.center_y + (1.0 - alpha) * prev,
            None => face.center_y,
        };
        self.smoothed = Some(smoothed);
        self.deviation = (smoothed - baseline) / self.face_height.max(0.01);
        let is_down = self.deviation > self.config.down_threshold;

        let phase = self.phase;
        self.phase = match phase {
            Phase::Idle if is_down => Phase::Down { since: now },
            Phase::Down { since } if !is_down => {
                let held = now.saturating_sub(since);
                let range = Duration::from_millis(self.config.min_nod_ms)
                    ..=Duration::from_millis(self.config.max_nod_ms);
                if range.contains(&held) {
                    self.nods.push_back(now);
                    info!(
                        "Head nod ({:.1}s), {} in window",
                        held.as_secs_f32(),
                        self.nods.len()
                    );
                }
                Phase::Cooldown {
                    until: now + Duration::from_millis(self.config.cooldown_ms),
                }
            }
            Phase::Cooldown { until } if now >= until => Phase::Idle,
            phase => phase,
        };

        self.status(now)
    }

    /// Clear nods and tracking; the baseline is kept
    pub fn reset(&mut self) {
        self.nods.clear();
        self.clear_tracking();
    }

    fn clear_tracking(&mut self) {
        self.phase = Phase::Idle;
        self.smoothed = None;
        self.face_lost_since = None;
        self.deviation = 0.0;
    }

    fn evict(&mut self, now: Duration) {
        let Some(cutoff) = now.checked_sub(self.config.window()) else {
            return;
        };
        while self.nods.front().is_some_and(|t| *t <= cutoff) {
            self.nods.pop_front();
        }
    }

    fn status(&self, now: Duration) -> NodStatus {
        let down_duration = match self.phase {
            Phase::Down { since } => now.saturating_sub(since),
            _ => Duration::ZERO,
        };
        let head_down = down_duration > Duration::from_millis(self.config.head_down_ms);
        let count = self.nods.len() as u32;
        NodStatus {
            deviation: self.deviation,
            down_duration,
            count,
            head_down,
            warning: count >= self.config.warn_count,
            alert: head_down || count >= self.config.alert_count,
        }
    }
}
