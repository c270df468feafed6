//! Gaze (head drop) monitoring from the face position
//!
//! The vertical center of the face box is compared with the neutral position
//! recorded during calibration. Deviation is expressed as a fraction of the
//! frame height, positive downward. Only a continuous run above the threshold
//! counts; any frame back under it restarts the timer.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{median, GazeConfig};

/// Snapshot of the gaze tracking state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeState {
    /// Neutral face-center Y, fraction of frame height
    pub baseline: Option<f32>,
    /// Current continuous deviation time
    pub duration: Duration,
    pub warning: bool,
}

/// Per-frame gaze output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeStatus {
    /// Smoothed downward offset, fraction of frame height
    pub deviation: f32,
    pub duration: Duration,
    /// Deviation held for the configured duration
    pub looking_down: bool,
    /// Confirmed episodes since the last reset
    pub episodes: u32,
    pub warning: bool,
}

#[derive(Debug)]
pub struct GazeMonitor {
    config: GazeConfig,
    baseline: Option<f32>,
    baseline_samples: Vec<f32>,
    history: VecDeque<f32>,
    down_started: Option<Duration>,
    looking_down: bool,
    episodes: u32,
    last: GazeStatus,
}

impl GazeMonitor {
    pub fn new(config: GazeConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.smoothing_frames),
            config,
            baseline: None,
            baseline_samples: Vec::new(),
            down_started: None,
            looking_down: false,
            episodes: 0,
            last: GazeStatus::default(),
        }
    }

    /// Collect a neutral face position during calibration
    pub fn observe_baseline(&mut self, center_y: f32, frame_height: u32) {
        if let Some(y) = normalize(center_y, frame_height) {
            self.baseline_samples.push(y);
        }
    }

    /// Fix the neutral position; returns whether monitoring is active
    pub fn finalize_baseline(&mut self) -> bool {
        let samples = std::mem::take(&mut self.baseline_samples);
        if samples.len() >= self.config.min_baseline_samples {
            let baseline = median(&samples);
            info!("Gaze baseline: Y={:.3} ({} samples)", baseline, samples.len());
            self.baseline = Some(baseline);
        } else if self.baseline.is_some() {
            warn!("Gaze baseline: {} samples, keeping previous baseline", samples.len());
        } else {
            warn!(
                "Gaze baseline: {} samples ({} required), gaze monitoring disabled",
                samples.len(),
                self.config.min_baseline_samples
            );
        }
        self.baseline.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn state(&self) -> GazeState {
        GazeState {
            baseline: self.baseline,
            duration: self.last.duration,
            warning: self.last.warning,
        }
    }

    /// Feed one frame. `None` means no face: the timer and smoothing restart.
    pub fn update(&mut self, center_y: Option<f32>, frame_height: u32, now: Duration) -> GazeStatus {
        let Some(baseline) = self.baseline else {
            return GazeStatus::default();
        };

        let Some(y) = center_y.and_then(|y| normalize(y, frame_height)) else {
            self.history.clear();
            self.clear_timer();
            self.last = self.status(0.0, Duration::ZERO);
            return self.last;
        };

        if self.history.len() >= self.config.smoothing_frames {
            self.history.pop_front();
        }
        self.history.push_back(y);
        let smoothed = self.history.iter().sum::<f32>() / self.history.len() as f32;
        let deviation = smoothed - baseline;

        let duration = if deviation > self.config.deviation_threshold {
            let started = *self.down_started.get_or_insert(now);
            let duration = now.saturating_sub(started);
            if !self.looking_down && duration >= Duration::from_millis(self.config.duration_ms) {
                self.looking_down = true;
                self.episodes += 1;
                info!(
                    "Gaze drop #{} (deviation={:.2}, duration={:.1}s)",
                    self.episodes,
                    deviation,
                    duration.as_secs_f32()
                );
            }
            duration
        } else {
            self.clear_timer();
            Duration::ZERO
        };

        self.last = self.status(deviation, duration);
        self.last
    }

    /// Clear timer, episodes and smoothing; the baseline is kept
    pub fn reset(&mut self) {
        self.history.clear();
        self.clear_timer();
        self.episodes = 0;
        self.last = GazeStatus::default();
    }

    fn clear_timer(&mut self) {
        self.down_started = None;
        self.looking_down = false;
    }

    fn status(&self, deviation: f32, duration: Duration) -> GazeStatus {
        let too_many =
            self.config.episode_warn_count > 0 && self.episodes >= self.config.episode_warn_count;
        GazeStatus {
            deviation,
            duration,
            looking_down: self.looking_down,
            episodes: self.episodes,
            warning: self.looking_down || too_many,
        }
    }
}

fn normalize(center_y: f32, frame_height: u32) -> Option<f32> {
    if frame_height == 0 || !center_y.is_finite() {
        return None;
    }
    Some(center_y / frame_height as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: u32 = 240;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn config() -> GazeConfig {
        GazeConfig {
            smoothing_frames: 1,
            ..Default::default()
        }
    }

    fn calibrated(config: GazeConfig) -> GazeMonitor {
        let mut monitor = GazeMonitor::new(config);
        for _ in 0..10 {
            monitor.observe_baseline(120.0, H);
        }
        assert!(monitor.finalize_baseline());
        monitor
    }

    #[test]
    fn test_inactive_without_baseline() {
        let mut monitor = GazeMonitor::new(config());
        monitor.observe_baseline(120.0, H);
        assert!(!monitor.finalize_baseline());
        let status = monitor.update(Some(200.0), H, ms(0));
        assert_eq!(status, GazeStatus::default());
    }

    #[test]
    fn test_sustained_drop_warns() {
        let mut monitor = calibrated(config());
        // 0.2 of frame height below neutral
        let mut status = GazeStatus::default();
        for i in 0..=30 {
            status = monitor.update(Some(168.0), H, ms(i * 100));
            if i < 30 {
                assert!(!status.warning);
            }
        }
        assert!(status.looking_down);
        assert!(status.warning);
        assert_eq!(status.episodes, 1);
        assert!((status.deviation - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_sub_threshold_frame_restarts_timer() {
        let mut monitor = calibrated(config());
        for i in 0..25 {
            monitor.update(Some(168.0), H, ms(i * 100));
        }
        let status = monitor.update(Some(121.0), H, ms(2500));
        assert_eq!(status.duration, Duration::ZERO);

        // 2.8 s of renewed deviation is still short
        for i in 26..=54 {
            let status = monitor.update(Some(168.0), H, ms(i * 100));
            assert!(!status.warning);
        }
    }

    #[test]
    fn test_upward_motion_is_not_a_drop() {
        let mut monitor = calibrated(config());
        for i in 0..50 {
            let status = monitor.update(Some(40.0), H, ms(i * 100));
            assert!(!status.warning);
        }
    }

    #[test]
    fn test_face_loss_restarts_timer() {
        let mut monitor = calibrated(config());
        for i in 0..25 {
            monitor.update(Some(168.0), H, ms(i * 100));
        }
        monitor.update(None, H, ms(2500));
        let status = monitor.update(Some(168.0), H, ms(2600));
        assert_eq!(status.duration, Duration::ZERO);
    }

    #[test]
    fn test_episode_count_raises_warning() {
        let mut monitor = calibrated(GazeConfig {
            episode_warn_count: 2,
            duration_ms: 500,
            ..config()
        });
        let mut t = 0;
        for _ in 0..2 {
            for _ in 0..6 {
                monitor.update(Some(168.0), H, ms(t));
                t += 100;
            }
            monitor.update(Some(120.0), H, ms(t));
            t += 100;
        }
        let status = monitor.update(Some(120.0), H, ms(t));
        assert!(!status.looking_down);
        assert_eq!(status.episodes, 2);
        assert!(status.warning);
    }

    #[test]
    fn test_smoothing_delays_onset() {
        let mut monitor = calibrated(GazeConfig {
            smoothing_frames: 5,
            ..Default::default()
        });
        // one outlier frame is diluted below the threshold
        let status = monitor.update(Some(168.0), H, ms(0));
        assert!((status.deviation - 0.2).abs() < 1e-4);
        let status = monitor.update(Some(120.0), H, ms(100));
        assert!(status.deviation < 0.11);
        let status = monitor.update(Some(120.0), H, ms(200));
        assert!(status.deviation < 0.10);
        assert_eq!(status.duration, Duration::ZERO);
    }

    #[test]
    fn test_reset_keeps_baseline() {
        let mut monitor = calibrated(config());
        for i in 0..=30 {
            monitor.update(Some(168.0), H, ms(i * 100));
        }
        monitor.reset();
        let state = monitor.state();
        assert_eq!(state.duration, Duration::ZERO);
        assert!(!state.warning);
        assert_eq!(state.baseline, Some(0.5));
    }
}
