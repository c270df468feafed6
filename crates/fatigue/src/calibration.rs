//! Per-eye openness calibration
//!
//! While the driver is assumed to have their eyes open, open-probabilities
//! are collected per eye. Each eye gets a baseline (aggregate of samples)
//! and a closed threshold `baseline * ratio`, clamped to the configured
//! floor and ceiling. An eye with too few samples or an implausibly low
//! baseline is disabled; fusion then relies on the other eye.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CalibrationConfig;
use crate::{EyeReading, EyeSide};

/// Why an eye channel was disabled
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CalibrationError {
    #[error("{side:?} eye: {collected} valid samples, {required} required")]
    InsufficientSamples {
        side: EyeSide,
        collected: usize,
        required: usize,
    },

    #[error("{side:?} eye: baseline {baseline:.3} below {min:.3}, ROI is probably not on an eye")]
    DegenerateBaseline { side: EyeSide, baseline: f32, min: f32 },
}

/// Calibration result for one eye
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeCalibration {
    /// Reference open-probability
    pub baseline: f32,
    /// Below this the eye is closed
    pub threshold: f32,
    /// Disabled eyes are excluded from fusion
    pub enabled: bool,
    /// Samples the baseline was computed from
    pub samples: usize,
    pub disabled_reason: Option<CalibrationError>,
}

impl EyeCalibration {
    /// Eye enabled at a fixed threshold, no calibration performed
    pub fn fixed(threshold: f32) -> Self {
        Self {
            baseline: 1.0,
            threshold,
            enabled: true,
            samples: 0,
            disabled_reason: None,
        }
    }

    fn disabled(config: &CalibrationConfig, baseline: f32, samples: usize, reason: CalibrationError) -> Self {
        Self {
            baseline,
            threshold: config.fallback_threshold(),
            enabled: false,
            samples,
            disabled_reason: Some(reason),
        }
    }

    /// Closed vote for a reading, `None` if the eye is disabled or the reading invalid
    pub fn is_closed(&self, reading: &EyeReading) -> Option<bool> {
        if !self.enabled || !reading.is_valid() {
            return None;
        }
        Some(reading.prob_open < self.threshold)
    }
}

/// Per-eye calibration profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub left: EyeCalibration,
    pub right: EyeCalibration,
}

impl CalibrationProfile {
    /// Both eyes enabled at the configured default threshold
    pub fn uncalibrated(config: &CalibrationConfig) -> Self {
        let threshold = config.fallback_threshold();
        Self {
            left: EyeCalibration::fixed(threshold),
            right: EyeCalibration::fixed(threshold),
        }
    }

    pub fn eye(&self, side: EyeSide) -> &EyeCalibration {
        match side {
            EyeSide::Left => &self.left,
            EyeSide::Right => &self.right,
        }
    }

    /// At least one eye can provide closure evidence
    pub fn has_evidence(&self) -> bool {
        self.left.enabled || self.right.enabled
    }

    /// Names of the enabled eyes, for logs
    pub fn active_eyes(&self) -> Vec<&'static str> {
        [&self.left, &self.right]
            .iter()
            .zip([EyeSide::Left, EyeSide::Right])
            .filter(|(eye, _)| eye.enabled)
            .map(|(_, side)| side.as_str())
            .collect()
    }
}

/// Collection of open-eye samples for one calibration run
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    config: CalibrationConfig,
    started_at: Duration,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl CalibrationSession {
    pub fn new(config: CalibrationConfig, started_at: Duration) -> Self {
        Self {
            left: Vec::with_capacity(config.max_samples),
            right: Vec::with_capacity(config.max_samples),
            config,
            started_at,
        }
    }

    /// Record a reading; invalid readings are ignored
    pub fn add(&mut self, reading: &EyeReading) {
        if !reading.is_valid() {
            return;
        }
        let samples = match reading.side {
            EyeSide::Left => &mut self.left,
            EyeSide::Right => &mut self.right,
        };
        if samples.len() < self.config.max_samples {
            samples.push(reading.prob_open);
        }
    }

    pub fn sample_count(&self, side: EyeSide) -> usize {
        match side {
            EyeSide::Left => self.left.len(),
            EyeSide::Right => self.right.len(),
        }
    }

    /// Fraction of the calibration period elapsed at `now`
    pub fn progress(&self, now: Duration) -> f32 {
        let total = self.config.duration().as_secs_f32();
        if total <= 0.0 {
            return 1.0;
        }
        (now.saturating_sub(self.started_at).as_secs_f32() / total).min(1.0)
    }

    /// The timeout elapsed or both eyes are full
    pub fn is_complete(&self, now: Duration) -> bool {
        let saturated = self.left.len() >= self.config.max_samples
            && self.right.len() >= self.config.max_samples;
        saturated || now.saturating_sub(self.started_at) >= self.config.duration()
    }

    /// Compute the profile from the collected samples
    pub fn finish(self) -> CalibrationProfile {
        CalibrationProfile {
            left: calibrate_eye(&self.config, EyeSide::Left, &self.left),
            right: calibrate_eye(&self.config, EyeSide::Right, &self.right),
        }
    }
}

fn calibrate_eye(config: &CalibrationConfig, side: EyeSide, samples: &[f32]) -> EyeCalibration {
    if samples.len() < config.min_samples {
        let reason = CalibrationError::InsufficientSamples {
            side,
            collected: samples.len(),
            required: config.min_samples,
        };
        warn!("Calibration: {} -> disabled", reason);
        return EyeCalibration::disabled(config, 0.0, samples.len(), reason);
    }

    let baseline = config.aggregate.apply(samples).unwrap_or(0.0);
    if baseline < config.min_baseline {
        let reason = CalibrationError::DegenerateBaseline {
            side,
            baseline,
            min: config.min_baseline,
        };
        warn!("Calibration: {} -> disabled", reason);
        return EyeCalibration::disabled(config, baseline, samples.len(), reason);
    }

    let threshold = (baseline * config.ratio).clamp(config.min_threshold, config.max_threshold);
    info!(
        "Calibration: {} eye baseline={:.3} ({} samples) -> threshold={:.3}",
        side.as_str(),
        baseline,
        samples.len(),
        threshold
    );

    EyeCalibration {
        baseline,
        threshold,
        enabled: true,
        samples: samples.len(),
        disabled_reason: None,
    }
}

/// Result of a finished calibration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationOutcome {
    /// New profile installed
    Applied,
    /// Both eyes failed; the previous profile stays in effect
    KeptPrevious,
    /// Both eyes failed and there was no previous profile
    NoEvidence,
}

/// Owns the active profile and any calibration in progress
#[derive(Debug, Clone)]
pub struct Calibrator {
    config: CalibrationConfig,
    profile: Option<CalibrationProfile>,
    session: Option<CalibrationSession>,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            profile: None,
            session: None,
        }
    }

    /// Skip calibration, use the default threshold on both eyes
    pub fn use_default_profile(&mut self) {
        info!(
            "Calibration skipped, default threshold {:.2} on both eyes",
            self.config.fallback_threshold()
        );
        self.profile = Some(CalibrationProfile::uncalibrated(&self.config));
        self.session = None;
    }

    /// Active profile, `None` until the first calibration finished
    pub fn profile(&self) -> Option<&CalibrationProfile> {
        self.profile.as_ref()
    }

    pub fn session(&self) -> Option<&CalibrationSession> {
        self.session.as_ref()
    }

    pub fn is_calibrating(&self) -> bool {
        self.session.is_some()
    }

    /// Start (or restart) a calibration run
    pub fn start(&mut self, now: Duration) {
        info!(
            "Calibration started ({} ms, keep eyes open)",
            self.config.duration_ms
        );
        self.session = Some(CalibrationSession::new(self.config.clone(), now));
    }

    /// Feed a reading to the running session, if any
    pub fn observe(&mut self, reading: &EyeReading) {
        if let Some(session) = self.session.as_mut() {
            session.add(reading);
        }
    }

    /// Finish the session once complete. The profile is only replaced when
    /// at least one eye calibrated; a failed recalibration keeps the old one.
    pub fn poll(&mut self, now: Duration) -> Option<CalibrationOutcome> {
        if !self.session.as_ref()?.is_complete(now) {
            return None;
        }
        let profile = self.session.take()?.finish();

        let outcome = if profile.has_evidence() {
            info!("Calibration done, active eyes: {}", profile.active_eyes().join("+"));
            self.profile = Some(profile);
            CalibrationOutcome::Applied
        } else if self.profile.is_some() {
            warn!("Recalibration failed on both eyes, keeping previous profile");
            CalibrationOutcome::KeptPrevious
        } else {
            warn!("Calibration failed on both eyes, no closure evidence available");
            self.profile = Some(profile);
            CalibrationOutcome::NoEvidence
        };
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn reading(side: EyeSide, p: f32, t: u64) -> EyeReading {
        EyeReading::new(side, p, ms(t))
    }

    fn feed(calibrator: &mut Calibrator, left: &[f32], right: &[f32]) {
        for (i, p) in left.iter().enumerate() {
            calibrator.observe(&reading(EyeSide::Left, *p, i as u64 * 100));
        }
        for (i, p) in right.iter().enumerate() {
            calibrator.observe(&reading(EyeSide::Right, *p, i as u64 * 100));
        }
    }

    #[test]
    fn test_threshold_from_baseline() {
        let mut calibrator = Calibrator::new(CalibrationConfig::default());
        calibrator.start(ms(0));
        feed(&mut calibrator, &[0.8; 10], &[0.9; 10]);

        assert!(calibrator.poll(ms(4999)).is_none());
        assert_eq!(calibrator.poll(ms(5000)), Some(CalibrationOutcome::Applied));

        let profile = calibrator.profile().unwrap();
        // 0.8 * 0.4 = 0.32 within [0.12, 0.38]
        assert!((profile.left.threshold - 0.32).abs() < 1e-6);
        // 0.9 * 0.4 = 0.36
        assert!((profile.right.threshold - 0.36).abs() < 1e-6);
        assert!(profile.left.enabled && profile.right.enabled);
    }

    #[test]
    fn test_threshold_clamped_to_ceiling() {
        let config = CalibrationConfig {
            ratio: 0.9,
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(config);
        calibrator.start(ms(0));
        feed(&mut calibrator, &[0.95; 10], &[0.95; 10]);
        calibrator.poll(ms(6000));

        let profile = calibrator.profile().unwrap();
        assert_eq!(profile.left.threshold, 0.38);
    }

    #[test]
    fn test_insufficient_samples_disables_eye() {
        let mut calibrator = Calibrator::new(CalibrationConfig::default());
        calibrator.start(ms(0));
        feed(&mut calibrator, &[0.8; 3], &[0.8; 10]);
        calibrator.poll(ms(5000));

        let profile = calibrator.profile().unwrap();
        assert!(!profile.left.enabled);
        assert!(profile.right.enabled);
        assert!(matches!(
            profile.left.disabled_reason,
            Some(CalibrationError::InsufficientSamples {
                collected: 3,
                required: 5,
                ..
            })
        ));
        assert_eq!(profile.active_eyes(), vec!["right"]);
    }

    #[test]
    fn test_degenerate_baseline_disables_eye() {
        let mut calibrator = Calibrator::new(CalibrationConfig::default());
        calibrator.start(ms(0));
        feed(&mut calibrator, &[0.8; 10], &[0.05; 10]);
        calibrator.poll(ms(5000));

        let profile = calibrator.profile().unwrap();
        assert!(profile.left.enabled);
        assert!(!profile.right.enabled);
        assert!(matches!(
            profile.right.disabled_reason,
            Some(CalibrationError::DegenerateBaseline { .. })
        ));
    }

    #[test]
    fn test_invalid_readings_ignored() {
        let mut session = CalibrationSession::new(CalibrationConfig::default(), ms(0));
        session.add(&reading(EyeSide::Left, -1.0, 0));
        session.add(&reading(EyeSide::Left, f32::NAN, 0));
        session.add(&reading(EyeSide::Left, 0.7, 0));
        assert_eq!(session.sample_count(EyeSide::Left), 1);
    }

    #[test]
    fn test_initial_failure_reports_no_evidence() {
        let mut calibrator = Calibrator::new(CalibrationConfig::default());
        calibrator.start(ms(0));
        assert_eq!(calibrator.poll(ms(5000)), Some(CalibrationOutcome::NoEvidence));
        assert!(!calibrator.profile().unwrap().has_evidence());
    }

    #[test]
    fn test_failed_recalibration_keeps_previous_profile() {
        let mut calibrator = Calibrator::new(CalibrationConfig::default());
        calibrator.start(ms(0));
        feed(&mut calibrator, &[0.8; 10], &[0.8; 10]);
        calibrator.poll(ms(5000));
        let before = calibrator.profile().cloned();

        calibrator.start(ms(10_000));
        assert!(calibrator.is_calibrating());
        assert_eq!(calibrator.poll(ms(15_000)), Some(CalibrationOutcome::KeptPrevious));
        assert_eq!(calibrator.profile().cloned(), before);
        assert!(!calibrator.is_calibrating());
    }

    #[test]
    fn test_saturated_session_completes_early() {
        let config = CalibrationConfig {
            min_samples: 2,
            max_samples: 3,
            ..Default::default()
        };
        let mut session = CalibrationSession::new(config, ms(0));
        for _ in 0..3 {
            session.add(&reading(EyeSide::Left, 0.9, 0));
            session.add(&reading(EyeSide::Right, 0.9, 0));
        }
        assert!(session.is_complete(ms(100)));
    }

    #[test]
    fn test_closed_vote() {
        let eye = EyeCalibration::fixed(0.3);
        assert_eq!(eye.is_closed(&reading(EyeSide::Left, 0.1, 0)), Some(true));
        assert_eq!(eye.is_closed(&reading(EyeSide::Left, 0.5, 0)), Some(false));
        assert_eq!(eye.is_closed(&reading(EyeSide::Left, 1.5, 0)), None);
    }

    #[test]
    fn test_uncalibrated_threshold_is_clamped() {
        let config = CalibrationConfig::default();
        let profile = CalibrationProfile::uncalibrated(&config);
        assert_eq!(profile.left.threshold, config.max_threshold);
        assert_eq!(profile.right.threshold, config.max_threshold);
        // 0.40 sits above the ceiling: open
        assert_eq!(profile.left.is_closed(&reading(EyeSide::Left, 0.40, 0)), Some(false));

        let low = CalibrationConfig {
            default_threshold: 0.05,
            ..Default::default()
        };
        let mut calibrator = Calibrator::new(low.clone());
        calibrator.use_default_profile();
        assert_eq!(calibrator.profile().unwrap().left.threshold, low.min_threshold);
    }

    proptest! {
        #[test]
        fn prop_enabled_threshold_within_clamp(samples in prop::collection::vec(0.0f32..=1.0, 5..50)) {
            let config = CalibrationConfig::default();
            let eye = calibrate_eye(&config, EyeSide::Left, &samples);
            prop_assert!(eye.threshold >= config.min_threshold);
            prop_assert!(eye.threshold <= config.max_threshold);
            prop_assert_eq!(eye.enabled, eye.baseline >= config.min_baseline);
        }
    }
}
