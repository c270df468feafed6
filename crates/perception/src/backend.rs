//! Backend selection and runtime failover
//!
//! The primary backend is probed once at startup; if its model does not load
//! the fallback is used from the start. At runtime a failed call only costs
//! the current frame. When failures over the last `window` calls exceed the
//! configured rate, the primary is dropped for good and the fallback loaded.

use std::collections::VecDeque;
use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BackendPreference, FailoverConfig, PerceptionConfig};
use crate::model::{EyeClassifier, FaceDetector};
use crate::ort_backend::{OrtEyeClassifier, OrtFaceDetector};
use crate::tract_backend::{TractEyeClassifier, TractFaceDetector};
use crate::PerceptionError;

/// Which implementation is serving a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Primary,
    Fallback,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Primary => f.write_str("primary"),
            BackendKind::Fallback => f.write_str("fallback"),
        }
    }
}

/// Failure rate over the most recent calls
#[derive(Debug, Clone)]
pub struct FailureTracker {
    outcomes: VecDeque<bool>,
    failures: usize,
    window: usize,
    max_rate: f32,
    total_failures: u64,
}

impl FailureTracker {
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(config.window),
            failures: 0,
            window: config.window.max(1),
            max_rate: config.max_failure_rate,
            total_failures: 0,
        }
    }

    /// Record one call; returns true once the failure rate is exceeded.
    ///
    /// The rate is taken against the full window, so a burst of failures
    /// trips as soon as the window could no longer come back under it.
    pub fn record(&mut self, ok: bool) -> bool {
        if self.outcomes.len() == self.window {
            if let Some(false) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(ok);
        if !ok {
            self.failures += 1;
            self.total_failures += 1;
        }
        self.failures as f32 > self.max_rate * self.window as f32
    }

    /// Failures among the last `window` calls
    pub fn recent_failures(&self) -> usize {
        self.failures
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

type Loader<T> = Box<dyn FnOnce() -> Result<Box<T>, PerceptionError> + Send>;

/// One perception stage with its active backend and the fallback on standby
pub struct Failover<T: ?Sized> {
    stage: &'static str,
    active: Box<T>,
    kind: BackendKind,
    standby: Option<Loader<T>>,
    tracker: FailureTracker,
}

impl<T: ?Sized + 'static> Failover<T> {
    /// Probe the primary, fall back if it does not load.
    /// Errors only when no backend at all is usable.
    pub fn select<P, F>(
        stage: &'static str,
        preference: BackendPreference,
        config: &FailoverConfig,
        primary: P,
        fallback: F,
    ) -> Result<Self, PerceptionError>
    where
        P: FnOnce() -> Result<Box<T>, PerceptionError>,
        F: FnOnce() -> Result<Box<T>, PerceptionError> + Send + 'static,
    {
        let primary_err = match preference {
            BackendPreference::Auto => match primary() {
                Ok(active) => {
                    info!("{} backend: primary", stage);
                    return Ok(Self {
                        stage,
                        active,
                        kind: BackendKind::Primary,
                        standby: Some(Box::new(fallback)),
                        tracker: FailureTracker::new(config),
                    });
                }
                Err(e) => {
                    warn!("{} primary backend unavailable: {}", stage, e);
                    e.to_string()
                }
            },
            BackendPreference::FallbackOnly => "disabled by configuration".to_string(),
        };

        match fallback() {
            Ok(active) => {
                info!("{} backend: fallback", stage);
                Ok(Self {
                    stage,
                    active,
                    kind: BackendKind::Fallback,
                    standby: None,
                    tracker: FailureTracker::new(config),
                })
            }
            Err(e) => Err(PerceptionError::NoBackend {
                stage,
                primary: primary_err,
                fallback: e.to_string(),
            }),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    /// Run one inference call. A failure yields `None` for this call only.
    pub fn call<R>(&mut self, f: impl FnOnce(&mut T) -> Result<R, PerceptionError>) -> Option<R> {
        match f(self.active.as_mut()) {
            Ok(value) => {
                self.tracker.record(true);
                Some(value)
            }
            Err(e) => {
                debug!("{} inference failed on {} backend: {}", self.stage, self.kind, e);
                counter!("perception_inference_failures_total", "stage" => self.stage).increment(1);
                if self.tracker.record(false) {
                    self.fail_over();
                }
                None
            }
        }
    }

    fn fail_over(&mut self) {
        let Some(loader) = self.standby.take() else {
            return;
        };
        warn!(
            "{}: {} of the last {} calls failed, switching to fallback backend",
            self.stage,
            self.tracker.recent_failures(),
            self.tracker.window
        );
        match loader() {
            Ok(backend) => {
                self.active = backend;
                self.kind = BackendKind::Fallback;
                self.tracker.clear();
                counter!("perception_backend_failovers_total", "stage" => self.stage).increment(1);
            }
            Err(e) => warn!("{}: fallback backend failed to load, staying on primary: {}", self.stage, e),
        }
    }
}

/// Face detector for the configured models
pub fn select_face_detector(config: &PerceptionConfig) -> Result<Failover<dyn FaceDetector>, PerceptionError> {
    let primary_path = config.face_model_path.clone();
    let fallback_path = config.face_fallback_model().map(str::to_string);
    let face = config.face.clone();
    let fallback_face = config.face.clone();
    let threads = config.num_threads;

    Failover::select(
        "face",
        config.backend,
        &config.failover,
        move || {
            let path = primary_path.ok_or_else(|| PerceptionError::ModelLoad("no face model configured".into()))?;
            Ok(Box::new(OrtFaceDetector::load(&path, &face, threads)?) as Box<dyn FaceDetector>)
        },
        move || {
            let path = fallback_path.ok_or_else(|| PerceptionError::ModelLoad("no face model configured".into()))?;
            Ok(Box::new(TractFaceDetector::load(&path, &fallback_face)?) as Box<dyn FaceDetector>)
        },
    )
}

/// Eye classifier for the configured models
pub fn select_eye_classifier(config: &PerceptionConfig) -> Result<Failover<dyn EyeClassifier>, PerceptionError> {
    let primary_path = config.eye_model_path.clone();
    let fallback_path = config.eye_fallback_model().map(str::to_string);
    let (w, h) = (config.eye_input_width, config.eye_input_height);
    let threads = config.num_threads;

    Failover::select(
        "eye",
        config.backend,
        &config.failover,
        move || {
            let path = primary_path.ok_or_else(|| PerceptionError::ModelLoad("no eye model configured".into()))?;
            Ok(Box::new(OrtEyeClassifier::load(&path, w, h, threads)?) as Box<dyn EyeClassifier>)
        },
        move || {
            let path = fallback_path.ok_or_else(|| PerceptionError::ModelLoad("no eye model configured".into()))?;
            Ok(Box::new(TractEyeClassifier::load(&path, w, h)?) as Box<dyn EyeClassifier>)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::frame::VideoFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Classifier that fails on demand
    struct Scripted {
        name: &'static str,
        prob: f32,
        fail: bool,
    }

    impl EyeClassifier for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn classify(&mut self, _eye: &VideoFrame) -> Result<f32, PerceptionError> {
            if self.fail {
                Err(PerceptionError::Inference("scripted failure".into()))
            } else {
                Ok(self.prob)
            }
        }
    }

    fn scripted(name: &'static str, prob: f32, fail: bool) -> Result<Box<dyn EyeClassifier>, PerceptionError> {
        Ok(Box::new(Scripted { name, prob, fail }))
    }

    fn missing() -> Result<Box<dyn EyeClassifier>, PerceptionError> {
        Err(PerceptionError::ModelLoad("file not found".into()))
    }

    fn crop() -> VideoFrame {
        VideoFrame::filled(40, 24, 128, 0)
    }

    #[test]
    fn test_tracker_trips_above_rate() {
        let mut tracker = FailureTracker::new(&FailoverConfig {
            window: 10,
            max_failure_rate: 0.5,
        });
        for _ in 0..5 {
            assert!(!tracker.record(false));
        }
        // sixth failure in the window: 6 > 0.5 * 10
        assert!(tracker.record(false));
    }

    #[test]
    fn test_tracker_forgets_old_failures() {
        let mut tracker = FailureTracker::new(&FailoverConfig {
            window: 4,
            max_failure_rate: 0.5,
        });
        tracker.record(false);
        tracker.record(false);
        for _ in 0..4 {
            assert!(!tracker.record(true));
        }
        assert_eq!(tracker.recent_failures(), 0);
        assert_eq!(tracker.total_failures(), 2);
    }

    #[test]
    fn test_primary_selected_when_available() {
        let stage = Failover::select(
            "eye",
            BackendPreference::Auto,
            &FailoverConfig::default(),
            || scripted("primary", 0.9, false),
            || scripted("fallback", 0.1, false),
        )
        .unwrap();
        assert_eq!(stage.kind(), BackendKind::Primary);
    }

    #[test]
    fn test_fallback_when_primary_does_not_load() {
        let mut stage = Failover::select(
            "eye",
            BackendPreference::Auto,
            &FailoverConfig::default(),
            missing,
            || scripted("fallback", 0.7, false),
        )
        .unwrap();
        assert_eq!(stage.kind(), BackendKind::Fallback);
        assert_eq!(stage.call(|c| c.classify(&crop())), Some(0.7));
    }

    #[test]
    fn test_no_backend_is_fatal() {
        let result = Failover::<dyn EyeClassifier>::select(
            "eye",
            BackendPreference::Auto,
            &FailoverConfig::default(),
            missing,
            missing,
        );
        match result {
            Err(PerceptionError::NoBackend { stage, primary, fallback }) => {
                assert_eq!(stage, "eye");
                assert!(primary.contains("file not found"));
                assert!(fallback.contains("file not found"));
            }
            Ok(_) => panic!("expected NoBackend"),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_fallback_only_skips_primary() {
        let probed = Arc::new(AtomicUsize::new(0));
        let counter = probed.clone();
        let stage = Failover::select(
            "eye",
            BackendPreference::FallbackOnly,
            &FailoverConfig::default(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                scripted("primary", 0.9, false)
            },
            || scripted("fallback", 0.1, false),
        )
        .unwrap();
        assert_eq!(stage.kind(), BackendKind::Fallback);
        assert_eq!(probed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_runtime_failure_is_no_reading() {
        let mut stage = Failover::select(
            "eye",
            BackendPreference::Auto,
            &FailoverConfig::default(),
            || scripted("primary", 0.9, true),
            || scripted("fallback", 0.1, false),
        )
        .unwrap();
        assert_eq!(stage.call(|c| c.classify(&crop())), None);
        assert_eq!(stage.kind(), BackendKind::Primary);
        assert_eq!(stage.tracker().total_failures(), 1);
    }

    #[test]
    fn test_permanent_failover_after_failure_rate() {
        let config = FailoverConfig {
            window: 10,
            max_failure_rate: 0.5,
        };
        let mut stage = Failover::select(
            "eye",
            BackendPreference::Auto,
            &config,
            || scripted("primary", 0.9, true),
            || scripted("fallback", 0.2, false),
        )
        .unwrap();

        for _ in 0..6 {
            assert_eq!(stage.call(|c| c.classify(&crop())), None);
        }
        assert_eq!(stage.kind(), BackendKind::Fallback);
        assert_eq!(stage.call(|c| c.classify(&crop())), Some(0.2));
        assert_eq!(stage.call(|c| Ok(c.name())), Some("fallback"));
    }

    #[test]
    fn test_failed_fallback_load_keeps_primary() {
        let config = FailoverConfig {
            window: 2,
            max_failure_rate: 0.5,
        };
        let mut stage = Failover::select(
            "eye",
            BackendPreference::Auto,
            &config,
            || scripted("primary", 0.9, true),
            missing,
        )
        .unwrap();
        for _ in 0..5 {
            stage.call(|c| c.classify(&crop()));
        }
        assert_eq!(stage.kind(), BackendKind::Primary);
    }
}
