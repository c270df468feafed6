//! One driver session: perception, calibration and fusion per frame

use std::time::Duration;

use alerting::{AlertManager, AlertPattern, LogSink};
use camera_capture::VideoFrame;
use fatigue::{
    CalibrationOutcome, Calibrator, EyeObservation, FacePosition, FatigueAnalysis, FatigueError,
    FatigueMonitor, FatigueState, GazeMonitor, GazeStatus, HeadNodDetector, NodStatus,
    YawnDetector, YawnStatus,
};
use metrics::{counter, gauge};
use perception::{BackendKind, FramePerception, Perception};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::settings::SystemConfig;
use crate::PipelineError;

/// Per-frame session output
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub timestamp: Duration,
    pub sequence: u32,
    pub face_detected: bool,
    /// A calibration run is in progress on this frame
    pub calibrating: bool,
    /// Set on the frame a calibration run finished
    pub calibration: Option<CalibrationOutcome>,
    /// `None` until the first calibration finished
    pub analysis: Option<FatigueAnalysis>,
    pub yawn: YawnStatus,
    pub gaze: GazeStatus,
    pub nod: NodStatus,
    pub pattern: AlertPattern,
    pub face_backend: BackendKind,
    pub eye_backend: BackendKind,
}

impl FrameReport {
    /// Reported state; INSUFFICIENT_EVIDENCE while no profile exists yet
    pub fn state(&self) -> FatigueState {
        self.analysis
            .as_ref()
            .map(|a| a.state)
            .unwrap_or(FatigueState::InsufficientEvidence)
    }
}

/// Frame counters since the session started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub faceless_frames: u64,
    pub rejected_frames: u64,
}

/// Runs the whole per-frame chain for one driver
pub struct FatigueSession {
    perception: Perception,
    calibrator: Calibrator,
    yawn: YawnDetector,
    gaze: GazeMonitor,
    nod: HeadNodDetector,
    monitor: FatigueMonitor,
    alerts: AlertManager,
    /// Calibration requested, starts at the next frame's timestamp
    calibration_pending: bool,
    last_timestamp: Option<Duration>,
    stats: SessionStats,
}

impl FatigueSession {
    /// Load the perception backends and build every stage
    pub fn new(config: &SystemConfig) -> Result<Self, PipelineError> {
        let perception = Perception::new(&config.perception)?;
        let alerts = AlertManager::new(config.alert.clone()).with_sink(Box::new(LogSink));
        Self::with_parts(config, perception, alerts)
    }

    /// Build around an already assembled perception stage and alert manager
    pub fn with_parts(
        config: &SystemConfig,
        perception: Perception,
        alerts: AlertManager,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let fatigue = &config.fatigue;

        let mut calibrator = Calibrator::new(fatigue.calibration.clone());
        if !config.session.calibrate_on_start {
            calibrator.use_default_profile();
        }

        info!(
            "Fatigue session ready (face: {}, eyes: {}, calibration on start: {})",
            perception.face_backend(),
            perception.eye_backend(),
            config.session.calibrate_on_start
        );

        Ok(Self {
            perception,
            calibrator,
            yawn: YawnDetector::new(fatigue.yawn.clone()),
            gaze: GazeMonitor::new(fatigue.gaze.clone()),
            nod: HeadNodDetector::new(fatigue.nod.clone()),
            monitor: FatigueMonitor::new(fatigue.clone())?,
            alerts,
            calibration_pending: config.session.calibrate_on_start,
            last_timestamp: None,
            stats: SessionStats::default(),
        })
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn monitor(&self) -> &FatigueMonitor {
        &self.monitor
    }

    pub fn yawn(&self) -> &YawnDetector {
        &self.yawn
    }

    pub fn gaze(&self) -> &GazeMonitor {
        &self.gaze
    }

    pub fn nod(&self) -> &HeadNodDetector {
        &self.nod
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration_pending || self.calibrator.is_calibrating()
    }

    /// Run one frame through the chain.
    ///
    /// A frame whose timestamp is not after the previous one is rejected with
    /// `FatigueError::TimestampOrder` before any stage sees it.
    pub fn process(&mut self, frame: &VideoFrame) -> Result<FrameReport, PipelineError> {
        let timestamp = frame.timestamp();
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                self.stats.rejected_frames += 1;
                counter!("fatigue_rejected_frames_total").increment(1);
                warn!(
                    "Dropping frame {}: timestamp {:?} not after {:?}",
                    frame.sequence, timestamp, previous
                );
                return Err(FatigueError::TimestampOrder {
                    previous,
                    received: timestamp,
                }
                .into());
            }
        }
        self.last_timestamp = Some(timestamp);
        self.stats.frames += 1;
        counter!("fatigue_frames_total").increment(1);

        let seen = self.perception.process(frame);
        if !seen.face_detected() {
            self.stats.faceless_frames += 1;
            counter!("fatigue_faceless_frames_total").increment(1);
        }

        if self.calibration_pending {
            self.calibration_pending = false;
            self.calibrator.start(timestamp);
        }
        let calibration = self.calibrate(&seen, timestamp);

        let yawn = self.yawn.update(seen.mouth_intensity, timestamp);
        let gaze = self
            .gaze
            .update(seen.face_center_y, seen.frame_height, timestamp);
        let nod = self.nod.update(face_position(&seen), timestamp);

        let analysis = match self.calibrator.profile() {
            Some(profile) => {
                let eyes = EyeObservation::new(seen.left, seen.right);
                Some(self.monitor.update(timestamp, &eyes, profile, &yawn, &gaze, &nod)?)
            }
            None => None,
        };

        let state = analysis
            .as_ref()
            .map(|a| a.state)
            .unwrap_or(FatigueState::InsufficientEvidence);
        let pattern = if self.calibrator.profile().is_some() {
            self.alerts.update(state, timestamp)
        } else {
            // first calibration: nothing to signal yet
            self.alerts.pattern()
        };

        if let Some(a) = analysis.as_ref() {
            gauge!("fatigue_perclos").set(a.perclos);
        }
        debug!(
            "Frame {}: face={} state={} calibrating={}",
            frame.sequence,
            seen.face_detected(),
            state,
            self.calibrator.is_calibrating()
        );

        Ok(FrameReport {
            timestamp,
            sequence: frame.sequence,
            face_detected: seen.face_detected(),
            calibrating: self.calibrator.is_calibrating(),
            calibration,
            analysis,
            yawn,
            gaze,
            nod,
            pattern,
            face_backend: self.perception.face_backend(),
            eye_backend: self.perception.eye_backend(),
        })
    }

    /// Feed calibration samples and close the run once complete
    fn calibrate(&mut self, seen: &FramePerception, now: Duration) -> Option<CalibrationOutcome> {
        if !self.calibrator.is_calibrating() {
            return None;
        }

        for reading in [seen.left, seen.right].into_iter().flatten() {
            self.calibrator.observe(&reading);
        }
        if let Some(intensity) = seen.mouth_intensity {
            self.yawn.observe_baseline(intensity);
        }
        if let Some(center_y) = seen.face_center_y {
            self.gaze.observe_baseline(center_y, seen.frame_height);
        }
        if let Some(face) = face_position(seen) {
            self.nod.observe_baseline(face);
        }

        let outcome = self.calibrator.poll(now)?;
        let yawn_active = self.yawn.finalize_baseline();
        let gaze_active = self.gaze.finalize_baseline();
        let nod_active = self.nod.finalize_baseline();
        info!(
            "Calibration finished: {:?} (yawn detection {}, gaze monitoring {}, nod detection {})",
            outcome,
            if yawn_active { "on" } else { "off" },
            if gaze_active { "on" } else { "off" },
            if nod_active { "on" } else { "off" }
        );
        Some(outcome)
    }

    /// Clear closure history, yawn count, gaze timer and nods.
    /// Calibration profile and baselines survive.
    pub fn reset(&mut self) {
        info!("Session reset");
        self.monitor.reset();
        self.yawn.reset();
        self.gaze.reset();
        self.nod.reset();
        self.alerts.clear();
    }

    /// Re-run calibration from the next frame. The current profile stays in
    /// effect until the new run succeeds.
    pub fn recalibrate(&mut self) {
        info!("Recalibration requested");
        self.calibration_pending = true;
    }
}

fn face_position(seen: &FramePerception) -> Option<FacePosition> {
    let face = seen.face.as_ref()?;
    FacePosition::from_pixels(face.bbox.center_y(), face.bbox.height(), seen.frame_height)
}
