//! Perception stage of the fatigue monitor
//!
//! Per frame:
//! - Face detection (UltraFace, single largest face)
//! - Eye and mouth ROI extraction from the face box
//! - Eye openness classification per eye
//! - Mouth intensity and face position for the yawn and gaze trackers
//!
//! Two inference backends sit behind the same traits: ONNX Runtime (primary)
//! and tract (fallback). The backend is picked once at startup; a primary
//! that keeps failing at runtime is replaced by the fallback for good.

pub mod backend;
pub mod config;
pub mod geometry;
pub mod model;
pub mod ort_backend;
pub mod preprocess;
pub mod roi;
pub mod tract_backend;
pub mod ultraface;

pub use backend::{BackendKind, Failover, FailureTracker};
pub use config::{BackendPreference, FailoverConfig, FaceDetectorConfig, PerceptionConfig};
pub use geometry::{BoundingBox, Detection, PixelRect};
pub use model::{EyeClassifier, FaceDetector};
pub use roi::{extract_rois, EyeRoi, FaceRois, RoiBox, RoiLayout};

use camera_capture::frame::VideoFrame;
use fatigue::EyeReading;
use thiserror::Error;
use tracing::{debug, info};

/// Perception error types
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    /// Neither backend could be loaded; the monitor cannot run
    #[error("No usable {stage} backend (primary: {primary}; fallback: {fallback})")]
    NoBackend {
        stage: &'static str,
        primary: String,
        fallback: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),
}

/// Everything the fatigue engine needs from one frame
#[derive(Debug, Clone, Default)]
pub struct FramePerception {
    pub face: Option<Detection>,
    pub rois: Option<FaceRois>,
    pub left: Option<EyeReading>,
    pub right: Option<EyeReading>,
    /// Mean luma of the mouth ROI
    pub mouth_intensity: Option<f32>,
    /// Vertical center of the face box (pixels)
    pub face_center_y: Option<f32>,
    pub frame_height: u32,
}

impl FramePerception {
    pub fn face_detected(&self) -> bool {
        self.face.is_some()
    }
}

/// Face detector and eye classifier behind their failover guards
pub struct Perception {
    face: Failover<dyn FaceDetector>,
    eyes: Failover<dyn EyeClassifier>,
    layout: RoiLayout,
}

impl Perception {
    /// Load the configured backends. Fails only when a stage has no usable backend.
    pub fn new(config: &PerceptionConfig) -> Result<Self, PerceptionError> {
        config.validate()?;
        info!("Creating perception stage with config: {:?}", config);

        let face = backend::select_face_detector(config)?;
        let eyes = backend::select_eye_classifier(config)?;
        Ok(Self::with_backends(face, eyes, config.layout.clone()))
    }

    /// Assemble from already selected backends
    pub fn with_backends(
        face: Failover<dyn FaceDetector>,
        eyes: Failover<dyn EyeClassifier>,
        layout: RoiLayout,
    ) -> Self {
        Self { face, eyes, layout }
    }

    pub fn face_backend(&self) -> BackendKind {
        self.face.kind()
    }

    pub fn eye_backend(&self) -> BackendKind {
        self.eyes.kind()
    }

    /// Run detection and classification on one frame.
    ///
    /// Inference failures never surface here: they count as "no detection"
    /// or "no reading" for this frame.
    pub fn process(&mut self, frame: &VideoFrame) -> FramePerception {
        let mut out = FramePerception {
            frame_height: frame.height,
            ..Default::default()
        };

        let Some(face) = self.face.call(|d| d.detect(frame)).flatten() else {
            debug!("No face in frame {}", frame.sequence);
            return out;
        };
        out.face_center_y = Some(face.bbox.center_y());

        let rois = extract_rois(&face.bbox, &self.layout, frame.width, frame.height);
        let timestamp = frame.timestamp();

        out.left = rois
            .left_eye
            .as_ref()
            .and_then(|roi| self.classify(frame, roi, timestamp));
        out.right = rois
            .right_eye
            .as_ref()
            .and_then(|roi| self.classify(frame, roi, timestamp));
        out.mouth_intensity = rois
            .mouth
            .and_then(|r| frame.region_mean_intensity(r.x, r.y, r.width, r.height));

        out.face = Some(face);
        out.rois = Some(rois);
        out
    }

    fn classify(
        &mut self,
        frame: &VideoFrame,
        roi: &EyeRoi,
        timestamp: std::time::Duration,
    ) -> Option<EyeReading> {
        let r = roi.rect;
        let crop = frame.crop(r.x, r.y, r.width, r.height)?;
        let prob_open = self.eyes.call(|c| c.classify(&crop))?;
        Some(EyeReading::new(roi.side, prob_open, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailoverConfig;

    struct FixedFace(Option<Detection>);

    impl FaceDetector for FixedFace {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<Detection>, PerceptionError> {
            Ok(self.0)
        }
    }

    struct BrokenFace;

    impl FaceDetector for BrokenFace {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<Detection>, PerceptionError> {
            Err(PerceptionError::Inference("session poisoned".into()))
        }
    }

    /// Brighter crop, more open
    struct Brightness;

    impl EyeClassifier for Brightness {
        fn name(&self) -> &'static str {
            "brightness"
        }

        fn classify(&mut self, eye: &VideoFrame) -> Result<f32, PerceptionError> {
            eye.mean_intensity()
                .map(|m| m / 255.0)
                .ok_or_else(|| PerceptionError::ImageProcessing("empty crop".into()))
        }
    }

    fn perception(face: Box<dyn FaceDetector>) -> Perception {
        let config = FailoverConfig::default();
        let face = Failover::<dyn FaceDetector>::select(
            "face",
            BackendPreference::Auto,
            &config,
            move || Ok(face),
            || Err(PerceptionError::ModelLoad("unused".into())),
        )
        .unwrap();
        let eyes = Failover::<dyn EyeClassifier>::select(
            "eye",
            BackendPreference::Auto,
            &config,
            || Ok(Box::new(Brightness) as Box<dyn EyeClassifier>),
            || Err(PerceptionError::ModelLoad("unused".into())),
        )
        .unwrap();
        Perception::with_backends(face, eyes, RoiLayout::default())
    }

    #[test]
    fn test_process_face_frame() {
        let face = Detection::new(BoundingBox::new(100.0, 50.0, 200.0, 150.0), 0.9);
        let mut stage = perception(Box::new(FixedFace(Some(face))));
        let frame = VideoFrame::filled(320, 240, 204, 66_000_000);

        let out = stage.process(&frame);
        assert!(out.face_detected());
        assert_eq!(out.face_center_y, Some(100.0));
        assert_eq!(out.frame_height, 240);

        let left = out.left.unwrap();
        assert_eq!(left.side, fatigue::EyeSide::Left);
        assert!((left.prob_open - 0.8).abs() < 1e-6);
        assert_eq!(left.timestamp, std::time::Duration::from_millis(66));
        assert!(out.right.is_some());
        assert_eq!(out.mouth_intensity, Some(204.0));
    }

    #[test]
    fn test_process_without_face() {
        let mut stage = perception(Box::new(FixedFace(None)));
        let out = stage.process(&VideoFrame::filled(320, 240, 90, 0));
        assert!(!out.face_detected());
        assert!(out.left.is_none() && out.right.is_none());
        assert!(out.mouth_intensity.is_none());
    }

    #[test]
    fn test_detector_failure_is_no_face() {
        let mut stage = perception(Box::new(BrokenFace));
        let out = stage.process(&VideoFrame::filled(320, 240, 90, 0));
        assert!(!out.face_detected());
        assert_eq!(stage.face_backend(), BackendKind::Primary);
    }

    #[test]
    fn test_tiny_face_gives_no_readings() {
        let face = Detection::new(BoundingBox::new(10.0, 10.0, 22.0, 22.0), 0.9);
        let mut stage = perception(Box::new(FixedFace(Some(face))));
        let out = stage.process(&VideoFrame::filled(320, 240, 90, 0));
        assert!(out.face_detected());
        assert!(out.left.is_none());
        assert!(out.rois.unwrap().is_empty());
    }
}
