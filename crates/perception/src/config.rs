//! Perception configuration

use serde::{Deserialize, Serialize};

use crate::roi::RoiLayout;
use crate::PerceptionError;

/// Which backend to try first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// ONNX Runtime, tract if it cannot load
    #[default]
    Auto,
    /// Skip ONNX Runtime (no native library on the target)
    FallbackOnly,
}

/// UltraFace detector parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceDetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    /// Minimum face score
    pub score_threshold: f32,
    /// NMS overlap
    pub iou_threshold: f32,
    /// Smaller faces are ignored (pixels, shorter side)
    pub min_face_size: f32,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            input_width: 320,
            input_height: 240,
            score_threshold: 0.65,
            iou_threshold: 0.3,
            min_face_size: 40.0,
        }
    }
}

/// Runtime failover policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Calls the failure rate is measured over
    pub window: usize,
    /// Failure rate above which the primary backend is abandoned
    pub max_failure_rate: f32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            window: 50,
            max_failure_rate: 0.5,
        }
    }
}

/// Perception configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// UltraFace ONNX model
    pub face_model_path: Option<String>,
    /// Model for the fallback backend, defaults to `face_model_path`
    pub face_fallback_model_path: Option<String>,

    /// Eye open/closed classifier ONNX model
    pub eye_model_path: Option<String>,
    pub eye_fallback_model_path: Option<String>,

    /// Classifier input size
    pub eye_input_width: u32,
    pub eye_input_height: u32,

    pub backend: BackendPreference,
    /// Intra-op threads for ONNX Runtime
    pub num_threads: usize,

    pub face: FaceDetectorConfig,
    pub layout: RoiLayout,
    pub failover: FailoverConfig,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            face_model_path: Some("models/version-slim-320.onnx".to_string()),
            face_fallback_model_path: None,
            eye_model_path: Some("models/ocec_p.onnx".to_string()),
            eye_fallback_model_path: None,
            eye_input_width: 40,
            eye_input_height: 24,
            backend: BackendPreference::Auto,
            num_threads: 2,
            face: FaceDetectorConfig::default(),
            layout: RoiLayout::default(),
            failover: FailoverConfig::default(),
        }
    }
}

impl PerceptionConfig {
    /// Model path for the fallback face detector
    pub fn face_fallback_model(&self) -> Option<&str> {
        self.face_fallback_model_path
            .as_deref()
            .or(self.face_model_path.as_deref())
    }

    /// Model path for the fallback eye classifier
    pub fn eye_fallback_model(&self) -> Option<&str> {
        self.eye_fallback_model_path
            .as_deref()
            .or(self.eye_model_path.as_deref())
    }

    pub fn validate(&self) -> Result<(), PerceptionError> {
        let face = &self.face;
        if face.input_width == 0 || face.input_height == 0 {
            return Err(PerceptionError::Config(format!(
                "face input size {}x{} is empty",
                face.input_width, face.input_height
            )));
        }
        if !(0.0..=1.0).contains(&face.score_threshold) {
            return Err(PerceptionError::Config(format!(
                "face.score_threshold {} is out of range [0, 1]",
                face.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&face.iou_threshold) {
            return Err(PerceptionError::Config(format!(
                "face.iou_threshold {} is out of range [0, 1]",
                face.iou_threshold
            )));
        }
        if self.eye_input_width == 0 || self.eye_input_height == 0 {
            return Err(PerceptionError::Config(format!(
                "eye input size {}x{} is empty",
                self.eye_input_width, self.eye_input_height
            )));
        }
        if self.failover.window == 0 {
            return Err(PerceptionError::Config("failover.window must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.failover.max_failure_rate) {
            return Err(PerceptionError::Config(format!(
                "failover.max_failure_rate {} is out of range [0, 1]",
                self.failover.max_failure_rate
            )));
        }
        self.layout.validate()
    }
}
