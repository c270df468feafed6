//! Primary backend: ONNX Runtime

use camera_capture::frame::VideoFrame;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{error, info};

use crate::config::FaceDetectorConfig;
use crate::geometry::Detection;
use crate::model::{EyeClassifier, FaceDetector};
use crate::preprocess::{eye_tensor, face_tensor, probability};
use crate::ultraface::{split_outputs, UltraFace};
use crate::PerceptionError;

fn load_session(path: &str, num_threads: usize) -> Result<Session, PerceptionError> {
    info!("Loading ONNX Runtime model from {}", path);
    let session = Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_intra_threads(num_threads))
        .and_then(|b| b.commit_from_file(path))
        .map_err(|e| {
            error!("Failed to load {}: {}", path, e);
            PerceptionError::ModelLoad(e.to_string())
        })?;
    Ok(session)
}

/// Run a single-input model, returning every output as (shape, data)
fn run(session: &Session, input: Array4<f32>) -> Result<Vec<(Vec<usize>, Vec<f32>)>, PerceptionError> {
    let outputs = session
        .run(ort::inputs![input].map_err(|e| PerceptionError::Inference(e.to_string()))?)
        .map_err(|e| PerceptionError::Inference(e.to_string()))?;

    outputs
        .values()
        .map(|value| {
            let tensor = value
                .try_extract_tensor::<f32>()
                .map_err(|e| PerceptionError::Inference(e.to_string()))?;
            Ok((tensor.shape().to_vec(), tensor.iter().copied().collect()))
        })
        .collect()
}

/// UltraFace on ONNX Runtime
pub struct OrtFaceDetector {
    session: Session,
    decoder: UltraFace,
}

impl OrtFaceDetector {
    pub fn load(path: &str, config: &FaceDetectorConfig, num_threads: usize) -> Result<Self, PerceptionError> {
        Ok(Self {
            session: load_session(path, num_threads)?,
            decoder: UltraFace::new(config.clone()),
        })
    }
}

impl FaceDetector for OrtFaceDetector {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Detection>, PerceptionError> {
        let cfg = self.decoder.config();
        let input = face_tensor(frame, cfg.input_width, cfg.input_height)?;
        let (scores, boxes) = split_outputs(run(&self.session, input)?)?;
        self.decoder.select(&scores, &boxes, frame.width, frame.height)
    }
}

/// Eye open/closed classifier on ONNX Runtime
pub struct OrtEyeClassifier {
    session: Session,
    input_width: u32,
    input_height: u32,
}

impl OrtEyeClassifier {
    pub fn load(path: &str, input_width: u32, input_height: u32, num_threads: usize) -> Result<Self, PerceptionError> {
        Ok(Self {
            session: load_session(path, num_threads)?,
            input_width,
            input_height,
        })
    }
}

impl EyeClassifier for OrtEyeClassifier {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn classify(&mut self, eye: &VideoFrame) -> Result<f32, PerceptionError> {
        let input = eye_tensor(eye, self.input_width, self.input_height)?;
        let outputs = run(&self.session, input)?;
        let (_, data) = outputs
            .first()
            .ok_or_else(|| PerceptionError::Inference("classifier has no output".into()))?;
        probability(data)
    }
}
