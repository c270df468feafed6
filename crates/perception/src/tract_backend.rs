//! Fallback backend: tract (pure Rust, no native runtime needed)

use camera_capture::frame::VideoFrame;
use tracing::{error, info};
use tract_onnx::prelude::*;

use crate::config::FaceDetectorConfig;
use crate::geometry::Detection;
use crate::model::{EyeClassifier, FaceDetector};
use crate::preprocess::{eye_tensor, face_tensor, probability};
use crate::ultraface::{split_outputs, UltraFace};
use crate::PerceptionError;

type Plan = TypedRunnableModel<TypedModel>;

fn load_plan(path: &str, width: u32, height: u32) -> Result<Plan, PerceptionError> {
    info!("Loading tract model from {} ({}x{})", path, width, height);
    let shape = [1usize, 3, height as usize, width as usize];
    tract_onnx::onnx()
        .model_for_path(path)
        .and_then(|m| m.with_input_fact(0, f32::fact(shape).into()))
        .and_then(|m| m.into_optimized())
        .and_then(|m| m.into_runnable())
        .map_err(|e| {
            error!("Failed to load {}: {}", path, e);
            PerceptionError::ModelLoad(e.to_string())
        })
}

/// `shape` and `data` describe a standard-layout NCHW input
fn run(plan: &Plan, shape: &[usize], data: Option<&[f32]>) -> Result<Vec<(Vec<usize>, Vec<f32>)>, PerceptionError> {
    let data =
        data.ok_or_else(|| PerceptionError::ImageProcessing("input tensor is not contiguous".into()))?;
    let tensor =
        Tensor::from_shape(shape, data).map_err(|e| PerceptionError::Inference(e.to_string()))?;

    let outputs = plan
        .run(tvec!(tensor.into()))
        .map_err(|e| PerceptionError::Inference(e.to_string()))?;

    outputs
        .iter()
        .map(|value| {
            let view = value
                .to_array_view::<f32>()
                .map_err(|e| PerceptionError::Inference(e.to_string()))?;
            Ok((view.shape().to_vec(), view.iter().copied().collect()))
        })
        .collect()
}

/// UltraFace on tract
pub struct TractFaceDetector {
    plan: Plan,
    decoder: UltraFace,
}

impl TractFaceDetector {
    pub fn load(path: &str, config: &FaceDetectorConfig) -> Result<Self, PerceptionError> {
        Ok(Self {
            plan: load_plan(path, config.input_width, config.input_height)?,
            decoder: UltraFace::new(config.clone()),
        })
    }
}

impl FaceDetector for TractFaceDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Detection>, PerceptionError> {
        let cfg = self.decoder.config();
        let input = face_tensor(frame, cfg.input_width, cfg.input_height)?;
        let (scores, boxes) = split_outputs(run(&self.plan, input.shape(), input.as_slice())?)?;
        self.decoder.select(&scores, &boxes, frame.width, frame.height)
    }
}

/// Eye open/closed classifier on tract
pub struct TractEyeClassifier {
    plan: Plan,
    input_width: u32,
    input_height: u32,
}

impl TractEyeClassifier {
    pub fn load(path: &str, input_width: u32, input_height: u32) -> Result<Self, PerceptionError> {
        Ok(Self {
            plan: load_plan(path, input_width, input_height)?,
            input_width,
            input_height,
        })
    }
}

impl EyeClassifier for TractEyeClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify(&mut self, eye: &VideoFrame) -> Result<f32, PerceptionError> {
        let input = eye_tensor(eye, self.input_width, self.input_height)?;
        let outputs = run(&self.plan, input.shape(), input.as_slice())?;
        let (_, data) = outputs
            .first()
            .ok_or_else(|| PerceptionError::Inference("classifier has no output".into()))?;
        probability(data)
    }
}
