//! UltraFace (Ultra-Light-Fast-Generic-Face-Detector) post-processing
//!
//! The network predicts, for every prior box, a (background, face) score pair
//! and SSD-style box offsets. Decoding is shared by both backends.

use tracing::debug;

use crate::config::FaceDetectorConfig;
use crate::geometry::{BoundingBox, Detection};
use crate::PerceptionError;

const STRIDES: [f32; 4] = [8.0, 16.0, 32.0, 64.0];
const MIN_BOXES: [&[f32]; 4] = [&[10.0, 16.0, 24.0], &[32.0, 48.0], &[64.0, 96.0], &[128.0, 192.0, 256.0]];
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;

/// Prior box, normalised (cx, cy, w, h)
pub type Prior = [f32; 4];

/// Prior boxes for an input of `width` x `height`
pub fn generate_priors(width: u32, height: u32) -> Vec<Prior> {
    let (w, h) = (width as f32, height as f32);
    let mut priors = Vec::new();
    for (stride, min_boxes) in STRIDES.iter().zip(MIN_BOXES) {
        let fm_w = (w / stride).ceil() as u32;
        let fm_h = (h / stride).ceil() as u32;
        let scale_w = w / stride;
        let scale_h = h / stride;
        for j in 0..fm_h {
            for i in 0..fm_w {
                let cx = (i as f32 + 0.5) / scale_w;
                let cy = (j as f32 + 0.5) / scale_h;
                for min_box in min_boxes {
                    priors.push([
                        cx.clamp(0.0, 1.0),
                        cy.clamp(0.0, 1.0),
                        (min_box / w).clamp(0.0, 1.0),
                        (min_box / h).clamp(0.0, 1.0),
                    ]);
                }
            }
        }
    }
    priors
}

/// Greedy non-maximum suppression, highest score first
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Largest face whose shorter side reaches `min_size`
pub fn largest_face(detections: &[Detection], min_size: f32) -> Option<Detection> {
    detections
        .iter()
        .filter(|d| d.bbox.width().min(d.bbox.height()) >= min_size)
        .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
        .copied()
}

/// Decoder bound to one input size
#[derive(Debug, Clone)]
pub struct UltraFace {
    config: FaceDetectorConfig,
    priors: Vec<Prior>,
}

impl UltraFace {
    pub fn new(config: FaceDetectorConfig) -> Self {
        let priors = generate_priors(config.input_width, config.input_height);
        debug!(
            "UltraFace {}x{}: {} priors",
            config.input_width,
            config.input_height,
            priors.len()
        );
        Self { config, priors }
    }

    pub fn config(&self) -> &FaceDetectorConfig {
        &self.config
    }

    pub fn num_priors(&self) -> usize {
        self.priors.len()
    }

    /// All faces above the score threshold after NMS, in frame pixels
    pub fn decode(
        &self,
        scores: &[f32],
        boxes: &[f32],
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>, PerceptionError> {
        let n = self.priors.len();
        if scores.len() != n * 2 || boxes.len() != n * 4 {
            return Err(PerceptionError::Inference(format!(
                "UltraFace output size mismatch: scores {} boxes {} for {} priors",
                scores.len(),
                boxes.len(),
                n
            )));
        }

        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let candidates = self
            .priors
            .iter()
            .zip(scores.chunks_exact(2))
            .zip(boxes.chunks_exact(4))
            .filter(|((_, score), _)| score[1] > self.config.score_threshold)
            .map(|((prior, score), offset)| {
                let cx = offset[0] * CENTER_VARIANCE * prior[2] + prior[0];
                let cy = offset[1] * CENTER_VARIANCE * prior[3] + prior[1];
                let w = (offset[2] * SIZE_VARIANCE).exp() * prior[2];
                let h = (offset[3] * SIZE_VARIANCE).exp() * prior[3];
                let bbox = BoundingBox::new(
                    (cx - w / 2.0).clamp(0.0, 1.0) * fw,
                    (cy - h / 2.0).clamp(0.0, 1.0) * fh,
                    (cx + w / 2.0).clamp(0.0, 1.0) * fw,
                    (cy + h / 2.0).clamp(0.0, 1.0) * fh,
                );
                Detection::new(bbox, score[1])
            })
            .collect();

        Ok(nms(candidates, self.config.iou_threshold))
    }

    /// The driver's face: largest detection above the minimum size
    pub fn select(
        &self,
        scores: &[f32],
        boxes: &[f32],
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Option<Detection>, PerceptionError> {
        let faces = self.decode(scores, boxes, frame_width, frame_height)?;
        Ok(largest_face(&faces, self.config.min_face_size))
    }
}

/// Tell the two network outputs apart by their last dimension
pub fn split_outputs(outputs: Vec<(Vec<usize>, Vec<f32>)>) -> Result<(Vec<f32>, Vec<f32>), PerceptionError> {
    let mut scores = None;
    let mut boxes = None;
    for (shape, data) in outputs {
        match shape.last() {
            Some(2) => scores = Some(data),
            Some(4) => boxes = Some(data),
            _ => {}
        }
    }
    match (scores, boxes) {
        (Some(s), Some(b)) => Ok((s, b)),
        _ => Err(PerceptionError::Inference(
            "UltraFace outputs (scores [.., 2], boxes [.., 4]) not found".into(),
        )),
    }
}
