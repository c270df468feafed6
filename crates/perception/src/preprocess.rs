//! Frame to tensor conversion

use camera_capture::frame::VideoFrame;
use image::imageops::{self, FilterType};
use ndarray::Array4;

use crate::PerceptionError;

const FACE_MEAN: f32 = 127.0;
const FACE_SCALE: f32 = 1.0 / 128.0;

fn resized_rgb(frame: &VideoFrame, width: u32, height: u32) -> Result<image::RgbImage, PerceptionError> {
    let img = frame
        .to_rgb_image()
        .ok_or_else(|| PerceptionError::ImageProcessing("Failed to create image buffer".into()))?;
    if img.width() == width && img.height() == height {
        return Ok(img);
    }
    Ok(imageops::resize(&img, width, height, FilterType::Triangle))
}

/// Face detector input: RGB, (p - 127) / 128, NCHW
pub fn face_tensor(frame: &VideoFrame, width: u32, height: u32) -> Result<Array4<f32>, PerceptionError> {
    let resized = resized_rgb(frame, width, height)?;
    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - FACE_MEAN) * FACE_SCALE;
        }
    }
    Ok(input)
}

/// Eye classifier input: RGB scaled to [0, 1], NCHW
pub fn eye_tensor(crop: &VideoFrame, width: u32, height: u32) -> Result<Array4<f32>, PerceptionError> {
    let resized = resized_rgb(crop, width, height)?;
    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    Ok(input)
}

/// Squeeze a classifier output to one probability
pub fn probability(output: &[f32]) -> Result<f32, PerceptionError> {
    match output.first() {
        Some(p) if p.is_finite() => Ok(p.clamp(0.0, 1.0)),
        Some(p) => Err(PerceptionError::Inference(format!("classifier returned {}", p))),
        None => Err(PerceptionError::Inference("classifier returned no output".into())),
    }
}
