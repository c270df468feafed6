//! Capability contracts of the inference backends

use camera_capture::frame::VideoFrame;

use crate::geometry::Detection;
use crate::PerceptionError;

/// Finds the driver's face
pub trait FaceDetector: Send {
    /// Backend name, for logs
    fn name(&self) -> &'static str;

    /// Largest face in the frame, `Ok(None)` when there is none
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Detection>, PerceptionError>;
}

/// Classifies an eye crop as open or closed
pub trait EyeClassifier: Send {
    fn name(&self) -> &'static str;

    /// Probability that the eye is open, in [0, 1]
    fn classify(&mut self, eye: &VideoFrame) -> Result<f32, PerceptionError>;
}
