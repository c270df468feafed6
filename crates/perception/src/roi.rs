//! Eye and mouth regions derived from the face box
//!
//! There are no landmarks: regions are fixed fractions of the face box,
//! eyes in the upper part and the mouth in the lower third.

use fatigue::EyeSide;
use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, PixelRect};
use crate::PerceptionError;

/// Region as fractions of the face box, (x1, y1) to (x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RoiBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    fn project(&self, face: &BoundingBox) -> BoundingBox {
        let w = face.width();
        let h = face.height();
        BoundingBox::new(
            face.x1 + self.x1 * w,
            face.y1 + self.y1 * h,
            face.x1 + self.x2 * w,
            face.y1 + self.y2 * h,
        )
    }

    fn validate(&self, name: &str) -> Result<(), PerceptionError> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x1) && in_unit(self.x2) && in_unit(self.y1) && in_unit(self.y2)) {
            return Err(PerceptionError::Config(format!(
                "{} ROI {:?} must lie within the face box [0, 1]",
                name, self
            )));
        }
        if self.x2 <= self.x1 || self.y2 <= self.y1 {
            return Err(PerceptionError::Config(format!(
                "{} ROI {:?} has no area",
                name, self
            )));
        }
        Ok(())
    }
}

/// Proportional ROI layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiLayout {
    pub left_eye: RoiBox,
    pub right_eye: RoiBox,
    pub mouth: RoiBox,
    /// Faces narrower or shorter than this (pixels) give no ROIs
    pub min_face_size: f32,
}

impl Default for RoiLayout {
    fn default() -> Self {
        Self {
            left_eye: RoiBox::new(0.08, 0.22, 0.48, 0.48),
            right_eye: RoiBox::new(0.52, 0.22, 0.92, 0.48),
            mouth: RoiBox::new(0.20, 0.62, 0.80, 0.95),
            min_face_size: 20.0,
        }
    }
}

impl RoiLayout {
    pub fn validate(&self) -> Result<(), PerceptionError> {
        self.left_eye.validate("left_eye")?;
        self.right_eye.validate("right_eye")?;
        self.mouth.validate("mouth")?;
        if !(self.min_face_size >= 0.0) {
            return Err(PerceptionError::Config(format!(
                "min_face_size {} must be non-negative",
                self.min_face_size
            )));
        }
        Ok(())
    }
}

/// Eye region in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeRoi {
    pub side: EyeSide,
    pub rect: PixelRect,
}

/// Regions of one face; `None` marks a region invalid for this frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceRois {
    pub left_eye: Option<EyeRoi>,
    pub right_eye: Option<EyeRoi>,
    pub mouth: Option<PixelRect>,
}

impl FaceRois {
    pub fn is_empty(&self) -> bool {
        self.left_eye.is_none() && self.right_eye.is_none() && self.mouth.is_none()
    }
}

/// Map a face box to its eye and mouth regions, clamped to the frame
pub fn extract_rois(face: &BoundingBox, layout: &RoiLayout, frame_width: u32, frame_height: u32) -> FaceRois {
    if face.width() < layout.min_face_size || face.height() < layout.min_face_size {
        return FaceRois::default();
    }

    let eye = |side: EyeSide, roi: &RoiBox| {
        roi.project(face)
            .clamp_to(frame_width, frame_height)
            .map(|rect| EyeRoi { side, rect })
    };

    FaceRois {
        left_eye: eye(EyeSide::Left, &layout.left_eye),
        right_eye: eye(EyeSide::Right, &layout.right_eye),
        mouth: layout.mouth.project(face).clamp_to(frame_width, frame_height),
    }
}
