//! Video frame types and pixel operations

use std::time::Duration;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::CaptureError;

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Single-channel luma (IR sensors)
    Gray8,
    /// Interleaved RGB
    Rgb24,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Decoded video frame, immutable once produced
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Pixel data (width * height * channels)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// Monotonic capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame, checking the buffer length against the dimensions
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_ns: u64,
        sequence: u32,
    ) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(CaptureError::Format(format!(
                "{}x{} {:?} frame needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            timestamp_ns,
            sequence,
        })
    }

    /// Uniform grayscale frame, mostly for tests and synthetic sources
    pub fn filled(width: u32, height: u32, value: u8, timestamp_ns: u64) -> Self {
        Self {
            data: vec![value; width as usize * height as usize],
            width,
            height,
            format: PixelFormat::Gray8,
            timestamp_ns,
            sequence: 0,
        }
    }

    /// Capture timestamp as a duration since the stream epoch
    pub fn timestamp(&self) -> Duration {
        Duration::from_nanos(self.timestamp_ns)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.format.channels()
    }

    /// Luma at (x, y)
    pub fn luma(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.index(x, y);
        Some(match self.format {
            PixelFormat::Gray8 => self.data[idx],
            PixelFormat::Rgb24 => {
                luminance(self.data[idx], self.data[idx + 1], self.data[idx + 2])
            }
        })
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Gray8 => self.data.clone(),
            PixelFormat::Rgb24 => self
                .data
                .chunks_exact(3)
                .map(|p| luminance(p[0], p[1], p[2]))
                .collect(),
        }
    }

    /// Crop a region of the frame
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<VideoFrame> {
        if w == 0 || h == 0 {
            return None;
        }
        if x.checked_add(w)? > self.width || y.checked_add(h)? > self.height {
            return None;
        }

        let channels = self.format.channels();
        let mut cropped = Vec::with_capacity(w as usize * h as usize * channels);
        for row in y..(y + h) {
            let start = self.index(x, row);
            let end = start + w as usize * channels;
            cropped.extend_from_slice(&self.data[start..end]);
        }

        Some(VideoFrame {
            data: cropped,
            width: w,
            height: h,
            format: self.format,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }

    /// Keep the central `ratio` of both dimensions (barrel distortion of wide lenses)
    pub fn center_crop(&self, ratio: f32) -> VideoFrame {
        if ratio >= 1.0 || ratio <= 0.0 {
            return self.clone();
        }
        let w = ((self.width as f32 * ratio).round() as u32).clamp(1, self.width);
        let h = ((self.height as f32 * ratio).round() as u32).clamp(1, self.height);
        let x = (self.width - w) / 2;
        let y = (self.height - h) / 2;
        self.crop(x, y, w, h).unwrap_or_else(|| self.clone())
    }

    /// Mean luma over a region, `None` if the region is empty or outside the frame
    pub fn region_mean_intensity(&self, x: u32, y: u32, w: u32, h: u32) -> Option<f32> {
        if w == 0 || h == 0 {
            return None;
        }
        if x.checked_add(w)? > self.width || y.checked_add(h)? > self.height {
            return None;
        }
        let mut sum: u64 = 0;
        for row in y..(y + h) {
            for col in x..(x + w) {
                sum += u64::from(self.luma(col, row)?);
            }
        }
        Some(sum as f32 / (w as u64 * h as u64) as f32)
    }

    /// Mean luma over the whole frame
    pub fn mean_intensity(&self) -> Option<f32> {
        self.region_mean_intensity(0, 0, self.width, self.height)
    }

    /// Copy into an RGB image buffer (gray frames are replicated per channel)
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        match self.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.clone()),
            PixelFormat::Gray8 => {
                let rgb = self.data.iter().flat_map(|&v| [v, v, v]).collect();
                RgbImage::from_raw(self.width, self.height, rgb)
            }
        }
    }

    /// Copy into a grayscale image buffer
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.to_grayscale())
    }
}

/// Luminance formula: 0.299*R + 0.587*G + 0.114*B
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (r as f32 * 0.299 + g as f32 * 0.587 + b as f32 * 0.114) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let data = (0..width * height).map(|i| (i % 256) as u8).collect();
        VideoFrame::new(data, width, height, PixelFormat::Gray8, 0, 0).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_length() {
        let result = VideoFrame::new(vec![0; 10], 4, 4, PixelFormat::Gray8, 0, 0);
        assert!(matches!(result, Err(CaptureError::Format(_))));
    }

    #[test]
    fn test_crop_bounds() {
        let frame = gradient(8, 8);
        assert!(frame.crop(6, 6, 4, 4).is_none());
        assert!(frame.crop(0, 0, 0, 4).is_none());

        let cropped = frame.crop(2, 1, 3, 2).unwrap();
        assert_eq!(cropped.width, 3);
        assert_eq!(cropped.height, 2);
        assert_eq!(cropped.data, vec![10, 11, 12, 18, 19, 20]);
    }

    #[test]
    fn test_center_crop() {
        let frame = gradient(100, 80);
        let cropped = frame.center_crop(0.5);
        assert_eq!(cropped.width, 50);
        assert_eq!(cropped.height, 40);
        assert_eq!(cropped.luma(0, 0), frame.luma(25, 20));

        let same = frame.center_crop(1.0);
        assert_eq!(same.width, 100);
    }

    #[test]
    fn test_region_mean_intensity() {
        let mut frame = VideoFrame::filled(10, 10, 100, 0);
        for y in 0..5 {
            for x in 0..10 {
                frame.data[(y * 10 + x) as usize] = 20;
            }
        }
        assert_eq!(frame.region_mean_intensity(0, 0, 10, 5), Some(20.0));
        assert_eq!(frame.mean_intensity(), Some(60.0));
        assert_eq!(frame.region_mean_intensity(8, 8, 5, 5), None);
    }

    #[test]
    fn test_rgb_luma() {
        let frame = VideoFrame::new(vec![255, 255, 255, 0, 0, 0], 2, 1, PixelFormat::Rgb24, 0, 0)
            .unwrap();
        assert!(frame.luma(0, 0).unwrap() >= 254);
        assert_eq!(frame.luma(1, 0), Some(0));
        assert_eq!(frame.to_grayscale().len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn prop_crop_inside_frame_has_requested_size(
            x in 0u32..32, y in 0u32..24, w in 1u32..32, h in 1u32..24
        ) {
            let frame = gradient(32, 24);
            match frame.crop(x, y, w, h) {
                Some(c) => {
                    proptest::prop_assert!(x + w <= 32 && y + h <= 24);
                    proptest::prop_assert_eq!(c.data.len(), (w * h) as usize);
                }
                None => proptest::prop_assert!(x + w > 32 || y + h > 24),
            }
        }
    }
}
