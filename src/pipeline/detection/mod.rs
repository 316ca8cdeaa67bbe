pub mod contour;
pub mod geometry;
pub mod hough;

pub use contour::ContourQuadDetector;
pub use hough::HoughQuadDetector;

use image::{imageops, GrayImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use std::sync::Arc;

use crate::common::Frame;
use crate::config::{DetectorKind, DetectorSettings};
use crate::error::DetectionError;
use crate::pipeline::types::QuadrilateralObservation;

/// Frames smaller than this in either dimension cannot hold a useful rectangle.
pub const MIN_FRAME_DIMENSION: u32 = 8;

/// Finds rectangles (under perspective skew) in a single frame.
///
/// Implementations keep no state between calls; any scratch buffers belong
/// to the call that allocated them. The order of the returned observations
/// is implementation defined.
pub trait QuadDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<QuadrilateralObservation>, DetectionError>;

    fn name(&self) -> &'static str;
}

/// Shape filters shared by every detector variant.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    pub minimum_aspect_ratio: f32,
    pub maximum_aspect_ratio: f32,
    pub quadrature_tolerance: f32,
    pub minimum_size: f32,
    pub maximum_observations: usize,
    pub minimum_confidence: f32,
    pub blur_sigma: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self::from(&DetectorSettings::default())
    }
}

impl From<&DetectorSettings> for DetectorParams {
    fn from(settings: &DetectorSettings) -> Self {
        Self {
            minimum_aspect_ratio: settings.minimum_aspect_ratio,
            maximum_aspect_ratio: settings.maximum_aspect_ratio,
            quadrature_tolerance: settings.quadrature_tolerance,
            minimum_size: settings.minimum_size,
            maximum_observations: settings.maximum_observations,
            minimum_confidence: settings.minimum_confidence,
            blur_sigma: settings.blur_sigma,
        }
    }
}

impl DetectorParams {
    pub fn validate(&self) -> Result<(), DetectionError> {
        let aspect_range = 0.0..=1.0;
        if !aspect_range.contains(&self.minimum_aspect_ratio)
            || !aspect_range.contains(&self.maximum_aspect_ratio)
            || self.minimum_aspect_ratio > self.maximum_aspect_ratio
        {
            return Err(DetectionError::InvalidParameter(format!(
                "aspect ratio range {}..={} must lie within 0..=1",
                self.minimum_aspect_ratio, self.maximum_aspect_ratio
            )));
        }
        if !(0.0..=45.0).contains(&self.quadrature_tolerance) {
            return Err(DetectionError::InvalidParameter(format!(
                "quadrature tolerance {} must lie within 0..=45 degrees",
                self.quadrature_tolerance
            )));
        }
        if !(0.0..=1.0).contains(&self.minimum_size) {
            return Err(DetectionError::InvalidParameter(format!(
                "minimum size {} must lie within 0..=1",
                self.minimum_size
            )));
        }
        if !(0.0..=1.0).contains(&self.minimum_confidence) {
            return Err(DetectionError::InvalidParameter(format!(
                "minimum confidence {} must lie within 0..=1",
                self.minimum_confidence
            )));
        }
        if self.blur_sigma < 0.0 || !self.blur_sigma.is_finite() {
            return Err(DetectionError::InvalidParameter(format!(
                "blur sigma {} must be a non-negative number",
                self.blur_sigma
            )));
        }
        Ok(())
    }
}

pub fn build_detector(settings: &DetectorSettings) -> Result<Arc<dyn QuadDetector>, DetectionError> {
    let params = DetectorParams::from(settings);
    let detector: Arc<dyn QuadDetector> = match settings.kind {
        DetectorKind::Contour => Arc::new(ContourQuadDetector::new(params)?),
        DetectorKind::Hough => Arc::new(HoughQuadDetector::new(params)?),
    };
    tracing::info!("Using {} rectangle detector", detector.name());
    Ok(detector)
}

pub(crate) fn check_dimensions(frame: &Frame) -> Result<(u32, u32), DetectionError> {
    let (width, height) = (frame.width(), frame.height());
    if width < MIN_FRAME_DIMENSION || height < MIN_FRAME_DIMENSION {
        return Err(DetectionError::FrameTooSmall { width, height });
    }
    Ok((width, height))
}

/// Grayscale conversion followed by an optional gaussian blur.
pub(crate) fn prepare_gray(image: &RgbImage, blur_sigma: f32) -> GrayImage {
    let gray = imageops::grayscale(image);
    if blur_sigma > 0.0 {
        gaussian_blur_f32(&gray, blur_sigma)
    } else {
        gray
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    use crate::common::Frame;

    /// A dark frame with a filled rectangle spanning `x0..x1` by `y0..y1`.
    pub fn frame_with_rect(
        width: u32,
        height: u32,
        (x0, y0): (u32, u32),
        (x1, y1): (u32, u32),
        background: u8,
        foreground: u8,
    ) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
                Rgb([foreground; 3])
            } else {
                Rgb([background; 3])
            }
        });
        Frame::new(1, Utc::now(), image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(DetectorParams::default().validate().is_ok());
    }

    #[test]
    fn inverted_aspect_range_is_rejected() {
        let params = DetectorParams {
            minimum_aspect_ratio: 0.9,
            maximum_aspect_ratio: 0.5,
            ..DetectorParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(DetectionError::InvalidParameter(_))
        ));
    }

    #[test]
    fn builder_honours_the_configured_kind() {
        let mut settings = DetectorSettings::default();
        assert_eq!(build_detector(&settings).unwrap().name(), "contour");
        settings.kind = DetectorKind::Hough;
        assert_eq!(build_detector(&settings).unwrap().name(), "hough");
    }
}
