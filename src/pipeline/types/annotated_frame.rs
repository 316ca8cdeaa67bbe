use chrono::{DateTime, Utc};
use image::RgbImage;
use std::sync::Arc;

use crate::common::Frame;
use crate::pipeline::types::QuadrilateralObservation;

/// A frame ready for display, with detection results drawn on top.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub image: Arc<RgbImage>,
    pub observations: Vec<QuadrilateralObservation>,
    /// False when the outlines could not be drawn and `image` is the raw frame.
    pub annotated: bool,
}

impl AnnotatedFrame {
    /// Wraps `frame` without drawing anything, sharing its pixel buffer.
    pub fn passthrough(frame: &Frame, observations: Vec<QuadrilateralObservation>) -> Self {
        Self {
            sequence: frame.sequence(),
            captured_at: frame.captured_at(),
            image: frame.shared_image(),
            observations,
            annotated: false,
        }
    }

    pub fn drawn(
        frame: &Frame,
        image: RgbImage,
        observations: Vec<QuadrilateralObservation>,
    ) -> Self {
        Self {
            sequence: frame.sequence(),
            captured_at: frame.captured_at(),
            image: Arc::new(image),
            observations,
            annotated: true,
        }
    }
}
