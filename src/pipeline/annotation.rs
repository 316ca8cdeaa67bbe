use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::common::Frame;
use crate::config::AnnotationSettings;
use crate::error::AnnotationError;
use crate::pipeline::types::{AnnotatedFrame, QuadrilateralObservation};

/// Strokes detected quadrilaterals onto a copy of the frame.
#[derive(Debug, Clone)]
pub struct Annotator {
    line_width: u32,
    color: Rgb<u8>,
    max_surface_pixels: u64,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::from(&AnnotationSettings::default())
    }
}

impl From<&AnnotationSettings> for Annotator {
    fn from(settings: &AnnotationSettings) -> Self {
        Self {
            line_width: settings.line_width.max(1),
            color: Rgb(settings.color),
            max_surface_pixels: settings.max_surface_pixels,
        }
    }
}

impl Annotator {
    pub fn with_line_width(mut self, line_width: u32) -> Self {
        self.line_width = line_width.max(1);
        self
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = Rgb(color);
        self
    }

    pub fn with_max_surface_pixels(mut self, max_surface_pixels: u64) -> Self {
        self.max_surface_pixels = max_surface_pixels;
        self
    }

    pub fn color(&self) -> Rgb<u8> {
        self.color
    }

    /// Draws `observations` onto a copy of `frame`. With no observations the
    /// result shares the frame's pixel buffer. The input frame is never mutated.
    pub fn annotate(
        &self,
        frame: &Frame,
        observations: &[QuadrilateralObservation],
    ) -> Result<AnnotatedFrame, AnnotationError> {
        if observations.is_empty() {
            return Ok(AnnotatedFrame::passthrough(frame, Vec::new()));
        }

        let mut canvas = self.allocate_surface(frame)?;
        let (width, height) = canvas.dimensions();
        for observation in observations {
            let corners = observation.corners().map(|p| {
                let (x, y) = p.to_pixel(width, height);
                (x.round(), y.round())
            });
            for i in 0..corners.len() {
                let next = corners[(i + 1) % corners.len()];
                self.stroke_segment(&mut canvas, corners[i], next);
            }
        }

        Ok(AnnotatedFrame::drawn(frame, canvas, observations.to_vec()))
    }

    fn allocate_surface(&self, frame: &Frame) -> Result<RgbImage, AnnotationError> {
        let pixels = frame.width() as u64 * frame.height() as u64;
        if pixels == 0 {
            return Err(AnnotationError::EmptySurface);
        }
        if pixels > self.max_surface_pixels {
            return Err(AnnotationError::SurfaceTooLarge {
                pixels,
                limit: self.max_surface_pixels,
            });
        }
        Ok(frame.image().clone())
    }

    /// Draws `line_width` parallel one-pixel lines centred on the segment.
    fn stroke_segment(&self, canvas: &mut RgbImage, start: (f32, f32), end: (f32, f32)) {
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let length = (dx * dx + dy * dy).sqrt();
        let normal = if length > f32::EPSILON {
            (-dy / length, dx / length)
        } else {
            (0.0, 0.0)
        };

        let max_x = canvas.width().saturating_sub(1) as f32;
        let max_y = canvas.height().saturating_sub(1) as f32;
        let clamp = |(x, y): (f32, f32)| (x.clamp(0.0, max_x), y.clamp(0.0, max_y));

        let half = (self.line_width - 1) as f32 * 0.5;
        for k in 0..self.line_width {
            let offset = k as f32 - half;
            let shift = (normal.0 * offset, normal.1 * offset);
            draw_line_segment_mut(
                canvas,
                clamp((start.0 + shift.0, start.1 + shift.1)),
                clamp((end.0 + shift.0, end.1 + shift.1)),
                self.color,
            );
        }
    }
}
