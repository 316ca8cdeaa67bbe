use serde::Serialize;

/// A point in normalized frame coordinates with the origin at the
/// bottom-left corner and y growing upward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Converts a top-left-origin pixel position on a `width`x`height` frame.
    pub fn from_pixel(x: f32, y: f32, width: u32, height: u32) -> Self {
        Self {
            x: (x / width as f32).clamp(0.0, 1.0),
            y: (1.0 - y / height as f32).clamp(0.0, 1.0),
        }
    }

    /// Inverse of [`NormalizedPoint::from_pixel`], clamped onto the frame.
    pub fn to_pixel(self, width: u32, height: u32) -> (f32, f32) {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        (
            (self.x * width as f32).clamp(0.0, max_x),
            ((1.0 - self.y) * height as f32).clamp(0.0, max_y),
        )
    }

    pub fn distance(&self, other: &NormalizedPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A detected quadrilateral. Corners are named as seen on screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuadrilateralObservation {
    pub top_left: NormalizedPoint,
    pub top_right: NormalizedPoint,
    pub bottom_right: NormalizedPoint,
    pub bottom_left: NormalizedPoint,
    pub confidence: f32,
}

impl QuadrilateralObservation {
    pub fn new(corners: [NormalizedPoint; 4], confidence: f32) -> Self {
        let [top_left, top_right, bottom_right, bottom_left] = corners;
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Corners in drawing order: top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [NormalizedPoint; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    pub fn bounding_box(&self) -> NormalizedRect {
        let corners = self.corners();
        let min_x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
        NormalizedRect {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }

    /// Largest corner-to-corner distance to `other`.
    pub fn max_corner_distance(&self, other: &QuadrilateralObservation) -> f32 {
        self.corners()
            .iter()
            .zip(other.corners().iter())
            .map(|(a, b)| a.distance(b))
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_round_trip_flips_the_vertical_axis() {
        let p = NormalizedPoint::from_pixel(25.0, 10.0, 100, 100);
        assert!((p.x - 0.25).abs() < 1e-6);
        assert!((p.y - 0.9).abs() < 1e-6);
        let (x, y) = p.to_pixel(100, 100);
        assert!((x - 25.0).abs() < 1e-3);
        assert!((y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn to_pixel_stays_inside_the_frame() {
        assert_eq!(NormalizedPoint::new(1.0, 0.0).to_pixel(100, 50), (99.0, 49.0));
        assert_eq!(NormalizedPoint::new(0.0, 1.0).to_pixel(100, 50), (0.0, 0.0));
    }

    #[test]
    fn bounding_box_spans_all_corners() {
        let quad = QuadrilateralObservation::new(
            [
                NormalizedPoint::new(0.2, 0.8),
                NormalizedPoint::new(0.7, 0.9),
                NormalizedPoint::new(0.8, 0.3),
                NormalizedPoint::new(0.1, 0.2),
            ],
            1.5,
        );
        let bbox = quad.bounding_box();
        assert!((bbox.x - 0.1).abs() < 1e-6);
        assert!((bbox.y - 0.2).abs() < 1e-6);
        assert!((bbox.width - 0.7).abs() < 1e-6);
        assert!((bbox.height - 0.7).abs() < 1e-6);
        assert_eq!(quad.confidence, 1.0);
    }
}
