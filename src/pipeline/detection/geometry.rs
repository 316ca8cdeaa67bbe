use std::cmp::Ordering;

use crate::pipeline::detection::DetectorParams;
use crate::pipeline::types::{NormalizedPoint, QuadrilateralObservation};

/// Pixel position with the origin at the top-left corner.
pub type PixelPoint = (f32, f32);

/// A four-cornered polygon in pixel space that passed the shape filters.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadCandidate {
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [PixelPoint; 4],
    pub confidence: f32,
    pub area: f32,
}

impl QuadCandidate {
    /// Orders `points`, applies the aspect, size and quadrature filters and
    /// scores the result. `support` in `[0,1]` scales the confidence by how
    /// well the underlying evidence agrees with the polygon.
    pub fn evaluate(
        points: [PixelPoint; 4],
        support: f32,
        params: &DetectorParams,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        let corners = order_corners(points);
        if !is_convex(&corners) {
            return None;
        }

        let angles = interior_angles(&corners);
        let max_deviation = angles
            .iter()
            .map(|a| (a - 90.0).abs())
            .fold(0.0f32, f32::max);
        if max_deviation > params.quadrature_tolerance {
            return None;
        }

        let sides = side_lengths(&corners);
        let horizontal = (sides[0] + sides[2]) * 0.5;
        let vertical = (sides[1] + sides[3]) * 0.5;
        let short = horizontal.min(vertical);
        let long = horizontal.max(vertical);
        if long <= f32::EPSILON {
            return None;
        }

        let aspect = short / long;
        if aspect < params.minimum_aspect_ratio || aspect > params.maximum_aspect_ratio {
            return None;
        }
        if short < params.minimum_size * width.min(height) as f32 {
            return None;
        }

        let mean_deviation = angles.iter().map(|a| (a - 90.0).abs()).sum::<f32>() / 4.0;
        let confidence = (1.0 - mean_deviation / 90.0) * support.clamp(0.0, 1.0);

        Some(Self {
            corners,
            confidence,
            area: polygon_area(&corners),
        })
    }

    pub fn into_observation(self, width: u32, height: u32) -> QuadrilateralObservation {
        let corners = self
            .corners
            .map(|(x, y)| NormalizedPoint::from_pixel(x, y, width, height));
        QuadrilateralObservation::new(corners, self.confidence)
    }

    fn max_corner_distance(&self, other: &QuadCandidate) -> f32 {
        self.corners
            .iter()
            .zip(other.corners.iter())
            .map(|(a, b)| distance(*a, *b))
            .fold(0.0, f32::max)
    }
}

/// Drops duplicates and weak candidates, ranks by confidence then area and
/// converts the survivors to observations.
pub fn select_observations(
    mut candidates: Vec<QuadCandidate>,
    params: &DetectorParams,
    width: u32,
    height: u32,
) -> Vec<QuadrilateralObservation> {
    candidates.retain(|c| c.confidence >= params.minimum_confidence);
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then(b.area.partial_cmp(&a.area).unwrap_or(Ordering::Equal))
    });

    let merge_distance = DUPLICATE_FRACTION * width.min(height) as f32;
    let mut kept: Vec<QuadCandidate> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .any(|k| k.max_corner_distance(&candidate) <= merge_distance)
        {
            continue;
        }
        kept.push(candidate);
    }

    if params.maximum_observations > 0 {
        kept.truncate(params.maximum_observations);
    }

    kept.into_iter()
        .map(|c| c.into_observation(width, height))
        .collect()
}

/// Candidates whose corners all lie this close (as a fraction of the smaller
/// frame dimension) describe the same rectangle.
const DUPLICATE_FRACTION: f32 = 0.03;

/// Sorts corners clockwise on screen starting from the top-left one.
pub fn order_corners(points: [PixelPoint; 4]) -> [PixelPoint; 4] {
    let cx = points.iter().map(|p| p.0).sum::<f32>() / 4.0;
    let cy = points.iter().map(|p| p.1).sum::<f32>() / 4.0;

    let mut sorted = points;
    // With y pointing down, ascending atan2 walks clockwise on screen.
    sorted.sort_by(|a, b| {
        let ta = (a.1 - cy).atan2(a.0 - cx);
        let tb = (b.1 - cy).atan2(b.0 - cx);
        ta.partial_cmp(&tb).unwrap_or(Ordering::Equal)
    });

    let start = sorted
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.0 + a.1)
                .partial_cmp(&(b.0 + b.1))
                .unwrap_or(Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}

pub fn distance(a: PixelPoint, b: PixelPoint) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Side lengths: top, right, bottom, left.
pub fn side_lengths(corners: &[PixelPoint; 4]) -> [f32; 4] {
    std::array::from_fn(|i| distance(corners[i], corners[(i + 1) % 4]))
}

/// Interior angle in degrees at each corner.
pub fn interior_angles(corners: &[PixelPoint; 4]) -> [f32; 4] {
    std::array::from_fn(|i| {
        let prev = corners[(i + 3) % 4];
        let here = corners[i];
        let next = corners[(i + 1) % 4];
        let (ax, ay) = (prev.0 - here.0, prev.1 - here.1);
        let (bx, by) = (next.0 - here.0, next.1 - here.1);
        let norm = (ax * ax + ay * ay).sqrt() * (bx * bx + by * by).sqrt();
        if norm <= f32::EPSILON {
            return 0.0;
        }
        ((ax * bx + ay * by) / norm).clamp(-1.0, 1.0).acos().to_degrees()
    })
}

pub fn is_convex(corners: &[PixelPoint; 4]) -> bool {
    let crosses: [f32; 4] = std::array::from_fn(|i| {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let c = corners[(i + 2) % 4];
        (b.0 - a.0) * (c.1 - b.1) - (b.1 - a.1) * (c.0 - b.0)
    });
    crosses.iter().all(|c| *c > 0.0) || crosses.iter().all(|c| *c < 0.0)
}

/// Shoelace area of a simple polygon.
pub fn polygon_area(points: &[PixelPoint]) -> f32 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0f32;
    for i in 0..n {
        let j = (i + 1) % n;
        twice_area += points[i].0 * points[j].1 - points[j].0 * points[i].1;
    }
    twice_area.abs() * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DetectorParams {
        DetectorParams::default()
    }

    #[test]
    fn corners_are_ordered_from_top_left_clockwise() {
        let ordered = order_corners([(80.0, 80.0), (20.0, 20.0), (20.0, 80.0), (80.0, 20.0)]);
        assert_eq!(
            ordered,
            [(20.0, 20.0), (80.0, 20.0), (80.0, 80.0), (20.0, 80.0)]
        );
    }

    #[test]
    fn right_angles_score_full_confidence() {
        let candidate = QuadCandidate::evaluate(
            [(20.0, 20.0), (80.0, 20.0), (80.0, 80.0), (20.0, 80.0)],
            1.0,
            &params(),
            100,
            100,
        )
        .expect("square should pass the filters");
        assert!((candidate.confidence - 1.0).abs() < 1e-4);
        assert!((candidate.area - 3600.0).abs() < 1e-2);
    }

    #[test]
    fn elongated_shapes_fail_the_aspect_filter() {
        // 60x20 is an aspect of 0.33, below the 0.5 minimum.
        let candidate = QuadCandidate::evaluate(
            [(20.0, 40.0), (80.0, 40.0), (80.0, 60.0), (20.0, 60.0)],
            1.0,
            &params(),
            100,
            100,
        );
        assert!(candidate.is_none());
    }

    #[test]
    fn small_shapes_fail_the_size_filter() {
        // 10 px is below 0.2 of a 100 px frame.
        let candidate = QuadCandidate::evaluate(
            [(40.0, 40.0), (50.0, 40.0), (50.0, 50.0), (40.0, 50.0)],
            1.0,
            &params(),
            100,
            100,
        );
        assert!(candidate.is_none());
    }

    #[test]
    fn skewed_shapes_fail_the_quadrature_filter() {
        // A parallelogram with 45 degree acute corners.
        let candidate = QuadCandidate::evaluate(
            [(20.0, 20.0), (70.0, 20.0), (100.0, 50.0), (50.0, 50.0)],
            1.0,
            &params(),
            100,
            100,
        );
        assert!(candidate.is_none());
    }

    #[test]
    fn duplicates_collapse_and_limit_applies() {
        let square = |offset: f32| {
            QuadCandidate::evaluate(
                [
                    (20.0 + offset, 20.0),
                    (80.0 + offset, 20.0),
                    (80.0 + offset, 80.0),
                    (20.0 + offset, 80.0),
                ],
                1.0,
                &params(),
                200,
                200,
            )
            .unwrap()
        };
        let mut unlimited = params();
        unlimited.maximum_observations = 0;

        let observations =
            select_observations(vec![square(0.0), square(1.0), square(100.0)], &unlimited, 200, 200);
        assert_eq!(observations.len(), 2);

        let limited =
            select_observations(vec![square(0.0), square(100.0)], &params(), 200, 200);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn observation_uses_bottom_left_origin() {
        let candidate = QuadCandidate::evaluate(
            [(25.0, 25.0), (75.0, 25.0), (75.0, 75.0), (25.0, 75.0)],
            1.0,
            &params(),
            100,
            100,
        )
        .unwrap();
        let observation = candidate.into_observation(100, 100);
        assert!((observation.top_left.x - 0.25).abs() < 1e-6);
        assert!((observation.top_left.y - 0.75).abs() < 1e-6);
        assert!((observation.bottom_right.x - 0.75).abs() < 1e-6);
        assert!((observation.bottom_right.y - 0.25).abs() < 1e-6);
    }
}
