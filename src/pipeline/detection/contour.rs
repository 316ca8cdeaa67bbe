use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::otsu_level;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;

use crate::common::Frame;
use crate::error::DetectionError;
use crate::pipeline::detection::geometry::{
    distance, polygon_area, select_observations, PixelPoint, QuadCandidate,
};
use crate::pipeline::detection::{check_dimensions, prepare_gray, DetectorParams, QuadDetector};
use crate::pipeline::types::QuadrilateralObservation;

/// Douglas-Peucker tolerance as a fraction of the contour perimeter.
const APPROXIMATION_FRACTION: f64 = 0.02;
/// Contours with fewer boundary pixels are noise.
const MIN_CONTOUR_POINTS: usize = 16;
/// Vertices closer than this fraction of the perimeter are merged.
const MERGE_FRACTION: f32 = 0.01;
/// Vertices whose interior angle exceeds this are treated as lying on an edge.
const STRAIGHT_ANGLE_DEGREES: f32 = 165.0;

#[derive(Debug, Clone, Copy)]
enum Polarity {
    /// Foreground brighter than the Otsu level.
    Bright,
    /// Foreground at or below the Otsu level.
    Dark,
}

/// Classical contour-based rectangle detector.
///
/// The frame is thresholded with Otsu's level in both polarities so light
/// rectangles on dark backgrounds and dark rectangles on light backgrounds
/// are both found. Outer contours that touch the frame border are ignored
/// because their true outline is not visible.
pub struct ContourQuadDetector {
    params: DetectorParams,
}

impl ContourQuadDetector {
    pub fn new(params: DetectorParams) -> Result<Self, DetectionError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn candidate_from_contour(
        &self,
        points: &[Point<i32>],
        width: u32,
        height: u32,
    ) -> Option<QuadCandidate> {
        if points.len() < MIN_CONTOUR_POINTS || touches_border(points, width, height) {
            return None;
        }

        let perimeter = arc_length(points, true);
        let epsilon = (perimeter * APPROXIMATION_FRACTION).max(1.0);
        let polygon = approximate_closed(points, epsilon);
        let polygon = tidy_polygon(polygon, perimeter as f32 * MERGE_FRACTION);
        let corners: [PixelPoint; 4] = polygon.try_into().ok()?;

        // How much of the traced region the quadrilateral explains.
        let traced: Vec<PixelPoint> = points.iter().map(|p| (p.x as f32, p.y as f32)).collect();
        let traced_area = polygon_area(&traced);
        let quad_area = polygon_area(&corners);
        if traced_area <= f32::EPSILON || quad_area <= f32::EPSILON {
            return None;
        }
        let support = traced_area.min(quad_area) / traced_area.max(quad_area);

        QuadCandidate::evaluate(corners, support, &self.params, width, height)
    }
}

impl QuadDetector for ContourQuadDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<QuadrilateralObservation>, DetectionError> {
        let (width, height) = check_dimensions(frame)?;
        let gray = prepare_gray(frame.image(), self.params.blur_sigma);
        let level = otsu_level(&gray);

        let mut candidates = Vec::new();
        for polarity in [Polarity::Bright, Polarity::Dark] {
            let mask = binarize(&gray, level, polarity);
            for contour in find_contours::<i32>(&mask) {
                if !matches!(contour.border_type, BorderType::Outer) {
                    continue;
                }
                if let Some(candidate) = self.candidate_from_contour(&contour.points, width, height)
                {
                    candidates.push(candidate);
                }
            }
        }

        tracing::trace!(
            "Contour detector: otsu level {}, {} candidates on frame {}",
            level,
            candidates.len(),
            frame.sequence()
        );
        Ok(select_observations(candidates, &self.params, width, height))
    }

    fn name(&self) -> &'static str {
        "contour"
    }
}

fn binarize(gray: &GrayImage, level: u8, polarity: Polarity) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0];
        let foreground = match polarity {
            Polarity::Bright => value > level,
            Polarity::Dark => value <= level,
        };
        Luma([if foreground { 255 } else { 0 }])
    })
}

fn touches_border(points: &[Point<i32>], width: u32, height: u32) -> bool {
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    points
        .iter()
        .any(|p| p.x <= 0 || p.y <= 0 || p.x >= max_x || p.y >= max_y)
}

/// Polygon approximation of a closed contour: split at the point farthest
/// from the start and simplify both open chains.
fn approximate_closed(points: &[Point<i32>], epsilon: f64) -> Vec<PixelPoint> {
    let start = points[0];
    let far = points
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| {
            let dx = (p.x - start.x) as i64;
            let dy = (p.y - start.y) as i64;
            dx * dx + dy * dy
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    if far == 0 {
        return Vec::new();
    }

    let first = approximate_polygon_dp(&points[..=far], epsilon, false);
    let mut return_chain = points[far..].to_vec();
    return_chain.push(start);
    let second = approximate_polygon_dp(&return_chain, epsilon, false);

    // `first` ends and `second` starts at the far point; `second` ends at start.
    let mut polygon: Vec<PixelPoint> = first[..first.len().saturating_sub(1)]
        .iter()
        .chain(second[..second.len().saturating_sub(1)].iter())
        .map(|p| (p.x as f32, p.y as f32))
        .collect();
    polygon.dedup();
    polygon
}

/// Merges near-coincident vertices and drops vertices that sit on a
/// straight edge, treating the polygon as closed.
fn tidy_polygon(mut polygon: Vec<PixelPoint>, merge_distance: f32) -> Vec<PixelPoint> {
    loop {
        let n = polygon.len();
        if n <= 3 {
            return polygon;
        }
        let redundant = (0..n).find(|&i| {
            let prev = polygon[(i + n - 1) % n];
            let here = polygon[i];
            let next = polygon[(i + 1) % n];
            distance(prev, here) < merge_distance || vertex_angle(prev, here, next) > STRAIGHT_ANGLE_DEGREES
        });
        match redundant {
            Some(i) => {
                polygon.remove(i);
            }
            None => return polygon,
        }
    }
}

fn vertex_angle(prev: PixelPoint, here: PixelPoint, next: PixelPoint) -> f32 {
    let (ax, ay) = (prev.0 - here.0, prev.1 - here.1);
    let (bx, by) = (next.0 - here.0, next.1 - here.1);
    let norm = (ax * ax + ay * ay).sqrt() * (bx * bx + by * by).sqrt();
    if norm <= f32::EPSILON {
        return 180.0;
    }
    ((ax * bx + ay * by) / norm).clamp(-1.0, 1.0).acos().to_degrees()
}
