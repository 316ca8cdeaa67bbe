use imageproc::edges::canny;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};

use crate::common::Frame;
use crate::error::DetectionError;
use crate::pipeline::detection::geometry::{select_observations, PixelPoint, QuadCandidate};
use crate::pipeline::detection::{check_dimensions, prepare_gray, DetectorParams, QuadDetector};
use crate::pipeline::types::QuadrilateralObservation;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const SUPPRESSION_RADIUS: u32 = 8;
const MIN_VOTES: u32 = 20;

/// Line-based detector for the single dominant rectangle in a frame.
///
/// Canny edges feed a Hough transform; the outermost near-horizontal and
/// near-vertical lines are intersected into one quadrilateral. Suited to
/// document-like targets that fill a large part of the frame.
pub struct HoughQuadDetector {
    params: DetectorParams,
}

impl HoughQuadDetector {
    pub fn new(params: DetectorParams) -> Result<Self, DetectionError> {
        params.validate()?;
        Ok(Self { params })
    }
}

impl QuadDetector for HoughQuadDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<QuadrilateralObservation>, DetectionError> {
        let (width, height) = check_dimensions(frame)?;
        let gray = prepare_gray(frame.image(), self.params.blur_sigma);
        let edges = canny(&gray, CANNY_LOW, CANNY_HIGH);

        // A side must be at least `minimum_size` long, so it needs about that many votes.
        let vote_threshold =
            ((width.min(height) as f32 * self.params.minimum_size) as u32).max(MIN_VOTES);
        let lines = detect_lines(
            &edges,
            LineDetectionOptions {
                vote_threshold,
                suppression_radius: SUPPRESSION_RADIUS,
            },
        );

        let (horizontal, vertical): (Vec<PolarLine>, Vec<PolarLine>) =
            lines.into_iter().partition(is_horizontal);
        tracing::trace!(
            "Hough detector: {} horizontal and {} vertical lines on frame {}",
            horizontal.len(),
            vertical.len(),
            frame.sequence()
        );
        if horizontal.len() < 2 || vertical.len() < 2 {
            return Ok(Vec::new());
        }

        let center = (width as f32 * 0.5, height as f32 * 0.5);
        let by_y = |line: &PolarLine| y_at(line, center.0);
        let by_x = |line: &PolarLine| x_at(line, center.1);
        let (Some(top), Some(bottom)) = (min_by(&horizontal, by_y), max_by(&horizontal, by_y))
        else {
            return Ok(Vec::new());
        };
        let (Some(left), Some(right)) = (min_by(&vertical, by_x), max_by(&vertical, by_x)) else {
            return Ok(Vec::new());
        };

        let corners = [
            intersect(top, left),
            intersect(top, right),
            intersect(bottom, right),
            intersect(bottom, left),
        ];
        let [Some(a), Some(b), Some(c), Some(d)] = corners else {
            return Ok(Vec::new());
        };
        let points: [PixelPoint; 4] = [a, b, c, d];
        let inside = points.iter().all(|(x, y)| {
            (0.0..width as f32).contains(x) && (0.0..height as f32).contains(y)
        });
        if !inside {
            return Ok(Vec::new());
        }

        let candidates = QuadCandidate::evaluate(points, 1.0, &self.params, width, height)
            .into_iter()
            .collect();
        Ok(select_observations(candidates, &self.params, width, height))
    }

    fn name(&self) -> &'static str {
        "hough"
    }
}

/// Lines whose normal points within 45 degrees of vertical run horizontally.
fn is_horizontal(line: &PolarLine) -> bool {
    (45..135).contains(&line.angle_in_degrees)
}

fn normal(line: &PolarLine) -> (f32, f32) {
    let theta = (line.angle_in_degrees as f32).to_radians();
    (theta.cos(), theta.sin())
}

fn y_at(line: &PolarLine, x: f32) -> f32 {
    let (cos, sin) = normal(line);
    (line.r - x * cos) / sin
}

fn x_at(line: &PolarLine, y: f32) -> f32 {
    let (cos, sin) = normal(line);
    (line.r - y * sin) / cos
}

fn min_by<F>(lines: &[PolarLine], key: F) -> Option<&PolarLine>
where
    F: Fn(&PolarLine) -> f32,
{
    lines
        .iter()
        .min_by(|a, b| key(*a).partial_cmp(&key(*b)).unwrap_or(std::cmp::Ordering::Equal))
}

fn max_by<F>(lines: &[PolarLine], key: F) -> Option<&PolarLine>
where
    F: Fn(&PolarLine) -> f32,
{
    lines
        .iter()
        .max_by(|a, b| key(*a).partial_cmp(&key(*b)).unwrap_or(std::cmp::Ordering::Equal))
}

/// Intersection of `x cos(a) + y sin(a) = r` lines; `None` when parallel.
fn intersect(a: &PolarLine, b: &PolarLine) -> Option<PixelPoint> {
    let (ca, sa) = normal(a);
    let (cb, sb) = normal(b);
    let det = ca * sb - sa * cb;
    if det.abs() < 1e-6 {
        return None;
    }
    Some(((a.r * sb - b.r * sa) / det, (ca * b.r - cb * a.r) / det))
}
