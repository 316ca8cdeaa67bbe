use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use tower::limit::ConcurrencyLimit;
use tower::{Service, ServiceBuilder};

use crate::common::{Frame, RawFrame};
use crate::error::{DetectionError, SessionError};
use crate::pipeline::annotation::Annotator;
use crate::pipeline::detection::QuadDetector;
use crate::pipeline::metrics::{PipelineMetrics, Stage};
use crate::pipeline::types::{AnnotatedFrame, QuadrilateralObservation};

/// Converts, detects and annotates one raw frame on the blocking pool.
///
/// Per-frame failures never surface as errors: a frame that cannot be
/// converted yields `None`, a failed detection yields zero observations and
/// a failed annotation yields the unannotated frame. Each case is counted.
#[derive(Clone)]
pub struct FrameProcessingService {
    detector: Arc<dyn QuadDetector>,
    annotator: Arc<Annotator>,
    metrics: PipelineMetrics,
}

impl FrameProcessingService {
    pub fn new(
        detector: Arc<dyn QuadDetector>,
        annotator: Arc<Annotator>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            detector,
            annotator,
            metrics,
        }
    }

    /// Wraps the service so that at most one frame is processed at a time.
    pub fn serialized(self) -> ConcurrencyLimit<Self> {
        ServiceBuilder::new().concurrency_limit(1).service(self)
    }

    fn process(&self, raw: &RawFrame) -> Option<AnnotatedFrame> {
        let started = Instant::now();
        let frame = match Frame::from_raw(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Skipping frame {}: {}", raw.sequence, e);
                self.metrics.record_conversion_failure();
                return None;
            }
        };
        self.metrics.record_stage(Stage::Conversion, started.elapsed());

        let started = Instant::now();
        let observations = match self.detect(&frame) {
            Ok(observations) => observations,
            Err(e) => {
                tracing::warn!(
                    "Detection failed on frame {}, reporting no rectangles: {}",
                    frame.sequence(),
                    e
                );
                self.metrics.record_detection_failure();
                Vec::new()
            }
        };
        self.metrics.record_stage(Stage::Detection, started.elapsed());

        let started = Instant::now();
        let annotated = match self.annotator.annotate(&frame, &observations) {
            Ok(annotated) => annotated,
            Err(e) => {
                tracing::warn!(
                    "Publishing frame {} without outlines: {}",
                    frame.sequence(),
                    e
                );
                self.metrics.record_annotation_fallback();
                AnnotatedFrame::passthrough(&frame, observations)
            }
        };
        self.metrics.record_stage(Stage::Annotation, started.elapsed());

        tracing::debug!(
            "Processed frame {} with {} observation(s)",
            annotated.sequence,
            annotated.observations.len()
        );
        Some(annotated)
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<QuadrilateralObservation>, DetectionError> {
        let detector = &self.detector;
        panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame))).unwrap_or_else(|_| {
            Err(DetectionError::TaskFailed(format!(
                "{} detector panicked",
                detector.name()
            )))
        })
    }
}

impl Service<RawFrame> for FrameProcessingService {
    type Response = Option<AnnotatedFrame>;
    type Error = SessionError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, raw: RawFrame) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || service.process(&raw))
                .await
                .map_err(|e| SessionError::Processing(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PixelFormat, Rotation};
    use crate::pipeline::detection::{ContourQuadDetector, DetectorParams};
    use tower::ServiceExt;

    struct PanickingDetector;

    impl QuadDetector for PanickingDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<QuadrilateralObservation>, DetectionError> {
            panic!("scratch buffer exhausted");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    fn raw_with_rect(sequence: u64) -> RawFrame {
        let (width, height) = (120u32, 120u32);
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let inside = (30..90).contains(&x) && (30..90).contains(&y);
                data.extend_from_slice(&[if inside { 230 } else { 20 }; 3]);
            }
        }
        RawFrame::packed(sequence, width, height, PixelFormat::Rgb8, Rotation::None, data)
    }

    fn service(detector: Arc<dyn QuadDetector>, metrics: &PipelineMetrics) -> FrameProcessingService {
        FrameProcessingService::new(detector, Arc::new(Annotator::default()), metrics.clone())
    }

    #[tokio::test]
    async fn processes_a_frame_end_to_end() {
        let metrics = PipelineMetrics::new();
        let detector = Arc::new(ContourQuadDetector::new(DetectorParams::default()).unwrap());
        let mut service = service(detector, &metrics).serialized();

        let annotated = service
            .ready()
            .await
            .unwrap()
            .call(raw_with_rect(5))
            .await
            .unwrap()
            .expect("frame converts");

        assert_eq!(annotated.sequence, 5);
        assert_eq!(annotated.observations.len(), 1);
        assert!(annotated.annotated);
        assert_eq!(metrics.snapshot().detection.samples, 1);
    }

    #[tokio::test]
    async fn detector_panics_become_empty_results() {
        let metrics = PipelineMetrics::new();
        let mut service = service(Arc::new(PanickingDetector), &metrics);

        let annotated = service.call(raw_with_rect(1)).await.unwrap().unwrap();
        assert!(annotated.observations.is_empty());
        assert!(!annotated.annotated);
        assert_eq!(metrics.snapshot().detection_failures, 1);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let metrics = PipelineMetrics::new();
        let detector = Arc::new(ContourQuadDetector::new(DetectorParams::default()).unwrap());
        let mut service = service(detector, &metrics);

        let broken = raw_with_rect(2).with_stride(10);
        assert!(service.call(broken).await.unwrap().is_none());
        assert_eq!(metrics.snapshot().conversion_failures, 1);
    }

    #[tokio::test]
    async fn oversized_surfaces_fall_back_to_the_raw_frame() {
        let metrics = PipelineMetrics::new();
        let detector = Arc::new(ContourQuadDetector::new(DetectorParams::default()).unwrap());
        let annotator = Annotator::default().with_max_surface_pixels(100);
        let mut service =
            FrameProcessingService::new(detector, Arc::new(annotator), metrics.clone());

        let annotated = service.call(raw_with_rect(3)).await.unwrap().unwrap();
        assert_eq!(annotated.observations.len(), 1);
        assert!(!annotated.annotated);
        assert_eq!(metrics.snapshot().annotation_fallbacks, 1);
    }
}
