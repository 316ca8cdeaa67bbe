use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimit;
use tower::{Service, ServiceExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::capture::{build_device, CaptureDevice, CaptureStatus, FrameSource};
use crate::common::{Mailbox, RawFrame};
use crate::config::Settings;
use crate::error::{AppError, SessionError};
use crate::pipeline::annotation::Annotator;
use crate::pipeline::detection::{build_detector, QuadDetector};
use crate::pipeline::metrics::{PipelineMetrics, PipelineStats};
use crate::pipeline::publish::{LatestFrame, LatestFrameReceiver, NoopNotifier, PresentationNotifier};
use crate::pipeline::services::FrameProcessingService;
use crate::pipeline::types::AnnotatedFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running,
}

/// Owns the capture → detect → annotate → publish pipeline and its
/// start/stop lifecycle.
///
/// `start` and `stop` never block and may be called repeatedly; only the
/// first call of each kind in a row has an effect. Once `stop` returns no
/// frame from the stopped run reaches the latest-frame slot.
pub struct Session {
    runtime: Handle,
    source: FrameSource,
    processor: FrameProcessingService,
    latest: Arc<LatestFrame>,
    notifier: Arc<dyn PresentationNotifier>,
    metrics: PipelineMetrics,
    run: Option<PipelineRun>,
    retired: Vec<JoinHandle<()>>,
}

struct PipelineRun {
    id: Uuid,
    token: CancellationToken,
    worker: JoinHandle<()>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn state(&self) -> SessionState {
        if self.run.is_some() {
            SessionState::Running
        } else {
            SessionState::Stopped
        }
    }

    pub fn start(&mut self) {
        if self.run.is_some() {
            return;
        }
        self.retired.retain(|task| !task.is_finished());

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let frames = Arc::new(Mailbox::new());
        let epoch = self.latest.open();
        let span = tracing::info_span!("session", run = %id);

        {
            let _entered = span.enter();
            self.source
                .start(&self.runtime, token.clone(), Arc::clone(&frames));
        }

        let worker = PipelineWorker {
            service: self.processor.clone().serialized(),
            frames,
            latest: Arc::clone(&self.latest),
            notifier: Arc::clone(&self.notifier),
            metrics: self.metrics.clone(),
            epoch,
            token: token.clone(),
        };
        let worker = self.runtime.spawn(worker.run().instrument(span));

        tracing::info!("Session {} started", id);
        self.run = Some(PipelineRun { id, token, worker });
    }

    pub fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        self.latest.seal();
        run.token.cancel();
        self.source.stop();
        self.retired.push(run.worker);
        tracing::info!("Session {} stopped", run.id);
    }

    /// Stops the session and waits for its tasks to wind down.
    pub async fn shutdown(&mut self) {
        self.stop();
        for worker in self.retired.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!("Pipeline worker ended abnormally: {}", e);
            }
        }
        self.source.shutdown().await;
    }

    pub fn capture_status(&self) -> watch::Receiver<CaptureStatus> {
        self.source.status()
    }

    pub fn latest_frames(&self) -> LatestFrameReceiver {
        self.latest.subscribe()
    }

    pub fn latest_frame(&self) -> Option<Arc<AnnotatedFrame>> {
        self.latest.current()
    }

    pub fn stats(&self) -> PipelineStats {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PipelineWorker {
    service: ConcurrencyLimit<FrameProcessingService>,
    frames: Arc<Mailbox<RawFrame>>,
    latest: Arc<LatestFrame>,
    notifier: Arc<dyn PresentationNotifier>,
    metrics: PipelineMetrics,
    epoch: u64,
    token: CancellationToken,
}

impl PipelineWorker {
    async fn run(mut self) {
        loop {
            let raw = tokio::select! {
                _ = self.token.cancelled() => break,
                raw = self.frames.recv() => raw,
            };
            let sequence = raw.sequence;

            let processed = match self.service.ready().await {
                Ok(service) => service.call(raw).await,
                Err(e) => Err(e),
            };
            self.settle(sequence, processed);
        }
        tracing::debug!("Pipeline worker finished");
    }

    fn settle(&self, sequence: u64, processed: Result<Option<AnnotatedFrame>, SessionError>) {
        match processed {
            Ok(Some(annotated)) => self.publish(annotated),
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Processing stage failed on frame {}: {}", sequence, e);
                self.metrics.record_processing_error();
            }
        }
    }

    fn publish(&self, annotated: AnnotatedFrame) {
        let sequence = annotated.sequence;
        let observations = annotated.observations.len();
        if self.latest.publish(self.epoch, Arc::new(annotated)) {
            self.metrics.record_published(observations);
            self.notifier.frame_ready(sequence);
        } else {
            tracing::debug!("Discarding frame {} finished after stop", sequence);
            self.metrics.record_discarded();
        }
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    device: Option<Box<dyn CaptureDevice>>,
    detector: Option<Arc<dyn QuadDetector>>,
    annotator: Option<Annotator>,
    notifier: Option<Arc<dyn PresentationNotifier>>,
    runtime: Option<Handle>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device, detector and annotator as described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Ok(Self::new()
            .device(build_device(&settings.capture)?)
            .detector(build_detector(&settings.detector)?)
            .annotator(Annotator::from(&settings.annotation)))
    }

    pub fn device(mut self, device: Box<dyn CaptureDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn QuadDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    // Replaces the default red two-pixel annotator.
    pub fn annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn PresentationNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    // Runtime the session spawns onto; defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Session, SessionError> {
        let device = self.device.ok_or(SessionError::Incomplete("capture device"))?;
        let detector = self.detector.ok_or(SessionError::Incomplete("detector"))?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| SessionError::NoRuntime(e.to_string()))?,
        };

        let metrics = PipelineMetrics::new();
        let annotator = Arc::new(self.annotator.unwrap_or_default());
        Ok(Session {
            runtime,
            source: FrameSource::new(device, metrics.clone()),
            processor: FrameProcessingService::new(detector, annotator, metrics.clone()),
            latest: Arc::new(LatestFrame::new()),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            metrics,
            run: None,
            retired: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticCamera;
    use crate::common::{PixelFormat, Rotation};
    use crate::error::CaptureError;
    use crate::pipeline::detection::{ContourQuadDetector, DetectorParams};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingNotifier {
        ready: AtomicU64,
    }

    impl PresentationNotifier for CountingNotifier {
        fn frame_ready(&self, _sequence: u64) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct UnpluggedCamera;

    #[async_trait]
    impl CaptureDevice for UnpluggedCamera {
        async fn open(&mut self) -> Result<(), CaptureError> {
            Err(CaptureError::DeviceUnavailable("camera access denied".into()))
        }

        async fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
            Ok(None)
        }

        async fn close(&mut self) {}

        fn name(&self) -> &str {
            "unplugged"
        }
    }

    fn detector() -> Arc<dyn QuadDetector> {
        Arc::new(ContourQuadDetector::new(DetectorParams::default()).unwrap())
    }

    fn camera() -> SyntheticCamera {
        SyntheticCamera::new(96, 72, 100)
            .with_format(PixelFormat::Bgra8)
            .with_rotation(Rotation::Clockwise90)
    }

    fn session(device: Box<dyn CaptureDevice>) -> Session {
        Session::builder()
            .device(device)
            .detector(detector())
            .build()
            .unwrap()
    }

    async fn next_published(receiver: &mut LatestFrameReceiver) -> Arc<AnnotatedFrame> {
        tokio::time::timeout(Duration::from_secs(5), receiver.changed())
            .await
            .expect("a frame is published")
            .unwrap();
        receiver
            .borrow_and_update()
            .clone()
            .expect("published frames are present")
    }

    #[test]
    fn builder_requires_device_and_detector() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let missing_device = Session::builder()
            .detector(detector())
            .runtime(runtime.handle().clone())
            .build();
        assert!(matches!(
            missing_device,
            Err(SessionError::Incomplete("capture device"))
        ));

        let missing_runtime = Session::builder()
            .device(Box::new(camera()))
            .detector(detector())
            .build();
        assert!(matches!(missing_runtime, Err(SessionError::NoRuntime(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeated_start_and_stop_are_no_ops() {
        let mut session = session(Box::new(camera()));
        assert_eq!(session.state(), SessionState::Stopped);

        session.start();
        session.start();
        assert_eq!(session.state(), SessionState::Running);
        let mut frames = session.latest_frames();
        next_published(&mut frames).await;

        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        session.shutdown().await;
        assert_eq!(*session.capture_status().borrow(), CaptureStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_are_published_in_capture_order() {
        let notifier = Arc::new(CountingNotifier::default());
        let mut session = Session::builder()
            .device(Box::new(camera()))
            .detector(detector())
            .notifier(notifier.clone())
            .build()
            .unwrap();
        let mut frames = session.latest_frames();
        session.start();

        let mut last = None;
        for _ in 0..5 {
            let frame = next_published(&mut frames).await;
            assert_eq!(frame.observations.len(), 1);
            assert!(frame.annotated);
            if let Some(previous) = last {
                assert!(frame.sequence > previous);
            }
            last = Some(frame.sequence);
        }
        session.shutdown().await;

        let stats = session.stats();
        assert!(stats.frames_published >= 5);
        assert_eq!(notifier.ready.load(Ordering::SeqCst), stats.frames_published);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_is_published_after_stop_returns() {
        let mut session = session(Box::new(camera()));
        let mut frames = session.latest_frames();
        session.start();
        next_published(&mut frames).await;

        session.stop();
        let after_stop = session.latest_frame().map(|f| f.sequence);
        frames.mark_unchanged();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!frames.has_changed().unwrap());
        assert_eq!(session.latest_frame().map(|f| f.sequence), after_stop);
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restarting_continues_the_sequence() {
        let mut session = session(Box::new(camera()));
        let mut frames = session.latest_frames();

        session.start();
        let first = next_published(&mut frames).await.sequence;
        session.stop();

        session.start();
        let second = next_published(&mut frames).await.sequence;
        assert!(second > first);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn capture_failure_is_surfaced_without_stopping() {
        let mut session = session(Box::new(UnpluggedCamera));
        let mut status = session.capture_status();
        session.start();

        let failed = tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.is_failed()))
            .await
            .expect("status changes")
            .unwrap()
            .clone();
        assert_eq!(
            failed,
            CaptureStatus::Failed("No usable capture device: camera access denied".to_string())
        );
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.latest_frame().is_none());
        session.shutdown().await;
    }

    fn worker(metrics: &PipelineMetrics) -> PipelineWorker {
        let latest = Arc::new(LatestFrame::new());
        let epoch = latest.open();
        PipelineWorker {
            service: FrameProcessingService::new(
                detector(),
                Arc::new(Annotator::default()),
                metrics.clone(),
            )
            .serialized(),
            frames: Arc::new(Mailbox::new()),
            latest,
            notifier: Arc::new(NoopNotifier),
            metrics: metrics.clone(),
            epoch,
            token: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn failed_processing_tasks_are_not_counted_as_detection_failures() {
        let metrics = PipelineMetrics::new();
        let worker = worker(&metrics);

        worker.settle(
            7,
            Err(SessionError::Processing("task panicked".to_string())),
        );
        let frame = crate::common::Frame::new(8, chrono::Utc::now(), image::RgbImage::new(4, 4));
        worker.settle(8, Ok(Some(AnnotatedFrame::passthrough(&frame, Vec::new()))));

        let stats = metrics.snapshot();
        assert_eq!(stats.processing_errors, 1);
        assert_eq!(stats.detection_failures, 0);
        assert_eq!(stats.frames_published, 1);
        assert_eq!(worker.latest.current().map(|f| f.sequence), Some(8));
    }
}
