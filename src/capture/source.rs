use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::device::{CaptureDevice, CaptureStatus};
use crate::common::{Mailbox, RawFrame};
use crate::pipeline::metrics::PipelineMetrics;

type SharedDevice = Arc<Mutex<Box<dyn CaptureDevice>>>;

/// Drives a [`CaptureDevice`] on a tokio task and hands its frames to a
/// single-slot mailbox.
///
/// Frames are stamped with a sequence number that keeps increasing across
/// runs. A run that is stopped releases the device before the next run can
/// open it.
pub struct FrameSource {
    device: SharedDevice,
    status: Arc<watch::Sender<CaptureStatus>>,
    metrics: PipelineMetrics,
    next_sequence: Arc<AtomicU64>,
    run: Option<CaptureRun>,
    retired: Vec<JoinHandle<()>>,
}

struct CaptureRun {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl FrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, metrics: PipelineMetrics) -> Self {
        let (status, _) = watch::channel(CaptureStatus::Idle);
        Self {
            device: Arc::new(Mutex::new(device)),
            status: Arc::new(status),
            metrics,
            next_sequence: Arc::new(AtomicU64::new(0)),
            run: None,
            retired: Vec::new(),
        }
    }

    pub fn status(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Starts delivering frames into `frames` and returns immediately.
    /// Does nothing if a run is already active.
    pub fn start(
        &mut self,
        runtime: &Handle,
        token: CancellationToken,
        frames: Arc<Mailbox<RawFrame>>,
    ) {
        if self.run.is_some() {
            return;
        }
        self.retired.retain(|task| !task.is_finished());

        let capture = CaptureLoop {
            device: Arc::clone(&self.device),
            status: Arc::clone(&self.status),
            metrics: self.metrics.clone(),
            next_sequence: Arc::clone(&self.next_sequence),
            frames,
            token: token.clone(),
        };
        let task = runtime.spawn(capture.run());
        self.run = Some(CaptureRun { token, task });
    }

    /// Cancels the active run without waiting for the device to close.
    pub fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.token.cancel();
            self.retired.push(run.task);
        }
    }

    /// Waits for the active run to end on its own, e.g. when the device
    /// reports end of stream or a fatal error. Does not cancel the run.
    pub async fn join(&mut self) {
        if let Some(run) = self.run.take() {
            if let Err(e) = run.task.await {
                tracing::error!("Capture task ended abnormally: {}", e);
            }
        }
    }

    /// Stops delivery and waits until every capture task has released the device.
    pub async fn shutdown(&mut self) {
        self.stop();
        for task in self.retired.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Capture task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureLoop {
    device: SharedDevice,
    status: Arc<watch::Sender<CaptureStatus>>,
    metrics: PipelineMetrics,
    next_sequence: Arc<AtomicU64>,
    frames: Arc<Mailbox<RawFrame>>,
    token: CancellationToken,
}

impl CaptureLoop {
    async fn run(self) {
        let mut device = tokio::select! {
            _ = self.token.cancelled() => return,
            device = Arc::clone(&self.device).lock_owned() => device,
        };
        let name = device.name().to_string();

        self.set_status(CaptureStatus::Negotiating);
        let opened = tokio::select! {
            _ = self.token.cancelled() => None,
            opened = device.open() => Some(opened),
        };
        match opened {
            None => {
                device.close().await;
                self.set_status(CaptureStatus::Idle);
                return;
            }
            Some(Err(e)) => {
                tracing::error!("Failed to open capture device {}: {}", name, e);
                self.set_status(CaptureStatus::Failed(e.to_string()));
                return;
            }
            Some(Ok(())) => {}
        }

        tracing::info!("Capture device {} streaming", name);
        self.set_status(CaptureStatus::Streaming);
        let mut final_status = CaptureStatus::Idle;

        loop {
            let next = tokio::select! {
                _ = self.token.cancelled() => break,
                next = device.next_frame() => next,
            };
            match next {
                Ok(Some(mut frame)) => {
                    frame.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_captured();
                    if let Some(dropped) = self.frames.post(frame) {
                        tracing::debug!("Dropping frame {}: pipeline busy", dropped.sequence);
                        self.metrics.record_dropped();
                    }
                }
                Ok(None) => {
                    tracing::info!("Capture device {} reached the end of its stream", name);
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("Skipping frame from {}: {}", name, e);
                    self.metrics.record_capture_error();
                }
                Err(e) => {
                    tracing::error!("Capture device {} failed: {}", name, e);
                    self.metrics.record_capture_error();
                    final_status = CaptureStatus::Failed(e.to_string());
                    break;
                }
            }
        }

        device.close().await;
        tracing::info!("Capture device {} closed", name);
        self.set_status(final_status);
    }

    fn set_status(&self, status: CaptureStatus) {
        self.status.send_replace(status);
    }
}
