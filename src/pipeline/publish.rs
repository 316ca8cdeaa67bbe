use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::pipeline::types::AnnotatedFrame;

pub type LatestFrameReceiver = watch::Receiver<Option<Arc<AnnotatedFrame>>>;

/// Told that a new frame is waiting in the latest-frame slot.
///
/// Called from the pipeline worker; implementations must not block.
pub trait PresentationNotifier: Send + Sync {
    fn frame_ready(&self, sequence: u64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl PresentationNotifier for NoopNotifier {
    fn frame_ready(&self, _sequence: u64) {}
}

/// The single "latest annotated frame" slot shared with presentation.
///
/// Every run publishes under an epoch handed out by [`LatestFrame::open`].
/// [`LatestFrame::seal`] advances the epoch while holding the slot's write
/// lock, so once it returns no publish from an older epoch can land.
#[derive(Debug)]
pub struct LatestFrame {
    sender: watch::Sender<Option<Arc<AnnotatedFrame>>>,
    epoch: AtomicU64,
}

impl Default for LatestFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestFrame {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> LatestFrameReceiver {
        self.sender.subscribe()
    }

    pub fn current(&self) -> Option<Arc<AnnotatedFrame>> {
        self.sender.borrow().clone()
    }

    /// Starts a new publishing epoch and returns it.
    pub fn open(&self) -> u64 {
        let mut epoch = 0;
        self.sender.send_if_modified(|_| {
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            false
        });
        epoch
    }

    /// Invalidates the current epoch. Publishes still in flight are refused.
    pub fn seal(&self) {
        self.sender.send_if_modified(|_| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            false
        });
    }

    /// Replaces the slot's value if `epoch` is still current. Returns whether
    /// the frame was published.
    pub fn publish(&self, epoch: u64, frame: Arc<AnnotatedFrame>) -> bool {
        let mut frame = Some(frame);
        self.sender.send_if_modified(|slot| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            *slot = frame.take();
            true
        })
    }
}
