use async_trait::async_trait;

use crate::common::RawFrame;
use crate::error::CaptureError;

/// A source of raw frames, such as a camera or a recorded sequence.
///
/// `next_frame` paces itself to the device's frame rate and resolves to
/// `Ok(None)` once the stream has ended. Errors for which
/// [`CaptureError::is_recoverable`] holds only cost the current frame.
#[async_trait]
pub trait CaptureDevice: Send {
    async fn open(&mut self) -> Result<(), CaptureError>;

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;

    async fn close(&mut self);

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaptureStatus {
    #[default]
    Idle,
    /// The device is being opened.
    Negotiating,
    Streaming,
    Failed(String),
}

impl CaptureStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, CaptureStatus::Failed(_))
    }
}
