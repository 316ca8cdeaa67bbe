pub mod device;
pub mod image_sequence;
pub mod source;
pub mod synthetic;

pub use device::{CaptureDevice, CaptureStatus};
pub use image_sequence::ImageSequenceCamera;
pub use source::FrameSource;
pub use synthetic::SyntheticCamera;

use crate::config::{CaptureSettings, SourceKind};
use crate::error::CaptureError;

pub fn build_device(settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let device: Box<dyn CaptureDevice> = match settings.source {
        SourceKind::Synthetic => Box::new(SyntheticCamera::from_settings(settings)),
        SourceKind::ImageSequence => Box::new(ImageSequenceCamera::from_settings(settings)?),
    };
    tracing::info!("Using {} capture device", device.name());
    Ok(device)
}
