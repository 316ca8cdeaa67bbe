use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use image::ImageFormat;
use tokio::time::{Interval, MissedTickBehavior};

use crate::capture::device::CaptureDevice;
use crate::common::{PixelFormat, RawFrame, Rotation};
use crate::config::CaptureSettings;
use crate::error::CaptureError;

/// Plays back the image files of a directory in file-name order.
///
/// Files are stored upright, so frames carry no rotation hint. A file that
/// fails to decode costs only its own frame.
pub struct ImageSequenceCamera {
    directory: PathBuf,
    frame_interval: Duration,
    loop_playback: bool,
    files: Vec<PathBuf>,
    position: usize,
    sequence: u64,
    ticker: Option<Interval>,
}

impl ImageSequenceCamera {
    pub fn new(directory: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            directory: directory.into(),
            frame_interval: Duration::from_secs(1) / fps.max(1),
            loop_playback: false,
            files: Vec::new(),
            position: 0,
            sequence: 0,
            ticker: None,
        }
    }

    pub fn from_settings(settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let directory = settings.directory.clone().ok_or_else(|| {
            CaptureError::DeviceUnavailable(
                "image sequence source needs capture.directory".to_string(),
            )
        })?;
        Ok(Self::new(directory, settings.fps).with_looping(settings.loop_playback))
    }

    pub fn with_looping(mut self, loop_playback: bool) -> Self {
        self.loop_playback = loop_playback;
        self
    }

    fn list_images(directory: &Path) -> Result<Vec<PathBuf>, CaptureError> {
        let to_error = |e: std::io::Error| CaptureError::Directory {
            path: directory.to_path_buf(),
            reason: e.to_string(),
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(directory).map_err(to_error)? {
            let path = entry.map_err(to_error)?.path();
            if path.is_file() && ImageFormat::from_path(&path).is_ok() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn decode(path: PathBuf, sequence: u64) -> Result<RawFrame, CaptureError> {
        let image = image::open(&path).map_err(|e| CaptureError::Decode {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(RawFrame::packed(
            sequence,
            width,
            height,
            PixelFormat::Rgb8,
            Rotation::None,
            rgb.into_raw(),
        ))
    }
}

#[async_trait]
impl CaptureDevice for ImageSequenceCamera {
    async fn open(&mut self) -> Result<(), CaptureError> {
        let directory = self.directory.clone();
        let files = tokio::task::spawn_blocking(move || Self::list_images(&directory))
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))??;
        if files.is_empty() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "no images found in {:?}",
                self.directory
            )));
        }

        tracing::info!(
            "Image sequence camera playing {} file(s) from {:?}",
            files.len(),
            self.directory
        );
        self.files = files;
        self.position = 0;
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let Some(ticker) = self.ticker.as_mut() else {
            return Err(CaptureError::NotOpen("image_sequence".to_string()));
        };
        if self.position >= self.files.len() {
            if !self.loop_playback {
                return Ok(None);
            }
            self.position = 0;
        }
        ticker.tick().await;

        let path = self.files[self.position].clone();
        self.position += 1;
        let sequence = self.sequence;
        self.sequence += 1;
        tokio::task::spawn_blocking(move || Self::decode(path, sequence))
            .await
            .map_err(|e| CaptureError::FrameUnavailable(e.to_string()))?
            .map(Some)
    }

    async fn close(&mut self) {
        self.ticker = None;
        self.files.clear();
    }

    fn name(&self) -> &str {
        "image_sequence"
    }
}
