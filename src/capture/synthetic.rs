use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Interval, MissedTickBehavior};

use crate::capture::device::CaptureDevice;
use crate::common::{PixelFormat, RawFrame, Rotation};
use crate::config::CaptureSettings;
use crate::error::CaptureError;

const BACKGROUND: Rgb<u8> = Rgb([30, 30, 40]);
const FOREGROUND: Rgb<u8> = Rgb([225, 225, 210]);
/// Fraction of each upright dimension covered by the rectangle.
const RECT_FRACTION: f32 = 0.5;
/// Largest jitter offset as a fraction of the smaller upright dimension.
const JITTER_FRACTION: f32 = 0.05;

/// Generates frames showing a bright rectangle on a dark background.
///
/// `width`/`height` describe the upright picture. The emitted buffers are in
/// sensor orientation, i.e. rotated by the inverse of the rotation hint, so
/// converting them back yields the upright picture again.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_interval: Duration,
    format: PixelFormat,
    rotation: Rotation,
    jitter: Option<StdRng>,
    frame_limit: Option<u64>,
    emitted: u64,
    ticker: Option<Interval>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            format: PixelFormat::Rgb8,
            rotation: Rotation::None,
            jitter: None,
            frame_limit: None,
            emitted: 0,
            ticker: None,
        }
    }

    pub fn from_settings(settings: &CaptureSettings) -> Self {
        let camera = Self::new(settings.width, settings.height, settings.fps)
            .with_format(settings.pixel_format)
            .with_rotation(settings.rotation);
        match settings.jitter_seed {
            Some(seed) => camera.with_jitter(seed),
            None => camera,
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_jitter(mut self, seed: u64) -> Self {
        self.jitter = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Ends the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Pixel bounds `(x0, y0, x1, y1)` of the unjittered rectangle in the
    /// upright picture, end exclusive.
    pub fn rectangle_bounds(&self) -> (u32, u32, u32, u32) {
        let rect_w = (self.width as f32 * RECT_FRACTION) as u32;
        let rect_h = (self.height as f32 * RECT_FRACTION) as u32;
        let x0 = (self.width - rect_w) / 2;
        let y0 = (self.height - rect_h) / 2;
        (x0, y0, x0 + rect_w, y0 + rect_h)
    }

    fn render(&mut self) -> RgbImage {
        let (mut x0, mut y0, mut x1, mut y1) = self.rectangle_bounds();
        if let Some(rng) = self.jitter.as_mut() {
            let reach = (self.width.min(self.height) as f32 * JITTER_FRACTION) as i64;
            let dx = rng.random_range(-reach..=reach);
            let dy = rng.random_range(-reach..=reach);
            let shift = |v: u32, d: i64| (v as i64 + d).max(0) as u32;
            (x0, x1) = (shift(x0, dx), shift(x1, dx));
            (y0, y1) = (shift(y0, dy), shift(y1, dy));
        }
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
                FOREGROUND
            } else {
                BACKGROUND
            }
        })
    }

    fn encode(&self, upright: RgbImage) -> RawFrame {
        let sensor = self.rotation.inverse().apply(upright);
        let mut data =
            Vec::with_capacity(sensor.len() / 3 * self.format.bytes_per_pixel());
        for pixel in sensor.pixels() {
            self.format.encode(pixel.0, &mut data);
        }
        RawFrame::packed(
            self.emitted,
            sensor.width(),
            sensor.height(),
            self.format,
            self.rotation,
            data,
        )
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCamera {
    async fn open(&mut self) -> Result<(), CaptureError> {
        if self.width < 2 || self.height < 2 {
            return Err(CaptureError::DeviceUnavailable(format!(
                "synthetic camera cannot produce {}x{} frames",
                self.width, self.height
            )));
        }
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        self.emitted = 0;
        tracing::info!(
            "Synthetic camera streaming {}x{} {:?} rotated {} degrees",
            self.width,
            self.height,
            self.format,
            self.rotation.degrees()
        );
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        if self.frame_limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }
        let ticker = self
            .ticker
            .as_mut()
            .ok_or_else(|| CaptureError::NotOpen("synthetic".to_string()))?;
        ticker.tick().await;

        let upright = self.render();
        let frame = self.encode(upright);
        self.emitted += 1;
        Ok(Some(frame))
    }

    async fn close(&mut self) {
        self.ticker = None;
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
