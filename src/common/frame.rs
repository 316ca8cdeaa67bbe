use chrono::{DateTime, Utc};
use image::{imageops, RgbImage};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ConversionError;

/// Memory layout of a captured pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Bgra8,
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Luma8 => 1,
        }
    }

    /// Appends one RGB pixel to `out` in this format.
    pub fn encode(self, rgb: [u8; 3], out: &mut Vec<u8>) {
        let [r, g, b] = rgb;
        match self {
            PixelFormat::Rgb8 => out.extend_from_slice(&[r, g, b]),
            PixelFormat::Rgba8 => out.extend_from_slice(&[r, g, b, u8::MAX]),
            PixelFormat::Bgra8 => out.extend_from_slice(&[b, g, r, u8::MAX]),
            PixelFormat::Luma8 => {
                let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
                out.push(luma as u8);
            }
        }
    }

    fn to_rgb(self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => [px[0], px[1], px[2]],
            PixelFormat::Bgra8 => [px[2], px[1], px[0]],
            PixelFormat::Luma8 => [px[0], px[0], px[0]],
        }
    }
}

/// Clockwise rotation that brings a sensor frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    /// The rotation that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Rotation::None => Rotation::None,
            Rotation::Clockwise90 => Rotation::Clockwise270,
            Rotation::Clockwise180 => Rotation::Clockwise180,
            Rotation::Clockwise270 => Rotation::Clockwise90,
        }
    }

    /// Dimensions of a `width`x`height` frame after this rotation.
    pub fn rotated_dimensions(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::None | Rotation::Clockwise180 => (width, height),
            Rotation::Clockwise90 | Rotation::Clockwise270 => (height, width),
        }
    }

    pub fn apply(self, image: RgbImage) -> RgbImage {
        match self {
            Rotation::None => image,
            Rotation::Clockwise90 => imageops::rotate90(&image),
            Rotation::Clockwise180 => imageops::rotate180(&image),
            Rotation::Clockwise270 => imageops::rotate270(&image),
        }
    }
}

/// A frame exactly as the capture device handed it over.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including any padding the device adds.
    pub stride: usize,
    pub format: PixelFormat,
    pub rotation: Rotation,
    pub data: Arc<[u8]>,
}

impl RawFrame {
    /// Builds a tightly packed raw frame (stride == width * bytes per pixel).
    pub fn packed(
        sequence: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        rotation: Rotation,
        data: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
            rotation,
            data: Arc::from(data),
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    fn validate(&self) -> Result<(), ConversionError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConversionError::EmptyFrame {
                width: self.width,
                height: self.height,
            });
        }
        let bytes_per_pixel = self.format.bytes_per_pixel();
        let row_bytes = self.width as usize * bytes_per_pixel;
        if self.stride < row_bytes {
            return Err(ConversionError::StrideTooSmall {
                stride: self.stride,
                width: self.width,
                bytes_per_pixel,
            });
        }
        // The last row does not need its padding.
        let expected = self.stride * (self.height as usize - 1) + row_bytes;
        if self.data.len() < expected {
            return Err(ConversionError::BufferTooShort {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// An upright RGB frame ready for detection and display.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    captured_at: DateTime<Utc>,
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: DateTime<Utc>, image: RgbImage) -> Self {
        Self {
            sequence,
            captured_at,
            image: Arc::new(image),
        }
    }

    /// Converts the device pixel buffer to RGB and applies the rotation hint.
    pub fn from_raw(raw: &RawFrame) -> Result<Self, ConversionError> {
        raw.validate()?;

        let bytes_per_pixel = raw.format.bytes_per_pixel();
        let mut rgb = RgbImage::new(raw.width, raw.height);
        for (y, row) in rgb.rows_mut().enumerate() {
            let start = y * raw.stride;
            let src = &raw.data[start..start + raw.width as usize * bytes_per_pixel];
            for (pixel, px) in row.zip(src.chunks_exact(bytes_per_pixel)) {
                pixel.0 = raw.format.to_rgb(px);
            }
        }

        Ok(Self {
            sequence: raw.sequence,
            captured_at: raw.captured_at,
            image: Arc::new(raw.rotation.apply(rgb)),
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
