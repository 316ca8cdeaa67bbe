use std::path::PathBuf;

use serde::Deserialize;

use crate::common::frame::{PixelFormat, Rotation};
use crate::error::AppError;

const CONFIG_FILE: &str = "rectcam";
const ENV_PREFIX: &str = "RECTCAM";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub detector: DetectorSettings,
    pub annotation: AnnotationSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
    /// Stop the demo after this many seconds; run until ctrl-c when unset.
    pub run_for_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            detector: DetectorSettings::default(),
            annotation: AnnotationSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
            run_for_secs: None,
        }
    }
}

impl Settings {
    /// Loads `rectcam.{toml,yaml,json}` from the working directory if present,
    /// then applies `RECTCAM__SECTION__KEY` environment overrides.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(config::File::with_name(CONFIG_FILE).required(false))
    }

    pub fn load_from<S>(source: S) -> Result<Self, AppError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Synthetic,
    ImageSequence,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub source: SourceKind,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
    pub rotation: Rotation,
    /// Seed for the synthetic camera's jitter; no jitter when unset.
    pub jitter_seed: Option<u64>,
    pub directory: Option<PathBuf>,
    pub loop_playback: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            width: 640,
            height: 480,
            fps: 30,
            pixel_format: PixelFormat::Bgra8,
            rotation: Rotation::Clockwise90,
            jitter_seed: None,
            directory: None,
            loop_playback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Contour,
    Hough,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub minimum_aspect_ratio: f32,
    pub maximum_aspect_ratio: f32,
    /// Allowed deviation of each corner angle from 90 degrees.
    pub quadrature_tolerance: f32,
    /// Shortest side as a fraction of the smaller frame dimension.
    pub minimum_size: f32,
    /// 0 means unlimited.
    pub maximum_observations: usize,
    pub minimum_confidence: f32,
    pub blur_sigma: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Contour,
            minimum_aspect_ratio: 0.5,
            maximum_aspect_ratio: 1.0,
            quadrature_tolerance: 30.0,
            minimum_size: 0.2,
            maximum_observations: 1,
            minimum_confidence: 0.0,
            blur_sigma: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotationSettings {
    pub line_width: u32,
    pub color: [u8; 3],
    pub max_surface_pixels: u64,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            line_width: 2,
            color: [255, 0, 0],
            max_surface_pixels: 7680 * 4320,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Published frames are written here as PNG; nothing is written when unset.
    pub directory: Option<PathBuf>,
    pub write_observations: bool,
    pub stats_interval_secs: u64,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: None,
            write_observations: true,
            stats_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_platform_rectangle_request() {
        let settings = Settings::default();
        assert_eq!(settings.detector.kind, DetectorKind::Contour);
        assert_eq!(settings.detector.maximum_observations, 1);
        assert_eq!(settings.detector.quadrature_tolerance, 30.0);
        assert_eq!(settings.capture.rotation, Rotation::Clockwise90);
        assert_eq!(settings.annotation.color, [255, 0, 0]);
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            run_for_secs = 3

            [capture]
            source = "image_sequence"
            directory = "frames"
            rotation = "none"
            pixel_format = "rgb8"

            [detector]
            kind = "hough"
            maximum_observations = 0
        "#;
        let settings =
            Settings::load_from(config::File::from_str(toml, config::FileFormat::Toml))
                .expect("settings should parse");

        assert_eq!(settings.run_for_secs, Some(3));
        assert_eq!(settings.capture.source, SourceKind::ImageSequence);
        assert_eq!(settings.capture.directory, Some(PathBuf::from("frames")));
        assert_eq!(settings.capture.rotation, Rotation::None);
        assert_eq!(settings.capture.pixel_format, PixelFormat::Rgb8);
        assert_eq!(settings.detector.kind, DetectorKind::Hough);
        assert_eq!(settings.detector.maximum_observations, 0);
        // Untouched keys keep their defaults.
        assert_eq!(settings.capture.fps, 30);
        assert_eq!(settings.annotation.line_width, 2);
    }

    #[test]
    fn environment_overrides_nested_keys() {
        std::env::set_var("RECTCAM__OUTPUT__STATS_INTERVAL_SECS", "9");
        let settings = Settings::load_from(config::File::from_str("", config::FileFormat::Toml));
        std::env::remove_var("RECTCAM__OUTPUT__STATS_INTERVAL_SECS");

        let settings = settings.expect("settings should parse");
        assert_eq!(settings.output.stats_interval_secs, 9);
    }
}
