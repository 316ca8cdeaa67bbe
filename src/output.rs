use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::OutputSettings;
use crate::error::AppError;
use crate::pipeline::publish::LatestFrameReceiver;
use crate::pipeline::types::{AnnotatedFrame, QuadrilateralObservation};

/// JSON sidecar written next to each frame image.
#[derive(Debug, Serialize)]
struct FrameRecord<'a> {
    sequence: u64,
    captured_at: String,
    annotated: bool,
    observations: &'a [QuadrilateralObservation],
}

/// Writes every published frame to `frame_<seq>.png`, plus an optional
/// `frame_<seq>.json` listing its observations.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    directory: PathBuf,
    write_observations: bool,
}

impl FrameWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_observations: true,
        }
    }

    /// `None` when no output directory is configured.
    pub fn from_settings(settings: &OutputSettings) -> Option<Self> {
        let directory = settings.directory.clone()?;
        Some(Self::new(directory).with_observations(settings.write_observations))
    }

    pub fn with_observations(mut self, write_observations: bool) -> Self {
        self.write_observations = write_observations;
        self
    }

    pub fn image_path(&self, sequence: u64) -> PathBuf {
        self.directory.join(format!("frame_{:06}.png", sequence))
    }

    pub fn record_path(&self, sequence: u64) -> PathBuf {
        self.directory.join(format!("frame_{:06}.json", sequence))
    }

    pub fn write(&self, frame: &AnnotatedFrame) -> Result<(), AppError> {
        std::fs::create_dir_all(&self.directory)?;

        let image_path = self.image_path(frame.sequence);
        frame
            .image
            .save(&image_path)
            .map_err(|e| output_error(&image_path, e))?;

        if self.write_observations {
            let record = FrameRecord {
                sequence: frame.sequence,
                captured_at: frame.captured_at.to_rfc3339(),
                annotated: frame.annotated,
                observations: &frame.observations,
            };
            let record_path = self.record_path(frame.sequence);
            let json =
                serde_json::to_vec_pretty(&record).map_err(|e| output_error(&record_path, e))?;
            std::fs::write(&record_path, json)?;
        }
        Ok(())
    }

    /// Writes frames as they are published until `token` is cancelled.
    /// Frames published while a write is in progress are skipped.
    pub async fn run(self, mut frames: LatestFrameReceiver, token: CancellationToken) {
        tracing::info!("Writing published frames to {:?}", self.directory);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let Some(frame) = frames.borrow_and_update().clone() else {
                continue;
            };

            let writer = self.clone();
            let sequence = frame.sequence;
            let written = tokio::task::spawn_blocking(move || writer.write(&frame)).await;
            match written {
                Ok(Ok(())) => tracing::debug!("Wrote frame {}", sequence),
                Ok(Err(e)) => tracing::error!("Failed to write frame {}: {}", sequence, e),
                Err(e) => tracing::error!("Frame writer task failed: {}", e),
            }
        }
    }
}

fn output_error(path: &Path, error: impl std::fmt::Display) -> AppError {
    AppError::Output(format!("{}: {}", path.display(), error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Frame;
    use crate::pipeline::types::NormalizedPoint;
    use chrono::Utc;
    use image::RgbImage;

    #[test]
    fn writes_image_and_sidecar() {
        let directory =
            std::env::temp_dir().join(format!("rectcam-output-{}", uuid::Uuid::new_v4()));
        let writer = FrameWriter::new(&directory);

        let frame = Frame::new(12, Utc::now(), RgbImage::new(8, 6));
        let observation = QuadrilateralObservation::new(
            [
                NormalizedPoint::new(0.1, 0.9),
                NormalizedPoint::new(0.9, 0.9),
                NormalizedPoint::new(0.9, 0.1),
                NormalizedPoint::new(0.1, 0.1),
            ],
            0.75,
        );
        writer
            .write(&AnnotatedFrame::passthrough(&frame, vec![observation]))
            .unwrap();

        let saved = image::open(writer.image_path(12)).unwrap();
        assert_eq!((saved.width(), saved.height()), (8, 6));

        let record: serde_json::Value =
            serde_json::from_slice(&std::fs::read(writer.record_path(12)).unwrap()).unwrap();
        assert_eq!(record["sequence"], 12);
        assert_eq!(record["annotated"], false);
        assert_eq!(record["observations"].as_array().unwrap().len(), 1);
        assert_eq!(record["observations"][0]["confidence"], 0.75);

        std::fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn sidecar_can_be_disabled() {
        let directory =
            std::env::temp_dir().join(format!("rectcam-output-{}", uuid::Uuid::new_v4()));
        let writer = FrameWriter::new(&directory).with_observations(false);
        let frame = Frame::new(1, Utc::now(), RgbImage::new(4, 4));
        writer
            .write(&AnnotatedFrame::passthrough(&frame, Vec::new()))
            .unwrap();

        assert!(writer.image_path(1).exists());
        assert!(!writer.record_path(1).exists());
        std::fs::remove_dir_all(directory).unwrap();
    }
}
