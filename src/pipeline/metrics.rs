use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// EWMA smoothing factor for stage timings.
const ALPHA: f32 = 0.1;
/// Frames per second are recomputed at most this often.
const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Processing stages with their own timing statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Conversion,
    Detection,
    Annotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTiming {
    pub average_us: f32,
    pub max_us: u64,
    pub samples: u64,
}

impl StageTiming {
    fn record(&mut self, duration_us: u64) {
        self.average_us = if self.samples == 0 {
            duration_us as f32
        } else {
            update_ewma(self.average_us, duration_us, ALPHA)
        };
        self.max_us = self.max_us.max(duration_us);
        self.samples += 1;
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub frames_captured: u64,
    /// Frames replaced in the mailbox before the pipeline took them.
    pub frames_dropped: u64,
    pub capture_errors: u64,
    pub conversion_failures: u64,
    pub detection_failures: u64,
    /// Frames lost because the processing task itself failed.
    pub processing_errors: u64,
    /// Frames published without outlines because no surface could be drawn.
    pub annotation_fallbacks: u64,
    pub frames_published: u64,
    /// Results finished after `stop()` and thrown away.
    pub frames_discarded: u64,
    pub observations_reported: u64,
    pub conversion: StageTiming,
    pub detection: StageTiming,
    pub annotation: StageTiming,
    pub frames_per_second: f32,
    last_fps_calculation: Instant,
    fps_frame_count: u64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            frames_captured: 0,
            frames_dropped: 0,
            capture_errors: 0,
            conversion_failures: 0,
            detection_failures: 0,
            processing_errors: 0,
            annotation_fallbacks: 0,
            frames_published: 0,
            frames_discarded: 0,
            observations_reported: 0,
            conversion: StageTiming::default(),
            detection: StageTiming::default(),
            annotation: StageTiming::default(),
            frames_per_second: 0.0,
            last_fps_calculation: Instant::now(),
            fps_frame_count: 0,
        }
    }
}

/// Shared pipeline counters. Cloning hands out another handle to the same stats.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    stats: Arc<Mutex<PipelineStats>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PipelineStats {
        self.lock().clone()
    }

    pub fn record_captured(&self) {
        self.lock().frames_captured += 1;
    }

    pub fn record_dropped(&self) {
        self.lock().frames_dropped += 1;
    }

    pub fn record_capture_error(&self) {
        self.lock().capture_errors += 1;
    }

    pub fn record_conversion_failure(&self) {
        self.lock().conversion_failures += 1;
    }

    pub fn record_detection_failure(&self) {
        self.lock().detection_failures += 1;
    }

    pub fn record_processing_error(&self) {
        self.lock().processing_errors += 1;
    }

    pub fn record_annotation_fallback(&self) {
        self.lock().annotation_fallbacks += 1;
    }

    pub fn record_discarded(&self) {
        self.lock().frames_discarded += 1;
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        let duration_us = duration.as_micros().min(u64::MAX as u128) as u64;
        let mut stats = self.lock();
        match stage {
            Stage::Conversion => stats.conversion.record(duration_us),
            Stage::Detection => stats.detection.record(duration_us),
            Stage::Annotation => stats.annotation.record(duration_us),
        }
    }

    pub fn record_published(&self, observations: usize) {
        let mut stats = self.lock();
        stats.frames_published += 1;
        stats.observations_reported += observations as u64;
        stats.fps_frame_count += 1;

        let elapsed = stats.last_fps_calculation.elapsed();
        if elapsed >= FPS_WINDOW {
            stats.frames_per_second = stats.fps_frame_count as f32 / elapsed.as_secs_f32();
            stats.fps_frame_count = 0;
            stats.last_fps_calculation = Instant::now();
            tracing::debug!("PipelineMetrics: {:.1} fps", stats.frames_per_second);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn update_ewma(current: f32, new_value: u64, alpha: f32) -> f32 {
    current * (1.0 - alpha) + new_value as f32 * alpha
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_between_clones() {
        let metrics = PipelineMetrics::new();
        let handle = metrics.clone();
        handle.record_captured();
        handle.record_dropped();
        handle.record_published(2);

        let stats = metrics.snapshot();
        assert_eq!(stats.frames_captured, 1);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_published, 1);
        assert_eq!(stats.observations_reported, 2);
    }

    #[test]
    fn processing_errors_are_separate_from_detection_failures() {
        let metrics = PipelineMetrics::new();
        metrics.record_processing_error();
        metrics.record_detection_failure();
        metrics.record_detection_failure();

        let stats = metrics.snapshot();
        assert_eq!(stats.processing_errors, 1);
        assert_eq!(stats.detection_failures, 2);
    }

    #[test]
    fn stage_timings_track_ewma_and_max() {
        let metrics = PipelineMetrics::new();
        metrics.record_stage(Stage::Detection, Duration::from_micros(1000));
        metrics.record_stage(Stage::Detection, Duration::from_micros(2000));

        let detection = metrics.snapshot().detection;
        assert_eq!(detection.samples, 2);
        assert_eq!(detection.max_us, 2000);
        assert!((detection.average_us - 1100.0).abs() < 1e-3);
        assert_eq!(metrics.snapshot().annotation.samples, 0);
    }
}
