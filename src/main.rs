use std::time::Duration;

use rectcam::config::{LoggingSettings, Settings};
use rectcam::output::FrameWriter;
use rectcam::pipeline::metrics::PipelineMetrics;
use rectcam::{AppError, SessionBuilder};
use tokio_util::sync::CancellationToken;
use tracing::Level;

fn init_logging(settings: &LoggingSettings) {
    let level = settings.level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

async fn report_stats(metrics: PipelineMetrics, interval_secs: u64, token: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let stats = metrics.snapshot();
        tracing::info!(
            "{:.1} fps, {} published, {} dropped, detection avg {:.0}us max {}us",
            stats.frames_per_second,
            stats.frames_published,
            stats.frames_dropped,
            stats.detection.average_us,
            stats.detection.max_us
        );
    }
}

async fn wait_for_exit(run_for_secs: Option<u64>) -> Result<(), AppError> {
    match run_for_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => Ok(()),
                signal = tokio::signal::ctrl_c() => Ok(signal?),
            }
        }
        None => Ok(tokio::signal::ctrl_c().await?),
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let settings = Settings::load()?;
    init_logging(&settings.logging);

    let mut session = SessionBuilder::from_settings(&settings)?.build()?;
    let background = CancellationToken::new();

    let writer_task = FrameWriter::from_settings(&settings.output)
        .map(|writer| tokio::spawn(writer.run(session.latest_frames(), background.clone())));
    let stats_task = tokio::spawn(report_stats(
        session.metrics(),
        settings.output.stats_interval_secs,
        background.clone(),
    ));

    session.start();
    let exit = wait_for_exit(settings.run_for_secs).await;
    session.shutdown().await;

    background.cancel();
    if let Some(task) = writer_task {
        if let Err(e) = task.await {
            tracing::error!("Frame writer ended abnormally: {}", e);
        }
    }
    if let Err(e) = stats_task.await {
        tracing::error!("Stats reporter ended abnormally: {}", e);
    }

    let stats = session.stats();
    tracing::info!(
        "Captured {} frames, published {}, dropped {}, conversion failures {}, detection failures {}, processing errors {}, annotation fallbacks {}, discarded after stop {}",
        stats.frames_captured,
        stats.frames_published,
        stats.frames_dropped,
        stats.conversion_failures,
        stats.detection_failures,
        stats.processing_errors,
        stats.annotation_fallbacks,
        stats.frames_discarded
    );
    exit
}
