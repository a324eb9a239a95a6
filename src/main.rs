//! uvc-stream: camera frames to JPEG with a single-slot consumer handoff

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use uvc_stream::encode::inspect_jpeg;
use uvc_stream::pipeline::run_to_completion;
use uvc_stream::{
    capture, CaptureHandler, Config, EncodedFrame, FrameOutcome, HandoffSlot, OutputConfig,
};

/// How long the consumer waits before re-checking for shutdown
const CONSUMER_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uvc_stream=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("uvc-stream launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    debug!(?config, "configuration loaded");

    let slot = Arc::new(HandoffSlot::new(config.handoff.release_timeout()));
    let mut handler = CaptureHandler::new(&config.encoder, slot.clone())?;
    let mut source = capture::open_source(&config.capture)?;
    info!("Using frame source: {}", source.describe());

    let stop = Arc::new(AtomicBool::new(false));

    // Producer: the source calls back into the handler once per frame
    let producer = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || -> uvc_stream::Result<()> {
            let mut on_frame = |frame: &uvc_stream::RawFrame<'_>| match handler.on_frame(frame) {
                Ok(FrameOutcome::Released) => {}
                Ok(FrameOutcome::TimedOut) => debug!(seq = frame.sequence, "release timed out"),
                Err(e) => warn!(seq = frame.sequence, "frame dropped: {}", e),
            };
            while !stop.load(Ordering::Relaxed) {
                if !source.deliver(&mut on_frame)? {
                    info!("frame source exhausted");
                    break;
                }
            }
            info!(
                buffers = handler.buffer_allocations(),
                "capture stopped"
            );
            Ok(())
        }
    });

    // Consumer: stands in for the serving side
    let consumer = tokio::task::spawn_blocking({
        let slot = slot.clone();
        let stop = stop.clone();
        let output = config.output.clone();
        move || {
            while !stop.load(Ordering::Relaxed) {
                let Some(frame) = slot.acquire_timeout(CONSUMER_POLL) else {
                    continue;
                };
                if let Err(e) = consume(&frame, &output) {
                    error!(seq = frame.sequence, "consumer failed: {}", e);
                }
                drop(frame);
                slot.release();
            }
        }
    });

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let outcome = run_to_completion(producer, consumer, &stop, interrupt).await;

    let stats = slot.stats();
    info!(
        published = stats.published,
        superseded = stats.superseded,
        acquired = stats.acquired,
        released = stats.released,
        timeouts = stats.timeouts,
        "uvc-stream shutting down"
    );
    Ok(outcome?)
}

fn consume(frame: &EncodedFrame, output: &OutputConfig) -> uvc_stream::Result<()> {
    if output.verify {
        let info = inspect_jpeg(frame.as_bytes())?;
        if u32::from(info.width) != frame.width || u32::from(info.height) != frame.height {
            warn!(
                seq = frame.sequence,
                "decoded {}x{}, expected {}x{}",
                info.width,
                info.height,
                frame.width,
                frame.height
            );
        }
    }
    if let Some(path) = &output.snapshot_path {
        write_snapshot(path, frame.as_bytes())?;
    }
    debug!(seq = frame.sequence, bytes = frame.len(), "frame consumed");
    Ok(())
}

/// Replace the snapshot atomically so readers never see a partial JPEG.
fn write_snapshot(path: &Path, jpeg: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("jpg.tmp");
    std::fs::write(&tmp, jpeg)?;
    std::fs::rename(&tmp, path)
}
