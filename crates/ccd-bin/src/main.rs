//! ccd-host - drives a set of simulated cameras through one exposure each
//! and an optional streaming run.
//!
//! Usage:
//!   ccd-host --cameras 2 --exposure 1.5
//!   ccd-host --config ccd.toml --frame-kind dark --stream-seconds 3
//!   ccd-host --print-config

use anyhow::{Context, Result};
use ccd_capture::CameraRegistry;
use ccd_core::{CaptureConfig, EventSink, FrameKind, SessionEvent};
use ccd_driver_mock::{MockCamera, MockMode, MockProvider};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ccd-host")]
#[command(about = "Acquisition host for CCD cameras", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML capture configuration; `CCD_*` environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of simulated cameras to attach
    #[arg(long, default_value_t = 1)]
    cameras: usize,

    /// Exposure duration in seconds
    #[arg(long, default_value_t = 1.0)]
    exposure: f64,

    /// Frame kind: light, dark, bias or flat
    #[arg(long, default_value = "light")]
    frame_kind: FrameKind,

    /// Stream video for this many seconds after the exposures finish
    #[arg(long, default_value_t = 0.0)]
    stream_seconds: f64,

    /// Log filter directive, overridden per target by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Exposing,
    Streaming { until: Instant },
    Done,
}

#[derive(Debug, Default)]
struct RunSummary {
    exposures_complete: usize,
    exposures_failed: usize,
    stream_frames: u64,
    stream_bytes: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(cli.log_level.parse()?))
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let config = CaptureConfig::load(cli.config.as_deref()).context("loading capture config")?;
    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        cameras = cli.cameras,
        exposure_s = cli.exposure,
        frame_kind = ?cli.frame_kind,
        "Starting ccd-host"
    );

    let provider =
        MockProvider::identical(cli.cameras, MockCamera::builder().mode(MockMode::Realistic));
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, SessionEvent)>();
    let sink: Arc<dyn EventSink> = Arc::new(tx);
    let mut registry = CameraRegistry::discover(&provider, &config, sink)?;
    if registry.is_empty() {
        anyhow::bail!("no cameras connected");
    }

    for session in registry.iter_mut() {
        if let Err(e) = session.start_exposure(cli.exposure, cli.frame_kind) {
            error!(camera = session.name(), error = %e, "Exposure rejected");
        }
    }

    let mut summary = RunSummary::default();
    let outcome = run(&mut registry, &mut rx, &cli, &config, &mut summary).await;

    let shutdown = registry.shutdown();
    drain_events(&mut rx, &mut summary);
    info!(
        exposures_complete = summary.exposures_complete,
        exposures_failed = summary.exposures_failed,
        stream_frames = summary.stream_frames,
        stream_bytes = summary.stream_bytes,
        "ccd-host finished"
    );

    outcome?;
    shutdown.context("shutting down cameras")?;
    Ok(())
}

async fn run(
    registry: &mut CameraRegistry,
    rx: &mut UnboundedReceiver<(String, SessionEvent)>,
    cli: &Cli,
    config: &CaptureConfig,
    summary: &mut RunSummary,
) -> Result<()> {
    let mut interval = tokio::time::interval(config.tick_period());
    let mut phase = Phase::Exposing;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while phase != Phase::Done {
        tokio::select! {
            _ = interval.tick() => {
                // Ticks may spin-poll the device; keep them off the async workers.
                tokio::task::block_in_place(|| registry.tick_all());
                drain_events(rx, summary);
                phase = advance(registry, phase, cli)?;
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted, shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn advance(registry: &mut CameraRegistry, phase: Phase, cli: &Cli) -> Result<Phase> {
    match phase {
        Phase::Exposing => {
            if registry.iter_mut().any(|s| s.exposure_state().is_active()) {
                return Ok(phase);
            }
            if cli.stream_seconds <= 0.0 {
                return Ok(Phase::Done);
            }
            for session in registry.iter_mut() {
                session
                    .set_streaming(true)
                    .with_context(|| format!("starting stream on {}", session.name()))?;
            }
            info!(seconds = cli.stream_seconds, "Streaming");
            Ok(Phase::Streaming {
                until: Instant::now() + Duration::from_secs_f64(cli.stream_seconds),
            })
        }
        Phase::Streaming { until } if Instant::now() >= until => {
            for session in registry.iter_mut() {
                if let Err(e) = session.set_streaming(false) {
                    warn!(camera = session.name(), error = %e, "Failed to stop stream");
                }
            }
            Ok(Phase::Done)
        }
        other => Ok(other),
    }
}

fn drain_events(rx: &mut UnboundedReceiver<(String, SessionEvent)>, summary: &mut RunSummary) {
    while let Ok((camera, event)) = rx.try_recv() {
        match event {
            SessionEvent::ExposureProgress { time_left_s } => {
                info!(%camera, time_left_s, "Exposure progress");
            }
            SessionEvent::ExposureComplete(frame) => {
                summary.exposures_complete += 1;
                info!(
                    %camera,
                    width = frame.width,
                    height = frame.height,
                    bpp = frame.bits_per_pixel,
                    bytes = frame.payload().len(),
                    "Exposure complete"
                );
            }
            SessionEvent::ExposureFailed { reason } => {
                summary.exposures_failed += 1;
                error!(%camera, %reason, "Exposure failed");
            }
            SessionEvent::ExposureAborted => warn!(%camera, "Exposure aborted"),
            SessionEvent::Temperature(report) => {
                info!(
                    %camera,
                    current_c = report.current_c,
                    setpoint_c = report.setpoint_c,
                    power_pct = report.cooler_power_pct,
                    status = ?report.status,
                    "Temperature"
                );
            }
            SessionEvent::GuideComplete(axis) => info!(%camera, ?axis, "Guide pulse complete"),
            SessionEvent::GuideFailed { axis, reason } => {
                warn!(%camera, ?axis, %reason, "Guide pulse failed");
            }
            SessionEvent::FrameReady(frame) => {
                summary.stream_frames += 1;
                summary.stream_bytes += frame.data.len() as u64;
                tracing::debug!(
                    %camera,
                    sequence = frame.sequence,
                    compressed = frame.compressed,
                    bytes = frame.data.len(),
                    "Stream frame"
                );
            }
            SessionEvent::StreamStopped { reason } => warn!(%camera, %reason, "Stream stopped"),
            SessionEvent::FormatChanged(format) => info!(%camera, ?format, "Pixel format changed"),
        }
    }
}
