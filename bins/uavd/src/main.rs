//! uavd — flight computer daemon running next to the autopilot.

mod config;
mod server;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use autopilot::{
    Autopilot, AutopilotError, FeedConfig, MavlinkAutopilot, TelemetryFeed,
};
use clap::Parser;
use config::{Args, FileConfig};
use server::{CommandServer, ServerConfig};
use stream::{Muxer, MuxerConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use types::{FlightMode, TelemetrySample};

/// Stand-in used with `--no-autopilot`: commands are logged and dropped.
struct DisconnectedAutopilot;

impl Autopilot for DisconnectedAutopilot {
    fn set_mode(&mut self, mode: FlightMode) -> Result<(), AutopilotError> {
        warn!(mode = mode.name(), "no autopilot connected, set_mode dropped");
        Ok(())
    }

    fn move_to(&mut self, lat: f64, lon: f64, alt: f64) -> Result<(), AutopilotError> {
        warn!(lat, lon, alt, "no autopilot connected, move_to dropped");
        Ok(())
    }

    fn arm(&mut self) -> Result<(), AutopilotError> {
        warn!("no autopilot connected, arm dropped");
        Ok(())
    }

    fn takeoff(&mut self, alt: f64) -> Result<(), AutopilotError> {
        warn!(alt, "no autopilot connected, takeoff dropped");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_dir, &args.log_level)?;

    let mut file_config = FileConfig::load(&args.config)?;
    if let Some(host) = args.gcs_host.clone() {
        file_config.network.gcs_host = host;
    }
    if let Some(device) = args.device.clone() {
        file_config.camera.device = device;
    }
    info!(path = %args.config.display(), "loaded config");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        });
    }

    // Autopilot link: heartbeat handshake happens on a blocking thread.
    let autopilot: Box<dyn Autopilot> = if args.no_autopilot {
        warn!("running without a MAVLink connection");
        Box::new(DisconnectedAutopilot)
    } else {
        let address = file_config.autopilot.address.clone();
        let link = tokio::task::spawn_blocking(move || MavlinkAutopilot::connect(&address))
            .await?
            .context("autopilot connection failed")?;
        Box::new(link)
    };
    let autopilot = Arc::new(Mutex::new(autopilot));

    // Telemetry feed from the autopilot proxy.
    let (telemetry_tx, telemetry_rx) = watch::channel(TelemetrySample::default());
    {
        let feed = TelemetryFeed::new(FeedConfig {
            bind: file_config.autopilot.feed_bind.clone(),
        });
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = feed.run(telemetry_tx, shutdown_rx).await {
                error!(error = %e, "telemetry feed failed");
            }
        });
    }

    // Video muxer on a dedicated thread; a camera fault is fatal for the
    // whole daemon.
    let mux_stop = Arc::new(AtomicBool::new(false));
    let mux_thread = if args.no_video {
        info!("video muxer disabled");
        None
    } else {
        let muxer_config = MuxerConfig {
            device: file_config.camera.device.clone(),
            host: file_config.network.gcs_host.clone(),
            port: file_config.network.video_port,
            width: file_config.camera.width,
            height: file_config.camera.height,
            fps: file_config.camera.fps,
            bitrate_kbps: file_config.camera.bitrate_kbps,
            keyframe_interval: file_config.camera.keyframe_interval,
        };
        let muxer =
            Muxer::new(&muxer_config, telemetry_rx.clone()).context("muxer setup failed")?;
        info!(
            host = %muxer_config.host,
            port = muxer_config.port,
            "video muxer streaming"
        );

        let stop = mux_stop.clone();
        let shutdown_tx = shutdown_tx.clone();
        Some(std::thread::spawn(move || {
            if let Err(e) = muxer.run(stop) {
                error!(error = %e, "video pipeline aborted");
                let _ = shutdown_tx.send(true);
            }
        }))
    };

    // Command/telemetry server for the GCS.
    let command_server = CommandServer::new(
        ServerConfig {
            port: file_config.network.ws_port,
            ..Default::default()
        },
        autopilot,
        telemetry_rx,
        shutdown_rx.clone(),
    );
    if let Err(e) = command_server.run().await {
        error!(error = %e, "command server failed");
        let _ = shutdown_tx.send(true);
    }

    mux_stop.store(true, Ordering::Relaxed);
    if let Some(thread) = mux_thread {
        let _ = thread.join();
    }
    info!("uavd stopped");
    Ok(())
}

/// Initialize logging with stdout and rolling file output.
fn init_logging(
    log_dir: &std::path::Path,
    level: &str,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Error: cannot create log directory '{}': {e}",
            log_dir.display()
        );
        eprintln!();
        eprintln!("Try running with a local log directory:");
        eprintln!();
        eprintln!("  cargo run --bin uavd -- --log-dir ./logs --no-autopilot --no-video");
        eprintln!();
        return Err(e.into());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "uavd.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "uavd={level},stream={level},autopilot={level}"
        ))
    });

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
