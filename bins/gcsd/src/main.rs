//! gcsd — ground control station daemon.

mod config;
mod driver;
mod http;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bridge::{DroneBridge, DroneBridgeConfig, UiHub};
use clap::Parser;
use config::{Args, FileConfig};
use driver::EngineDriver;
use engine::{select_tracker_factory, FrameEngine, InteractionRouter, YoloDetector};
use follow::{FollowController, RecorderConfig, TrailRecorder};
use geo::{AttitudeProjector, CameraModel, NadirProjector, Projector};
use rtc::{PeerManager, RtcConfig, VideoEgress};
use store::{HttpStore, MemoryStore, ObjectStore};
use stream::{Receiver, ReceiverConfig};
use sync::{SyncConfig, Synchronizer};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use types::{TelemetrySample, TrackStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The guard must live for the whole process so file logs get flushed.
    let _log_guard = init_logging(&args.log_dir, &args.log_level)?;

    let mut file_config = FileConfig::load(&args.config)?;
    if let Some(port) = args.backend_port {
        file_config.network.backend_port = port;
    }
    if let Some(port) = args.video_port {
        file_config.network.video_port = port;
    }
    if let Some(ip) = args.flight_comp_ip.clone() {
        file_config.network.flight_comp_ip = ip;
    }
    info!(path = %args.config.display(), "loaded config");

    // Shutdown signal shared by every task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    // Video demux thread with latest-frame/latest-KLV cells.
    let receiver = Receiver::spawn(ReceiverConfig {
        port: file_config.network.video_port,
        ..Default::default()
    });
    info!(port = file_config.network.video_port, "video receiver started");

    // Shared state between tasks.
    let synchronizer = Arc::new(Mutex::new(Synchronizer::new(SyncConfig::default())));
    let interaction = Arc::new(InteractionRouter::new());
    let ui_hub = Arc::new(UiHub::new());
    let recorder = Arc::new(Mutex::new(TrailRecorder::new(RecorderConfig {
        record_every_nth: file_config.recording.record_every_nth,
    })));

    let (status_tx, status_rx) = watch::channel(TrackStatus::default());
    let (annotated_tx, annotated_rx) = watch::channel(None);
    let (command_tx, command_rx) = mpsc::channel(32);
    let (telemetry_tx, telemetry_rx) = watch::channel(TelemetrySample::default());

    // Object store client.
    let store: Arc<dyn ObjectStore> = if args.memory_store {
        info!("using in-memory object store");
        Arc::new(MemoryStore::new())
    } else {
        info!(url = %file_config.store.url, "using http object store");
        Arc::new(HttpStore::new(file_config.store.url.clone()))
    };

    // Drone control channel.
    let bridge = DroneBridge::new(
        DroneBridgeConfig {
            url: format!(
                "ws://{}:{}/ws/flight-computer",
                file_config.network.flight_comp_ip, file_config.network.rpi_backend_port
            ),
            ..Default::default()
        },
        command_rx,
        status_rx.clone(),
        telemetry_tx,
        ui_hub.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(bridge.run());

    // Recorder tick at the telemetry cadence; bridge telemetry also feeds
    // the synchronizer ring for the split-channel deployment.
    {
        let recorder = recorder.clone();
        let synchronizer = synchronizer.clone();
        let status_rx = status_rx.clone();
        let mut telemetry_rx = telemetry_rx.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = telemetry_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let sample = *telemetry_rx.borrow();
                        let tracking = status_rx.borrow().tracking;
                        recorder
                            .lock()
                            .expect("recorder poisoned")
                            .observe(&sample, tracking);
                        synchronizer
                            .lock()
                            .expect("synchronizer poisoned")
                            .push_telemetry(sample);
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    // Follow controller.
    let follow_controller = FollowController::new(
        file_config.follow.follow_config(),
        status_rx.clone(),
        command_tx.clone(),
        shutdown_rx.clone(),
    );
    tokio::spawn(follow_controller.run());

    // Detection/tracking engine.
    let detection = &file_config.detection;
    let use_cuda = detection.prefer_gpu_tracker && engine::cuda_available();
    let detector = YoloDetector::new(
        &detection.model_path,
        detection.labels_path.as_deref(),
        detection.confidence_threshold,
        detection.nms_iou,
        use_cuda,
    )
    .context("detector initialization failed")?;
    let tracker_factory =
        select_tracker_factory(detection.prefer_gpu_tracker, &detection.vit_model_path);
    let frame_engine = FrameEngine::new(
        detection.engine_config(),
        Box::new(detector),
        tracker_factory,
    );

    let camera = CameraModel::new(
        file_config.camera.fov_deg,
        file_config.camera.width,
        file_config.camera.height,
    );
    let projector = if file_config.camera.attitude_mode {
        info!("attitude-aware geolocation enabled");
        Projector::Attitude(
            AttitudeProjector::new(camera).context("camera intrinsics are degenerate")?,
        )
    } else {
        Projector::Nadir(NadirProjector::new(camera))
    };

    // WebRTC egress.
    let peers = PeerManager::new();
    let egress = VideoEgress::new(
        RtcConfig {
            fps: file_config.network.webrtc_fps,
            ..Default::default()
        },
        peers.clone(),
        annotated_rx,
        shutdown_rx.clone(),
    );
    tokio::spawn(egress.run());

    // Engine driver.
    let engine_driver = EngineDriver {
        engine: frame_engine,
        projector,
        frame_rx: receiver.frame_rx.clone(),
        klv_rx: receiver.klv_rx.clone(),
        stream_state_rx: receiver.state_rx.clone(),
        synchronizer: synchronizer.clone(),
        router: interaction.clone(),
        status_tx,
        annotated_tx,
        fps: file_config.camera.fps,
        shutdown_rx: shutdown_rx.clone(),
    };
    tokio::spawn(engine_driver.run());

    // HTTP surface.
    let app_state = Arc::new(http::AppState {
        store,
        ui_hub,
        router: interaction,
        recorder,
        command_tx,
        status_rx,
        peers,
    });
    let app = http::router(app_state.clone());

    // WebRTC signaling on its own port.
    {
        let signaling = http::signaling_router(app_state);
        let addr = format!("0.0.0.0:{}", file_config.network.webrtc_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;
        info!(%addr, "webrtc signaling listening");
        let mut serve_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, signaling)
                .with_graceful_shutdown(async move {
                    let _ = serve_shutdown.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "signaling server error");
            }
        });
    }

    let addr = format!("0.0.0.0:{}", file_config.network.backend_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "gcsd listening");

    let mut serve_shutdown = shutdown_rx.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.wait_for(|stop| *stop).await;
        })
        .await;

    if let Err(e) = result {
        error!(error = %e, "http server error");
    }

    // Tasks observe the shutdown watch; the demux thread is joined here.
    let stats = receiver.stats();
    info!(
        frames = stats.frames,
        klv_packets = stats.klv_packets,
        decode_errors = stats.decode_errors,
        reconnects = stats.reconnects,
        "stream totals"
    );
    receiver.shutdown();
    info!("gcsd stopped");
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
        eprintln!("  cargo run --bin gcsd -- --log-dir ./logs --memory-store");
        eprintln!();
        return Err(e.into());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "gcsd.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "gcsd={level},engine={level},stream={level},bridge={level},follow={level},rtc={level},sync={level},store={level}"
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
