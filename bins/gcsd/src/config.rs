//! gcsd configuration: CLI args over TOML file over environment over
//! built-in defaults.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use tracing::warn;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Parser)]
#[command(name = "gcsd", about = "Ground control station daemon")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/gcs.toml")]
    pub config: PathBuf,

    /// HTTP/WebSocket port (overrides config file)
    #[arg(long)]
    pub backend_port: Option<u16>,

    /// UDP video receive port (overrides config file)
    #[arg(long)]
    pub video_port: Option<u16>,

    /// Flight computer address (overrides config file)
    #[arg(long)]
    pub flight_comp_ip: Option<String>,

    /// Use the in-memory object store instead of the HTTP store
    #[arg(long)]
    pub memory_store: bool,

    /// Log directory for text logs
    #[arg(long, default_value = "/var/log/skylock")]
    pub log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Configuration file structure (gcs.toml).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub network: NetworkConfig,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub follow: FollowFileConfig,
    pub recording: RecordingConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub backend_port: u16,
    pub video_port: u16,
    pub webrtc_port: u16,
    pub webrtc_fps: u32,
    pub flight_comp_ip: String,
    pub rpi_backend_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            backend_port: env_parse("GCS_BACKEND_PORT", 8000),
            video_port: env_parse("GCS_VIDEO_PORT", 5000),
            webrtc_port: env_parse("WEBRTC_PORT", 8081),
            webrtc_fps: env_parse("WEBRTC_FPS", 30),
            flight_comp_ip: env_string("FLIGHT_COMP_IP", "127.0.0.1"),
            rpi_backend_port: env_parse("RPI_BACKEND_PORT", 5555),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Diagonal field of view in degrees.
    pub fov_deg: f64,
    pub width: u32,
    pub height: u32,
    /// Engine driver pacing.
    pub fps: u32,
    /// Use the attitude-aware projector instead of nadir.
    pub attitude_mode: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_deg: 73.7,
            width: 1456,
            height: 1088,
            fps: 60,
            attitude_mode: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub vit_model_path: PathBuf,
    pub prefer_gpu_tracker: bool,
    pub detection_frame_skip: u64,
    pub tracker_frame_skip: u64,
    pub confidence_threshold: f32,
    pub nms_iou: f32,
    pub redetect_interval: u64,
    pub drift_iou_accept: f64,
    pub min_detection_iou: f64,
    pub history_size: usize,
    pub tracker_confidence_skip: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let defaults = engine::EngineConfig::default();
        Self {
            model_path: PathBuf::from("models/yolo11n.onnx"),
            labels_path: Some(PathBuf::from("models/coco.names")),
            vit_model_path: PathBuf::from("models/object_tracking_vittrack_2023sep.onnx"),
            prefer_gpu_tracker: true,
            detection_frame_skip: defaults.detection_frame_skip,
            tracker_frame_skip: defaults.tracker_frame_skip,
            confidence_threshold: defaults.confidence_threshold,
            nms_iou: defaults.nms_iou,
            redetect_interval: defaults.redetect_interval,
            drift_iou_accept: defaults.drift_iou_accept,
            min_detection_iou: defaults.min_detection_iou,
            history_size: defaults.history_size,
            tracker_confidence_skip: defaults.tracker_confidence_skip,
        }
    }
}

impl DetectionConfig {
    pub fn engine_config(&self) -> engine::EngineConfig {
        engine::EngineConfig {
            detection_frame_skip: self.detection_frame_skip,
            tracker_frame_skip: self.tracker_frame_skip,
            confidence_threshold: self.confidence_threshold,
            nms_iou: self.nms_iou,
            redetect_interval: self.redetect_interval,
            drift_iou_accept: self.drift_iou_accept,
            min_detection_iou: self.min_detection_iou,
            history_size: self.history_size,
            tracker_confidence_skip: self.tracker_confidence_skip,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FollowFileConfig {
    pub tick_secs: f64,
    pub altitude_m: f64,
    pub stale_secs: f64,
}

impl Default for FollowFileConfig {
    fn default() -> Self {
        Self {
            tick_secs: 2.0,
            altitude_m: 15.0,
            stale_secs: 4.0,
        }
    }
}

impl FollowFileConfig {
    pub fn follow_config(&self) -> follow::FollowConfig {
        follow::FollowConfig {
            tick: std::time::Duration::from_secs_f64(self.tick_secs),
            altitude_m: self.altitude_m,
            stale_after: std::time::Duration::from_secs_f64(self.stale_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub record_every_nth: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            record_every_nth: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: env_string("OBJECT_STORE_URL", "http://127.0.0.1:9000"),
        }
    }
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: FileConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(FileConfig::default())
        }
    }
}
