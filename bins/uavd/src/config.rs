//! uavd configuration.

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
#[command(name = "uavd", about = "Flight computer daemon")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/uav.toml")]
    pub config: PathBuf,

    /// GCS address for the video stream (overrides config file)
    #[arg(long)]
    pub gcs_host: Option<String>,

    /// Camera device (overrides config file)
    #[arg(long)]
    pub device: Option<String>,

    /// Disable the video muxer (telemetry/commands only)
    #[arg(long)]
    pub no_video: bool,

    /// Run without a MAVLink connection (commands are logged and dropped)
    #[arg(long)]
    pub no_autopilot: bool,

    /// Log directory for text logs
    #[arg(long, default_value = "/var/log/skylock")]
    pub log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Configuration file structure (uav.toml).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub network: NetworkConfig,
    pub camera: CameraConfig,
    pub autopilot: AutopilotConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// GCS host receiving the MPEG-TS stream.
    pub gcs_host: String,
    pub video_port: u16,
    /// Command/telemetry WebSocket port served to the GCS.
    pub ws_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            gcs_host: env_string("GCS_IP", "127.0.0.1"),
            video_port: env_parse("GCS_VIDEO_PORT", 5000),
            ws_port: env_parse("RPI_BACKEND_PORT", 5555),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub keyframe_interval: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            fps: 60,
            bitrate_kbps: 3000,
            keyframe_interval: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    /// MAVLink endpoint of the autopilot proxy.
    pub address: String,
    /// Loopback bind for the telemetry envelope stream.
    pub feed_bind: String,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            address: "udpin:127.0.0.1:5006".to_string(),
            feed_bind: "127.0.0.1:5005".to_string(),
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
