//! Communication bridges: the long-lived drone control channel and the UI
//! subscriber fanout.

pub mod drone;
pub mod ui;

use thiserror::Error;

pub use drone::{augment_telemetry, DroneBridge, DroneBridgeConfig};
pub use ui::UiHub;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command channel closed")]
    ChannelClosed,
}
