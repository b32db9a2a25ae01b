//! WebRTC egress.
//!
//! Every peer gets one H.264 video track backed by the shared
//! latest-annotated-frame slot. Frames are encoded once per tick and fanned
//! to all live peers with a best-effort send budget; peers that fail or
//! close are evicted on connection-state transitions.

pub mod egress;
pub mod encoder;
pub mod peer;

use std::time::Duration;

use thiserror::Error;

pub use egress::VideoEgress;
pub use peer::PeerManager;

#[derive(Error, Debug)]
pub enum RtcError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("encoder error: {0}")]
    Encoder(#[from] openh264::Error),
    #[error("no local description produced")]
    NoLocalDescription,
}

/// Egress tuning.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// Outgoing frame pacing; never exceeds the source rate in practice
    /// because the latest slot simply repeats.
    pub fps: u32,
    /// Best-effort per-peer send budget; on overrun the frame is dropped
    /// for that peer.
    pub send_budget: Duration,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            send_budget: Duration::from_millis(8),
        }
    }
}
