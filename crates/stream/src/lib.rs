//! MPEG-TS video+KLV transport.
//!
//! The drone-side muxer co-muxes H.264 video with a per-frame KLV metadata
//! buffer carrying the telemetry snapshot; the GCS-side demuxer reverses it
//! and publishes both halves into latest-wins cells.

pub mod demux;
pub mod mux;

use thiserror::Error;

pub use demux::{Receiver, ReceiverConfig, ReceiverHandle, StreamState, StreamStats};
pub use mux::{Muxer, MuxerConfig};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("gstreamer error: {0}")]
    Glib(#[from] gstreamer::glib::Error),
    #[error("gstreamer error: {0}")]
    Bool(#[from] gstreamer::glib::BoolError),
    #[error("pipeline state change failed: {0}")]
    StateChange(#[from] gstreamer::StateChangeError),
    #[error("pipeline element missing: {0}")]
    MissingElement(&'static str),
    #[error("pipeline bus error: {0}")]
    Bus(String),
}
