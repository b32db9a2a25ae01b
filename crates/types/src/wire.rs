//! Wire envelopes: KLV metadata payload, drone command channel, UI events.

use serde::{Deserialize, Serialize};

use crate::{FlightMode, TelemetrySample};

/// Per-frame metadata payload carried on the KLV sub-stream, one per video
/// frame, JSON-encoded.
///
/// All telemetry fields are optional: a sender whose autopilot snapshot
/// failed still emits the frame header with an otherwise empty payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KlvPayload {
    pub frame_number: u64,
    /// Capture wall-clock time in seconds since epoch (drone clock).
    pub video_timestamp: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Altitude above home in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_msl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vn: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ve: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_mode: Option<FlightMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f64>,

    /// Receive-side latency stamp, never sent by the drone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

impl KlvPayload {
    pub fn from_sample(frame_number: u64, video_timestamp: f64, sample: &TelemetrySample) -> Self {
        Self {
            frame_number,
            video_timestamp,
            latitude: Some(sample.lat),
            longitude: Some(sample.lon),
            altitude: Some(sample.alt_agl),
            altitude_msl: Some(sample.alt_msl),
            heading: Some(sample.heading_deg),
            roll: Some(sample.roll_rad),
            pitch: Some(sample.pitch_rad),
            yaw: Some(sample.yaw_rad),
            vn: Some(sample.vn),
            ve: Some(sample.ve),
            vd: Some(sample.vd),
            flight_mode: Some(sample.flight_mode),
            battery_remaining: None,
            battery_voltage: None,
            latency_ms: None,
        }
    }

    /// Header-only payload for when the telemetry snapshot failed.
    pub fn empty(frame_number: u64, video_timestamp: f64) -> Self {
        Self {
            frame_number,
            video_timestamp,
            ..Default::default()
        }
    }

    /// Stamp transport latency relative to the capture instant.
    pub fn stamp_latency(&mut self, receive_ts: f64) {
        self.latency_ms = Some((receive_ts - self.video_timestamp) * 1000.0);
    }

    /// Reconstruct a telemetry sample; None unless a position is present.
    pub fn telemetry(&self) -> Option<TelemetrySample> {
        let lat = self.latitude?;
        let lon = self.longitude?;
        Some(TelemetrySample {
            ts: self.video_timestamp,
            lat,
            lon,
            alt_agl: self.altitude.unwrap_or(0.0),
            alt_msl: self.altitude_msl.unwrap_or(0.0),
            vn: self.vn.unwrap_or(0.0),
            ve: self.ve.unwrap_or(0.0),
            vd: self.vd.unwrap_or(0.0),
            heading_deg: self.heading.unwrap_or(0.0),
            roll_rad: self.roll.unwrap_or(0.0),
            pitch_rad: self.pitch.unwrap_or(0.0),
            yaw_rad: self.yaw.unwrap_or(0.0),
            flight_mode: self.flight_mode.unwrap_or_default(),
        })
    }
}

/// Waypoint target for `move_to_location`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    /// Meters above home.
    pub alt: f64,
}

/// Command envelope on the GCS → drone channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DroneCommand {
    SetFlightMode { mode: FlightMode },
    SetFollowDistance { distance: f64 },
    StopFollowing,
    MoveToLocation { location: Location },
}

/// Event frame on the UI → GCS channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    MouseMove { x: i32, y: i32 },
    Click { x: i32, y: i32 },
    StopTracking,
    ReselectObject,
}
