//! Shared types and message definitions for skylock.

pub mod wire;

use serde::{Deserialize, Serialize};

pub use wire::{DroneCommand, KlvPayload, Location, UiEvent};

/// ArduCopter flight mode, carried as a string name on every wire surface.
///
/// The numeric custom-mode IDs exist only at the autopilot boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    Stabilize,
    Acro,
    #[serde(rename = "ALTHOLD")]
    AltHold,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Land,
    /// Any mode this system does not command.
    #[default]
    #[serde(other)]
    Unknown,
}

impl FlightMode {
    /// ArduCopter custom-mode ID, or None for modes we never command.
    pub fn custom_mode(&self) -> Option<u32> {
        match self {
            Self::Stabilize => Some(0),
            Self::Acro => Some(1),
            Self::AltHold => Some(2),
            Self::Auto => Some(3),
            Self::Guided => Some(4),
            Self::Loiter => Some(5),
            Self::Rtl => Some(6),
            Self::Land => Some(9),
            Self::Unknown => None,
        }
    }

    pub fn from_custom_mode(id: u32) -> Self {
        match id {
            0 => Self::Stabilize,
            1 => Self::Acro,
            2 => Self::AltHold,
            3 => Self::Auto,
            4 => Self::Guided,
            5 => Self::Loiter,
            6 => Self::Rtl,
            9 => Self::Land,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stabilize => "STABILIZE",
            Self::Acro => "ACRO",
            Self::AltHold => "ALTHOLD",
            Self::Auto => "AUTO",
            Self::Guided => "GUIDED",
            Self::Loiter => "LOITER",
            Self::Rtl => "RTL",
            Self::Land => "LAND",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// One autopilot state sample.
///
/// Coordinates are WGS-84 decimal degrees, altitudes in meters, velocities in
/// m/s (NED), attitude angles in radians, heading in degrees `[0, 360)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Seconds since epoch, drone clock.
    pub ts: f64,
    pub lat: f64,
    pub lon: f64,
    /// Altitude above ground (home) in meters.
    pub alt_agl: f64,
    /// Altitude above mean sea level in meters.
    pub alt_msl: f64,
    /// Ground speed north (m/s).
    pub vn: f64,
    /// Ground speed east (m/s).
    pub ve: f64,
    /// Ground speed down (m/s).
    pub vd: f64,
    pub heading_deg: f64,
    pub roll_rad: f64,
    pub pitch_rad: f64,
    pub yaw_rad: f64,
    pub flight_mode: FlightMode,
}

impl TelemetrySample {
    /// Horizontal ground speed in m/s.
    pub fn ground_speed(&self) -> f64 {
        (self.vn * self.vn + self.ve * self.ve).sqrt()
    }
}

/// Axis-aligned box in image pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> i64 {
        self.w.max(0) as i64 * self.h.max(0) as i64
    }

    pub fn is_valid(&self) -> bool {
        self.w > 0 && self.h > 0
    }

    /// Box center in pixel coordinates (top-left origin).
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.w as f64 / 2.0,
            self.y as f64 + self.h as f64 / 2.0,
        )
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px <= self.x + self.w && py >= self.y && py <= self.y + self.h
    }

    /// Intersection over union with another box. Zero for disjoint or
    /// degenerate boxes.
    pub fn iou(&self, other: &BBox) -> f64 {
        let xi1 = self.x.max(other.x);
        let yi1 = self.y.max(other.y);
        let xi2 = (self.x + self.w).min(other.x + other.w);
        let yi2 = (self.y + self.h).min(other.y + other.h);

        let inter = (xi2 - xi1).max(0) as i64 * (yi2 - yi1).max(0) as i64;
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f64 / union as f64
    }

    /// Clamp the box to lie fully inside a `width` x `height` image.
    /// Degenerate results keep `w`/`h` at zero and fail `is_valid`.
    pub fn clamped(&self, width: i32, height: i32) -> BBox {
        let x = self.x.clamp(0, width);
        let y = self.y.clamp(0, height);
        let w = (self.x + self.w).clamp(0, width) - x;
        let h = (self.y + self.h).clamp(0, height) - y;
        BBox { x, y, w, h }
    }
}

/// One detector output box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: i32,
    pub score: f32,
}

/// An immutable decoded video frame (BGR, 3 bytes per pixel).
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed BGR rows, `width * height * 3` bytes.
    pub data: Vec<u8>,
    /// Capture instant in seconds since epoch, drone clock.
    pub capture_ts: f64,
    /// Monotonic frame counter from the sender.
    pub seq: u64,
}

impl Frame {
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width * height * 3) as usize],
            capture_ts: 0.0,
            seq: 0,
        }
    }
}

/// Latest target fix produced by geolocation while tracking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetFix {
    pub lat: f64,
    pub lon: f64,
    /// Seconds since epoch at which the fix was computed (GCS clock).
    pub ts: f64,
}

/// Tracking status published by the engine driver each tick.
///
/// Consumed by the follow controller, the trail recorder and the UI
/// telemetry augmentation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackStatus {
    pub tracking: bool,
    pub tracked_class: Option<String>,
    pub target: Option<TargetFix>,
}

/// One recorded trail position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailPoint {
    /// ISO-8601 UTC timestamp.
    pub ts: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub heading: f64,
}

impl TrailPoint {
    pub fn from_sample(sample: &TelemetrySample) -> Self {
        let secs = sample.ts.floor() as i64;
        let nanos = ((sample.ts - secs as f64) * 1e9) as u32;
        let ts = chrono::DateTime::from_timestamp(secs, nanos)
            .unwrap_or_default()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        Self {
            ts,
            lat: sample.lat,
            lon: sample.lon,
            alt: sample.alt_agl,
            speed: sample.ground_speed(),
            heading: sample.heading_deg,
        }
    }
}

/// A finished recording session, committed to the object store as one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedObject {
    #[serde(rename = "objectID")]
    pub object_id: uuid::Uuid,
    #[serde(rename = "class")]
    pub classification: String,
    pub positions: Vec<TrailPoint>,
}

/// Listing projection of a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    #[serde(rename = "objectID")]
    pub object_id: uuid::Uuid,
    pub classification: String,
    /// Timestamp of the first recorded position, if any.
    pub timestamp: Option<String>,
}
