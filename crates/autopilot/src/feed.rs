//! Autopilot telemetry feed over local UDP.
//!
//! The telemetry extractor alongside the autopilot proxy emits one JSON
//! envelope per sample on the loopback socket at ~10 Hz. Envelopes with a
//! timestamp at or before the last accepted one are skipped.

use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use types::{FlightMode, TelemetrySample};

use crate::AutopilotError;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Loopback bind address for the envelope stream.
    pub bind: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5005".to_string(),
        }
    }
}

/// Wire envelope from the telemetry extractor. Attitude angles in radians,
/// heading in degrees, velocities NED m/s, flight mode as the raw
/// custom-mode ID.
#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    ts: f64,
    lat: f64,
    lon: f64,
    alt_agl: f64,
    alt_msl: f64,
    roll: f64,
    pitch: f64,
    yaw: f64,
    vn: f64,
    ve: f64,
    vd: f64,
    heading: f64,
    flight_mode: u32,
}

impl FeedEnvelope {
    fn into_sample(self) -> TelemetrySample {
        TelemetrySample {
            ts: self.ts,
            lat: self.lat,
            lon: self.lon,
            alt_agl: self.alt_agl,
            alt_msl: self.alt_msl,
            vn: self.vn,
            ve: self.ve,
            vd: self.vd,
            heading_deg: self.heading,
            roll_rad: self.roll,
            pitch_rad: self.pitch,
            yaw_rad: self.yaw,
            flight_mode: FlightMode::from_custom_mode(self.flight_mode),
        }
    }
}

/// Accept only strictly newer envelopes.
fn accept(ts: f64, last_ts: &mut f64) -> bool {
    if ts <= *last_ts {
        return false;
    }
    *last_ts = ts;
    true
}

/// Listens for telemetry envelopes and publishes the latest sample.
pub struct TelemetryFeed {
    config: FeedConfig,
}

impl TelemetryFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        self,
        sample_tx: watch::Sender<TelemetrySample>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), AutopilotError> {
        let socket = UdpSocket::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "telemetry feed listening");

        let mut buf = [0u8; 2048];
        let mut last_ts = f64::MIN;

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    let (len, _) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            warn!(?e, "telemetry feed receive error");
                            continue;
                        }
                    };
                    let envelope: FeedEnvelope = match serde_json::from_slice(&buf[..len]) {
                        Ok(envelope) => envelope,
                        Err(_) => {
                            debug!("malformed telemetry envelope skipped");
                            continue;
                        }
                    };
                    if !accept(envelope.ts, &mut last_ts) {
                        trace!(ts = envelope.ts, "stale telemetry envelope skipped");
                        continue;
                    }
                    let _ = sample_tx.send(envelope.into_sample());
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("telemetry feed shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_to_sample() {
        let json = r#"{
            "ts": 100.5, "lat": 51.0, "lon": -114.0,
            "alt_agl": 42.0, "alt_msl": 1090.0,
            "roll": 0.01, "pitch": -0.02, "yaw": 1.5,
            "vn": 3.0, "ve": 4.0, "vd": -0.5,
            "heading": 87.5, "flight_mode": 4
        }"#;
        let envelope: FeedEnvelope = serde_json::from_str(json).unwrap();
        let sample = envelope.into_sample();
        assert_eq!(sample.lat, 51.0);
        assert_eq!(sample.alt_agl, 42.0);
        assert_eq!(sample.heading_deg, 87.5);
        assert_eq!(sample.flight_mode, FlightMode::Guided);
        assert!((sample.ground_speed() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_mode_id_tolerated() {
        let json = r#"{
            "ts": 1.0, "lat": 0.0, "lon": 0.0,
            "alt_agl": 0.0, "alt_msl": 0.0,
            "roll": 0.0, "pitch": 0.0, "yaw": 0.0,
            "vn": 0.0, "ve": 0.0, "vd": 0.0,
            "heading": 0.0, "flight_mode": 77
        }"#;
        let envelope: FeedEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.into_sample().flight_mode, FlightMode::Unknown);
    }

    #[test]
    fn test_stale_filter_monotonic() {
        let mut last = f64::MIN;
        assert!(accept(100.0, &mut last));
        assert!(!accept(100.0, &mut last));
        assert!(!accept(99.5, &mut last));
        assert!(accept(100.1, &mut last));
        assert_eq!(last, 100.1);
    }
}
