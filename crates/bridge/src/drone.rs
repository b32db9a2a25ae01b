//! Long-lived control channel to the flight computer.
//!
//! Connects over WebSocket with capped backoff, serializes outgoing command
//! envelopes in send order, and fans each incoming telemetry frame
//! (augmented with tracking status) out to the UI subscribers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use types::{DroneCommand, TelemetrySample, TrackStatus};

use crate::ui::UiHub;

#[derive(Debug, Clone)]
pub struct DroneBridgeConfig {
    /// WebSocket URL of the flight computer,
    /// e.g. `ws://10.0.0.2:5555/ws/flight-computer`.
    pub url: String,
    pub reconnect_backoff: Duration,
}

impl Default for DroneBridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5555/ws/flight-computer".to_string(),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

/// Add the GCS-side tracking fields to a telemetry frame bound for the UI.
///
/// `distance_to_target` is the geodesic ground distance between the drone
/// position in the frame and the latest target fix; null whenever either
/// side is missing.
pub fn augment_telemetry(value: &mut serde_json::Value, status: &TrackStatus) {
    let Some(object) = value.as_object_mut() else {
        return;
    };

    object.insert("tracking".to_string(), status.tracking.into());
    object.insert(
        "tracked_class".to_string(),
        match &status.tracked_class {
            Some(class) => serde_json::Value::String(class.clone()),
            None => serde_json::Value::Null,
        },
    );

    let distance = match (status.tracking, status.target) {
        (true, Some(fix)) => {
            let lat = object.get("lat").and_then(|v| v.as_f64());
            let lon = object.get("lon").and_then(|v| v.as_f64());
            match (lat, lon) {
                (Some(lat), Some(lon)) => {
                    serde_json::Number::from_f64(geo::distance_m(lat, lon, fix.lat, fix.lon))
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
                _ => serde_json::Value::Null,
            }
        }
        _ => serde_json::Value::Null,
    };
    object.insert("distance_to_target".to_string(), distance);
}

/// GCS side of the drone control channel.
pub struct DroneBridge {
    config: DroneBridgeConfig,
    command_rx: mpsc::Receiver<DroneCommand>,
    status_rx: watch::Receiver<TrackStatus>,
    /// Latest raw sample for the recorder tick and anyone else who needs it.
    telemetry_tx: watch::Sender<TelemetrySample>,
    ui_hub: Arc<UiHub>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DroneBridge {
    pub fn new(
        config: DroneBridgeConfig,
        command_rx: mpsc::Receiver<DroneCommand>,
        status_rx: watch::Receiver<TrackStatus>,
        telemetry_tx: watch::Sender<TelemetrySample>,
        ui_hub: Arc<UiHub>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            command_rx,
            status_rx,
            telemetry_tx,
            ui_hub,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                return;
            }
            info!(url = %self.config.url, "connecting to flight computer");

            match connect_async(&self.config.url).await {
                Ok((ws_stream, _)) => {
                    info!("flight computer connected");
                    let (mut write, mut read) = ws_stream.split();

                    loop {
                        tokio::select! {
                            command = self.command_rx.recv() => {
                                let Some(command) = command else {
                                    info!("command channel closed, bridge exiting");
                                    return;
                                };
                                let json = match serde_json::to_string(&command) {
                                    Ok(json) => json,
                                    Err(e) => {
                                        error!(?e, "command serialization failed");
                                        continue;
                                    }
                                };
                                debug!(%json, "command to drone");
                                if write.send(Message::Text(json.into())).await.is_err() {
                                    // Send failure surfaces as channel close.
                                    warn!("command send failed, reconnecting");
                                    break;
                                }
                            }

                            incoming = read.next() => {
                                match incoming {
                                    Some(Ok(Message::Text(text))) => handle_telemetry(
                                        &self.telemetry_tx,
                                        &self.status_rx,
                                        &self.ui_hub,
                                        &text,
                                    ),
                                    Some(Ok(Message::Ping(data))) => {
                                        let _ = write.send(Message::Pong(data)).await;
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        warn!("flight computer closed the channel");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        warn!(error = %e, "flight computer receive error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }

                            _ = self.shutdown_rx.changed() => {
                                if *self.shutdown_rx.borrow() {
                                    let _ = write.send(Message::Close(None)).await;
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "flight computer connection failed");
                }
            }

            info!(
                backoff_s = self.config.reconnect_backoff.as_secs(),
                "reconnecting to flight computer"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }

}

fn handle_telemetry(
    telemetry_tx: &watch::Sender<TelemetrySample>,
    status_rx: &watch::Receiver<TrackStatus>,
    ui_hub: &UiHub,
    text: &str,
) {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(text) else {
        debug!("malformed telemetry frame skipped");
        return;
    };

    if let Ok(sample) = serde_json::from_value::<TelemetrySample>(value.clone()) {
        let _ = telemetry_tx.send(sample);
    }

    let status = status_rx.borrow().clone();
    augment_telemetry(&mut value, &status);
    ui_hub.broadcast(&value.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::TargetFix;

    fn telemetry_value() -> serde_json::Value {
        serde_json::json!({
            "ts": 100.0,
            "lat": 51.0,
            "lon": -114.0,
            "alt_agl": 100.0,
        })
    }

    #[test]
    fn test_augment_not_tracking() {
        let mut value = telemetry_value();
        augment_telemetry(&mut value, &TrackStatus::default());
        assert_eq!(value["tracking"], serde_json::json!(false));
        assert_eq!(value["tracked_class"], serde_json::Value::Null);
        assert_eq!(value["distance_to_target"], serde_json::Value::Null);
    }

    #[test]
    fn test_augment_tracking_with_distance() {
        let mut value = telemetry_value();
        let status = TrackStatus {
            tracking: true,
            tracked_class: Some("car".to_string()),
            target: Some(TargetFix {
                lat: 51.001,
                lon: -114.0,
                ts: 100.0,
            }),
        };
        augment_telemetry(&mut value, &status);
        assert_eq!(value["tracking"], serde_json::json!(true));
        assert_eq!(value["tracked_class"], serde_json::json!("car"));

        // 0.001 degrees of latitude is ~111 m.
        let distance = value["distance_to_target"].as_f64().unwrap();
        assert!((distance - 111.0).abs() < 2.0, "distance = {distance}");
    }

    #[test]
    fn test_augment_tracking_without_fix_leaves_distance_null() {
        let mut value = telemetry_value();
        let status = TrackStatus {
            tracking: true,
            tracked_class: Some("car".to_string()),
            target: None,
        };
        augment_telemetry(&mut value, &status);
        assert_eq!(value["tracking"], serde_json::json!(true));
        assert_eq!(value["distance_to_target"], serde_json::Value::Null);
    }

    #[test]
    fn test_augment_missing_position_leaves_distance_null() {
        let mut value = serde_json::json!({ "ts": 100.0 });
        let status = TrackStatus {
            tracking: true,
            tracked_class: Some("car".to_string()),
            target: Some(TargetFix {
                lat: 51.0,
                lon: -114.0,
                ts: 100.0,
            }),
        };
        augment_telemetry(&mut value, &status);
        assert_eq!(value["distance_to_target"], serde_json::Value::Null);
    }
}
