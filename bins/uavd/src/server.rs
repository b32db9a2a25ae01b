//! Command/telemetry WebSocket server for the GCS.
//!
//! Broadcasts the latest telemetry sample at a fixed cadence and executes
//! incoming command envelopes against the autopilot. A rejected command
//! produces an error frame; the connection stays open.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use autopilot::{execute_command, Autopilot};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use types::{DroneCommand, TelemetrySample};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub telemetry_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5555,
            telemetry_interval: Duration::from_secs(1),
        }
    }
}

pub type SharedAutopilot = Arc<Mutex<Box<dyn Autopilot>>>;

pub struct CommandServer {
    config: ServerConfig,
    autopilot: SharedAutopilot,
    telemetry_rx: watch::Receiver<TelemetrySample>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CommandServer {
    pub fn new(
        config: ServerConfig,
        autopilot: SharedAutopilot,
        telemetry_rx: watch::Receiver<TelemetrySample>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            autopilot,
            telemetry_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr, "command server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!(%peer, "gcs connected");
                            let autopilot = self.autopilot.clone();
                            let telemetry_rx = self.telemetry_rx.clone();
                            let interval = self.config.telemetry_interval;
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, autopilot, telemetry_rx, interval)
                                        .await
                                {
                                    warn!(?e, "gcs connection error");
                                }
                                info!(%peer, "gcs disconnected");
                            });
                        }
                        Err(e) => error!(?e, "accept failed"),
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("command server shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    autopilot: SharedAutopilot,
    telemetry_rx: watch::Receiver<TelemetrySample>,
    telemetry_interval: Duration,
) -> anyhow::Result<()> {
    let _ = stream.set_nodelay(true);
    let ws_stream = accept_async(stream).await?;
    let (mut sender, mut receiver) = ws_stream.split();

    // Telemetry ticks and command error frames share one outgoing queue so
    // a single task owns the socket sink.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(16);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let telemetry_out = out_tx.clone();
    let telemetry_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(telemetry_interval);
        loop {
            ticker.tick().await;
            let sample = *telemetry_rx.borrow();
            if sample.ts <= 0.0 {
                // Nothing from the autopilot yet.
                continue;
            }
            let Ok(json) = serde_json::to_string(&sample) else {
                continue;
            };
            if telemetry_out.send(json).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let command: DroneCommand = match serde_json::from_str(&text) {
                    Ok(command) => command,
                    Err(_) => {
                        debug!("unrecognized command envelope skipped");
                        continue;
                    }
                };
                info!(?command, "command received");

                let autopilot = autopilot.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let mut guard = autopilot.lock().expect("autopilot poisoned");
                    execute_command(guard.as_mut(), &command)
                })
                .await;

                if let Ok(Err(e)) = result {
                    error!(error = %e, "command rejected");
                    let frame =
                        serde_json::json!({ "status": 500, "error": e.to_string() }).to_string();
                    let _ = out_tx.send(frame).await;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(?e, "receive error");
                break;
            }
            _ => {}
        }
    }

    telemetry_task.abort();
    writer_task.abort();
    Ok(())
}
