//! Egress send loop: snapshot the latest annotated frame, encode once, fan
//! to all peers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use types::Frame;

use crate::encoder::EgressEncoder;
use crate::peer::PeerManager;
use crate::RtcConfig;

/// Paced sender reading from the latest-frame slot.
pub struct VideoEgress {
    config: RtcConfig,
    manager: Arc<PeerManager>,
    frame_rx: watch::Receiver<Option<Frame>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl VideoEgress {
    pub fn new(
        config: RtcConfig,
        manager: Arc<PeerManager>,
        frame_rx: watch::Receiver<Option<Frame>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            manager,
            frame_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        let frame_duration = Duration::from_secs_f64(1.0 / self.config.fps as f64);
        let mut ticker = tokio::time::interval(frame_duration);
        let mut encoder = EgressEncoder::new();
        info!(fps = self.config.fps, "video egress started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.manager.peer_count().await == 0 {
                        continue;
                    }
                    // Latest frame wins; a peer connected before the first
                    // frame sees black.
                    let frame = self
                        .frame_rx
                        .borrow()
                        .clone()
                        .unwrap_or_else(|| Frame::black(640, 480));

                    match encoder.encode_bgr(&frame) {
                        Ok(bitstream) if !bitstream.is_empty() => {
                            self.manager
                                .write_to_all(&bitstream, frame_duration, self.config.send_budget)
                                .await;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "frame encode failed"),
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        self.manager.close_all().await;
                        info!("video egress shut down");
                        return;
                    }
                }
            }
        }
    }
}
