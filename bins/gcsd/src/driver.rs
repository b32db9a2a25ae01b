//! Engine driver: the per-frame loop joining video, telemetry, operator
//! input, geolocation and status publication.
//!
//! Within one tick the sequence detect-or-track -> geolocate -> publish
//! status -> publish annotated frame is sequential; engine state is owned
//! here and never shared.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use engine::{FrameEngine, InteractionRouter};
use geo::Projector;
use stream::StreamState;
use sync::Synchronizer;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::{Frame, KlvPayload, TargetFix, TrackStatus};

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct EngineDriver {
    pub engine: FrameEngine,
    pub projector: Projector,
    pub frame_rx: watch::Receiver<Option<Frame>>,
    pub klv_rx: watch::Receiver<Option<KlvPayload>>,
    pub stream_state_rx: watch::Receiver<StreamState>,
    pub synchronizer: Arc<Mutex<Synchronizer>>,
    pub router: Arc<InteractionRouter>,
    pub status_tx: watch::Sender<TrackStatus>,
    pub annotated_tx: watch::Sender<Option<Frame>>,
    pub fps: u32,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl EngineDriver {
    pub async fn run(mut self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps.max(1) as f64));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(fps = self.fps, "engine driver started");

        let mut last_seq: Option<u64> = None;
        let mut last_fix: Option<TargetFix> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("engine driver shutting down");
                        return;
                    }
                    continue;
                }
            }
            self.tick(&mut last_seq, &mut last_fix);
        }
    }

    fn tick(&mut self, last_seq: &mut Option<u64>, last_fix: &mut Option<TargetFix>) {
        // Latest frame or nothing; the interval paces the retry.
        let Some(frame) = self.frame_rx.borrow().clone() else {
            return;
        };
        // The latest slot repeats the same frame when the stream is slower
        // than the driver; sequence zero means the sender was unknown.
        if frame.seq != 0 && *last_seq == Some(frame.seq) {
            return;
        }
        *last_seq = Some(frame.seq);

        let klv = self.klv_rx.borrow().clone();
        let degraded = *self.stream_state_rx.borrow() == StreamState::Degraded;

        let synced = {
            let mut synchronizer = self.synchronizer.lock().expect("synchronizer poisoned");
            synchronizer.set_degraded(degraded);
            if let Some(sample) = klv.as_ref().and_then(|k| k.telemetry()) {
                synchronizer.push_telemetry(sample);
            }
            synchronizer.attach(frame)
        };

        let cursor = self.router.cursor_pos();
        let click = self.router.take_pending_click();
        let command = self.router.take_pending_command();

        let outcome = match self.engine.process(&synced.frame, cursor, click, command) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "frame processing failed");
                return;
            }
        };

        if outcome.tracking {
            // Geolocation runs only with fresh telemetry attached; a stale
            // frame keeps the previous fix, which ages out at the follow
            // controller.
            if let (Some(bbox), Some(telemetry)) = (outcome.bbox, synced.telemetry.as_ref()) {
                let (center_x, center_y) = bbox.center();
                let offset_x = center_x - synced.frame.width as f64 / 2.0;
                let offset_y = center_y - synced.frame.height as f64 / 2.0;
                match self.projector.locate(telemetry, offset_x, offset_y) {
                    Ok((lat, lon)) => {
                        *last_fix = Some(TargetFix {
                            lat,
                            lon,
                            ts: now_epoch(),
                        });
                    }
                    Err(e) => debug!(error = %e, "geolocation skipped this tick"),
                }
            }
        } else {
            *last_fix = None;
        }

        let _ = self.status_tx.send(TrackStatus {
            tracking: outcome.tracking,
            tracked_class: outcome.tracked_class.clone(),
            target: *last_fix,
        });
        let _ = self.annotated_tx.send(Some(outcome.frame));
    }
}
