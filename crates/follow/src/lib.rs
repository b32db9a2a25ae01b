//! Follow controller and trail recorder.
//!
//! While a target is tracked, geolocated fixes are converted into
//! `move_to_location` commands at a bounded cadence. Fixes arriving faster
//! than the cadence coalesce to the latest; fixes older than the staleness
//! window are never resent.

pub mod recorder;

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use types::{DroneCommand, Location, TrackStatus};

pub use recorder::{RecorderConfig, TrailRecorder};

/// Follow controller tuning.
#[derive(Debug, Clone)]
pub struct FollowConfig {
    /// Minimum interval between waypoint commands.
    pub tick: Duration,
    /// Commanded altitude above home, meters.
    pub altitude_m: f64,
    /// Fixes older than this are not sent.
    pub stale_after: Duration,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(2),
            altitude_m: 15.0,
            stale_after: Duration::from_secs(4),
        }
    }
}

/// Pure decision core: one waypoint per tick window, tracking and fresh-fix
/// gated. Time is injected for testability.
#[derive(Debug)]
pub struct FollowPlanner {
    config: FollowConfig,
    last_sent_at: Option<Instant>,
}

impl FollowPlanner {
    pub fn new(config: FollowConfig) -> Self {
        Self {
            config,
            last_sent_at: None,
        }
    }

    /// Decide whether a waypoint command is due.
    ///
    /// `now_epoch` is the current wall clock in seconds since epoch, used to
    /// age the geolocation fix (fix timestamps are epoch-based).
    pub fn plan(
        &mut self,
        now: Instant,
        now_epoch: f64,
        status: &TrackStatus,
    ) -> Option<DroneCommand> {
        if !status.tracking {
            return None;
        }
        let fix = status.target?;

        if let Some(last) = self.last_sent_at {
            if now.duration_since(last) < self.config.tick {
                return None;
            }
        }

        let age = now_epoch - fix.ts;
        if age > self.config.stale_after.as_secs_f64() {
            debug!(age_s = age, "geolocation fix stale, waypoint withheld");
            return None;
        }

        self.last_sent_at = Some(now);
        Some(DroneCommand::MoveToLocation {
            location: Location {
                lat: fix.lat,
                lon: fix.lon,
                alt: self.config.altitude_m,
            },
        })
    }

    /// Forget the rate-limit state (used when following stops).
    pub fn reset(&mut self) {
        self.last_sent_at = None;
    }
}

/// Async driver around the planner: polls the tracking status watch and
/// queues commands on the drone bridge.
pub struct FollowController {
    planner: FollowPlanner,
    status_rx: watch::Receiver<TrackStatus>,
    command_tx: mpsc::Sender<DroneCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FollowController {
    pub fn new(
        config: FollowConfig,
        status_rx: watch::Receiver<TrackStatus>,
        command_tx: mpsc::Sender<DroneCommand>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            planner: FollowPlanner::new(config),
            status_rx,
            command_tx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        // Poll faster than the command cadence; the planner enforces the
        // per-tick rate limit, so newer fixes coalesce to the latest.
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        info!("follow controller started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let status = self.status_rx.borrow().clone();
                    if !status.tracking {
                        self.planner.reset();
                        continue;
                    }
                    let now_epoch = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(0.0);
                    if let Some(cmd) = self.planner.plan(Instant::now(), now_epoch, &status) {
                        info!(?cmd, "follow waypoint");
                        if self.command_tx.send(cmd).await.is_err() {
                            warn!("drone command channel closed, follow controller exiting");
                            return;
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("follow controller shutting down");
                        return;
                    }
                }
            }
        }
    }
}
