//! Trail recording: every-Nth telemetry sampling while tracking, committed
//! as a single object record on stop.

use tracing::{debug, info};
use types::{RecordedObject, TelemetrySample, TrailPoint};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Append one trail point per this many telemetry ticks.
    pub record_every_nth: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_every_nth: 10,
        }
    }
}

/// Buffering recorder for one recording session at a time.
#[derive(Debug)]
pub struct TrailRecorder {
    config: RecorderConfig,
    active: bool,
    interval_counter: u32,
    points: Vec<TrailPoint>,
}

impl TrailRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            active: false,
            interval_counter: 0,
            points: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Begin a session, discarding any leftover buffer.
    pub fn start(&mut self) {
        self.active = true;
        self.interval_counter = 0;
        self.points.clear();
        info!("trail recording started");
    }

    /// Feed one telemetry tick. Appends a point only while recording and
    /// tracking, at the configured decimation.
    pub fn observe(&mut self, sample: &TelemetrySample, tracking: bool) {
        if !self.active || !tracking {
            return;
        }
        self.interval_counter += 1;
        if self.interval_counter < self.config.record_every_nth {
            return;
        }
        self.interval_counter = 0;
        self.points.push(TrailPoint::from_sample(sample));
        debug!(points = self.points.len(), "trail point recorded");
    }

    /// End the session and build the record to commit. Returns None when
    /// nothing was recorded.
    ///
    /// The buffer is retained until [`clear`](Self::clear) so a failed store
    /// write can be retried with the same points.
    pub fn stop(&mut self, classification: Option<&str>) -> Option<RecordedObject> {
        self.active = false;
        if self.points.is_empty() {
            info!("trail recording stopped with no points");
            return None;
        }
        let object = RecordedObject {
            object_id: Uuid::new_v4(),
            classification: classification.unwrap_or("unknown").to_string(),
            positions: self.points.clone(),
        };
        info!(id = %object.object_id, points = object.positions.len(), "trail recording stopped");
        Some(object)
    }

    /// Drop the buffered points after a successful commit.
    pub fn clear(&mut self) {
        self.points.clear();
        self.interval_counter = 0;
    }
}
