//! Frame/telemetry synchronization.
//!
//! When video and telemetry travel on separate channels, frames are aligned
//! to the telemetry sample nearest in wall-clock time, bounded by a maximum
//! skew. The ring is small, so the nearest-match scan stays O(N); replace
//! with an ordered container if the sample rate ever grows.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace};
use types::{Frame, TelemetrySample};

/// Synchronizer tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of retained telemetry samples.
    pub capacity: usize,
    /// Maximum |sample.ts - capture_ts| for a match.
    pub max_skew: Duration,
    /// Widened acceptance window while the stream is degraded.
    pub degraded_skew: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            capacity: 300,
            max_skew: Duration::from_millis(200),
            degraded_skew: Duration::from_millis(600),
        }
    }
}

/// Bounded FIFO of telemetry samples keyed by timestamp.
#[derive(Debug)]
pub struct TelemetryRing {
    buf: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl TelemetryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: TelemetrySample) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Sample minimizing |ts - target|, with its absolute skew in seconds.
    /// Exact ties prefer the earlier sample.
    pub fn nearest(&self, target_ts: f64) -> Option<(&TelemetrySample, f64)> {
        let mut best: Option<(&TelemetrySample, f64)> = None;
        for sample in &self.buf {
            let skew = (sample.ts - target_ts).abs();
            match best {
                Some((best_sample, best_skew)) => {
                    if skew < best_skew || (skew == best_skew && sample.ts < best_sample.ts) {
                        best = Some((sample, skew));
                    }
                }
                None => best = Some((sample, skew)),
            }
        }
        best
    }
}

/// A frame joined with its nearest-in-time telemetry.
#[derive(Debug, Clone)]
pub struct SyncedFrame {
    pub frame: Frame,
    /// None when no sample fell inside the skew window.
    pub telemetry: Option<TelemetrySample>,
    /// Skew of the attached sample, in milliseconds.
    pub sync_skew_ms: Option<f64>,
}

/// Owns the telemetry ring and performs the per-frame join.
#[derive(Debug)]
pub struct Synchronizer {
    ring: TelemetryRing,
    config: SyncConfig,
    degraded: bool,
    no_telemetry_count: u64,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            ring: TelemetryRing::new(config.capacity),
            config,
            degraded: false,
            no_telemetry_count: 0,
        }
    }

    pub fn push_telemetry(&mut self, sample: TelemetrySample) {
        self.ring.push(sample);
    }

    /// Widen or restore the acceptance window with stream health.
    pub fn set_degraded(&mut self, degraded: bool) {
        if degraded != self.degraded {
            debug!(degraded, "synchronizer skew window changed");
        }
        self.degraded = degraded;
    }

    /// Frames that found no telemetry inside the window.
    pub fn no_telemetry_count(&self) -> u64 {
        self.no_telemetry_count
    }

    pub fn telemetry_len(&self) -> usize {
        self.ring.len()
    }

    /// Join a frame with the nearest telemetry sample.
    pub fn attach(&mut self, frame: Frame) -> SyncedFrame {
        let window = if self.degraded {
            self.config.degraded_skew
        } else {
            self.config.max_skew
        };

        match self.ring.nearest(frame.capture_ts) {
            Some((sample, skew)) if skew <= window.as_secs_f64() => {
                trace!(skew_ms = skew * 1000.0, "telemetry attached");
                SyncedFrame {
                    telemetry: Some(*sample),
                    sync_skew_ms: Some(skew * 1000.0),
                    frame,
                }
            }
            _ => {
                self.no_telemetry_count += 1;
                SyncedFrame {
                    frame,
                    telemetry: None,
                    sync_skew_ms: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: f64) -> TelemetrySample {
        TelemetrySample {
            ts,
            lat: 51.0,
            lon: -114.0,
            ..Default::default()
        }
    }

    fn frame(capture_ts: f64) -> Frame {
        Frame {
            width: 4,
            height: 4,
            data: vec![0; 48],
            capture_ts,
            seq: 0,
        }
    }

    #[test]
    fn test_nearest_match_within_window() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        sync.push_telemetry(sample(100.00));
        sync.push_telemetry(sample(100.20));
        sync.push_telemetry(sample(100.45));

        let synced = sync.attach(frame(100.22));
        let telemetry = synced.telemetry.expect("should attach");
        assert!((telemetry.ts - 100.20).abs() < 1e-9);
        assert!((synced.sync_skew_ms.unwrap() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_match_outside_window() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        sync.push_telemetry(sample(100.0));

        let synced = sync.attach(frame(100.5));
        assert!(synced.telemetry.is_none());
        assert!(synced.sync_skew_ms.is_none());
        assert_eq!(sync.no_telemetry_count(), 1);
    }

    #[test]
    fn test_empty_ring_attaches_nothing() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        let synced = sync.attach(frame(100.0));
        assert!(synced.telemetry.is_none());
        assert_eq!(sync.no_telemetry_count(), 1);
    }

    #[test]
    fn test_tie_prefers_earlier_sample() {
        let mut ring = TelemetryRing::new(8);
        ring.push(sample(100.0));
        ring.push(sample(100.25));

        // Exactly equidistant (both offsets are representable): the earlier
        // sample wins.
        let (nearest, skew) = ring.nearest(100.125).unwrap();
        assert!((nearest.ts - 100.0).abs() < 1e-12);
        assert_eq!(skew, 0.125);
    }

    #[test]
    fn test_degraded_mode_widens_window() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        sync.push_telemetry(sample(100.0));

        assert!(sync.attach(frame(100.4)).telemetry.is_none());

        sync.set_degraded(true);
        assert!(sync.attach(frame(100.4)).telemetry.is_some());

        sync.set_degraded(false);
        assert!(sync.attach(frame(100.4)).telemetry.is_none());
    }

    #[test]
    fn test_ring_eviction_fifo() {
        let mut ring = TelemetryRing::new(3);
        for ts in [1.0, 2.0, 3.0, 4.0] {
            ring.push(sample(ts));
        }
        assert_eq!(ring.len(), 3);
        // 1.0 was evicted; nearest to 0.0 is now 2.0.
        let (nearest, _) = ring.nearest(0.0).unwrap();
        assert!((nearest.ts - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_skew_counter_accumulates() {
        let mut sync = Synchronizer::new(SyncConfig::default());
        for i in 0..5 {
            let _ = sync.attach(frame(100.0 + i as f64));
        }
        assert_eq!(sync.no_telemetry_count(), 5);
    }
}
