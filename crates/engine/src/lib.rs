//! Detection and tracking engine.
//!
//! Per frame the engine is in exactly one of two states: Detecting (run the
//! detector, let the operator hover and click a box) or Tracking (drive a
//! lightweight tracker with periodic drift correction against fresh
//! detections). State transitions happen only here, on the engine task.

pub mod detector;
pub mod engine;
pub mod interaction;
pub mod mat;
pub mod render;
pub mod tracker;

use thiserror::Error;

pub use detector::{Detector, YoloDetector};
pub use engine::{FrameEngine, ProcessOutcome, TickStatus};
pub use interaction::{InteractionRouter, RouterCommand};
pub use tracker::{cuda_available, select_tracker_factory, Tracker, TrackerFactory, TrackerKind};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("model error: {0}")]
    Model(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Engine tuning. Every field is part of the behavioural contract.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Frames skipped between detector runs while Detecting
    /// (1 = run every 2nd frame).
    pub detection_frame_skip: u64,
    /// Frames skipped between tracker updates while Tracking.
    pub tracker_frame_skip: u64,
    /// Detector confidence floor.
    pub confidence_threshold: f32,
    /// Detector NMS IoU threshold.
    pub nms_iou: f32,
    /// Tracking frames between drift-correction passes.
    pub redetect_interval: u64,
    /// Minimum IoU between the consensus box and the tracker box to accept
    /// a realignment.
    pub drift_iou_accept: f64,
    /// Minimum IoU for a detection to count as a drift candidate.
    pub min_detection_iou: f64,
    /// Length of the drift-consensus window.
    pub history_size: usize,
    /// Tracker self-confidence at or above which correction is skipped.
    pub tracker_confidence_skip: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_frame_skip: 1,
            tracker_frame_skip: 1,
            confidence_threshold: 0.10,
            nms_iou: 0.5,
            redetect_interval: 10,
            drift_iou_accept: 0.5,
            min_detection_iou: 0.3,
            history_size: 3,
            tracker_confidence_skip: 0.5,
        }
    }
}
