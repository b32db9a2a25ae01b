//! Shared scripted backends for pipeline tests.

use std::sync::{Arc, Mutex};

use engine::{Detector, EngineError, Tracker, TrackerFactory, TrackerKind};
use types::{BBox, Detection};

/// Detector that replays scripted result sets, repeating the last one.
pub struct ScriptedDetector {
    script: Vec<Vec<Detection>>,
    calls: usize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, calls: 0 }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &opencv::core::Mat) -> Result<Vec<Detection>, EngineError> {
        let index = self.calls.min(self.script.len().saturating_sub(1));
        self.calls += 1;
        Ok(self.script.get(index).cloned().unwrap_or_default())
    }

    fn class_name(&self, class_id: i32) -> String {
        match class_id {
            0 => "car".to_string(),
            other => format!("class {other}"),
        }
    }
}

/// Tracker that holds whatever box it was initialized with.
pub struct HoldingTracker {
    bbox: Option<BBox>,
    init_log: Arc<Mutex<Vec<BBox>>>,
}

impl Tracker for HoldingTracker {
    fn init(&mut self, _frame: &opencv::core::Mat, bbox: BBox) -> Result<(), EngineError> {
        self.bbox = Some(bbox);
        self.init_log.lock().unwrap().push(bbox);
        Ok(())
    }

    fn update(&mut self, _frame: &opencv::core::Mat) -> Result<Option<BBox>, EngineError> {
        Ok(self.bbox)
    }

    fn confidence(&mut self) -> Option<f32> {
        Some(0.9)
    }
}

#[derive(Default)]
pub struct HoldingTrackerFactory {
    pub init_log: Arc<Mutex<Vec<BBox>>>,
}

impl TrackerFactory for HoldingTrackerFactory {
    fn create(&self) -> Result<Box<dyn Tracker>, EngineError> {
        Ok(Box::new(HoldingTracker {
            bbox: None,
            init_log: self.init_log.clone(),
        }))
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Csrt
    }
}

pub fn detection(x: i32, y: i32, w: i32, h: i32) -> Detection {
    Detection {
        bbox: BBox::new(x, y, w, h),
        class_id: 0,
        score: 0.9,
    }
}
