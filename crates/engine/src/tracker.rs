//! Short-term trackers behind a common capability set.
//!
//! VitTrack (ONNX, DNN CUDA target) when a GPU and the model file are
//! available, CSRT on CPU otherwise. The choice is invisible above the
//! `Tracker` trait.

use std::path::{Path, PathBuf};

use opencv::core::{self, Mat, Rect};
use opencv::prelude::*;
use opencv::{dnn, tracking, video};
use tracing::{info, warn};
use types::BBox;

use crate::mat::{bbox_from_rect, rect_from_bbox};
use crate::EngineError;

/// Capability set shared by all tracker backends.
pub trait Tracker: Send {
    /// Bind the tracker to a target box on the given frame.
    fn init(&mut self, frame: &Mat, bbox: BBox) -> Result<(), EngineError>;

    /// Advance one frame. `Ok(None)` means the target was lost.
    fn update(&mut self, frame: &Mat) -> Result<Option<BBox>, EngineError>;

    /// Self-assessed match quality in [0, 1]; None when the backend cannot
    /// report one.
    fn confidence(&mut self) -> Option<f32>;
}

/// Creates a fresh tracker per selection or realignment.
pub trait TrackerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Tracker>, EngineError>;
    fn kind(&self) -> TrackerKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Vit,
    Csrt,
}

/// VitTrack backend.
pub struct VitTracker {
    inner: core::Ptr<video::TrackerVit>,
}

impl Tracker for VitTracker {
    fn init(&mut self, frame: &Mat, bbox: BBox) -> Result<(), EngineError> {
        self.inner.init(frame, rect_from_bbox(bbox))?;
        Ok(())
    }

    fn update(&mut self, frame: &Mat) -> Result<Option<BBox>, EngineError> {
        let mut rect = Rect::default();
        let ok = self.inner.update(frame, &mut rect)?;
        Ok(ok.then(|| bbox_from_rect(rect)))
    }

    fn confidence(&mut self) -> Option<f32> {
        self.inner.get_tracking_score().ok()
    }
}

pub struct VitTrackerFactory {
    model_path: PathBuf,
    use_cuda: bool,
}

impl TrackerFactory for VitTrackerFactory {
    fn create(&self) -> Result<Box<dyn Tracker>, EngineError> {
        let path = self
            .model_path
            .to_str()
            .ok_or_else(|| EngineError::Model("non-UTF8 tracker model path".to_string()))?;
        let mut params = video::TrackerVit_Params::default()?;
        params.set_net(path);
        if self.use_cuda {
            params.set_backend(dnn::DNN_BACKEND_CUDA);
            params.set_target(dnn::DNN_TARGET_CUDA);
        } else {
            params.set_backend(dnn::DNN_BACKEND_DEFAULT);
            params.set_target(dnn::DNN_TARGET_CPU);
        }
        let inner = video::TrackerVit::create(&params)?;
        Ok(Box::new(VitTracker { inner }))
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Vit
    }
}

/// CSRT backend (CPU).
pub struct CsrtTracker {
    inner: core::Ptr<tracking::TrackerCSRT>,
}

impl Tracker for CsrtTracker {
    fn init(&mut self, frame: &Mat, bbox: BBox) -> Result<(), EngineError> {
        self.inner.init(frame, rect_from_bbox(bbox))?;
        Ok(())
    }

    fn update(&mut self, frame: &Mat) -> Result<Option<BBox>, EngineError> {
        let mut rect = Rect::default();
        let ok = self.inner.update(frame, &mut rect)?;
        Ok(ok.then(|| bbox_from_rect(rect)))
    }

    fn confidence(&mut self) -> Option<f32> {
        None
    }
}

pub struct CsrtTrackerFactory;

impl TrackerFactory for CsrtTrackerFactory {
    fn create(&self) -> Result<Box<dyn Tracker>, EngineError> {
        let params = tracking::TrackerCSRT_Params::default()?;
        let inner = tracking::TrackerCSRT::create(&params)?;
        Ok(Box::new(CsrtTracker { inner }))
    }

    fn kind(&self) -> TrackerKind {
        TrackerKind::Csrt
    }
}

/// Whether OpenCV can see a CUDA device.
pub fn cuda_available() -> bool {
    core::get_cuda_enabled_device_count().unwrap_or(0) > 0
}

/// Pick the tracker backend at startup.
pub fn select_tracker_factory(prefer_gpu: bool, vit_model: &Path) -> Box<dyn TrackerFactory> {
    let cuda_devices = core::get_cuda_enabled_device_count().unwrap_or(0);
    if prefer_gpu && cuda_devices > 0 && vit_model.exists() {
        info!(model = %vit_model.display(), "using VitTrack tracker (CUDA)");
        return Box::new(VitTrackerFactory {
            model_path: vit_model.to_path_buf(),
            use_cuda: true,
        });
    }
    if prefer_gpu && cuda_devices > 0 {
        warn!(model = %vit_model.display(), "VitTrack model not found, falling back to CSRT");
    }
    info!("using CSRT tracker (CPU)");
    Box::new(CsrtTrackerFactory)
}
