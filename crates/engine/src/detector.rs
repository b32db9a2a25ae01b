//! YOLO object detection through the OpenCV DNN module.

use std::path::Path;

use opencv::core::{self, Mat, MatTraitConst, Scalar, Size, Vector};
use opencv::dnn;
use opencv::prelude::*;
use tracing::{debug, info, warn};
use types::{BBox, Detection};

use crate::EngineError;

/// Detector input resolution (square letterbox-free resize).
const INPUT_SIZE: i32 = 640;

/// Capability surface the engine needs from a detector.
pub trait Detector: Send {
    /// Run inference on a BGR frame and return filtered, NMS-suppressed
    /// detections with boxes clamped to the frame.
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, EngineError>;

    /// Human-readable class label.
    fn class_name(&self, class_id: i32) -> String;
}

/// ONNX YOLO detector (v8-family output layout `[1, 4+nc, anchors]`).
pub struct YoloDetector {
    net: dnn::Net,
    labels: Vec<String>,
    confidence_threshold: f32,
    nms_iou: f32,
}

impl YoloDetector {
    pub fn new(
        model_path: &Path,
        labels_path: Option<&Path>,
        confidence_threshold: f32,
        nms_iou: f32,
        use_cuda: bool,
    ) -> Result<Self, EngineError> {
        let path = model_path
            .to_str()
            .ok_or_else(|| EngineError::Model("non-UTF8 model path".to_string()))?;
        let mut net = dnn::read_net_from_onnx(path)?;

        if use_cuda {
            net.set_preferable_backend(dnn::DNN_BACKEND_CUDA)?;
            net.set_preferable_target(dnn::DNN_TARGET_CUDA)?;
            info!(model = path, "detector on CUDA DNN target");
        } else {
            net.set_preferable_backend(dnn::DNN_BACKEND_OPENCV)?;
            net.set_preferable_target(dnn::DNN_TARGET_CPU)?;
            info!(model = path, "detector on CPU");
        }

        let labels = match labels_path {
            Some(p) => match std::fs::read_to_string(p) {
                Ok(content) => content.lines().map(|l| l.trim().to_string()).collect(),
                Err(e) => {
                    warn!(path = %p.display(), ?e, "labels file unreadable, using class ids");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(Self {
            net,
            labels,
            confidence_threshold,
            nms_iou,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, EngineError> {
        if frame.empty() {
            return Ok(Vec::new());
        }
        let frame_w = frame.cols();
        let frame_h = frame.rows();

        let blob = dnn::blob_from_image(
            frame,
            1.0 / 255.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;

        let mut outputs = Vector::<Mat>::new();
        let names = self.net.get_unconnected_out_layers_names()?;
        self.net.forward(&mut outputs, &names)?;

        let output = outputs
            .get(0)
            .map_err(|_| EngineError::Model("detector produced no output".to_string()))?;
        let size = output.mat_size();
        if size.len() != 3 {
            return Err(EngineError::Model(format!(
                "unexpected detector output rank {}",
                size.len()
            )));
        }
        let channels = size[1];
        let anchors = size[2];
        if channels < 5 {
            return Err(EngineError::Model(format!(
                "detector output has {channels} channels, need at least 5"
            )));
        }

        // [1, 4+nc, anchors] -> [anchors, 4+nc]
        let flat = output.reshape(1, channels)?.try_clone()?;
        let mut rows = Mat::default();
        core::transpose(&flat, &mut rows)?;

        let scale_x = frame_w as f32 / INPUT_SIZE as f32;
        let scale_y = frame_h as f32 / INPUT_SIZE as f32;

        let mut boxes = Vector::<core::Rect>::new();
        let mut scores = Vector::<f32>::new();
        let mut class_ids: Vec<i32> = Vec::new();

        for r in 0..anchors {
            let mut best_class = 0;
            let mut best_score = 0.0f32;
            for c in 4..channels {
                let score = *rows.at_2d::<f32>(r, c)?;
                if score > best_score {
                    best_score = score;
                    best_class = c - 4;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }

            let cx = *rows.at_2d::<f32>(r, 0)? * scale_x;
            let cy = *rows.at_2d::<f32>(r, 1)? * scale_y;
            let w = *rows.at_2d::<f32>(r, 2)? * scale_x;
            let h = *rows.at_2d::<f32>(r, 3)? * scale_y;

            boxes.push(core::Rect::new(
                (cx - w / 2.0) as i32,
                (cy - h / 2.0) as i32,
                w as i32,
                h as i32,
            ));
            scores.push(best_score);
            class_ids.push(best_class);
        }

        let mut keep = Vector::<i32>::new();
        dnn::nms_boxes(
            &boxes,
            &scores,
            self.confidence_threshold,
            self.nms_iou,
            &mut keep,
            1.0,
            0,
        )?;

        let mut detections = Vec::with_capacity(keep.len());
        for idx in keep.iter() {
            let rect = boxes.get(idx as usize)?;
            let bbox =
                BBox::new(rect.x, rect.y, rect.width, rect.height).clamped(frame_w, frame_h);
            if !bbox.is_valid() {
                continue;
            }
            detections.push(Detection {
                bbox,
                class_id: class_ids[idx as usize],
                score: scores.get(idx as usize)?,
            });
        }
        debug!(count = detections.len(), "detections");
        Ok(detections)
    }

    fn class_name(&self, class_id: i32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class {class_id}"))
    }
}
