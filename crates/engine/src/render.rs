//! Overlay rendering for the operator video feed.

use opencv::core::{self, Mat, Point, Scalar};
use opencv::imgproc;
use opencv::prelude::*;
use types::{BBox, Detection};

use crate::mat::rect_from_bbox;
use crate::EngineError;

const COLOR_DETECTION: (f64, f64, f64) = (0.0, 255.0, 0.0);
const COLOR_HOVER: (f64, f64, f64) = (0.0, 255.0, 255.0);
const COLOR_TRACKING: (f64, f64, f64) = (0.0, 165.0, 255.0);
const COLOR_TEXT: (f64, f64, f64) = (255.0, 255.0, 255.0);
const FILL_ALPHA: f64 = 0.35;

fn scalar((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

/// Blend a filled box into the image at `FILL_ALPHA`.
fn fill_translucent(img: &mut Mat, bbox: BBox, color: (f64, f64, f64)) -> Result<(), EngineError> {
    let base = img.try_clone()?;
    let mut overlay = img.try_clone()?;
    imgproc::rectangle(
        &mut overlay,
        rect_from_bbox(bbox),
        scalar(color),
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )?;
    core::add_weighted(&overlay, FILL_ALPHA, &base, 1.0 - FILL_ALPHA, 0.0, img, -1)?;
    Ok(())
}

fn label(img: &mut Mat, text: &str, bbox: BBox) -> Result<(), EngineError> {
    let origin = Point::new(bbox.x, (bbox.y - 8).max(16));
    imgproc::put_text(
        img,
        text,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        scalar(COLOR_TEXT),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// Detection-mode overlay: all boxes outlined, the hovered one filled and
/// labeled.
pub fn draw_detections(
    img: &mut Mat,
    detections: &[Detection],
    hovered: Option<usize>,
    class_name: impl Fn(i32) -> String,
) -> Result<(), EngineError> {
    for detection in detections {
        imgproc::rectangle(
            img,
            rect_from_bbox(detection.bbox),
            scalar(COLOR_DETECTION),
            2,
            imgproc::LINE_8,
            0,
        )?;
    }
    if let Some(index) = hovered {
        if let Some(detection) = detections.get(index) {
            fill_translucent(img, detection.bbox, COLOR_HOVER)?;
            label(img, &class_name(detection.class_id), detection.bbox)?;
        }
    }
    Ok(())
}

/// Tracking-mode overlay: filled box, class label, optional status banner.
pub fn draw_tracking(
    img: &mut Mat,
    bbox: BBox,
    class_name: &str,
    status: Option<&str>,
) -> Result<(), EngineError> {
    fill_translucent(img, bbox, COLOR_TRACKING)?;
    imgproc::rectangle(
        img,
        rect_from_bbox(bbox),
        scalar(COLOR_TRACKING),
        2,
        imgproc::LINE_8,
        0,
    )?;
    label(img, &format!("{class_name} [TRACKING]"), bbox)?;

    if let Some(text) = status {
        imgproc::put_text(
            img,
            text,
            Point::new(16, 32),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.75,
            scalar(COLOR_HOVER),
            2,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}
