//! Conversions between the transport `Frame` type and OpenCV `Mat`.

use opencv::core::{Mat, MatTraitConst};
use opencv::prelude::*;
use types::{BBox, Frame};

use crate::EngineError;

/// Wrap a BGR frame in an owned 3-channel `Mat`.
pub fn mat_from_frame(frame: &Frame) -> Result<Mat, EngineError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(EngineError::InvalidFrame(format!(
            "{}x{} frame carries {} bytes, expected {expected}",
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }
    let flat = Mat::from_slice(&frame.data)?;
    let shaped = flat.reshape(3, frame.height as i32)?;
    Ok(shaped.try_clone()?)
}

/// Copy an annotated `Mat` back into a frame, keeping the source timing.
pub fn frame_from_mat(mat: &Mat, source: &Frame) -> Result<Frame, EngineError> {
    Ok(Frame {
        width: mat.cols() as u32,
        height: mat.rows() as u32,
        data: mat.data_bytes()?.to_vec(),
        capture_ts: source.capture_ts,
        seq: source.seq,
    })
}

/// BBox to an OpenCV rect.
pub fn rect_from_bbox(bbox: BBox) -> opencv::core::Rect {
    opencv::core::Rect::new(bbox.x, bbox.y, bbox.w, bbox.h)
}

/// OpenCV rect to a BBox.
pub fn bbox_from_rect(rect: opencv::core::Rect) -> BBox {
    BBox::new(rect.x, rect.y, rect.width, rect.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_mat_roundtrip() {
        let mut frame = Frame::black(8, 6);
        frame.capture_ts = 12.5;
        frame.seq = 42;
        frame.data[0] = 255; // B of the first pixel

        let mat = mat_from_frame(&frame).unwrap();
        assert_eq!(mat.cols(), 8);
        assert_eq!(mat.rows(), 6);

        let back = frame_from_mat(&mat, &frame).unwrap();
        assert_eq!(back.data, frame.data);
        assert_eq!(back.capture_ts, 12.5);
        assert_eq!(back.seq, 42);
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let mut frame = Frame::black(8, 6);
        frame.data.truncate(10);
        assert!(matches!(
            mat_from_frame(&frame),
            Err(EngineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rect_bbox_roundtrip() {
        let bbox = BBox::new(10, 20, 30, 40);
        assert_eq!(bbox_from_rect(rect_from_bbox(bbox)), bbox);
    }
}
