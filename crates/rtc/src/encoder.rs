//! BGR-to-I420 conversion and H.264 encoding for the egress tracks.

use openh264::encoder::{Encoder, EncoderConfig};
use openh264::formats::YUVSource;
use openh264::OpenH264API;
use tracing::debug;
use types::Frame;

use crate::RtcError;

/// Owned I420 planes produced from a packed BGR frame.
pub struct I420Buffer {
    width: usize,
    height: usize,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl I420Buffer {
    /// Convert packed BGR rows (BT.601 full-range approximation, 2x2 chroma
    /// averaging). Odd dimensions are truncated to even.
    pub fn from_bgr(frame: &Frame) -> Self {
        let width = (frame.width as usize) & !1;
        let height = (frame.height as usize) & !1;
        let src_stride = frame.width as usize * 3;

        let mut y = vec![0u8; width * height];
        let mut u = vec![0u8; width * height / 4];
        let mut v = vec![0u8; width * height / 4];

        for row in 0..height {
            for col in 0..width {
                let p = row * src_stride + col * 3;
                let b = frame.data[p] as i32;
                let g = frame.data[p + 1] as i32;
                let r = frame.data[p + 2] as i32;
                let luma = (77 * r + 150 * g + 29 * b) >> 8;
                y[row * width + col] = luma.clamp(0, 255) as u8;
            }
        }

        for row in (0..height).step_by(2) {
            for col in (0..width).step_by(2) {
                // Average the 2x2 block for the chroma planes.
                let (mut sum_b, mut sum_g, mut sum_r) = (0i32, 0i32, 0i32);
                for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    let p = (row + dy) * src_stride + (col + dx) * 3;
                    sum_b += frame.data[p] as i32;
                    sum_g += frame.data[p + 1] as i32;
                    sum_r += frame.data[p + 2] as i32;
                }
                let (b, g, r) = (sum_b / 4, sum_g / 4, sum_r / 4);
                let cb = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
                let cr = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
                let index = (row / 2) * (width / 2) + col / 2;
                u[index] = cb.clamp(0, 255) as u8;
                v[index] = cr.clamp(0, 255) as u8;
            }
        }

        Self {
            width,
            height,
            y,
            u,
            v,
        }
    }
}

impl YUVSource for I420Buffer {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn strides(&self) -> (usize, usize, usize) {
        (self.width, self.width / 2, self.width / 2)
    }

    fn y(&self) -> &[u8] {
        &self.y
    }

    fn u(&self) -> &[u8] {
        &self.u
    }

    fn v(&self) -> &[u8] {
        &self.v
    }
}

/// H.264 encoder that re-creates itself when the frame geometry changes.
pub struct EgressEncoder {
    inner: Option<(Encoder, u32, u32)>,
}

impl EgressEncoder {
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Encode one BGR frame to an Annex-B bitstream.
    pub fn encode_bgr(&mut self, frame: &Frame) -> Result<Vec<u8>, RtcError> {
        let needs_rebuild = match &self.inner {
            Some((_, w, h)) => *w != frame.width || *h != frame.height,
            None => true,
        };
        if needs_rebuild {
            debug!(
                width = frame.width,
                height = frame.height,
                "building egress encoder"
            );
            let config = EncoderConfig::new();
            let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)?;
            self.inner = Some((encoder, frame.width, frame.height));
        }

        let (encoder, _, _) = self.inner.as_mut().expect("encoder just built");
        let yuv = I420Buffer::from_bgr(frame);
        let bitstream = encoder.encode(&yuv)?;
        Ok(bitstream.to_vec())
    }
}

impl Default for EgressEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_frame_planes() {
        let frame = Frame::black(16, 16);
        let yuv = I420Buffer::from_bgr(&frame);
        assert_eq!(yuv.dimensions(), (16, 16));
        assert_eq!(yuv.strides(), (16, 8, 8));
        assert!(yuv.y().iter().all(|&b| b == 0));
        // Chroma of black is mid-scale.
        assert!(yuv.u().iter().all(|&b| b == 128));
        assert!(yuv.v().iter().all(|&b| b == 128));
    }

    #[test]
    fn test_white_frame_luma() {
        let mut frame = Frame::black(8, 8);
        frame.data.fill(255);
        let yuv = I420Buffer::from_bgr(&frame);
        // Full-range white: luma saturates near 255, chroma stays neutral.
        assert!(yuv.y().iter().all(|&b| b >= 250), "y = {:?}", &yuv.y()[..4]);
        assert!(yuv.u().iter().all(|&b| (120..=136).contains(&b)));
        assert!(yuv.v().iter().all(|&b| (120..=136).contains(&b)));
    }

    #[test]
    fn test_odd_dimensions_truncate() {
        let frame = Frame {
            width: 7,
            height: 5,
            data: vec![0; 7 * 5 * 3],
            capture_ts: 0.0,
            seq: 0,
        };
        let yuv = I420Buffer::from_bgr(&frame);
        assert_eq!(yuv.dimensions(), (6, 4));
        assert_eq!(yuv.y().len(), 24);
        assert_eq!(yuv.u().len(), 6);
    }

    #[test]
    fn test_red_frame_chroma() {
        let mut frame = Frame::black(8, 8);
        for px in frame.data.chunks_mut(3) {
            px[2] = 255; // R in BGR
        }
        let yuv = I420Buffer::from_bgr(&frame);
        // Pure red pushes Cr high and Cb low.
        assert!(yuv.v().iter().all(|&b| b > 200));
        assert!(yuv.u().iter().all(|&b| b < 110));
    }
}
