//! Drone-side muxer: camera capture, low-latency H.264 encode, and one KLV
//! metadata buffer per video frame, co-muxed into a single MPEG-TS/UDP
//! stream.
//!
//! A pad probe on the raw video path observes every outbound frame and
//! pushes the matching KLV buffer with the video frame's PTS copied onto it,
//! so both land in the same multiplex block on the same presentation
//! instant.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tokio::sync::watch;
use tracing::{error, info, warn};
use types::{KlvPayload, TelemetrySample};

use crate::StreamError;

/// Muxer configuration.
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    pub device: String,
    pub host: String,
    pub port: u16,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// Maximum frames between keyframes.
    pub keyframe_interval: u32,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5000,
            width: 1280,
            height: 720,
            fps: 60,
            bitrate_kbps: 3000,
            keyframe_interval: 60,
        }
    }
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Single-pipeline muxer. Camera failure surfaces as a bus error and aborts
/// [`run`](Muxer::run); telemetry snapshot failure degrades to an empty
/// payload and never skips a video frame.
pub struct Muxer {
    pipeline: gst::Pipeline,
}

impl Muxer {
    pub fn new(
        config: &MuxerConfig,
        telemetry_rx: watch::Receiver<TelemetrySample>,
    ) -> Result<Self, StreamError> {
        gst::init()?;

        let launch = format!(
            "mpegtsmux name=mux alignment=7 ! udpsink host={host} port={port} sync=false \
             v4l2src device={device} ! \
             video/x-raw,width={width},height={height},framerate={fps}/1 ! \
             identity name=frame_tap ! videoconvert ! \
             x264enc tune=zerolatency speed-preset=ultrafast bitrate={bitrate} \
             key-int-max={key_int} aud=true sliced-threads=true ! mux. \
             appsrc name=klv format=time is-live=true \
             caps=\"meta/x-klv,parsed=true,sparse=true\" ! mux.",
            host = config.host,
            port = config.port,
            device = config.device,
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate = config.bitrate_kbps,
            key_int = config.keyframe_interval,
        );

        let pipeline = gst::parse::launch(&launch)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| StreamError::MissingElement("pipeline"))?;

        let klv_src = pipeline
            .by_name("klv")
            .ok_or(StreamError::MissingElement("klv"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| StreamError::MissingElement("klv appsrc"))?;

        let tap = pipeline
            .by_name("frame_tap")
            .ok_or(StreamError::MissingElement("frame_tap"))?;
        let tap_pad = tap
            .static_pad("src")
            .ok_or(StreamError::MissingElement("frame_tap src pad"))?;

        let frame_counter = Arc::new(AtomicU64::new(0));
        let frame_duration = gst::ClockTime::from_nseconds(1_000_000_000 / config.fps.max(1) as u64);

        tap_pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, info| {
            if let Some(gst::PadProbeData::Buffer(ref buffer)) = info.data {
                let pts = buffer.pts();
                let frame_number = frame_counter.fetch_add(1, Ordering::Relaxed);
                let capture_ts = now_epoch();

                // Non-blocking snapshot; a source that has never produced a
                // sample yields the empty payload.
                let sample = *telemetry_rx.borrow();
                let payload = if sample.ts > 0.0 {
                    KlvPayload::from_sample(frame_number, capture_ts, &sample)
                } else {
                    KlvPayload::empty(frame_number, capture_ts)
                };

                let bytes = serde_json::to_vec(&payload).unwrap_or_else(|_| b"{}".to_vec());
                let mut klv_buffer = gst::Buffer::from_mut_slice(bytes);
                {
                    let buffer_ref = klv_buffer.get_mut().expect("fresh buffer is unique");
                    // Same PTS as the video frame: the receiver groups the
                    // pair without heuristics.
                    buffer_ref.set_pts(pts);
                    buffer_ref.set_duration(frame_duration);
                }
                if let Err(e) = klv_src.push_buffer(klv_buffer) {
                    warn!(?e, "klv push failed");
                }
            }
            gst::PadProbeReturn::Ok
        });

        info!(
            host = %config.host,
            port = config.port,
            fps = config.fps,
            "muxer pipeline built"
        );
        Ok(Self { pipeline })
    }

    /// Run until EOS, a fatal pipeline error, or `stop` is raised.
    pub fn run(&self, stop: Arc<AtomicBool>) -> Result<(), StreamError> {
        self.pipeline.set_state(gst::State::Playing)?;
        let bus = self
            .pipeline
            .bus()
            .ok_or(StreamError::MissingElement("bus"))?;

        let poll = gst::ClockTime::from_mseconds(100);
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("muxer stop requested");
                break;
            }
            let Some(message) = bus.timed_pop(poll) else {
                continue;
            };
            match message.view() {
                gst::MessageView::Error(err) => {
                    let text = format!(
                        "{} ({:?})",
                        err.error(),
                        err.debug().unwrap_or_default()
                    );
                    error!(error = %text, "muxer pipeline error");
                    let _ = self.pipeline.set_state(gst::State::Null);
                    return Err(StreamError::Bus(text));
                }
                gst::MessageView::Eos(_) => {
                    info!("muxer reached EOS");
                    break;
                }
                _ => {}
            }
        }

        // Flush partial muxing before teardown.
        let _ = self.pipeline.send_event(gst::event::Eos::new());
        let _ = self.pipeline.set_state(gst::State::Null);
        Ok(())
    }
}
