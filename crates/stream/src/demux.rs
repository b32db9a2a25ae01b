//! GCS-side demuxer: UDP MPEG-TS in, decoded BGR frames and parsed KLV
//! payloads out, each in a single-slot latest-wins cell.
//!
//! The demux/decode loop runs on a dedicated OS thread because the decoder
//! calls block. Consumers that lag drop frames; nothing queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::{Frame, KlvPayload};

use crate::StreamError;

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub port: u16,
    /// Pause between reconnect attempts after a pipeline fault.
    pub reconnect_backoff: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            reconnect_backoff: Duration::from_secs(2),
        }
    }
}

/// Connection state of the receive pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Degraded,
    Closed,
}

/// Receive-side counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    pub frames: u64,
    pub klv_packets: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
}

/// KLV payloads awaiting their video frame, keyed by PTS nanoseconds.
type PendingKlv = Arc<Mutex<VecDeque<(u64, KlvPayload)>>>;

const PENDING_KLV_DEPTH: usize = 16;

/// Pop the payload whose PTS matches the video buffer's. The sender stamps
/// identical PTS on both halves, so this is an exact match; entries older
/// than the matched one are discarded.
fn take_matching_klv(pending: &mut VecDeque<(u64, KlvPayload)>, pts: Option<u64>) -> Option<KlvPayload> {
    let pts = pts?;
    let index = pending.iter().position(|(p, _)| *p == pts)?;
    let (_, payload) = pending.remove(index)?;
    // Anything older belonged to frames that were dropped.
    while pending.front().is_some_and(|(p, _)| *p < pts) {
        pending.pop_front();
    }
    Some(payload)
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Spawns and owns the receive thread.
pub struct Receiver;

/// Handle to the running receiver: latest-frame and latest-KLV cells plus
/// connection state.
pub struct ReceiverHandle {
    pub frame_rx: watch::Receiver<Option<Frame>>,
    pub klv_rx: watch::Receiver<Option<KlvPayload>>,
    pub state_rx: watch::Receiver<StreamState>,
    stats: Arc<Mutex<StreamStats>>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ReceiverHandle {
    /// Snapshot of both latest slots.
    pub fn read(&self) -> (Option<Frame>, Option<KlvPayload>) {
        (self.frame_rx.borrow().clone(), self.klv_rx.borrow().clone())
    }

    pub fn stats(&self) -> StreamStats {
        *self.stats.lock().expect("stream stats poisoned")
    }

    /// Signal the thread and join it.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Receiver {
    pub fn spawn(config: ReceiverConfig) -> ReceiverHandle {
        let (frame_tx, frame_rx) = watch::channel(None);
        let (klv_tx, klv_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let stats = Arc::new(Mutex::new(StreamStats::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stats = stats.clone();
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("video-demux".to_string())
            .spawn(move || {
                receive_loop(config, frame_tx, klv_tx, state_tx, thread_stats, thread_stop);
            })
            .expect("demux thread spawn");

        ReceiverHandle {
            frame_rx,
            klv_rx,
            state_rx,
            stats,
            stop,
            thread: Some(thread),
        }
    }
}

fn receive_loop(
    config: ReceiverConfig,
    frame_tx: watch::Sender<Option<Frame>>,
    klv_tx: watch::Sender<Option<KlvPayload>>,
    state_tx: watch::Sender<StreamState>,
    stats: Arc<Mutex<StreamStats>>,
    stop: Arc<AtomicBool>,
) {
    if let Err(e) = gst::init() {
        warn!(?e, "gstreamer init failed, receiver exiting");
        let _ = state_tx.send(StreamState::Closed);
        return;
    }

    while !stop.load(Ordering::Relaxed) {
        let _ = state_tx.send(StreamState::Connecting);
        info!(port = config.port, "opening receive pipeline");

        match run_pipeline(&config, &frame_tx, &klv_tx, &state_tx, &stats, &stop) {
            Ok(()) => break,
            Err(e) => {
                let snapshot = {
                    let mut stats = stats.lock().expect("stream stats poisoned");
                    stats.reconnects += 1;
                    *stats
                };
                warn!(
                    error = %e,
                    frames = snapshot.frames,
                    klv_packets = snapshot.klv_packets,
                    decode_errors = snapshot.decode_errors,
                    reconnects = snapshot.reconnects,
                    "receive pipeline fault, reconnecting"
                );
                let _ = state_tx.send(StreamState::Degraded);
            }
        }

        // Bounded backoff before reopening the container.
        let deadline = std::time::Instant::now() + config.reconnect_backoff;
        while std::time::Instant::now() < deadline {
            if stop.load(Ordering::Relaxed) {
                let _ = state_tx.send(StreamState::Closed);
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    let _ = state_tx.send(StreamState::Closed);
    info!("receiver closed");
}

fn run_pipeline(
    config: &ReceiverConfig,
    frame_tx: &watch::Sender<Option<Frame>>,
    klv_tx: &watch::Sender<Option<KlvPayload>>,
    state_tx: &watch::Sender<StreamState>,
    stats: &Arc<Mutex<StreamStats>>,
    stop: &Arc<AtomicBool>,
) -> Result<(), StreamError> {
    let launch = format!(
        "udpsrc port={port} caps=\"video/mpegts,systemstream=true,packetsize=188\" ! \
         tsdemux name=demux \
         demux. ! h264parse ! avdec_h264 ! videoconvert ! video/x-raw,format=BGR ! \
         appsink name=video_sink sync=false max-buffers=1 drop=true \
         demux. ! meta/x-klv ! appsink name=klv_sink sync=false max-buffers=4 drop=true",
        port = config.port,
    );

    let pipeline = gst::parse::launch(&launch)?
        .downcast::<gst::Pipeline>()
        .map_err(|_| StreamError::MissingElement("pipeline"))?;

    let video_sink = pipeline
        .by_name("video_sink")
        .ok_or(StreamError::MissingElement("video_sink"))?
        .downcast::<gst_app::AppSink>()
        .map_err(|_| StreamError::MissingElement("video appsink"))?;
    let klv_sink = pipeline
        .by_name("klv_sink")
        .ok_or(StreamError::MissingElement("klv_sink"))?
        .downcast::<gst_app::AppSink>()
        .map_err(|_| StreamError::MissingElement("klv appsink"))?;

    let pending: PendingKlv = Arc::new(Mutex::new(VecDeque::new()));

    // KLV path: parse JSON, stamp latency, publish latest, hold for pairing.
    {
        let pending = pending.clone();
        let klv_tx = klv_tx.clone();
        let stats = stats.clone();
        klv_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let Some(buffer) = sample.buffer() else {
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    let Ok(map) = buffer.map_readable() else {
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    match serde_json::from_slice::<KlvPayload>(map.as_slice()) {
                        Ok(mut payload) => {
                            payload.stamp_latency(now_epoch());
                            debug!(
                                frame = payload.frame_number,
                                latency_ms = payload.latency_ms,
                                "klv packet"
                            );
                            if let Some(pts) = buffer.pts().map(|t| t.nseconds()) {
                                let mut pending =
                                    pending.lock().expect("pending klv poisoned");
                                pending.push_back((pts, payload.clone()));
                                while pending.len() > PENDING_KLV_DEPTH {
                                    pending.pop_front();
                                }
                            }
                            stats.lock().expect("stream stats poisoned").klv_packets += 1;
                            let _ = klv_tx.send(Some(payload));
                        }
                        Err(_) => {
                            // Corrupt metadata is dropped silently.
                            stats.lock().expect("stream stats poisoned").decode_errors += 1;
                        }
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    // Video path: decode to BGR, pair with KLV by PTS, publish latest.
    {
        let pending = pending.clone();
        let frame_tx = frame_tx.clone();
        let state_tx = state_tx.clone();
        let stats = stats.clone();
        video_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) else {
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    let Ok(video_info) = gst_video::VideoInfo::from_caps(caps) else {
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    let Ok(video_frame) =
                        gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &video_info)
                    else {
                        stats.lock().expect("stream stats poisoned").decode_errors += 1;
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    let width = video_info.width();
                    let height = video_info.height();
                    let stride = video_frame.plane_stride()[0] as usize;
                    let Ok(plane) = video_frame.plane_data(0) else {
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    let row_bytes = width as usize * 3;
                    let mut data = Vec::with_capacity(row_bytes * height as usize);
                    for row in 0..height as usize {
                        let start = row * stride;
                        data.extend_from_slice(&plane[start..start + row_bytes]);
                    }

                    let pts = buffer.pts().map(|t| t.nseconds());
                    let klv = take_matching_klv(
                        &mut pending.lock().expect("pending klv poisoned"),
                        pts,
                    );
                    let (capture_ts, seq) = match &klv {
                        Some(payload) => (payload.video_timestamp, payload.frame_number),
                        None => (now_epoch(), 0),
                    };

                    let mut stats = stats.lock().expect("stream stats poisoned");
                    stats.frames += 1;
                    if stats.frames == 1 {
                        info!(width, height, "first frame decoded");
                    }
                    drop(stats);
                    let _ = state_tx.send(StreamState::Streaming);

                    let _ = frame_tx.send(Some(Frame {
                        width,
                        height,
                        data,
                        capture_ts,
                        seq,
                    }));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    pipeline.set_state(gst::State::Playing)?;

    let bus = pipeline.bus().ok_or(StreamError::MissingElement("bus"))?;
    let poll = gst::ClockTime::from_mseconds(100);
    let result = loop {
        if stop.load(Ordering::Relaxed) {
            break Ok(());
        }
        let Some(message) = bus.timed_pop(poll) else {
            continue;
        };
        match message.view() {
            gst::MessageView::Error(err) => {
                break Err(StreamError::Bus(format!(
                    "{} ({:?})",
                    err.error(),
                    err.debug().unwrap_or_default()
                )));
            }
            gst::MessageView::Eos(_) => {
                break Err(StreamError::Bus("unexpected EOS on live stream".to_string()));
            }
            _ => {}
        }
    };

    let _ = pipeline.set_state(gst::State::Null);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(frame_number: u64) -> KlvPayload {
        KlvPayload::empty(frame_number, 100.0 + frame_number as f64)
    }

    #[test]
    fn test_exact_pts_match() {
        let mut pending = VecDeque::from(vec![(1000, payload(1)), (2000, payload(2))]);
        let matched = take_matching_klv(&mut pending, Some(2000)).unwrap();
        assert_eq!(matched.frame_number, 2);
        assert!(pending.is_empty(), "older entries discarded");
    }

    #[test]
    fn test_no_match_leaves_pending() {
        let mut pending = VecDeque::from(vec![(1000, payload(1))]);
        assert!(take_matching_klv(&mut pending, Some(3000)).is_none());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_missing_pts_never_matches() {
        let mut pending = VecDeque::from(vec![(1000, payload(1))]);
        assert!(take_matching_klv(&mut pending, None).is_none());
    }

    #[test]
    fn test_match_keeps_newer_entries() {
        let mut pending =
            VecDeque::from(vec![(1000, payload(1)), (2000, payload(2)), (3000, payload(3))]);
        let matched = take_matching_klv(&mut pending, Some(2000)).unwrap();
        assert_eq!(matched.frame_number, 2);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 3000);
    }
}
