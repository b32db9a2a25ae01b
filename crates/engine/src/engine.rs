//! Per-frame detection/tracking state machine.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use types::{BBox, Detection, Frame};

use crate::detector::Detector;
use crate::interaction::RouterCommand;
use crate::mat::{frame_from_mat, mat_from_frame};
use crate::render;
use crate::tracker::{Tracker, TrackerFactory};
use crate::{EngineConfig, EngineError};

/// What happened on this tick, for downstream status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Detecting,
    TrackingStarted,
    Tracking,
    Realigned,
    DriftDetected,
    AcquisitionLost,
}

/// Engine output for one frame.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Annotated frame (or the input unchanged when there was nothing to
    /// draw).
    pub frame: Frame,
    pub tracking: bool,
    pub bbox: Option<BBox>,
    pub tracked_class: Option<String>,
    pub status: TickStatus,
    /// Index of the hovered detection while Detecting.
    pub hovered: Option<usize>,
}

enum State {
    Detecting {
        last_results: Vec<Detection>,
        last_results_seq: Option<u64>,
    },
    Tracking {
        tracker: Box<dyn Tracker>,
        bbox: BBox,
        class_id: i32,
        class_name: String,
        frames_since_correction: u64,
        history: VecDeque<Option<BBox>>,
        cached_render: Option<Frame>,
    },
}

impl State {
    fn detecting() -> Self {
        State::Detecting {
            last_results: Vec::new(),
            last_results_seq: None,
        }
    }
}

/// Single-threaded engine; owned exclusively by the driver task.
pub struct FrameEngine {
    config: EngineConfig,
    detector: Box<dyn Detector>,
    factory: Box<dyn TrackerFactory>,
    state: State,
    frame_count: u64,
    tick_times_ms: VecDeque<f64>,
    last_stats_log: Instant,
}

impl FrameEngine {
    pub fn new(
        config: EngineConfig,
        detector: Box<dyn Detector>,
        factory: Box<dyn TrackerFactory>,
    ) -> Self {
        Self {
            config,
            detector,
            factory,
            state: State::detecting(),
            frame_count: 0,
            tick_times_ms: VecDeque::with_capacity(100),
            last_stats_log: Instant::now(),
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, State::Tracking { .. })
    }

    pub fn tracked_class(&self) -> Option<String> {
        match &self.state {
            State::Tracking { class_name, .. } => Some(class_name.clone()),
            State::Detecting { .. } => None,
        }
    }

    /// Drop any tracker state and return to Detecting.
    pub fn reset(&mut self) {
        if self.is_tracking() {
            info!("tracking stopped, resuming detection");
        }
        self.state = State::detecting();
    }

    /// Process one frame with the pending operator inputs.
    pub fn process(
        &mut self,
        frame: &Frame,
        cursor: Option<(i32, i32)>,
        click: Option<(i32, i32)>,
        command: Option<RouterCommand>,
    ) -> Result<ProcessOutcome, EngineError> {
        self.frame_count += 1;

        if let Some(cmd) = command {
            match cmd {
                RouterCommand::StopTracking | RouterCommand::ReselectObject => self.reset(),
            }
        }

        let started = Instant::now();
        let outcome = match self.state {
            State::Detecting { .. } => self.detecting_tick(frame, cursor, click),
            State::Tracking { .. } => self.tracking_tick(frame),
        }?;
        self.note_tick_time(started);
        Ok(outcome)
    }

    fn detecting_tick(
        &mut self,
        frame: &Frame,
        cursor: Option<(i32, i32)>,
        click: Option<(i32, i32)>,
    ) -> Result<ProcessOutcome, EngineError> {
        let have_results = matches!(
            &self.state,
            State::Detecting {
                last_results_seq: Some(_),
                ..
            }
        );
        let run_detector =
            self.frame_count % (self.config.detection_frame_skip + 1) == 0 || !have_results;

        if run_detector {
            let mat = mat_from_frame(frame)?;
            let results = self.detector.detect(&mat)?;
            if let State::Detecting {
                last_results,
                last_results_seq,
            } = &mut self.state
            {
                *last_results = results;
                *last_results_seq = Some(frame.seq);
            }
        }

        let detections: Vec<Detection> = match &self.state {
            State::Detecting { last_results, .. } => last_results.clone(),
            State::Tracking { .. } => unreachable!("detecting tick in tracking state"),
        };

        // Topmost (earliest index) detection under the cursor wins.
        let hovered = cursor
            .and_then(|(cx, cy)| detections.iter().position(|d| d.bbox.contains(cx, cy)));

        if let Some((click_x, click_y)) = click {
            let selected = hovered
                .filter(|&i| detections[i].bbox.contains(click_x, click_y))
                .or_else(|| {
                    detections
                        .iter()
                        .position(|d| d.bbox.contains(click_x, click_y))
                });

            if let Some(index) = selected {
                return self.start_tracking(frame, detections[index], index);
            }
        }

        let out_frame = if detections.is_empty() {
            frame.clone()
        } else {
            let mut mat = mat_from_frame(frame)?;
            let labels = &self.detector;
            render::draw_detections(&mut mat, &detections, hovered, |id| labels.class_name(id))?;
            frame_from_mat(&mat, frame)?
        };

        Ok(ProcessOutcome {
            frame: out_frame,
            tracking: false,
            bbox: None,
            tracked_class: None,
            status: TickStatus::Detecting,
            hovered,
        })
    }

    /// Initialize a tracker on the selected detection and the current frame.
    fn start_tracking(
        &mut self,
        frame: &Frame,
        detection: Detection,
        hovered: usize,
    ) -> Result<ProcessOutcome, EngineError> {
        let mat = mat_from_frame(frame)?;
        let mut tracker = self.factory.create()?;
        tracker.init(&mat, detection.bbox)?;

        let class_name = self.detector.class_name(detection.class_id);
        info!(
            class = %class_name,
            x = detection.bbox.x,
            y = detection.bbox.y,
            "target selected, tracking started"
        );

        let mut out = mat;
        render::draw_tracking(&mut out, detection.bbox, &class_name, None)?;
        let annotated = frame_from_mat(&out, frame)?;

        self.state = State::Tracking {
            tracker,
            bbox: detection.bbox,
            class_id: detection.class_id,
            class_name: class_name.clone(),
            frames_since_correction: 0,
            history: VecDeque::new(),
            cached_render: Some(annotated.clone()),
        };

        Ok(ProcessOutcome {
            frame: annotated,
            tracking: true,
            bbox: Some(detection.bbox),
            tracked_class: Some(class_name),
            status: TickStatus::TrackingStarted,
            hovered: Some(hovered),
        })
    }

    fn tracking_tick(&mut self, frame: &Frame) -> Result<ProcessOutcome, EngineError> {
        let State::Tracking {
            mut tracker,
            mut bbox,
            class_id,
            class_name,
            mut frames_since_correction,
            mut history,
            cached_render,
        } = std::mem::replace(&mut self.state, State::detecting())
        else {
            unreachable!("tracking tick in detecting state");
        };

        // Skipped tick: reuse the last bbox and the cached render.
        if self.frame_count % (self.config.tracker_frame_skip + 1) != 0 {
            if let Some(cached) = cached_render.clone() {
                let outcome = ProcessOutcome {
                    frame: cached,
                    tracking: true,
                    bbox: Some(bbox),
                    tracked_class: Some(class_name.clone()),
                    status: TickStatus::Tracking,
                    hovered: None,
                };
                self.state = State::Tracking {
                    tracker,
                    bbox,
                    class_id,
                    class_name,
                    frames_since_correction,
                    history,
                    cached_render,
                };
                return Ok(outcome);
            }
        }

        let mat = mat_from_frame(frame)?;
        match tracker.update(&mat)? {
            Some(updated) => {
                bbox = updated.clamped(frame.width as i32, frame.height as i32);
            }
            None => {
                warn!("tracker lost target, resuming detection");
                return Ok(ProcessOutcome {
                    frame: frame.clone(),
                    tracking: false,
                    bbox: None,
                    tracked_class: None,
                    status: TickStatus::AcquisitionLost,
                    hovered: None,
                });
            }
        }

        let mut status = TickStatus::Tracking;
        let mut banner: Option<String> = None;

        frames_since_correction += 1;
        if frames_since_correction >= self.config.redetect_interval {
            frames_since_correction = 0;
            let confidence = tracker.confidence();
            let correction = if self.confidence_skips_correction(confidence, &mut history) {
                DriftOutcome::None
            } else {
                self.drift_correction(&mat, bbox, class_id, &mut history)?
            };
            match correction {
                DriftOutcome::Realigned(smoothed, iou) => {
                    let mut fresh = self.factory.create()?;
                    fresh.init(&mat, smoothed)?;
                    tracker = fresh;
                    bbox = smoothed;
                    history.clear();
                    status = TickStatus::Realigned;
                    banner = Some(format!("REALIGNED (IoU {iou:.2})"));
                    info!(iou, "tracker realigned to detection consensus");
                }
                DriftOutcome::Drifting(iou) => {
                    status = TickStatus::DriftDetected;
                    banner = Some(format!("DRIFT DETECTED (IoU {iou:.2})"));
                    warn!(iou, "drift detected, consensus below accept threshold");
                }
                DriftOutcome::None => {}
            }
        }

        let mut out = mat;
        render::draw_tracking(&mut out, bbox, &class_name, banner.as_deref())?;
        let annotated = frame_from_mat(&out, frame)?;

        let outcome = ProcessOutcome {
            frame: annotated.clone(),
            tracking: true,
            bbox: Some(bbox),
            tracked_class: Some(class_name.clone()),
            status,
            hovered: None,
        };
        self.state = State::Tracking {
            tracker,
            bbox,
            class_id,
            class_name,
            frames_since_correction,
            history,
            cached_render: Some(annotated),
        };
        Ok(outcome)
    }

    /// One drift-correction pass: candidate match, consensus window, accept
    /// test. The tracker-confidence short-circuit happens in the caller,
    /// where the live tracker can be queried.
    fn drift_correction(
        &mut self,
        mat: &opencv::core::Mat,
        current: BBox,
        class_id: i32,
        history: &mut VecDeque<Option<BBox>>,
    ) -> Result<DriftOutcome, EngineError> {
        let detections = self.detector.detect(mat)?;
        let winner = detections
            .iter()
            .filter(|d| d.class_id == class_id)
            .map(|d| (d.bbox, current.iou(&d.bbox)))
            .filter(|(_, iou)| *iou >= self.config.min_detection_iou)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(bbox, _)| bbox);

        history.push_back(winner);
        while history.len() > self.config.history_size {
            history.pop_front();
        }
        if history.len() < self.config.history_size {
            return Ok(DriftOutcome::None);
        }

        let valid: Vec<BBox> = history.iter().flatten().copied().collect();
        if valid.len() + 1 < self.config.history_size {
            return Ok(DriftOutcome::None);
        }

        let smoothed = mean_bbox(&valid);
        let iou = smoothed.iou(&current);
        if iou > self.config.drift_iou_accept {
            Ok(DriftOutcome::Realigned(smoothed, iou))
        } else if iou > 0.0 {
            Ok(DriftOutcome::Drifting(iou))
        } else {
            Ok(DriftOutcome::None)
        }
    }

    /// Query tracker confidence and clear history when the tracker is sure
    /// of itself. Called from the tracking tick before detection.
    fn confidence_skips_correction(
        &self,
        confidence: Option<f32>,
        history: &mut VecDeque<Option<BBox>>,
    ) -> bool {
        match confidence {
            Some(c) if c >= self.config.tracker_confidence_skip => {
                debug!(confidence = c, "tracker confident, correction skipped");
                history.clear();
                true
            }
            _ => false,
        }
    }

    fn note_tick_time(&mut self, started: Instant) {
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        if self.tick_times_ms.len() == 100 {
            self.tick_times_ms.pop_front();
        }
        self.tick_times_ms.push_back(ms);

        if self.last_stats_log.elapsed() >= Duration::from_secs(2) && !self.tick_times_ms.is_empty()
        {
            let avg = self.tick_times_ms.iter().sum::<f64>() / self.tick_times_ms.len() as f64;
            debug!(
                frame = self.frame_count,
                avg_ms = format!("{avg:.2}"),
                tracking = self.is_tracking(),
                "engine tick timing"
            );
            self.last_stats_log = Instant::now();
        }
    }
}

enum DriftOutcome {
    None,
    Drifting(f64),
    Realigned(BBox, f64),
}

/// Element-wise arithmetic mean, truncated to integer pixels.
fn mean_bbox(boxes: &[BBox]) -> BBox {
    let n = boxes.len() as f64;
    BBox::new(
        (boxes.iter().map(|b| b.x as f64).sum::<f64>() / n) as i32,
        (boxes.iter().map(|b| b.y as f64).sum::<f64>() / n) as i32,
        (boxes.iter().map(|b| b.w as f64).sum::<f64>() / n) as i32,
        (boxes.iter().map(|b| b.h as f64).sum::<f64>() / n) as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Detector that replays a scripted sequence of result sets, repeating
    /// the last one when the script runs out.
    struct ScriptedDetector {
        script: Vec<Vec<Detection>>,
        calls: usize,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Vec<Detection>>) -> Self {
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
                1 => "person".to_string(),
                other => format!("class {other}"),
            }
        }
    }

    /// Tracker that holds whatever box it was initialized with, with a fixed
    /// confidence and an optional scripted failure tick.
    struct StaticTracker {
        bbox: Option<BBox>,
        confidence: Option<f32>,
        fail_after_updates: Option<usize>,
        updates: usize,
        init_log: Arc<Mutex<Vec<BBox>>>,
    }

    impl Tracker for StaticTracker {
        fn init(&mut self, _frame: &opencv::core::Mat, bbox: BBox) -> Result<(), EngineError> {
            self.bbox = Some(bbox);
            self.init_log.lock().unwrap().push(bbox);
            Ok(())
        }

        fn update(&mut self, _frame: &opencv::core::Mat) -> Result<Option<BBox>, EngineError> {
            self.updates += 1;
            if let Some(limit) = self.fail_after_updates {
                if self.updates > limit {
                    return Ok(None);
                }
            }
            Ok(self.bbox)
        }

        fn confidence(&mut self) -> Option<f32> {
            self.confidence
        }
    }

    struct StaticTrackerFactory {
        confidence: Option<f32>,
        fail_after_updates: Option<usize>,
        init_log: Arc<Mutex<Vec<BBox>>>,
    }

    impl TrackerFactory for StaticTrackerFactory {
        fn create(&self) -> Result<Box<dyn Tracker>, EngineError> {
            Ok(Box::new(StaticTracker {
                bbox: None,
                confidence: self.confidence,
                fail_after_updates: self.fail_after_updates,
                updates: 0,
                init_log: self.init_log.clone(),
            }))
        }

        fn kind(&self) -> crate::tracker::TrackerKind {
            crate::tracker::TrackerKind::Csrt
        }
    }

    fn det(x: i32, y: i32, w: i32, h: i32) -> Detection {
        Detection {
            bbox: BBox::new(x, y, w, h),
            class_id: 0,
            score: 0.9,
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            detection_frame_skip: 0,
            tracker_frame_skip: 0,
            redetect_interval: 1,
            ..Default::default()
        }
    }

    fn engine_with(
        config: EngineConfig,
        script: Vec<Vec<Detection>>,
        confidence: Option<f32>,
        fail_after_updates: Option<usize>,
    ) -> (FrameEngine, Arc<Mutex<Vec<BBox>>>) {
        let init_log = Arc::new(Mutex::new(Vec::new()));
        let engine = FrameEngine::new(
            config,
            Box::new(ScriptedDetector::new(script)),
            Box::new(StaticTrackerFactory {
                confidence,
                fail_after_updates,
                init_log: init_log.clone(),
            }),
        );
        (engine, init_log)
    }

    fn frame() -> Frame {
        Frame::black(640, 480)
    }

    #[test]
    fn test_click_on_hovered_detection_starts_tracking() {
        let (mut engine, init_log) = engine_with(
            test_config(),
            vec![vec![det(100, 100, 50, 50)]],
            Some(0.9),
            None,
        );

        let outcome = engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();

        assert_eq!(outcome.status, TickStatus::TrackingStarted);
        assert!(outcome.tracking);
        assert_eq!(outcome.bbox, Some(BBox::new(100, 100, 50, 50)));
        assert_eq!(outcome.tracked_class.as_deref(), Some("car"));
        // The tracker was initialized with the selected box on this frame.
        assert_eq!(init_log.lock().unwrap().as_slice(), &[BBox::new(100, 100, 50, 50)]);
    }

    #[test]
    fn test_click_outside_detections_stays_detecting() {
        let (mut engine, _) = engine_with(
            test_config(),
            vec![vec![det(100, 100, 50, 50)]],
            Some(0.9),
            None,
        );

        let outcome = engine
            .process(&frame(), Some((400, 400)), Some((400, 400)), None)
            .unwrap();

        assert_eq!(outcome.status, TickStatus::Detecting);
        assert!(!outcome.tracking);
        assert!(outcome.bbox.is_none());
    }

    #[test]
    fn test_hover_without_click_reports_index() {
        let (mut engine, _) = engine_with(
            test_config(),
            vec![vec![det(0, 0, 20, 20), det(100, 100, 50, 50)]],
            Some(0.9),
            None,
        );

        let outcome = engine.process(&frame(), Some((120, 120)), None, None).unwrap();
        assert_eq!(outcome.hovered, Some(1));
        assert!(!outcome.tracking);
    }

    #[test]
    fn test_detection_frame_skip_reuses_results() {
        let config = EngineConfig {
            detection_frame_skip: 1,
            ..test_config()
        };
        // Script: first call one box, later calls empty. With skip=1 the
        // detector must not run on every frame, so the box persists on the
        // reused tick.
        let (mut engine, _) = engine_with(
            config,
            vec![vec![det(100, 100, 50, 50)], vec![]],
            Some(0.9),
            None,
        );

        // Tick 1 (frame_count=1, 1 % 2 != 0 but no results yet -> detect).
        let outcome = engine.process(&frame(), Some((120, 120)), None, None).unwrap();
        assert_eq!(outcome.hovered, Some(0));

        // Tick 2 runs the detector (2 % 2 == 0) -> empty results.
        let outcome = engine.process(&frame(), Some((120, 120)), None, None).unwrap();
        assert_eq!(outcome.hovered, None);

        // Tick 3 reuses the empty results rather than detecting again.
        let outcome = engine.process(&frame(), Some((120, 120)), None, None).unwrap();
        assert_eq!(outcome.hovered, None);
    }

    #[test]
    fn test_tracker_loss_returns_to_detecting() {
        let (mut engine, _) = engine_with(
            EngineConfig {
                redetect_interval: 100,
                ..test_config()
            },
            vec![vec![det(100, 100, 50, 50)]],
            Some(0.9),
            Some(1),
        );

        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();
        // First update succeeds.
        let outcome = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(outcome.status, TickStatus::Tracking);
        // Second update fails: acquisition lost, back to Detecting.
        let outcome = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(outcome.status, TickStatus::AcquisitionLost);
        assert!(!outcome.tracking);
        assert!(!engine.is_tracking());
    }

    #[test]
    fn test_stop_command_resets_to_detecting() {
        let (mut engine, _) = engine_with(
            test_config(),
            vec![vec![det(100, 100, 50, 50)]],
            Some(0.9),
            None,
        );
        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();
        assert!(engine.is_tracking());

        let outcome = engine
            .process(&frame(), None, None, Some(RouterCommand::StopTracking))
            .unwrap();
        assert!(!outcome.tracking);
        assert!(!engine.is_tracking());
    }

    #[test]
    fn test_drift_consensus_realigns_tracker() {
        // Low tracker confidence so correction always runs; correction every
        // tracking tick.
        let config = EngineConfig {
            history_size: 3,
            ..test_config()
        };
        // Selection tick uses script[0]; three correction passes see slightly
        // shifted detections of the same class.
        let script = vec![
            vec![det(100, 100, 50, 50)],
            vec![det(105, 105, 50, 50)],
            vec![det(107, 103, 50, 52)],
            vec![det(103, 107, 48, 50)],
        ];
        let (mut engine, init_log) = engine_with(config, script, Some(0.30), None);

        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();

        let outcome = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(outcome.status, TickStatus::Tracking);
        let outcome = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(outcome.status, TickStatus::Tracking);

        // History full on the third pass: mean is (105, 105, 49, 50), IoU
        // against (100, 100, 50, 50) is ~0.69 > 0.5, so the tracker is
        // re-initialized at the consensus box.
        let outcome = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(outcome.status, TickStatus::Realigned);
        let expected = BBox::new(105, 105, 49, 50);
        assert_eq!(outcome.bbox, Some(expected));
        assert_eq!(init_log.lock().unwrap().last().copied(), Some(expected));

        // Consensus averaging keeps the realigned area within 50% of the
        // original.
        assert!(expected.area() as f64 <= 1.5 * BBox::new(100, 100, 50, 50).area() as f64);
    }

    #[test]
    fn test_drift_detected_but_rejected() {
        let config = EngineConfig {
            history_size: 3,
            // Accept candidates down to IoU 0.3; the consensus below lands
            // between the candidate and accept thresholds.
            ..test_config()
        };
        let script = vec![
            vec![det(100, 100, 50, 50)],
            vec![det(115, 115, 50, 50)],
            vec![det(117, 113, 50, 50)],
            vec![det(113, 117, 50, 50)],
        ];
        let (mut engine, init_log) = engine_with(config, script, Some(0.30), None);

        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();
        engine.process(&frame(), None, None, None).unwrap();
        engine.process(&frame(), None, None, None).unwrap();

        // Mean (115, 115, 50, 50): IoU ~0.32 vs the tracker box. Above zero,
        // below accept: drift reported, tracker untouched.
        let outcome = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(outcome.status, TickStatus::DriftDetected);
        assert_eq!(outcome.bbox, Some(BBox::new(100, 100, 50, 50)));
        assert_eq!(init_log.lock().unwrap().len(), 1, "no re-init on rejection");
    }

    #[test]
    fn test_disjoint_detections_never_enter_history() {
        let config = EngineConfig {
            history_size: 3,
            ..test_config()
        };
        let script = vec![
            vec![det(100, 100, 50, 50)],
            vec![det(300, 300, 50, 50)],
        ];
        let (mut engine, init_log) = engine_with(config, script, Some(0.30), None);

        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();
        for _ in 0..5 {
            let outcome = engine.process(&frame(), None, None, None).unwrap();
            // Candidate IoU is zero, below MIN_DETECTION_IOU: the history
            // holds only misses, so no consensus ever forms.
            assert_eq!(outcome.status, TickStatus::Tracking);
        }
        assert_eq!(init_log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_confident_tracker_skips_correction() {
        let config = EngineConfig {
            history_size: 3,
            ..test_config()
        };
        let script = vec![
            vec![det(100, 100, 50, 50)],
            vec![det(105, 105, 50, 50)],
        ];
        // Confidence at the skip threshold: correction never runs, so no
        // realignment can happen no matter how many ticks pass.
        let (mut engine, init_log) = engine_with(config, script, Some(0.5), None);

        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();
        for _ in 0..6 {
            let outcome = engine.process(&frame(), None, None, None).unwrap();
            assert_eq!(outcome.status, TickStatus::Tracking);
        }
        assert_eq!(init_log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_csrt_without_confidence_still_corrects() {
        // confidence None never short-circuits: realignment happens as in
        // the consensus test.
        let config = EngineConfig {
            history_size: 3,
            ..test_config()
        };
        let script = vec![
            vec![det(100, 100, 50, 50)],
            vec![det(105, 105, 50, 50)],
            vec![det(105, 105, 50, 50)],
            vec![det(105, 105, 50, 50)],
        ];
        let (mut engine, _) = engine_with(config, script, None, None);

        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();
        engine.process(&frame(), None, None, None).unwrap();
        engine.process(&frame(), None, None, None).unwrap();
        let outcome = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(outcome.status, TickStatus::Realigned);
    }

    #[test]
    fn test_tracker_frame_skip_reuses_cached_render() {
        let config = EngineConfig {
            tracker_frame_skip: 1,
            redetect_interval: 100,
            ..test_config()
        };
        let (mut engine, _) = engine_with(
            config,
            vec![vec![det(100, 100, 50, 50)]],
            Some(0.9),
            None,
        );

        // Selection on tick 1.
        engine
            .process(&frame(), Some((120, 120)), Some((120, 120)), None)
            .unwrap();
        // Tick 2 runs the tracker (2 % 2 == 0), tick 3 reuses.
        let updated = engine.process(&frame(), None, None, None).unwrap();
        let reused = engine.process(&frame(), None, None, None).unwrap();
        assert_eq!(updated.bbox, reused.bbox);
        assert_eq!(reused.status, TickStatus::Tracking);
        assert_eq!(updated.frame.data, reused.frame.data);
    }

    #[test]
    fn test_mean_bbox_truncates() {
        let mean = mean_bbox(&[
            BBox::new(105, 105, 50, 50),
            BBox::new(107, 103, 50, 52),
            BBox::new(103, 107, 48, 50),
        ]);
        assert_eq!(mean, BBox::new(105, 105, 49, 50));
    }
}
