//! End-to-end pipeline test at the channel level: synchronized frames
//! through selection, tracking, geolocation, follow planning and trail
//! recording.
//!
//! Run with: cargo test --test target_follow_pipeline

use std::time::Instant;

use engine::{EngineConfig, FrameEngine, InteractionRouter, TickStatus};
use follow::{FollowConfig, FollowPlanner, RecorderConfig, TrailRecorder};
use geo::{CameraModel, NadirProjector, Projector};
use store::{MemoryStore, ObjectStore};
use sync::{SyncConfig, Synchronizer};
use types::{
    DroneCommand, Frame, TargetFix, TelemetrySample, TrackStatus, UiEvent,
};

mod common;

use common::{detection, HoldingTrackerFactory, ScriptedDetector};

fn telemetry(ts: f64) -> TelemetrySample {
    TelemetrySample {
        ts,
        lat: 51.0,
        lon: -114.0,
        alt_agl: 100.0,
        vn: 2.0,
        ve: 0.0,
        heading_deg: 0.0,
        ..Default::default()
    }
}

fn frame(seq: u64, capture_ts: f64) -> Frame {
    let mut frame = Frame::black(640, 480);
    frame.seq = seq;
    frame.capture_ts = capture_ts;
    frame
}

fn pipeline_engine() -> FrameEngine {
    let config = EngineConfig {
        detection_frame_skip: 0,
        tracker_frame_skip: 0,
        redetect_interval: 100,
        ..Default::default()
    };
    FrameEngine::new(
        config,
        Box::new(ScriptedDetector::new(vec![vec![detection(300, 220, 40, 40)]])),
        Box::new(HoldingTrackerFactory::default()),
    )
}

#[test]
fn test_select_track_geolocate_follow() {
    let mut synchronizer = Synchronizer::new(SyncConfig::default());
    let mut engine = pipeline_engine();
    let router = InteractionRouter::new();
    let projector = Projector::Nadir(NadirProjector::new(CameraModel::new(73.7, 640, 480)));
    let mut planner = FollowPlanner::new(FollowConfig::default());

    // Telemetry arrives, then a frame captured 30 ms later.
    synchronizer.push_telemetry(telemetry(100.00));
    synchronizer.push_telemetry(telemetry(100.10));
    let synced = synchronizer.attach(frame(1, 100.13));
    let sample = synced.telemetry.expect("telemetry within the skew window");
    assert!((synced.sync_skew_ms.unwrap() - 30.0).abs() < 1e-6);

    // Operator hovers and clicks the detection.
    router.handle_event(UiEvent::MouseMove { x: 320, y: 240 });
    router.handle_event(UiEvent::Click { x: 320, y: 240 });

    let outcome = engine
        .process(
            &synced.frame,
            router.cursor_pos(),
            router.take_pending_click(),
            router.take_pending_command(),
        )
        .unwrap();
    assert_eq!(outcome.status, TickStatus::TrackingStarted);
    let bbox = outcome.bbox.unwrap();

    // Geolocate the bbox center (center-origin signed offsets).
    let (center_x, center_y) = bbox.center();
    let (lat, lon) = projector
        .locate(
            &sample,
            center_x - synced.frame.width as f64 / 2.0,
            center_y - synced.frame.height as f64 / 2.0,
        )
        .unwrap();
    // The box sits at the image center, so the target is the drone position.
    assert!((lat - 51.0).abs() < 1e-6);
    assert!((lon - -114.0).abs() < 1e-6);

    // The follow planner turns the fix into exactly one waypoint per window.
    let status = TrackStatus {
        tracking: true,
        tracked_class: outcome.tracked_class.clone(),
        target: Some(TargetFix { lat, lon, ts: 100.13 }),
    };
    let now = Instant::now();
    let command = planner.plan(now, 100.2, &status).unwrap();
    match command {
        DroneCommand::MoveToLocation { location } => {
            assert!((location.lat - lat).abs() < 1e-9);
            assert_eq!(location.alt, 15.0);
        }
        other => panic!("expected waypoint, got {other:?}"),
    }
    assert!(
        planner
            .plan(now + std::time::Duration::from_millis(500), 100.7, &status)
            .is_none(),
        "second waypoint inside the tick window"
    );
}

#[test]
fn test_no_waypoint_while_detecting() {
    let mut engine = pipeline_engine();
    let mut planner = FollowPlanner::new(FollowConfig::default());

    // No click: the engine stays in Detecting.
    let outcome = engine.process(&frame(1, 100.0), None, None, None).unwrap();
    assert!(!outcome.tracking);

    let status = TrackStatus {
        tracking: outcome.tracking,
        tracked_class: None,
        target: Some(TargetFix {
            lat: 51.0,
            lon: -114.0,
            ts: 100.0,
        }),
    };
    assert!(planner.plan(Instant::now(), 100.0, &status).is_none());
}

#[test]
fn test_stale_frame_skips_geolocation() {
    let mut synchronizer = Synchronizer::new(SyncConfig::default());
    synchronizer.push_telemetry(telemetry(100.0));

    // Frame captured 800 ms after the only sample: nothing attaches.
    let synced = synchronizer.attach(frame(1, 100.8));
    assert!(synced.telemetry.is_none());
    assert_eq!(synchronizer.no_telemetry_count(), 1);
}

#[tokio::test]
async fn test_recorded_trail_commits_to_store() {
    let mut recorder = TrailRecorder::new(RecorderConfig::default());
    let store = MemoryStore::new();

    recorder.start();
    for tick in 0..100 {
        recorder.observe(&telemetry(100.0 + tick as f64), true);
    }
    let object = recorder.stop(Some("car")).expect("points recorded");
    assert_eq!(object.positions.len(), 10);

    store.put(&object).await.unwrap();
    recorder.clear();

    let summaries = store.scan().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].classification, "car");
    assert!(summaries[0].timestamp.is_some());

    let fetched = store.get(object.object_id).await.unwrap();
    assert_eq!(fetched.positions.len(), 10);
    // Recorded speed comes straight from the telemetry velocities.
    assert!((fetched.positions[0].speed - 2.0).abs() < 1e-9);
}

#[test]
fn test_stop_tracking_event_round_trip() {
    let mut engine = pipeline_engine();
    let router = InteractionRouter::new();

    router.handle_event(UiEvent::MouseMove { x: 320, y: 240 });
    router.handle_event(UiEvent::Click { x: 320, y: 240 });
    let outcome = engine
        .process(
            &frame(1, 100.0),
            router.cursor_pos(),
            router.take_pending_click(),
            router.take_pending_command(),
        )
        .unwrap();
    assert!(outcome.tracking);

    // UI asks to stop; the next tick is back in Detecting.
    router.handle_event(UiEvent::StopTracking);
    let outcome = engine
        .process(
            &frame(2, 100.1),
            router.cursor_pos(),
            router.take_pending_click(),
            router.take_pending_command(),
        )
        .unwrap();
    assert!(!outcome.tracking);
}
