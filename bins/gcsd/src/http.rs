//! HTTP and WebSocket surface: REST endpoints, the UI channel at /ws/gcs,
//! and WebRTC signaling at /offer.

use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bridge::UiHub;
use engine::InteractionRouter;
use follow::TrailRecorder;
use futures_util::{SinkExt, StreamExt};
use rtc::PeerManager;
use serde::Deserialize;
use store::ObjectStore;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use types::{DroneCommand, FlightMode, TrackStatus, UiEvent};
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub ui_hub: Arc<UiHub>,
    pub router: Arc<InteractionRouter>,
    pub recorder: Arc<Mutex<TrailRecorder>>,
    pub command_tx: mpsc::Sender<DroneCommand>,
    pub status_rx: watch::Receiver<TrackStatus>,
    pub peers: Arc<PeerManager>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/objects", get(list_objects))
        .route("/delete/object/:id", delete(delete_object))
        .route("/recording", post(toggle_recording))
        .route("/setFlightMode", post(set_flight_mode))
        .route("/setFollowDistance", post(set_follow_distance))
        .route("/stopFollowing", post(stop_following))
        .route("/ws/gcs", get(ws_gcs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Signaling runs on its own port so the video path can be exposed
/// separately from the control surface.
pub fn signaling_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/offer", post(webrtc_offer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn internal_error(detail: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "detail": detail })),
    )
        .into_response()
}

async fn list_objects(State(state): State<Arc<AppState>>) -> Response {
    match state.store.scan().await {
        Ok(objects) => Json(objects).into_response(),
        Err(e) => {
            error!(error = %e, "object scan failed");
            internal_error(format!("failed to retrieve objects: {e}"))
        }
    }
}

async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.delete(id).await {
        Ok(()) => Json(serde_json::json!({ "status": 200 })).into_response(),
        Err(e) => {
            error!(error = %e, %id, "object delete failed");
            internal_error("failed to delete object".to_string())
        }
    }
}

async fn toggle_recording(State(state): State<Arc<AppState>>) -> Response {
    let is_recording = state
        .recorder
        .lock()
        .expect("recorder poisoned")
        .is_recording();

    if !is_recording {
        state.recorder.lock().expect("recorder poisoned").start();
        return Json(serde_json::json!({ "is_recording": true })).into_response();
    }

    let classification = state.status_rx.borrow().tracked_class.clone();
    let object = state
        .recorder
        .lock()
        .expect("recorder poisoned")
        .stop(classification.as_deref());

    if let Some(object) = object {
        if let Err(e) = state.store.put(&object).await {
            // The recorder keeps its buffer so the caller can retry.
            error!(error = %e, "recording commit failed");
            return internal_error(format!("failed to save recording data: {e}"));
        }
        state.recorder.lock().expect("recorder poisoned").clear();
    }
    Json(serde_json::json!({ "is_recording": false })).into_response()
}

#[derive(Deserialize)]
struct SetFlightModeBody {
    mode: FlightMode,
}

async fn set_flight_mode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetFlightModeBody>,
) -> Response {
    info!(mode = body.mode.name(), "flight mode requested");
    match state
        .command_tx
        .send(DroneCommand::SetFlightMode { mode: body.mode })
        .await
    {
        Ok(()) => Json(serde_json::json!({
            "status": 200,
            "message": format!("Flight mode set to {}", body.mode.name()),
        }))
        .into_response(),
        Err(e) => internal_error(format!("failed to set flight mode: {e}")),
    }
}

#[derive(Deserialize)]
struct SetFollowDistanceBody {
    distance: f64,
}

async fn set_follow_distance(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetFollowDistanceBody>,
) -> Response {
    match state
        .command_tx
        .send(DroneCommand::SetFollowDistance {
            distance: body.distance,
        })
        .await
    {
        Ok(()) => Json(serde_json::json!({
            "status": 200,
            "message": format!("Follow distance set to {} meters", body.distance),
        }))
        .into_response(),
        Err(e) => internal_error(format!("failed to set follow distance: {e}")),
    }
}

async fn stop_following(State(state): State<Arc<AppState>>) -> Response {
    // Reset the engine through the interaction router, then tell the drone.
    state.router.handle_event(UiEvent::StopTracking);
    match state.command_tx.send(DroneCommand::StopFollowing).await {
        Ok(()) => Json(serde_json::json!({
            "status": 200,
            "message": "Stopped following the target.",
        }))
        .into_response(),
        Err(e) => internal_error(format!("failed to stop following: {e}")),
    }
}

async fn ws_gcs(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ui_socket(socket, state))
}

async fn handle_ui_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("ui client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut outgoing = state.ui_hub.subscribe();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<UiEvent>(&text) {
                Ok(event) => state.router.handle_event(event),
                Err(_) => debug!("unrecognized ui frame skipped"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    info!("ui client disconnected");
}

async fn webrtc_offer(
    State(state): State<Arc<AppState>>,
    Json(offer): Json<RTCSessionDescription>,
) -> Response {
    match state.peers.handle_offer(offer).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => {
            warn!(error = %e, "webrtc offer failed");
            internal_error(format!("offer failed: {e}"))
        }
    }
}
