use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::coordinator::{constants::TIMELINE_RETAIN, Status};
use crate::models::{
    GenericResponse, RecordingOptions, SessionStatusResponse, StartRecordingRequest,
    StartRecordingResponse, StopRecordingResponse, Viewport,
};

use super::super::state::{ActiveRecording, AppState, LaunchStatus, WsEvent};

type HandlerError = (StatusCode, String);

fn not_found(session_id: &str) -> HandlerError {
    (StatusCode::NOT_FOUND, format!("Recording session not found: {}", session_id))
}

/// Start a new browser recording session (spec.md §4.3.3).
///
/// Returns immediately with status "initializing" and launches the browser
/// in the background; pollers should watch `get_recording_status` until it
/// reports "recording" or "error".
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRecordingRequest>,
) -> Result<Json<StartRecordingResponse>, HandlerError> {
    // Hold the lock across the launch so two concurrent starts can't race
    // into two browsers; spec.md's Coordinator is a singleton session.
    let _recording_guard = state.recording_lock.lock().await;

    let existing: Vec<String> = state.recordings.iter().map(|r| r.key().clone()).collect();
    for session_id in existing {
        if let Some((_, active)) = state.recordings.remove(&session_id) {
            tracing::warn!("Cancelling existing recording session: {}", session_id);
            let _ = active.recording.cancel().await;
        }
    }

    let session_id = Uuid::new_v4().to_string();
    let start_url = request.start_url.clone().unwrap_or_else(|| "about:blank".to_string());
    let recording = Arc::new(AppState::new_recording_session());

    state.recordings.insert(
        session_id.clone(),
        ActiveRecording {
            recording: Arc::clone(&recording),
            start_url: start_url.clone(),
            client_id: request.client_id.clone(),
            launch_status: LaunchStatus::Initializing,
        },
    );

    tracing::info!("Created recording session {} (initializing) for {}", session_id, start_url);

    let state_clone = Arc::clone(&state);
    let sid = session_id.clone();
    let headless = request.headless;
    let viewport = Some(Viewport {
        width: request.viewport_width,
        height: request.viewport_height,
    });
    let options = RecordingOptions {
        id: None,
        name: request.name.clone(),
        description: request.description.clone(),
    };

    tokio::spawn(async move {
        match recording.start(Some(start_url.as_str()), headless, viewport, options).await {
            Ok(_session_id) => {
                if let Some(mut active) = state_clone.recordings.get_mut(&sid) {
                    active.launch_status = LaunchStatus::Ready;
                }
                tracing::info!("Recording session {} is now active", sid);
                state_clone.broadcast(WsEvent::Status {
                    session_id: sid.clone(),
                    status: "recording".to_string(),
                });

                let mut timeline_rx = recording.subscribe_timeline();
                let ws_broadcast = state_clone.ws_broadcast.clone();
                let sid_inner = sid.clone();
                tokio::spawn(async move {
                    while let Ok(steps) = timeline_rx.recv().await {
                        let retained: Vec<_> =
                            steps.iter().rev().take(TIMELINE_RETAIN).rev().cloned().collect();
                        let _ = ws_broadcast.send(WsEvent::Timeline {
                            session_id: sid_inner.clone(),
                            steps: retained,
                        });
                    }
                });
            }
            Err(e) => {
                tracing::error!("Failed to start recording session {}: {}", sid, e);
                if let Some(mut active) = state_clone.recordings.get_mut(&sid) {
                    active.launch_status = LaunchStatus::Error(e.to_string());
                }
                state_clone.broadcast(WsEvent::Error {
                    session_id: sid.clone(),
                    error: e.to_string(),
                });
            }
        }
    });

    Ok(Json(StartRecordingResponse {
        session_id,
        status: "initializing".to_string(),
    }))
}

pub async fn pause_recording(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<GenericResponse>, HandlerError> {
    let active = state.recordings.get(&session_id).ok_or_else(|| not_found(&session_id))?;
    active
        .recording
        .pause()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(GenericResponse { status: "paused".to_string() }))
}

pub async fn resume_recording(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<GenericResponse>, HandlerError> {
    let active = state.recordings.get(&session_id).ok_or_else(|| not_found(&session_id))?;
    active
        .recording
        .resume()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(GenericResponse { status: "recording".to_string() }))
}

/// Stop a recording session and drain the stop barrier (spec.md §4.3.4).
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<StopRecordingResponse>, HandlerError> {
    let (_, active) = state.recordings.remove(&session_id).ok_or_else(|| not_found(&session_id))?;

    let (flow, ack) = active
        .recording
        .stop()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(
        "Stopped recording session {}: ack={}, steps={}",
        session_id,
        ack.ack,
        flow.steps.len()
    );

    Ok(Json(StopRecordingResponse {
        ack: ack.ack,
        stats: ack.stats,
        flow,
    }))
}

/// Cancel a recording session without running the stop barrier or saving.
pub async fn cancel_recording(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<GenericResponse>, HandlerError> {
    let (_, active) = state.recordings.remove(&session_id).ok_or_else(|| not_found(&session_id))?;

    active
        .recording
        .cancel()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!("Cancelled recording session {}", session_id);
    Ok(Json(GenericResponse { status: "cancelled".to_string() }))
}

/// Poll the status of a recording session.
///
/// Returns "initializing" while the browser is still launching, the
/// Coordinator's own status once it's up ("recording"/"paused"/"stopping"),
/// or "error" if the launch failed.
pub async fn get_recording_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, HandlerError> {
    let active = state.recordings.get(&session_id).ok_or_else(|| not_found(&session_id))?;

    let (status, error) = match &active.launch_status {
        LaunchStatus::Initializing => ("initializing".to_string(), None),
        LaunchStatus::Error(e) => ("error".to_string(), Some(e.clone())),
        LaunchStatus::Ready => {
            let status = match active.recording.status().await {
                Status::Idle => "idle",
                Status::Recording => "recording",
                Status::Paused => "paused",
                Status::Stopping => "stopping",
            };
            (status.to_string(), None)
        }
    };

    let step_count = active.recording.step_count().await;

    Ok(Json(SessionStatusResponse {
        session_id: session_id.clone(),
        status,
        step_count,
        error,
    }))
}
