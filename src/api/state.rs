use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::coordinator::{Coordinator, InMemoryFlowStore};
use crate::models::Step;
use crate::recording::RecordingSession;

/// WebSocket event types broadcast to clients watching a recording.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// Full timeline broadcast, spec.md §6 `timeline_update`.
    Timeline { session_id: String, steps: Vec<Step> },
    Status { session_id: String, status: String },
    Error { session_id: String, error: String },
    Pong,
}

/// Outcome of the background browser launch a recording start kicks off.
/// The Coordinator's own status machine (spec.md §4.2.1) only exists once
/// the browser is up, so launch failures need a place to live before that.
#[derive(Debug, Clone)]
pub enum LaunchStatus {
    Initializing,
    Ready,
    Error(String),
}

/// One browser + its Coordinator, keyed by session id in `AppState`.
pub struct ActiveRecording {
    pub recording: Arc<RecordingSession>,
    pub start_url: String,
    pub client_id: Option<String>,
    pub launch_status: LaunchStatus,
}

/// Shared application state: one sidecar process, any number of HTTP/WS
/// clients, at most one active recording at a time (enforced by
/// `recording_lock` exactly like the teacher's: prevents the race where two
/// browsers get launched concurrently).
pub struct AppState {
    /// Active and just-launching recording sessions, keyed by session id.
    pub recordings: DashMap<String, ActiveRecording>,

    /// Broadcast channel for WebSocket events.
    pub ws_broadcast: broadcast::Sender<WsEvent>,

    /// Serializes `start_recording` calls so at most one browser launch is
    /// in flight at a time.
    pub recording_lock: Mutex<()>,
}

impl AppState {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            recordings: DashMap::new(),
            ws_broadcast: tx,
            recording_lock: Mutex::new(()),
        }
    }

    pub fn broadcast(&self, event: WsEvent) {
        let _ = self.ws_broadcast.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.ws_broadcast.subscribe()
    }

    /// Build a fresh `RecordingSession` backed by an in-memory `FlowStore`.
    /// A real deployment swaps the store for one that actually persists
    /// (spec.md §1 non-goals: storage is an external collaborator).
    pub fn new_recording_session() -> RecordingSession {
        let coordinator = Arc::new(Coordinator::new(Arc::new(InMemoryFlowStore::new())));
        RecordingSession::new(coordinator)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
