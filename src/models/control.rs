use serde::{Deserialize, Serialize};

use super::step::{Step, VariableDef};

/// Messages the coordinator sends down to a tab's content recorder.
///
/// The source this crate's design is modeled on dispatches these by a typed
/// `action` string; per the accompanying design notes that maps more
/// naturally onto a tagged-variant discriminator than onto open strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlMessage {
    Start {
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        session_id: String,
    },
    Pause,
    Resume,
    Stop {
        session_id: String,
        require_ack: bool,
    },
    TimelineUpdate {
        steps: Vec<Step>,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopStats {
    pub steps: usize,
    pub variables: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAck {
    pub ack: bool,
    pub stats: StopStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongReply {
    pub status: String,
}

impl Default for PongReply {
    fn default() -> Self {
        Self { status: "pong".to_string() }
    }
}

/// Messages a tab's content recorder sends up to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataMessage {
    Steps { steps: Vec<Step> },
    Variables { variables: Vec<VariableDef> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Default for Ack {
    fn default() -> Self {
        Self { ok: true }
    }
}

/// Start metadata accepted by `SessionCoordinator::start_recording`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingOptions {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}
