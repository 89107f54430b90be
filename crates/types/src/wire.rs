// crates/types/src/wire.rs
//! WebSocket wire frames.
//!
//! Every frame is a JSON object `{type, data}`. Server frames are produced by
//! the fan-out layer from Registry deltas plus per-client snapshots; the only
//! client frame is `select_session`.

use crate::{Agent, Message, Session, Task};
use serde::{Deserialize, Serialize};

/// One row of the `sessions_list` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub project_name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default)]
    pub is_team: bool,
    pub last_activity: i64,
    /// Count of agents visible for this session (membership filter).
    pub agent_count: usize,
    /// Whether this is the receiving client's selected session.
    pub active: bool,
}

/// Complete view of one session, sent on connect and on session switch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub session_name: String,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub messages: Vec<Message>,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    SessionsList { sessions: Vec<SessionSummary> },
    FullState(FullState),
    SessionStarted(Session),
    SessionEnded {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    AgentAdded(Agent),
    AgentUpdate(Agent),
    AgentRemoved {
        id: String,
    },
    TaskUpdate(Task),
    NewMessage(Message),
}

impl ServerFrame {
    /// Snapshot frames survive backpressure; incremental deltas are dropped
    /// first when a client's send queue fills.
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            ServerFrame::SessionsList { .. } | ServerFrame::FullState(_)
        )
    }
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    SelectSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}
