// crates/types/src/delta.rs
//! Typed deltas emitted by the Registry.
//!
//! One delta per mutation. The WebSocket layer filters these per client
//! (session membership) and maps them onto wire frames; `TaskRemoved` and
//! `SessionsListChanged` are internal-only and never map to a frame directly.

use crate::{Agent, Message, Session, Task};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Delta {
    AgentAdded(Agent),
    AgentUpdated(Agent),
    AgentRemoved {
        id: String,
    },
    TaskUpdated(Task),
    /// Internal: clients learn of removals via the next snapshot.
    TaskRemoved {
        id: String,
    },
    NewMessage(Message),
    SessionStarted(Session),
    SessionEnded {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// The set or ordering of sessions changed (activity bump, selection
    /// change); each client recomputes its own sessions list.
    SessionsListChanged,
    /// Server-global selection moved to a new session (or cleared).
    SelectionChanged {
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
    },
}
