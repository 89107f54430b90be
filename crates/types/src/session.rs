// crates/types/src/session.rs
//! The `Session` record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Synthetic session id for a team workspace.
pub fn team_session_id(team_name: &str) -> String {
    format!("team:{team_name}")
}

/// A host-side conversation instance (solo) or team workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// UUID from the transcript filename, or `team:<name>` for teams.
    pub session_id: String,
    pub project_name: String,
    pub project_path: String,
    /// Directory slug (first path segment below the projects root).
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default)]
    pub is_team: bool,
    /// Unix milliseconds; only ever advances within a session's lifetime.
    pub last_activity: i64,
    /// For team sessions: inner hook-session UUID → team-agent id. Hooks
    /// report events with the JSONL UUID; this maps them back to the
    /// configured member.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub agent_id_map: HashMap<String, String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            project_name: project_name.into(),
            project_path: String::new(),
            slug: String::new(),
            git_branch: None,
            team_name: None,
            is_team: false,
            last_activity: 0,
            agent_id_map: HashMap::new(),
        }
    }

    /// Advance `last_activity`. Monotonic: a stale timestamp never rewinds it.
    pub fn touch(&mut self, now_ms: i64) {
        if now_ms > self.last_activity {
            self.last_activity = now_ms;
        }
    }
}
