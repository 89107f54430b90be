// crates/types/src/agent.rs
//! The `Agent` record and its enums.
//!
//! An agent is any logical actor we observe: a solo session's main agent, a
//! team member, or a subagent spawned via a `Task` tool call. The Registry is
//! the only writer; everyone else holds ids.

use serde::{Deserialize, Serialize};

/// Cap on the per-agent recent-action ring buffer.
pub const MAX_RECENT_ACTIONS: usize = 5;

/// Coarse role bucket, inferred from agent type/name substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Lead,
    Researcher,
    Implementer,
    Tester,
    Planner,
}

impl Default for AgentRole {
    fn default() -> Self {
        AgentRole::Implementer
    }
}

/// What the agent is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Done,
}

/// Why an agent is blocked on the user, when `waiting_for_input` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingType {
    Permission,
    Question,
    Plan,
    PlanApproval,
}

/// One entry in the recent-action ring (oldest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentAction {
    pub action: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// A logical actor whose activity we observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Opaque id: the session UUID for solo agents, the host-assigned
    /// agent id for subagents, the configured member id for team agents.
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub waiting_for_input: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_type: Option<WaitingType>,
    /// Human label for the current activity ("Editing main.rs").
    pub current_action: String,
    /// Secondary context line shown under the action.
    pub action_context: String,
    pub tasks_completed: u32,
    /// Ring buffer of the last few working actions, oldest first, len ≤ 5.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_actions: Vec<RecentAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ahead: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_behind: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_upstream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_dirty: Option<bool>,
    #[serde(default)]
    pub is_subagent: bool,
    /// Set iff `is_subagent`; references the parent session's main agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

impl Agent {
    /// Create an idle agent with empty action fields.
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            status: AgentStatus::Idle,
            waiting_for_input: false,
            waiting_type: None,
            current_action: String::new(),
            action_context: String::new(),
            tasks_completed: 0,
            recent_actions: Vec::new(),
            current_task_id: None,
            git_branch: None,
            worktree_path: None,
            git_ahead: None,
            git_behind: None,
            has_upstream: None,
            git_dirty: None,
            is_subagent: false,
            parent_agent_id: None,
            subagent_type: None,
            team_name: None,
        }
    }

    /// Set the status, maintaining the invariant that idle/done agents are
    /// never waiting for input.
    pub fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        if matches!(status, AgentStatus::Idle | AgentStatus::Done) {
            self.waiting_for_input = false;
            self.waiting_type = None;
        }
    }

    /// Append to the recent-action ring, trimming to `MAX_RECENT_ACTIONS`.
    pub fn push_recent_action(&mut self, action: &str, timestamp: i64) {
        if action.is_empty() {
            return;
        }
        self.recent_actions.push(RecentAction {
            action: action.to_string(),
            timestamp,
        });
        if self.recent_actions.len() > MAX_RECENT_ACTIONS {
            let excess = self.recent_actions.len() - MAX_RECENT_ACTIONS;
            self.recent_actions.drain(..excess);
        }
    }
}
