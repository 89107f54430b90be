// crates/server/src/hooks.rs
//! Hook ingestion: `POST /api/hook`.
//!
//! The host fires lifecycle callbacks during tool invocations, permission
//! prompts, subagent spawns, and turn boundaries. Each event runs a common
//! preamble (validation, session→agent resolution, activity bump, lazy
//! registration, git probing) and then dispatches on the event name.
//!
//! Hooks are the authoritative status source while active: every event
//! stamps the hook-active guard, which the transcript watcher consults
//! before applying JSONL-derived status.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use serde_json::Value;

use agent_town_core::describe_tool_action;
use agent_town_core::roles::infer_role;
use agent_town_types::{
    team_session_id, Agent, AgentRole, AgentStatus, Message, Session, Task, TaskStatus,
    WaitingType,
};

use crate::auth::{authorize, token_from_query};
use crate::error::ApiError;
use crate::state::AppState;
use crate::util::now_ms;

/// Pending spawns older than this are garbage-collected.
const PENDING_SPAWN_TTL_MS: i64 = 60_000;

/// Delay before a stopped subagent is removed from the registry.
const SUBAGENT_REMOVE_DELAY: Duration = Duration::from_secs(15);

/// Cap on the prompt excerpt carried in a pending spawn.
const PROMPT_EXCERPT_CHARS: usize = 80;

/// The closed set of accepted hook event names.
const KNOWN_EVENTS: &[&str] = &[
    "PreToolUse",
    "PostToolUse",
    "PostToolUseFailure",
    "PermissionRequest",
    "SubagentStart",
    "SubagentStop",
    "PreCompact",
    "Stop",
    "SessionStart",
    "SessionEnd",
    "TeammateIdle",
    "TaskCompleted",
    "UserPromptSubmit",
    "Notification",
];

/// A `Task` tool call waiting for its `SubagentStart`.
#[derive(Debug, Clone)]
pub struct PendingSpawn {
    pub tool_use_id: String,
    pub session_id: String,
    pub description: Option<String>,
    /// First line of the task prompt, capped at 80 chars.
    pub prompt: Option<String>,
    pub subagent_type: Option<String>,
    pub team_name: Option<String>,
    pub created_at: i64,
}

/// Wire payload of a hook event. Everything except the event name and the
/// session id is optional; `tool_input` and `tool_response` are duck-typed
/// property bags.
#[derive(Debug, Default, Deserialize)]
pub struct HookPayload {
    pub hook_event_name: Option<String>,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_response: Option<Value>,
    pub tool_use_id: Option<String>,
    pub agent_id: Option<String>,
    pub agent_type: Option<String>,
    pub teammate_name: Option<String>,
    pub team_name: Option<String>,
    pub task_id: Option<String>,
    pub task_subject: Option<String>,
    pub permission_mode: Option<String>,
    pub source: Option<String>,
    pub model: Option<String>,
    pub is_interrupt: Option<bool>,
    pub message: Option<String>,
    pub notification_type: Option<String>,
    pub prompt: Option<String>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/hook", post(handle_hook))
}

async fn handle_hook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    Json(payload): Json<HookPayload>,
) -> Result<Json<Value>, ApiError> {
    let query_token = query.as_deref().and_then(token_from_query);
    if !authorize(state.auth_token.as_deref(), &headers, query_token.as_deref()) {
        return Err(ApiError::Unauthorized);
    }

    let event = payload
        .hook_event_name
        .as_deref()
        .ok_or_else(|| ApiError::validation("missing hook_event_name"))?;
    if !KNOWN_EVENTS.contains(&event) {
        return Err(ApiError::validation(format!("unknown hook event: {event}")));
    }

    let session_id = payload
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("missing session_id"))?;
    if session_id.len() > 256 {
        return Err(ApiError::validation("session_id too long"));
    }
    if let Some(cwd) = payload.cwd.as_deref() {
        if !cwd.starts_with('/') {
            return Err(ApiError::validation("cwd must be absolute"));
        }
    }

    let agent_id = preamble(&state, &payload, event, session_id);

    tracing::debug!(
        session_id = %session_id,
        agent_id = %agent_id,
        event = %event,
        tool = payload.tool_name.as_deref().unwrap_or(""),
        "hook event"
    );

    match event {
        "PreToolUse" => on_pre_tool_use(&state, &payload, session_id, &agent_id),
        "PostToolUse" => on_post_tool_use(&state, &payload, session_id, &agent_id),
        "PostToolUseFailure" => on_post_tool_use_failure(&state, &payload, &agent_id),
        "PermissionRequest" => on_permission_request(&state, &payload, &agent_id),
        "SubagentStart" => on_subagent_start(&state, &payload, session_id),
        "SubagentStop" => on_subagent_stop(&state, &payload, session_id, &agent_id),
        "PreCompact" => {
            state.registry.update_agent_activity_by_id(
                &agent_id,
                AgentStatus::Working,
                Some("Compacting conversation..."),
                None,
            );
            state
                .registry
                .set_agent_waiting_by_id(&agent_id, false, None, None, None);
        }
        "Stop" => {
            state
                .registry
                .update_agent_activity_by_id(&agent_id, AgentStatus::Idle, None, None);
            state.guards.mark_session_stopped(session_id);
        }
        "SessionStart" => {
            tracing::info!(session_id = %session_id, source = payload.source.as_deref().unwrap_or(""), "session started");
        }
        "SessionEnd" => {
            tracing::info!(session_id = %session_id, "session ended");
            state
                .registry
                .update_agent_activity_by_id(&agent_id, AgentStatus::Idle, None, None);
        }
        "UserPromptSubmit" => {
            state.guards.clear_session_stopped(session_id);
            state.registry.update_agent_activity_by_id(
                &agent_id,
                AgentStatus::Working,
                Some("Processing prompt..."),
                None,
            );
        }
        "TeammateIdle" => on_teammate_idle(&state, &payload, &agent_id),
        "TaskCompleted" => on_task_completed(&state, &payload),
        "Notification" => on_notification(&state, &payload, &agent_id),
        _ => unreachable!("event validated against KNOWN_EVENTS"),
    }

    apply_plan_mode(&state, &payload, &agent_id);

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Common per-event work before dispatch. Returns the resolved agent id.
fn preamble(state: &Arc<AppState>, payload: &HookPayload, event: &str, session_id: &str) -> String {
    let now = now_ms();
    let agent_id = state.guards.resolve_agent_id(session_id);

    state.registry.update_session_activity(session_id, now);
    state.guards.mark_hook_active(&agent_id);

    // Team members bump their team session too.
    if let Some(agent) = state.registry.get_agent(&agent_id) {
        if let Some(team) = agent.team_name.as_deref() {
            state
                .registry
                .update_session_activity(&team_session_id(team), now);
        }
    }

    if let Some(cwd) = payload.cwd.as_deref() {
        state.record_session_cwd(session_id, cwd);
    }

    // Lazy registration: sessions running before the server started never
    // send a SessionStart we could have seen. Any other non-subagent event
    // on an unknown session materializes a synthetic agent (and session).
    let subagent_event = event == "SubagentStart" || event == "SubagentStop";
    if !subagent_event && state.registry.get_agent(&agent_id).is_none() {
        if let Some(session) = state.registry.get_session(session_id) {
            let name = if session.slug.is_empty() {
                session.project_name.clone()
            } else {
                session.slug.clone()
            };
            let mut agent = Agent::new(&agent_id, name, AgentRole::Implementer);
            agent.status = AgentStatus::Working;
            agent.team_name = session.team_name.clone();
            state.registry.register_agent(agent);
        } else if let Some(cwd) = payload.cwd.as_deref() {
            let project = cwd
                .rsplit('/')
                .find(|s| !s.is_empty())
                .unwrap_or("unknown")
                .to_string();
            let mut session = Session::new(session_id, &project);
            session.project_path = cwd.to_string();
            session.last_activity = now;
            state.registry.add_session(session);
            let mut agent = Agent::new(&agent_id, &project, AgentRole::Implementer);
            agent.status = AgentStatus::Working;
            state.registry.register_agent(agent);
        }
    }

    // First event for a cwd: probe git asynchronously.
    if let Some(cwd) = payload.cwd.as_deref() {
        if state.claim_first_probe(cwd) {
            state.spawn_git_probe(&agent_id, cwd);
        }
    }

    agent_id
}

/// Plan mode: the host is waiting on plan approval unless something else
/// already holds the waiting flag. Applied after dispatch so a handler's
/// routine waiting-clear cannot erase the plan badge it arrived with.
fn apply_plan_mode(state: &Arc<AppState>, payload: &HookPayload, agent_id: &str) {
    if payload.permission_mode.as_deref() != Some("plan") {
        return;
    }
    if let Some(agent) = state.registry.get_agent(agent_id) {
        if !agent.waiting_for_input {
            state.registry.set_agent_waiting_by_id(
                agent_id,
                true,
                None,
                None,
                Some(WaitingType::Plan),
            );
        }
    }
}

// ── event handlers ──────────────────────────────────────────────────

fn on_pre_tool_use(
    state: &Arc<AppState>,
    payload: &HookPayload,
    session_id: &str,
    agent_id: &str,
) {
    state.guards.clear_session_stopped(session_id);

    let tool = payload.tool_name.as_deref().unwrap_or("");
    let empty = Value::Object(Default::default());
    let input = payload.tool_input.as_ref().unwrap_or(&empty);

    if tool == "Task" {
        if let Some(tool_use_id) = payload.tool_use_id.as_deref() {
            let now = now_ms();
            let mut pending = state.pending_spawns.lock().expect("pending spawns poisoned");
            pending.retain(|p| now - p.created_at < PENDING_SPAWN_TTL_MS);
            pending.push(PendingSpawn {
                tool_use_id: tool_use_id.to_string(),
                session_id: session_id.to_string(),
                description: str_field(input, "description"),
                prompt: str_field(input, "prompt").map(|p| first_line_excerpt(&p)),
                subagent_type: str_field(input, "subagent_type"),
                team_name: str_field(input, "team_name"),
                created_at: now,
            });
        }
    }

    let label = describe_tool_action(tool, input);
    state
        .registry
        .set_agent_waiting_by_id(agent_id, false, None, None, None);
    state.registry.update_agent_activity_by_id(
        agent_id,
        AgentStatus::Working,
        Some(&label),
        None,
    );
}

fn on_post_tool_use(
    state: &Arc<AppState>,
    payload: &HookPayload,
    session_id: &str,
    agent_id: &str,
) {
    state
        .registry
        .set_agent_waiting_by_id(agent_id, false, None, None, None);

    let tool = payload.tool_name.as_deref().unwrap_or("");
    let empty = Value::Object(Default::default());
    let input = payload.tool_input.as_ref().unwrap_or(&empty);

    // Git-mutating Bash commands invalidate the status cache and refresh.
    if tool == "Bash" {
        if let Some(cmd) = str_field(input, "command") {
            if is_git_mutation(&cmd) {
                if let Some(cwd) = payload
                    .cwd
                    .clone()
                    .or_else(|| state.session_cwd(session_id))
                {
                    state.git_status.clear(std::path::Path::new(&cwd));
                    state.spawn_git_probe(agent_id, &cwd);
                }
            }
        }
    }

    match tool {
        "SendMessage" => extract_send_message(state, payload, agent_id, input),
        "TeamCreate" => extract_team_create(state, payload, agent_id, input),
        "TeamDelete" => extract_team_delete(state, payload, input),
        "TaskCreate" => extract_task_create(state, payload, input),
        "TaskUpdate" => extract_task_update(state, input),
        _ => {}
    }
}

fn on_post_tool_use_failure(state: &Arc<AppState>, payload: &HookPayload, agent_id: &str) {
    let label = if payload.is_interrupt.unwrap_or(false) {
        "Interrupted".to_string()
    } else {
        let tool = payload.tool_name.as_deref().unwrap_or("");
        let empty = Value::Object(Default::default());
        let input = payload.tool_input.as_ref().unwrap_or(&empty);
        format!("Failed: {}", describe_tool_action(tool, input))
    };
    state.registry.update_agent_activity_by_id(
        agent_id,
        AgentStatus::Working,
        Some(&label),
        None,
    );
}

fn on_permission_request(state: &Arc<AppState>, payload: &HookPayload, agent_id: &str) {
    let tool = payload.tool_name.as_deref().unwrap_or("");
    let empty = Value::Object(Default::default());
    let input = payload.tool_input.as_ref().unwrap_or(&empty);
    let label = describe_tool_action(tool, input);
    state.registry.set_agent_waiting_by_id(
        agent_id,
        true,
        Some(&label),
        None,
        Some(WaitingType::Permission),
    );
}

fn on_subagent_start(state: &Arc<AppState>, payload: &HookPayload, session_id: &str) {
    let Some(subagent_id) = payload.agent_id.as_deref().filter(|s| !s.is_empty()) else {
        tracing::warn!(session_id = %session_id, "SubagentStart without agent_id");
        return;
    };

    // Consume the oldest pending spawn for this session (FIFO) so parallel
    // spawns get distinct descriptions.
    let spawn = {
        let mut pending = state.pending_spawns.lock().expect("pending spawns poisoned");
        let oldest = pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.session_id == session_id)
            .min_by_key(|(idx, p)| (p.created_at, *idx))
            .map(|(idx, _)| idx);
        oldest.map(|idx| pending.remove(idx))
    };

    // A deliberate re-spawn beats the removal guard.
    state.guards.clear_recently_removed(subagent_id);

    let name = spawn
        .as_ref()
        .and_then(|s| s.description.clone())
        .or_else(|| spawn.as_ref().and_then(|s| s.prompt.clone()))
        .or_else(|| payload.agent_type.clone())
        .unwrap_or_else(|| "subagent".to_string());

    let team_name = spawn
        .as_ref()
        .and_then(|s| s.team_name.clone())
        .or_else(|| payload.team_name.clone());
    let subagent_type = spawn
        .as_ref()
        .and_then(|s| s.subagent_type.clone())
        .or_else(|| payload.agent_type.clone());

    let mut agent = Agent::new(
        subagent_id,
        &name,
        infer_role(subagent_type.as_deref().unwrap_or(""), &name),
    );
    agent.status = AgentStatus::Working;
    agent.subagent_type = subagent_type;
    if team_name.is_none() {
        agent.is_subagent = true;
        agent.parent_agent_id = Some(session_id.to_string());
    }
    agent.team_name = team_name;
    state.registry.update_agent(agent);
}

fn on_subagent_stop(
    state: &Arc<AppState>,
    payload: &HookPayload,
    session_id: &str,
    resolved_agent_id: &str,
) {
    let target = payload
        .agent_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(resolved_agent_id)
        .to_string();

    let Some(agent) = state.registry.get_agent(&target) else {
        return;
    };

    if agent.team_name.is_some() {
        // Team members persist; they just go idle.
        state
            .registry
            .update_agent_activity_by_id(&target, AgentStatus::Idle, None, None);
        return;
    }

    state.registry.update_agent_activity_by_id(
        &target,
        AgentStatus::Done,
        Some("Done"),
        None,
    );
    state.guards.mark_session_stopped(session_id);

    let registry = state.registry.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SUBAGENT_REMOVE_DELAY).await;
        registry.remove_agent(&target);
    });
}

fn on_teammate_idle(state: &Arc<AppState>, payload: &HookPayload, resolved_agent_id: &str) {
    let target = payload
        .teammate_name
        .as_deref()
        .and_then(|name| state.registry.agent_id_by_name(name))
        .unwrap_or_else(|| resolved_agent_id.to_string());
    state
        .registry
        .update_agent_activity_by_id(&target, AgentStatus::Idle, None, None);
}

fn on_task_completed(state: &Arc<AppState>, payload: &HookPayload) {
    let Some(task_id) = payload.task_id.as_deref().filter(|s| !s.is_empty()) else {
        return;
    };
    let mut task = state.registry.get_task(task_id).unwrap_or_else(|| {
        Task::new(
            task_id,
            payload.task_subject.as_deref().unwrap_or("Untitled"),
        )
    });
    task.status = TaskStatus::Completed;
    // update_task credits the owner's tasks_completed on the transition.
    state.registry.update_task(task);
    state.registry.reconcile_agent_statuses();
}

fn on_notification(state: &Arc<AppState>, payload: &HookPayload, agent_id: &str) {
    let kind = payload.notification_type.as_deref().unwrap_or("");
    let text = payload.message.as_deref().unwrap_or("");

    // Defensive: match on both the typed field and the message text — hosts
    // have shipped both shapes.
    let is_idle_prompt = kind == "idle_prompt" || text.contains("waiting for your input");
    let is_permission_prompt = kind == "permission_prompt" || text.contains("permission");

    if is_idle_prompt {
        state.registry.set_agent_waiting_by_id(
            agent_id,
            true,
            None,
            None,
            Some(WaitingType::Question),
        );
    } else if is_permission_prompt {
        if let Some(agent) = state.registry.get_agent(agent_id) {
            if !agent.waiting_for_input {
                state.registry.set_agent_waiting_by_id(
                    agent_id,
                    true,
                    None,
                    None,
                    Some(WaitingType::Permission),
                );
            }
        }
    }
}

// ── PostToolUse extractors ──────────────────────────────────────────

fn extract_send_message(
    state: &Arc<AppState>,
    payload: &HookPayload,
    agent_id: &str,
    input: &Value,
) {
    // Messages from unknown senders are dropped rather than shown as such.
    let Some(sender) = state.registry.get_agent(agent_id).map(|a| a.name) else {
        return;
    };

    let msg_type = str_field(input, "type").unwrap_or_else(|| "message".to_string());
    let recipient = match msg_type.as_str() {
        "broadcast" => "team (broadcast)".to_string(),
        _ => match str_field(input, "recipient") {
            Some(r) => r,
            None => return,
        },
    };

    let body = str_field(input, "content")
        .or_else(|| str_field(input, "summary"))
        .unwrap_or_default();
    let content = if msg_type == "shutdown_request" {
        format!("[shutdown request] {body}")
    } else {
        body
    };

    let id = payload
        .tool_use_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state
        .registry
        .add_message(Message::new(id, sender, recipient, &content, now_ms()));
}

fn extract_team_create(
    state: &Arc<AppState>,
    payload: &HookPayload,
    agent_id: &str,
    input: &Value,
) {
    let Some(team) = str_field(input, "team_name")
        .or_else(|| str_field(input, "name"))
        .or_else(|| payload.team_name.clone())
    else {
        return;
    };

    if let Some(mut agent) = state.registry.get_agent(agent_id) {
        agent.team_name = Some(team.clone());
        state.registry.update_agent(agent);
    }

    let mut session = Session::new(team_session_id(&team), &team);
    session.is_team = true;
    session.team_name = Some(team.clone());
    session.last_activity = now_ms();
    state.registry.add_session(session);

    // Optionally pre-register configured members.
    if let Some(members) = input.get("members").and_then(Value::as_array) {
        for member in members {
            let name = member.get("name").and_then(Value::as_str).unwrap_or("");
            let id = member
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(name);
            if id.is_empty() {
                continue;
            }
            let member_type = member
                .get("agentType")
                .or_else(|| member.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let display = if name.is_empty() { id } else { name };
            let mut agent = Agent::new(id, display, infer_role(member_type, display));
            agent.team_name = Some(team.clone());
            state.registry.register_agent(agent);
        }
    }
}

fn extract_team_delete(state: &Arc<AppState>, payload: &HookPayload, input: &Value) {
    let Some(team) = str_field(input, "team_name")
        .or_else(|| str_field(input, "name"))
        .or_else(|| payload.team_name.clone())
    else {
        return;
    };
    state.registry.clear_team_agents(&team);
    state.registry.remove_session(&team_session_id(&team));
}

fn extract_task_create(state: &Arc<AppState>, payload: &HookPayload, input: &Value) {
    let id = payload
        .tool_response
        .as_ref()
        .and_then(task_id_from_response)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut task = Task::new(
        id,
        str_field(input, "subject").unwrap_or_else(|| "Untitled".to_string()),
    );
    if let Some(owner) = str_field(input, "owner") {
        task.owner = Some(owner);
    }
    state.registry.update_task(task);
}

fn extract_task_update(state: &Arc<AppState>, input: &Value) {
    let Some(task_id) = str_field(input, "taskId").or_else(|| str_field(input, "task_id")) else {
        return;
    };

    if str_field(input, "status").as_deref() == Some("deleted") {
        state.registry.remove_task(&task_id);
        return;
    }

    let mut task = state
        .registry
        .get_task(&task_id)
        .unwrap_or_else(|| Task::new(&task_id, "Untitled"));
    if let Some(subject) = str_field(input, "subject") {
        task.subject = subject;
    }
    if let Some(status) = str_field(input, "status") {
        task.status = TaskStatus::normalize(&status);
    }
    if let Some(owner) = str_field(input, "owner") {
        task.owner = Some(owner);
    }
    state.registry.update_task(task);
}

// ── helpers ─────────────────────────────────────────────────────────

fn str_field(input: &Value, key: &str) -> Option<String> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn first_line_excerpt(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or("");
    if line.chars().count() > PROMPT_EXCERPT_CHARS {
        line.chars().take(PROMPT_EXCERPT_CHARS).collect()
    } else {
        line.to_string()
    }
}

/// Commands that can move branch state: `git push|commit|pull|merge|rebase|
/// checkout|switch` and `gh pr`.
fn is_git_mutation(command: &str) -> bool {
    if command.contains("gh pr") {
        return true;
    }
    const VERBS: &[&str] = &[
        "push", "commit", "pull", "merge", "rebase", "checkout", "switch",
    ];
    let mut rest = command;
    while let Some(idx) = rest.find("git ") {
        let after = &rest[idx + 4..];
        let verb = after.split_whitespace().next().unwrap_or("");
        if VERBS.contains(&verb) {
            return true;
        }
        rest = after;
    }
    false
}

/// Parse "Task #N" out of a tool response (string or structured).
fn task_id_from_response(response: &Value) -> Option<String> {
    let text = match response {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let idx = text.find("Task #")?;
    let digits: String = text[idx + "Task #".len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}
