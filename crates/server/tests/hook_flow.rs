// crates/server/tests/hook_flow.rs
//! End-to-end hook ingestion: HTTP request → dispatcher → Registry.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use agent_town_core::git::GitExec;
use agent_town_server::{create_app, AppState};
use agent_town_types::AgentStatus;

fn noop_exec() -> GitExec {
    Arc::new(|_: &str, _: &[&str], _: &Path| Err(std::io::Error::other("no git in tests")))
}

fn setup() -> (Arc<AppState>, Router) {
    let state = AppState::new(noop_exec(), None);
    let app = create_app(state.clone());
    (state, app)
}

async fn post_hook(app: &Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/hook")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

// ── validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn accepts_minimal_event() {
    let (_state, app) = setup();
    let (status, body) = post_hook(
        &app,
        json!({"hook_event_name": "Stop", "session_id": "sess-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn rejects_missing_session_id() {
    let (_state, app) = setup();
    let (status, body) = post_hook(&app, json!({"hook_event_name": "Stop"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("session_id"));
}

#[tokio::test]
async fn rejects_session_id_too_long() {
    let (_state, app) = setup();
    let (status, body) = post_hook(
        &app,
        json!({"hook_event_name": "Stop", "session_id": "x".repeat(257)}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "session_id too long");
}

#[tokio::test]
async fn rejects_unknown_event_name() {
    let (_state, app) = setup();
    let (status, _) = post_hook(
        &app,
        json!({"hook_event_name": "NotARealEvent", "session_id": "sess-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejects_relative_cwd() {
    let (_state, app) = setup();
    let (status, body) = post_hook(
        &app,
        json!({"hook_event_name": "Stop", "session_id": "sess-1", "cwd": "relative/path"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "cwd must be absolute");
}

#[tokio::test]
async fn auth_enforced_when_token_set() {
    let state = AppState::new(noop_exec(), Some("sekrit".into()));
    let app = create_app(state);

    let body = json!({"hook_event_name": "Stop", "session_id": "sess-1"});
    let (status, _) = post_hook(&app, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Bearer header works.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/hook")
                .header("content-type", "application/json")
                .header("authorization", "Bearer sekrit")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Query token works.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/hook?token=sekrit")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ── auto-registration ───────────────────────────────────────────────

#[tokio::test]
async fn unknown_session_with_cwd_materializes() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "UserPromptSubmit",
            "session_id": "sess-1",
            "cwd": "/home/dev/widget",
            "prompt": "fix the parser"
        }),
    )
    .await;

    let session = state.registry.get_session("sess-1").unwrap();
    assert_eq!(session.project_name, "widget");
    let agent = state.registry.get_agent("sess-1").unwrap();
    assert_eq!(agent.status, AgentStatus::Working);
    assert_eq!(agent.current_action, "Processing prompt...");
}

#[tokio::test]
async fn unknown_session_without_cwd_is_accepted_but_silent() {
    let (state, app) = setup();
    let (status, _) = post_hook(
        &app,
        json!({"hook_event_name": "UserPromptSubmit", "session_id": "sess-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.registry.get_agent("sess-1").is_none());
}

// ── Scenario C: permission waiting → clear ──────────────────────────

#[tokio::test]
async fn permission_request_then_post_tool_use() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PermissionRequest",
            "session_id": "sess-1",
            "cwd": "/w/proj",
            "tool_name": "Write",
            "tool_input": {"file_path": "/x/y.ts"}
        }),
    )
    .await;

    let agent = state.registry.get_agent("sess-1").unwrap();
    assert!(agent.waiting_for_input);
    assert_eq!(
        agent.waiting_type,
        Some(agent_town_types::WaitingType::Permission)
    );
    assert_eq!(agent.current_action, "Writing y.ts");

    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "tool_name": "Write",
            "tool_input": {"file_path": "/x/y.ts"}
        }),
    )
    .await;

    let agent = state.registry.get_agent("sess-1").unwrap();
    assert!(!agent.waiting_for_input);
    assert_eq!(agent.status, AgentStatus::Working);
}

// ── Scenario B: pending-spawn FIFO ──────────────────────────────────

#[tokio::test]
async fn pending_spawn_fifo_names_subagents() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PreToolUse",
            "session_id": "sess-1",
            "cwd": "/w/proj",
            "tool_name": "Task",
            "tool_use_id": "T1",
            "tool_input": {"description": "Research API", "subagent_type": "Explore"}
        }),
    )
    .await;
    post_hook(
        &app,
        json!({
            "hook_event_name": "PreToolUse",
            "session_id": "sess-1",
            "tool_name": "Task",
            "tool_use_id": "T2",
            "tool_input": {"description": "Write tests"}
        }),
    )
    .await;

    post_hook(
        &app,
        json!({"hook_event_name": "SubagentStart", "session_id": "sess-1", "agent_id": "S1"}),
    )
    .await;
    post_hook(
        &app,
        json!({"hook_event_name": "SubagentStart", "session_id": "sess-1", "agent_id": "S2"}),
    )
    .await;

    let s1 = state.registry.get_agent("S1").unwrap();
    let s2 = state.registry.get_agent("S2").unwrap();
    assert_eq!(s1.name, "Research API");
    assert_eq!(s2.name, "Write tests");
    assert!(s1.is_subagent && s2.is_subagent);
    assert_eq!(s1.parent_agent_id.as_deref(), Some("sess-1"));
    assert_eq!(s1.subagent_type.as_deref(), Some("Explore"));
    assert_eq!(s1.status, AgentStatus::Working);
}

#[tokio::test]
async fn subagent_start_without_pending_uses_agent_type() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PreToolUse",
            "session_id": "sess-1",
            "cwd": "/w/proj",
            "tool_name": "Task",
            "tool_use_id": "T1",
            "tool_input": {"description": "Only one"}
        }),
    )
    .await;

    post_hook(
        &app,
        json!({"hook_event_name": "SubagentStart", "session_id": "sess-1", "agent_id": "S1"}),
    )
    .await;
    post_hook(
        &app,
        json!({
            "hook_event_name": "SubagentStart",
            "session_id": "sess-1",
            "agent_id": "S2",
            "agent_type": "general-purpose"
        }),
    )
    .await;

    assert_eq!(state.registry.get_agent("S1").unwrap().name, "Only one");
    assert_eq!(
        state.registry.get_agent("S2").unwrap().name,
        "general-purpose"
    );
}

// ── subagent stop ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn subagent_stop_marks_done_then_removes() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PreToolUse",
            "session_id": "sess-1",
            "cwd": "/w/proj",
            "tool_name": "Task",
            "tool_use_id": "T1",
            "tool_input": {"description": "Helper"}
        }),
    )
    .await;
    post_hook(
        &app,
        json!({"hook_event_name": "SubagentStart", "session_id": "sess-1", "agent_id": "S1"}),
    )
    .await;

    post_hook(
        &app,
        json!({"hook_event_name": "SubagentStop", "session_id": "sess-1", "agent_id": "S1"}),
    )
    .await;

    let agent = state.registry.get_agent("S1").unwrap();
    assert_eq!(agent.status, AgentStatus::Done);
    assert_eq!(agent.current_action, "Done");
    assert!(state.guards.is_session_stopped("sess-1"));

    // Removal is scheduled 15 s out.
    tokio::time::sleep(std::time::Duration::from_secs(14)).await;
    assert!(state.registry.get_agent("S1").is_some());
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    assert!(state.registry.get_agent("S1").is_none());
    assert!(state.guards.was_recently_removed("S1"));
}

// ── turn boundaries ─────────────────────────────────────────────────

#[tokio::test]
async fn stop_idles_and_marks_session_stopped() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PreToolUse",
            "session_id": "sess-1",
            "cwd": "/w/proj",
            "tool_name": "Bash",
            "tool_input": {"command": "cargo test"}
        }),
    )
    .await;
    post_hook(
        &app,
        json!({"hook_event_name": "Stop", "session_id": "sess-1"}),
    )
    .await;

    assert_eq!(
        state.registry.get_agent("sess-1").unwrap().status,
        AgentStatus::Idle
    );
    assert!(state.guards.is_session_stopped("sess-1"));

    // The next prompt clears the stop flag.
    post_hook(
        &app,
        json!({"hook_event_name": "UserPromptSubmit", "session_id": "sess-1"}),
    )
    .await;
    assert!(!state.guards.is_session_stopped("sess-1"));
    assert_eq!(
        state.registry.get_agent("sess-1").unwrap().status,
        AgentStatus::Working
    );
}

#[tokio::test]
async fn pre_compact_sets_compacting_action() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PreCompact",
            "session_id": "sess-1",
            "cwd": "/w/proj"
        }),
    )
    .await;
    let agent = state.registry.get_agent("sess-1").unwrap();
    assert_eq!(agent.current_action, "Compacting conversation...");
    assert_eq!(agent.status, AgentStatus::Working);
}

#[tokio::test]
async fn post_tool_use_failure_labels() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUseFailure",
            "session_id": "sess-1",
            "cwd": "/w/proj",
            "tool_name": "Bash",
            "tool_input": {"command": "cargo test"}
        }),
    )
    .await;
    assert_eq!(
        state.registry.get_agent("sess-1").unwrap().current_action,
        "Failed: Running: cargo test"
    );

    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUseFailure",
            "session_id": "sess-1",
            "is_interrupt": true
        }),
    )
    .await;
    assert_eq!(
        state.registry.get_agent("sess-1").unwrap().current_action,
        "Interrupted"
    );
}

// ── messages ────────────────────────────────────────────────────────

#[tokio::test]
async fn send_message_recorded_with_sender_name() {
    let (state, app) = setup();
    // Materialize the sender first.
    post_hook(
        &app,
        json!({
            "hook_event_name": "UserPromptSubmit",
            "session_id": "sess-1",
            "cwd": "/w/widget"
        }),
    )
    .await;

    let mut rx = state.registry.subscribe();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "tool_name": "SendMessage",
            "tool_use_id": "toolu_9",
            "tool_input": {"type": "message", "recipient": "tester", "content": "please verify"}
        }),
    )
    .await;

    let mut found = None;
    while let Ok(delta) = rx.try_recv() {
        if let agent_town_types::Delta::NewMessage(m) = delta {
            found = Some(m);
        }
    }
    let message = found.expect("message delta");
    assert_eq!(message.id, "toolu_9");
    assert_eq!(message.from, "widget");
    assert_eq!(message.to, "tester");
    assert_eq!(message.content, "please verify");
}

#[tokio::test]
async fn broadcast_message_addressed_to_team() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "UserPromptSubmit",
            "session_id": "sess-1",
            "cwd": "/w/widget"
        }),
    )
    .await;
    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "tool_name": "SendMessage",
            "tool_use_id": "toolu_1",
            "tool_input": {"type": "broadcast", "content": "standup time"}
        }),
    )
    .await;
    assert_eq!(state.registry.message_count(), 1);
}

#[tokio::test]
async fn message_replay_is_deduplicated() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "UserPromptSubmit",
            "session_id": "sess-1",
            "cwd": "/w/widget"
        }),
    )
    .await;
    let body = json!({
        "hook_event_name": "PostToolUse",
        "session_id": "sess-1",
        "tool_name": "SendMessage",
        "tool_use_id": "toolu_dup",
        "tool_input": {"type": "message", "recipient": "x", "content": "once"}
    });
    post_hook(&app, body.clone()).await;
    post_hook(&app, body).await;
    assert_eq!(state.registry.message_count(), 1);
}

// ── tasks ───────────────────────────────────────────────────────────

#[tokio::test]
async fn task_create_update_complete_lifecycle() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "UserPromptSubmit",
            "session_id": "sess-1",
            "cwd": "/w/widget"
        }),
    )
    .await;

    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "tool_name": "TaskCreate",
            "tool_input": {"subject": "Wire auth"},
            "tool_response": "Created Task #12"
        }),
    )
    .await;
    let task = state.registry.get_task("12").unwrap();
    assert_eq!(task.subject, "Wire auth");

    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "tool_name": "TaskUpdate",
            "tool_input": {"taskId": "12", "status": "in_progress", "owner": "widget"}
        }),
    )
    .await;
    assert_eq!(
        state.registry.get_agent("sess-1").unwrap().current_task_id.as_deref(),
        Some("12")
    );

    post_hook(
        &app,
        json!({
            "hook_event_name": "TaskCompleted",
            "session_id": "sess-1",
            "task_id": "12"
        }),
    )
    .await;
    let agent = state.registry.get_agent("sess-1").unwrap();
    assert_eq!(agent.tasks_completed, 1);

    // Replaying the completion does not double-credit.
    post_hook(
        &app,
        json!({
            "hook_event_name": "TaskCompleted",
            "session_id": "sess-1",
            "task_id": "12"
        }),
    )
    .await;
    assert_eq!(state.registry.get_agent("sess-1").unwrap().tasks_completed, 1);
}

#[tokio::test]
async fn task_update_deleted_removes() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "cwd": "/w/widget",
            "tool_name": "TaskCreate",
            "tool_input": {"subject": "Temp"},
            "tool_response": "Task #3"
        }),
    )
    .await;
    assert!(state.registry.get_task("3").is_some());

    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "tool_name": "TaskUpdate",
            "tool_input": {"taskId": "3", "status": "deleted"}
        }),
    )
    .await;
    assert!(state.registry.get_task("3").is_none());
}

// ── teams ───────────────────────────────────────────────────────────

#[tokio::test]
async fn team_create_and_delete() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "cwd": "/w/widget",
            "tool_name": "TeamCreate",
            "tool_input": {
                "team_name": "alpha",
                "members": [{"id": "m1", "name": "scout", "agentType": "researcher"}]
            }
        }),
    )
    .await;

    assert!(state.registry.session_exists("team:alpha"));
    assert_eq!(
        state.registry.get_agent("sess-1").unwrap().team_name.as_deref(),
        Some("alpha")
    );
    assert_eq!(
        state.registry.get_agent("m1").unwrap().role,
        agent_town_types::AgentRole::Researcher
    );

    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "tool_name": "TeamDelete",
            "tool_input": {"team_name": "alpha"}
        }),
    )
    .await;
    assert!(!state.registry.session_exists("team:alpha"));
    assert!(state.registry.get_agent("m1").is_none());
}

#[tokio::test]
async fn teammate_idle_by_name() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "cwd": "/w/widget",
            "tool_name": "TeamCreate",
            "tool_input": {"team_name": "alpha", "members": [{"id": "m1", "name": "scout"}]}
        }),
    )
    .await;
    state
        .registry
        .update_agent_activity_by_id("m1", AgentStatus::Working, Some("busy"), None);

    post_hook(
        &app,
        json!({
            "hook_event_name": "TeammateIdle",
            "session_id": "sess-1",
            "teammate_name": "scout"
        }),
    )
    .await;
    assert_eq!(
        state.registry.get_agent("m1").unwrap().status,
        AgentStatus::Idle
    );
}

// ── notifications & plan mode ───────────────────────────────────────

#[tokio::test]
async fn notification_idle_prompt_sets_question() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "Notification",
            "session_id": "sess-1",
            "cwd": "/w/widget",
            "notification_type": "idle_prompt"
        }),
    )
    .await;
    let agent = state.registry.get_agent("sess-1").unwrap();
    assert!(agent.waiting_for_input);
    assert_eq!(
        agent.waiting_type,
        Some(agent_town_types::WaitingType::Question)
    );
}

#[tokio::test]
async fn notification_permission_does_not_clobber_existing_wait() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "Notification",
            "session_id": "sess-1",
            "cwd": "/w/widget",
            "notification_type": "idle_prompt"
        }),
    )
    .await;
    post_hook(
        &app,
        json!({
            "hook_event_name": "Notification",
            "session_id": "sess-1",
            "message": "Claude needs your permission to use Bash"
        }),
    )
    .await;
    // Still the original question wait.
    assert_eq!(
        state.registry.get_agent("sess-1").unwrap().waiting_type,
        Some(agent_town_types::WaitingType::Question)
    );
}

#[tokio::test]
async fn plan_mode_marks_waiting() {
    let (state, app) = setup();
    post_hook(
        &app,
        json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-1",
            "cwd": "/w/widget",
            "tool_name": "Read",
            "tool_input": {"file_path": "/a.rs"},
            "permission_mode": "plan"
        }),
    )
    .await;
    let agent = state.registry.get_agent("sess-1").unwrap();
    assert!(agent.waiting_for_input);
    assert_eq!(agent.waiting_type, Some(agent_town_types::WaitingType::Plan));
}

// ── replay idempotence ──────────────────────────────────────────────

#[tokio::test]
async fn replaying_an_event_converges() {
    let (state, app) = setup();
    let body = json!({
        "hook_event_name": "PermissionRequest",
        "session_id": "sess-1",
        "cwd": "/w/widget",
        "tool_name": "Edit",
        "tool_input": {"file_path": "/a/b.rs"}
    });
    post_hook(&app, body.clone()).await;
    let first = state.registry.get_agent("sess-1").unwrap();
    post_hook(&app, body).await;
    let second = state.registry.get_agent("sess-1").unwrap();
    assert_eq!(first.status, second.status);
    assert_eq!(first.waiting_type, second.waiting_type);
    assert_eq!(first.current_action, second.current_action);
    assert_eq!(first.tasks_completed, second.tasks_completed);
}
