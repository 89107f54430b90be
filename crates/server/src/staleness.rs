// crates/server/src/staleness.rs
//! Staleness sweeper: a 15-second tick that marks idle agents, retires
//! finished subagents, expires dead sessions, and fails the selection over
//! to the freshest survivor.
//!
//! Effective idle time is measured against the freshest of the tracked
//! file's activity and the session's activity — hooks bump the latter, so an
//! agent working purely through hooks never goes stale here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_town_types::AgentStatus;

use crate::state::AppState;
use crate::util::now_ms;
use crate::watcher::TrackedFile;

/// Tick period.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Agents idle this long are flipped idle/done.
const IDLE_MS: i64 = 60_000;

/// Subagents idle this long are removed outright.
const SUBAGENT_REMOVE_MS: i64 = 5 * 60 * 1000;

/// Sessions idle this long are expired.
const SESSION_EXPIRY_MS: i64 = 60 * 60 * 1000;

/// Catch-all: a subagent whose parent session and hook stream have both been
/// silent this long is an orphan.
const SUBAGENT_ORPHAN_MS: i64 = 5 * 60 * 1000;

/// Spawn the periodic sweeper.
pub fn spawn(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // the first tick fires immediately
        loop {
            interval.tick().await;
            run_sweep(&state, now_ms());
        }
    });
}

/// One sweep pass at the given wall-clock instant. Pure with respect to
/// time, so tests can drive arbitrary clocks.
pub fn run_sweep(state: &Arc<AppState>, now: i64) {
    let entries: Vec<(PathBuf, TrackedFile)> = {
        let tracked = state.tracked.lock().expect("tracked lock poisoned");
        tracked
            .iter()
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect()
    };

    let selected = state.registry.selected_session();

    for (path, entry) in entries {
        let session = state.registry.get_session(&entry.session_id);

        // Orphaned tracking entry: its session vanished underneath it.
        if session.is_none() && selected.as_deref() != Some(entry.session_id.as_str()) {
            drop_tracking(state, &path);
            continue;
        }

        let session_last = session.as_ref().map(|s| s.last_activity).unwrap_or(0);
        let effective = entry.last_activity.max(session_last);
        let idle = now - effective;

        if idle >= IDLE_MS {
            if entry.internal {
                // Compaction helpers just stop being interesting.
                drop_tracking(state, &path);
                continue;
            }

            state
                .registry
                .set_agent_waiting_by_id(&entry.agent_id, false, None, None, None);
            if let Some(agent) = state.registry.get_agent(&entry.agent_id) {
                if agent.status == AgentStatus::Working {
                    if agent.is_subagent {
                        state.registry.update_agent_activity_by_id(
                            &entry.agent_id,
                            AgentStatus::Done,
                            Some("Done"),
                            None,
                        );
                    } else {
                        state.registry.update_agent_activity_by_id(
                            &entry.agent_id,
                            AgentStatus::Idle,
                            None,
                            None,
                        );
                    }
                }
            }

            if entry.is_subagent && idle >= SUBAGENT_REMOVE_MS {
                state.registry.remove_agent(&entry.agent_id);
                drop_tracking(state, &path);
                continue;
            }
        }

        if idle >= SESSION_EXPIRY_MS && !entry.is_subagent {
            expire_session(state, &entry.session_id, &entry.agent_id, &selected);
            drop_tracking(state, &path);
        }
    }

    // Sessions living purely on hooks (team members, transcriptless solo
    // sessions): idle their agents after the same window, expire after an
    // hour.
    let tracked_sessions: std::collections::HashSet<String> = {
        let tracked = state.tracked.lock().expect("tracked lock poisoned");
        tracked.values().map(|t| t.session_id.clone()).collect()
    };
    for session_id in state.registry.session_ids() {
        if tracked_sessions.contains(&session_id) {
            continue;
        }
        let Some(session) = state.registry.get_session(&session_id) else {
            continue;
        };
        let idle = now - session.last_activity;
        if idle >= IDLE_MS {
            for agent in state.registry.session_agents(&session_id) {
                if agent.status == AgentStatus::Working {
                    state.registry.update_agent_activity_by_id(
                        &agent.id,
                        AgentStatus::Idle,
                        None,
                        None,
                    );
                }
            }
        }
        if idle >= SESSION_EXPIRY_MS && !session.is_team {
            expire_session(state, &session_id, &session_id, &selected);
        }
    }

    // Catch-all: subagents whose parent session and hook stream have both
    // gone silent.
    for agent in state.registry.agents_snapshot() {
        if !agent.is_subagent {
            continue;
        }
        let parent_last = agent
            .parent_agent_id
            .as_deref()
            .and_then(|parent| state.registry.get_session(parent))
            .map(|s| s.last_activity)
            .unwrap_or(0);
        let hook_last = state.guards.last_hook_at(&agent.id).unwrap_or(0);
        if now - parent_last.max(hook_last) > SUBAGENT_ORPHAN_MS {
            tracing::debug!(agent_id = %agent.id, "removing orphaned subagent");
            state.registry.remove_agent(&agent.id);
        }
    }
}

fn expire_session(
    state: &Arc<AppState>,
    session_id: &str,
    agent_id: &str,
    selected: &Option<String>,
) {
    tracing::info!(session_id = %session_id, "session expired");
    let was_selected = selected.as_deref() == Some(session_id);
    state.registry.remove_agent(agent_id);
    state.registry.remove_session(session_id);
    if was_selected {
        state.registry.select_most_interesting_session();
    }
}

fn drop_tracking(state: &Arc<AppState>, path: &PathBuf) {
    state
        .tracked
        .lock()
        .expect("tracked lock poisoned")
        .remove(path);
}
