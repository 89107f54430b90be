// crates/server/src/guards.rs
//! Short-lived coordination flags between the hook dispatcher and the
//! transcript watcher.
//!
//! Hooks and the JSONL tail race constantly; these four structures settle who
//! wins. All flags are advisory booleans consulted at the start of each
//! mutation — they are never read-modify-written against the Registry under
//! one critical section.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::util::now_ms;

/// How long a removed id stays unresurrectable (5 minutes).
pub const RECENTLY_REMOVED_TTL_MS: i64 = 5 * 60 * 1000;

/// Default hook-active window: JSONL-derived status is suppressed while a
/// hook event landed within this many milliseconds.
pub const HOOK_ACTIVE_WINDOW_MS: i64 = 5000;

#[derive(Default)]
struct GuardsInner {
    /// Removed agent id → removal timestamp (ms).
    recently_removed: HashMap<String, i64>,
    /// Sessions whose `Stop` hook fired; cleared on the next prompt.
    stopped_sessions: HashSet<String>,
    /// Agent id → last hook event timestamp (ms).
    hook_active: HashMap<String, i64>,
    /// Raw hook session id → team agent id.
    session_to_agent: HashMap<String, String>,
}

/// Process-lived guard state. Cleared only by explicit calls or TTL.
#[derive(Default)]
pub struct Guards {
    inner: Mutex<GuardsInner>,
}

impl Guards {
    pub fn new() -> Self {
        Self::default()
    }

    // ── recently removed ─────────────────────────────────────────────

    pub fn mark_removed(&self, id: &str) {
        self.mark_removed_at(id, now_ms());
    }

    /// Timestamp-injecting variant for tests and the sweeper.
    pub fn mark_removed_at(&self, id: &str, ts: i64) {
        let mut inner = self.lock();
        inner.recently_removed.insert(id.to_string(), ts);
    }

    /// True if `id` was removed within the last 5 minutes. Expiry is
    /// advisory — callers may also explicitly clear before a legitimate
    /// re-register (e.g. `SubagentStart` for a re-spawn).
    pub fn was_recently_removed(&self, id: &str) -> bool {
        self.was_recently_removed_at(id, now_ms())
    }

    pub fn was_recently_removed_at(&self, id: &str, now: i64) -> bool {
        let mut inner = self.lock();
        match inner.recently_removed.get(id) {
            Some(&ts) if now - ts < RECENTLY_REMOVED_TTL_MS => true,
            Some(_) => {
                // Expired; drop the entry while we hold the lock.
                inner.recently_removed.remove(id);
                false
            }
            None => false,
        }
    }

    pub fn clear_recently_removed(&self, id: &str) {
        self.lock().recently_removed.remove(id);
    }

    // ── stopped sessions ─────────────────────────────────────────────

    pub fn mark_session_stopped(&self, session_id: &str) {
        self.lock().stopped_sessions.insert(session_id.to_string());
    }

    pub fn clear_session_stopped(&self, session_id: &str) {
        self.lock().stopped_sessions.remove(session_id);
    }

    pub fn is_session_stopped(&self, session_id: &str) -> bool {
        self.lock().stopped_sessions.contains(session_id)
    }

    // ── hook-active window ───────────────────────────────────────────

    pub fn mark_hook_active(&self, id: &str) {
        self.mark_hook_active_at(id, now_ms());
    }

    pub fn mark_hook_active_at(&self, id: &str, ts: i64) {
        self.lock().hook_active.insert(id.to_string(), ts);
    }

    /// True iff a hook event for `id` was recorded within `window_ms`.
    pub fn is_hook_active(&self, id: &str, window_ms: i64) -> bool {
        self.is_hook_active_at(id, window_ms, now_ms())
    }

    pub fn is_hook_active_at(&self, id: &str, window_ms: i64, now: i64) -> bool {
        self.lock()
            .hook_active
            .get(id)
            .is_some_and(|&ts| now - ts < window_ms)
    }

    /// Last hook timestamp for `id`, if any (staleness sweeps).
    pub fn last_hook_at(&self, id: &str) -> Option<i64> {
        self.lock().hook_active.get(id).copied()
    }

    // ── session → agent mapping ──────────────────────────────────────

    pub fn register_session_to_agent_mapping(&self, session_id: &str, agent_id: &str) {
        self.lock()
            .session_to_agent
            .insert(session_id.to_string(), agent_id.to_string());
    }

    /// Resolve a raw hook session id to the logical agent id; identity when
    /// no mapping exists.
    pub fn resolve_agent_id(&self, session_id: &str) -> String {
        self.lock()
            .session_to_agent
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| session_id.to_string())
    }

    /// Drop every mapping that resolves into or out of `session_id`.
    pub fn remove_session_mappings(&self, session_id: &str) {
        self.lock()
            .session_to_agent
            .retain(|sid, aid| sid != session_id && aid != session_id);
    }

    /// Wipe all guard state (tests).
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = GuardsInner::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardsInner> {
        self.inner.lock().expect("guards lock poisoned")
    }
}
