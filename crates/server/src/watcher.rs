// crates/server/src/watcher.rs
//! Transcript watcher: tails JSONL files under the projects tree.
//!
//! Layout observed (depth ≤ 4 below the projects root):
//!
//! ```text
//! <projects>/<dirSlug>/<sessionId>.jsonl
//! <projects>/<dirSlug>/<sessionId>/subagents/<agentId>.jsonl
//! ```
//!
//! New files go through session detection: metadata from the first lines, a
//! reverse tail scan to reconstruct the initial status, and registration with
//! the Registry. Change events read only the bytes appended since the stored
//! offset. Hooks outrank the JSONL stream: while the hook-active guard is set
//! for an agent, transcript lines may not mutate its status (messages are
//! still recorded).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use agent_town_core::tail::{head_lines, read_new_lines, tail_lines};
use agent_town_core::transcript::{parse_transcript_line, ParsedLine};
use agent_town_core::{parse_session_metadata, paths};
use agent_town_types::{Agent, AgentStatus, Message, Session, WaitingType};

use crate::guards::HOOK_ACTIVE_WINDOW_MS;
use crate::state::AppState;
use crate::util::{mtime_ms, now_ms};

/// Per-path debounce for transcript modify events.
pub const TRANSCRIPT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Initial scan skips top-level transcripts older than 24 hours.
const INITIAL_SCAN_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Initial scan skips subagent transcripts older than 5 minutes.
const SUBAGENT_SCAN_MAX_AGE_MS: i64 = 5 * 60 * 1000;

/// Metadata is expected within the first lines of a transcript.
const METADATA_HEAD_LINES: usize = 20;

/// Reverse tail-scan depth for initial status reconstruction.
const TAIL_SCAN_LINES: usize = 30;

/// Tail-scan depth for subagent files (turn_end downgrade only).
const SUBAGENT_TAIL_LINES: usize = 15;

/// A file modified within this window defaults to `working`.
const FRESH_MTIME_MS: i64 = 10_000;

/// Activity bumps are suppressed for files whose mtime is older than this —
/// historical replay must not inflate timestamps.
const ACTIVITY_BUMP_MAX_AGE_MS: i64 = 5 * 60 * 1000;

/// An acompact helper file counts as "recent" within this window.
const ACOMPACT_RECENT_MS: i64 = 60_000;

/// One tracked transcript file.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub session_id: String,
    /// Registry agent id this file feeds (session id for main transcripts,
    /// the subagent id for subagent files).
    pub agent_id: String,
    pub offset: u64,
    /// Unix ms of the last meaningful activity observed through this file.
    pub last_activity: i64,
    pub is_subagent: bool,
    /// Internal compaction helper (`agent-acompact*`): tracked but never
    /// displayed as an agent.
    pub internal: bool,
}

/// Shared tracking map. Owned by the watcher; the sweeper prunes through it.
pub type TrackedFiles = Arc<Mutex<HashMap<PathBuf, TrackedFile>>>;

/// File events forwarded from notify, pre-filtered to `.jsonl`.
#[derive(Debug, Clone)]
pub enum FileEvent {
    Modified(PathBuf),
    Removed(PathBuf),
}

/// The watcher's processing half: pure functions over the shared state, so
/// tests can drive it without a filesystem notifier.
pub struct TranscriptWatcher {
    state: Arc<AppState>,
    root: PathBuf,
}

impl TranscriptWatcher {
    pub fn new(state: Arc<AppState>, root: PathBuf) -> Self {
        Self { state, root }
    }

    /// Scan the tree once at startup, skipping stale files.
    pub async fn run_initial_scan(&self) {
        let root = self.root.clone();
        let found = tokio::task::spawn_blocking(move || scan_tree(&root))
            .await
            .unwrap_or_default();
        tracing::info!(files = found.len(), root = %self.root.display(), "initial transcript scan");
        for path in found {
            self.detect(&path, true).await;
        }
    }

    /// Session detection for a newly-seen file.
    pub async fn detect(&self, path: &Path, initial_scan: bool) {
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            return;
        }
        if is_subagent_path(path) {
            self.detect_subagent(path, initial_scan).await;
        } else {
            self.detect_session(path, initial_scan).await;
        }
    }

    async fn detect_session(&self, path: &Path, initial_scan: bool) {
        let now = now_ms();
        let Some(mtime) = mtime_ms(path) else {
            return;
        };
        if initial_scan && now - mtime > INITIAL_SCAN_MAX_AGE_MS {
            return;
        }

        let head = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || head_lines(&path, METADATA_HEAD_LINES)).await
        };
        let (head, head_offset) = match head {
            Ok(Ok(h)) => h,
            _ => return,
        };
        let Some(meta) = head.iter().find_map(|l| parse_session_metadata(l)) else {
            tracing::debug!(path = %path.display(), "no session metadata in head lines");
            return;
        };

        // The filename stem is authoritative: compacted/continued sessions
        // carry a stale sessionId in their metadata.
        let session_id = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => meta.session_id.clone(),
        };

        let dir_slug = dir_slug(&self.root, path);
        let slug = meta.slug.clone().unwrap_or(dir_slug);

        // Team member transcripts map their raw session UUID onto the
        // configured team agent; the team config watcher owns the agents.
        if let (Some(team), Some(agent_id)) = (meta.team_name.as_deref(), meta.agent_id.as_deref())
        {
            self.state
                .guards
                .register_session_to_agent_mapping(&session_id, agent_id);
            self.state
                .registry
                .update_session_activity(&agent_town_types::team_session_id(team), mtime);
            self.track(
                path,
                TrackedFile {
                    session_id: session_id.clone(),
                    agent_id: agent_id.to_string(),
                    offset: head_offset,
                    last_activity: mtime,
                    is_subagent: false,
                    internal: false,
                },
            );
            return;
        }

        let scan = scan_tail(&tail_lines(path, TAIL_SCAN_LINES).await.unwrap_or_default());

        let fresh = now - mtime < FRESH_MTIME_MS;
        let mut status = if fresh {
            AgentStatus::Working
        } else {
            AgentStatus::Idle
        };
        let mut action: Option<String> = None;
        let mut waiting: Option<WaitingType> = None;

        // Tie-break: turn_end > tool_call > thinking > compact.
        if scan.turn_end {
            status = AgentStatus::Idle;
        } else if let Some(call) = &scan.tool_call {
            status = AgentStatus::Working;
            action = Some(call.label.clone());
            if call.is_user_prompt {
                waiting = waiting_type_for_tool(&call.tool_name);
            }
        } else if let Some(label) = &scan.thinking {
            status = AgentStatus::Working;
            action = Some(label.clone());
        } else if scan.compact {
            status = AgentStatus::Working;
            action = Some("Compacting conversation...".to_string());
        }

        // A stopped session stays idle no matter what the tail says.
        if self.state.guards.is_session_stopped(&session_id) {
            status = AgentStatus::Idle;
            waiting = None;
        }

        // Session first: an agent delta for a session nobody knows yet would
        // fail every client's membership filter.
        let mut session = Session::new(&session_id, &meta.project_name);
        session.project_path = meta.project_path.clone().unwrap_or_default();
        session.slug = slug.clone();
        session.git_branch = meta.git_branch.clone();
        session.team_name = meta.team_name.clone();
        session.last_activity = mtime;
        self.state.registry.add_session(session);

        let mut agent = Agent::new(
            &session_id,
            if slug.is_empty() {
                meta.project_name.clone()
            } else {
                slug
            },
            agent_town_types::AgentRole::Implementer,
        );
        agent.status = status;
        if let Some(action) = &action {
            agent.current_action = action.clone();
        }
        agent.git_branch = meta.git_branch.clone();
        self.state.registry.register_agent(agent);
        if let Some(waiting_type) = waiting {
            self.state.registry.set_agent_waiting_by_id(
                &session_id,
                true,
                action.as_deref(),
                None,
                Some(waiting_type),
            );
        }

        // Metadata branches go stale; re-probe from the cwd every time.
        if let Some(cwd) = meta.project_path.as_deref() {
            self.state.spawn_git_probe(&session_id, cwd);
        }

        // A recently-active internal compaction helper outranks the tail.
        if self.has_recent_acompact(&session_id, now) {
            self.state.registry.update_agent_activity_by_id(
                &session_id,
                AgentStatus::Working,
                Some("Compacting conversation..."),
                None,
            );
        }

        self.track(
            path,
            TrackedFile {
                session_id: session_id.clone(),
                agent_id: session_id,
                offset: head_offset,
                last_activity: mtime,
                is_subagent: false,
                internal: false,
            },
        );
    }

    async fn detect_subagent(&self, path: &Path, initial_scan: bool) {
        let now = now_ms();
        let Some(mtime) = mtime_ms(path) else {
            return;
        };
        if initial_scan && now - mtime > SUBAGENT_SCAN_MAX_AGE_MS {
            return;
        }
        let Some((parent, agent_id)) = subagent_ids(path) else {
            return;
        };

        // Internal conversation-compaction helper: reflect on the parent,
        // never display.
        if agent_id.starts_with("agent-acompact") {
            if now - mtime < ACOMPACT_RECENT_MS {
                self.state.registry.update_agent_activity_by_id(
                    &parent,
                    AgentStatus::Working,
                    Some("Compacting conversation..."),
                    None,
                );
            }
            let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            self.track(
                path,
                TrackedFile {
                    session_id: parent,
                    agent_id,
                    offset: len,
                    last_activity: mtime,
                    is_subagent: true,
                    internal: true,
                },
            );
            return;
        }

        if self.state.guards.was_recently_removed(&agent_id) {
            tracing::debug!(agent_id = %agent_id, "subagent skipped: recently removed");
            return;
        }
        if self.tracked_path(path) {
            return;
        }
        let existing = self.state.registry.get_agent(&agent_id);
        if let Some(existing) = &existing {
            if existing.status == AgentStatus::Done {
                // The hook already finished this one.
                return;
            }
        }

        let mut status = if now - mtime < FRESH_MTIME_MS {
            AgentStatus::Working
        } else {
            AgentStatus::Idle
        };
        let tail = tail_lines(path, SUBAGENT_TAIL_LINES).await.unwrap_or_default();
        if tail
            .iter()
            .any(|l| matches!(parse_transcript_line(l), Some(ParsedLine::TurnEnd)))
        {
            status = AgentStatus::Idle;
        }

        if existing.is_none() {
            let name = {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || subagent_display_name(&path))
                    .await
                    .ok()
                    .flatten()
            }
            .unwrap_or_else(|| agent_id.clone());
            let subagent_type = subagent_type_from_id(&agent_id);

            let mut agent = Agent::new(
                &agent_id,
                &name,
                agent_town_core::infer_role(subagent_type.as_deref().unwrap_or(""), &name),
            );
            agent.status = status;
            agent.is_subagent = true;
            agent.parent_agent_id = Some(parent.clone());
            agent.subagent_type = subagent_type;
            self.state.registry.register_agent(agent);
        }

        let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        self.track(
            path,
            TrackedFile {
                session_id: parent,
                agent_id,
                offset: len,
                last_activity: mtime,
                is_subagent: true,
                internal: false,
            },
        );
    }

    /// Incremental processing of appended lines.
    pub async fn on_change(&self, path: &Path) {
        let Some(entry) = self.get_tracked(path) else {
            self.detect(path, false).await;
            return;
        };
        let now = now_ms();
        let mtime = mtime_ms(path).unwrap_or(now);

        if entry.internal {
            // Compaction helper activity shows on the parent.
            self.state.registry.update_agent_activity_by_id(
                &entry.session_id,
                AgentStatus::Working,
                Some("Compacting conversation..."),
                None,
            );
            self.update_tracked(path, |t| t.last_activity = mtime);
            return;
        }

        let read = {
            let path = path.to_path_buf();
            let offset = entry.offset;
            tokio::task::spawn_blocking(move || read_new_lines(&path, offset)).await
        };
        let (lines, new_offset) = match read {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                // Races with unlink are routine; keep the offset for retry.
                tracing::debug!(path = %path.display(), error = %e, "transcript read failed");
                return;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "transcript read task failed");
                return;
            }
        };
        self.update_tracked(path, |t| t.offset = new_offset);
        if lines.is_empty() {
            return;
        }

        let stopped = self.state.guards.is_session_stopped(&entry.session_id);
        let resolved = self.state.guards.resolve_agent_id(&entry.session_id);
        let hook_active = self
            .state
            .guards
            .is_hook_active(&entry.agent_id, HOOK_ACTIVE_WINDOW_MS)
            || self
                .state
                .guards
                .is_hook_active(&resolved, HOOK_ACTIVE_WINDOW_MS);
        let suppress_status = stopped || hook_active;

        let mut meaningful = false;
        for line in &lines {
            let Some(parsed) = parse_transcript_line(line) else {
                continue;
            };
            match parsed {
                // Messages are always recorded, stopped or not.
                ParsedLine::Message(m) => {
                    meaningful = true;
                    let ts = if m.timestamp_ms > 0 { m.timestamp_ms } else { now };
                    self.state
                        .registry
                        .add_message(Message::new(m.id, m.from, m.to, &m.content, ts));
                }
                _ if suppress_status => {}
                ParsedLine::Compact => {
                    meaningful = true;
                    self.state.registry.update_agent_activity_by_id(
                        &entry.agent_id,
                        AgentStatus::Working,
                        Some("Compacting conversation..."),
                        None,
                    );
                }
                ParsedLine::Thinking { label } => {
                    meaningful = true;
                    self.state.registry.update_agent_activity_by_id(
                        &entry.agent_id,
                        AgentStatus::Working,
                        Some(&label),
                        None,
                    );
                }
                ParsedLine::ToolCall {
                    tool_name,
                    label,
                    is_user_prompt,
                } => {
                    meaningful = true;
                    self.state.registry.update_agent_activity_by_id(
                        &entry.agent_id,
                        AgentStatus::Working,
                        Some(&label),
                        None,
                    );
                    if is_user_prompt {
                        if let Some(waiting_type) = waiting_type_for_tool(&tool_name) {
                            self.state.registry.set_agent_waiting_by_id(
                                &entry.agent_id,
                                true,
                                Some(&label),
                                None,
                                Some(waiting_type),
                            );
                        }
                    }
                }
                ParsedLine::Progress { label } => {
                    meaningful = true;
                    let working = self
                        .state
                        .registry
                        .get_agent(&entry.agent_id)
                        .map(|a| a.status == AgentStatus::Working)
                        .unwrap_or(false);
                    if !working {
                        self.state.registry.update_agent_activity_by_id(
                            &entry.agent_id,
                            AgentStatus::Working,
                            Some(&label),
                            None,
                        );
                    } else {
                        self.state.registry.set_agent_waiting_by_id(
                            &entry.agent_id,
                            false,
                            None,
                            None,
                            None,
                        );
                    }
                }
                ParsedLine::AgentActivity => {
                    meaningful = true;
                    self.state.registry.set_agent_waiting_by_id(
                        &entry.agent_id,
                        false,
                        None,
                        None,
                        None,
                    );
                }
                ParsedLine::TurnEnd => {
                    meaningful = true;
                    self.state.registry.update_agent_activity_by_id(
                        &entry.agent_id,
                        AgentStatus::Idle,
                        None,
                        None,
                    );
                }
                ParsedLine::Unknown => {}
            }
        }

        // Historical replay must not inflate the activity clocks.
        if meaningful && now - mtime < ACTIVITY_BUMP_MAX_AGE_MS {
            self.update_tracked(path, |t| t.last_activity = t.last_activity.max(mtime));
            self.state
                .registry
                .update_session_activity(&entry.session_id, mtime);
        }
    }

    /// A transcript disappeared.
    pub fn on_unlink(&self, path: &Path) {
        let removed = {
            let mut tracked = self.state.tracked.lock().expect("tracked lock poisoned");
            tracked.remove(path)
        };
        let Some(entry) = removed else {
            return;
        };
        if entry.is_subagent {
            return;
        }
        let still_referenced = {
            let tracked = self.state.tracked.lock().expect("tracked lock poisoned");
            tracked.values().any(|t| t.session_id == entry.session_id)
        };
        if !still_referenced && !self.state.registry.is_team_session(&entry.session_id) {
            self.state.registry.remove_session(&entry.session_id);
        }
    }

    fn has_recent_acompact(&self, session_id: &str, now: i64) -> bool {
        let tracked = self.state.tracked.lock().expect("tracked lock poisoned");
        tracked.values().any(|t| {
            t.internal && t.session_id == session_id && now - t.last_activity < ACOMPACT_RECENT_MS
        })
    }

    fn track(&self, path: &Path, entry: TrackedFile) {
        self.state
            .tracked
            .lock()
            .expect("tracked lock poisoned")
            .insert(path.to_path_buf(), entry);
    }

    fn tracked_path(&self, path: &Path) -> bool {
        self.state
            .tracked
            .lock()
            .expect("tracked lock poisoned")
            .contains_key(path)
    }

    fn get_tracked(&self, path: &Path) -> Option<TrackedFile> {
        self.state
            .tracked
            .lock()
            .expect("tracked lock poisoned")
            .get(path)
            .cloned()
    }

    fn update_tracked(&self, path: &Path, f: impl FnOnce(&mut TrackedFile)) {
        let mut tracked = self.state.tracked.lock().expect("tracked lock poisoned");
        if let Some(entry) = tracked.get_mut(path) {
            f(entry);
        }
    }
}

/// Spawn the full watcher pipeline: initial scan, notify watcher, debounced
/// event loop with catch-up rescans after dropped events.
///
/// The notify watcher is started before the loop task is spawned so a
/// watch-root failure reaches the caller; that failure is fatal. A missing
/// home directory merely disables the watcher.
pub fn spawn(state: Arc<AppState>) -> anyhow::Result<()> {
    let Some(root) = paths::projects_dir() else {
        tracing::warn!("no home directory; transcript watcher disabled");
        return Ok(());
    };

    let (tx, mut rx) = mpsc::channel::<FileEvent>(512);
    let (fs_watcher, dropped) = start_notify(&root, tx)
        .with_context(|| format!("cannot watch transcript root {}", root.display()))?;

    tokio::spawn(async move {
        // The notify handle lives as long as the loop; dropping it would
        // silently stop the watch.
        let _fs_watcher = fs_watcher;
        let watcher = TranscriptWatcher::new(state, root.clone());
        watcher.run_initial_scan().await;

        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let mut seen_drops = 0u64;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        FileEvent::Modified(path) => {
                            pending.insert(path, Instant::now() + TRANSCRIPT_DEBOUNCE);
                        }
                        FileEvent::Removed(path) => {
                            pending.remove(&path);
                            watcher.on_unlink(&path);
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(25)), if !pending.is_empty() => {
                    let now = Instant::now();
                    let due: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in due {
                        pending.remove(&path);
                        watcher.on_change(&path).await;
                    }
                }
            }

            // The notify callback counts events it could not enqueue; catch
            // up with a rescan when the counter advances.
            let drops = dropped.load(Ordering::Relaxed);
            if drops > seen_drops {
                seen_drops = drops;
                tracing::info!(dropped_total = drops, "watcher events dropped — rescanning");
                let rescan_root = root.clone();
                let paths = tokio::task::spawn_blocking(move || scan_tree(&rescan_root))
                    .await
                    .unwrap_or_default();
                for path in paths {
                    watcher.on_change(&path).await;
                }
            }
        }
    });

    Ok(())
}

/// Start the notify watcher; JSONL events land on `tx`. Returns the watcher
/// handle (keep alive) and the dropped-event counter.
fn start_notify(
    root: &Path,
    tx: mpsc::Sender<FileEvent>,
) -> notify::Result<(RecommendedWatcher, Arc<AtomicU64>)> {
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_cb = dropped.clone();

    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                for path in event.paths {
                    if path.extension().map(|e| e == "jsonl") != Some(true) {
                        continue;
                    }
                    let file_event = match event.kind {
                        EventKind::Remove(_) => FileEvent::Removed(path),
                        EventKind::Modify(_) | EventKind::Create(_) => FileEvent::Modified(path),
                        _ => continue,
                    };
                    if tx.try_send(file_event).is_err() {
                        dropped_cb.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "transcript watcher error");
            }
        })?;

    if root.exists() {
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching for transcript changes");
    } else {
        tracing::warn!(root = %root.display(), "projects directory missing; watcher idle");
    }

    Ok((watcher, dropped))
}

// ── path and scan helpers ───────────────────────────────────────────

/// Collect `.jsonl` files up to 4 levels below the root.
fn scan_tree(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, depth: u32, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if depth < 4 {
                    walk(&path, depth + 1, out);
                }
            } else if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    walk(root, 1, &mut out);
    out
}

fn is_subagent_path(path: &Path) -> bool {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n == "subagents")
        .unwrap_or(false)
}

/// `(parentSessionId, agentId)` from a subagents path.
fn subagent_ids(path: &Path) -> Option<(String, String)> {
    let agent_id = path.file_stem()?.to_str()?.to_string();
    let parent = path
        .parent()? // subagents/
        .parent()? // <parentSessionId>/
        .file_name()?
        .to_str()?
        .to_string();
    Some((parent, agent_id))
}

/// First path segment below the projects root ("slug" directory).
fn dir_slug(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .and_then(|c| c.as_os_str().to_str())
        .unwrap_or("")
        .to_string()
}

/// Derive a display name from the first user-message content line (≤40
/// chars). Synchronous: call from `spawn_blocking`.
fn subagent_display_name(path: &Path) -> Option<String> {
    let (lines, _) = head_lines(path, 10).ok()?;
    for line in lines {
        let value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if value.get("type").and_then(|v| v.as_str()) != Some("user") {
            continue;
        }
        let content = value
            .get("message")
            .and_then(|m| m.get("content"))
            .or_else(|| value.get("content"));
        let text = match content {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .find_map(|b| b.get("text").and_then(|t| t.as_str()))
                .unwrap_or("")
                .to_string(),
            _ => continue,
        };
        let first = text.lines().next().unwrap_or("").trim();
        if first.is_empty() {
            continue;
        }
        return Some(if first.chars().count() > 40 {
            first.chars().take(40).collect()
        } else {
            first.to_string()
        });
    }
    None
}

/// `agent-explore-a1b2c3` ⇒ `Explore`. Single-segment ids carry no type.
fn subagent_type_from_id(agent_id: &str) -> Option<String> {
    let rest = agent_id.strip_prefix("agent-")?;
    let mut segments = rest.split('-');
    let first = segments.next()?;
    // Without a trailing hash segment the first token is the hash itself.
    segments.next()?;
    let mut chars = first.chars();
    let head = chars.next()?;
    Some(head.to_uppercase().collect::<String>() + chars.as_str())
}

fn waiting_type_for_tool(tool_name: &str) -> Option<WaitingType> {
    match tool_name {
        "AskUserQuestion" => Some(WaitingType::Question),
        "EnterPlanMode" | "ExitPlanMode" => Some(WaitingType::Plan),
        _ => None,
    }
}

/// What the reverse tail scan remembered.
#[derive(Debug, Default)]
struct TailScan {
    turn_end: bool,
    tool_call: Option<TailToolCall>,
    thinking: Option<String>,
    compact: bool,
}

#[derive(Debug)]
struct TailToolCall {
    tool_name: String,
    label: String,
    is_user_prompt: bool,
}

/// Walk the last lines newest-first, reconstructing the session's state at
/// the moment the file went quiet.
///
/// Rules: `turn_end` settles it (idle) and stops. A `tool_call` is
/// remembered but scanning continues — the turn may have ended after it. A
/// `tool_result` is a natural boundary and stops. `thinking` and `compact`
/// are remembered as weaker signals.
fn scan_tail(lines: &[String]) -> TailScan {
    let mut scan = TailScan::default();
    for line in lines.iter().rev() {
        match parse_transcript_line(line) {
            Some(ParsedLine::TurnEnd) => {
                scan.turn_end = true;
                break;
            }
            Some(ParsedLine::ToolCall {
                tool_name,
                label,
                is_user_prompt,
            }) => {
                if scan.tool_call.is_none() {
                    scan.tool_call = Some(TailToolCall {
                        tool_name,
                        label,
                        is_user_prompt,
                    });
                }
            }
            Some(ParsedLine::AgentActivity) => break,
            Some(ParsedLine::Thinking { label }) => {
                if scan.thinking.is_none() {
                    scan.thinking = Some(label);
                }
            }
            Some(ParsedLine::Compact) => {
                scan.compact = true;
            }
            _ => {}
        }
    }
    scan
}
