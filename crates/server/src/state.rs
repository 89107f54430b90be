// crates/server/src/state.rs
//! Shared application state for the Axum server.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use agent_town_core::git::{detect_git_worktree, system_exec, GitExec, GitStatusCache};

use crate::guards::Guards;
use crate::hooks::PendingSpawn;
use crate::registry::Registry;
use crate::watcher::TrackedFiles;

/// Shared state accessible from all route handlers and background tasks.
pub struct AppState {
    /// Server start time for uptime reporting.
    pub start_time: Instant,
    pub guards: Arc<Guards>,
    pub registry: Arc<Registry>,
    /// Task tool calls awaiting their SubagentStart, FIFO per session.
    /// Single-writer via the hook handler path.
    pub pending_spawns: Mutex<Vec<PendingSpawn>>,
    /// First-seen working directory per hook session id.
    pub session_cwds: Mutex<HashMap<String, String>>,
    /// Working directories already probed for git info.
    pub probed_cwds: Mutex<HashSet<String>>,
    pub git_exec: GitExec,
    pub git_status: Arc<GitStatusCache>,
    /// Transcript files currently tracked by the watcher. The watcher owns
    /// this map; the staleness sweeper prunes entries through it.
    pub tracked: TrackedFiles,
    /// `AUTH_TOKEN`; `None` means open access.
    pub auth_token: Option<String>,
}

impl AppState {
    /// Production state: real git exec, token from the environment.
    pub fn from_env() -> Arc<Self> {
        Self::new(
            system_exec(),
            std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
        )
    }

    /// State with an injected git exec (tests pass fakes).
    pub fn new(git_exec: GitExec, auth_token: Option<String>) -> Arc<Self> {
        let guards = Arc::new(Guards::new());
        let registry = Registry::new(guards.clone());
        Arc::new(Self {
            start_time: Instant::now(),
            guards,
            registry,
            pending_spawns: Mutex::new(Vec::new()),
            session_cwds: Mutex::new(HashMap::new()),
            probed_cwds: Mutex::new(HashSet::new()),
            git_exec,
            git_status: Arc::new(GitStatusCache::default()),
            tracked: TrackedFiles::default(),
            auth_token,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Remember the first cwd seen for a session; later values are ignored.
    pub fn record_session_cwd(&self, session_id: &str, cwd: &str) {
        self.session_cwds
            .lock()
            .expect("session cwds lock poisoned")
            .entry(session_id.to_string())
            .or_insert_with(|| cwd.to_string());
    }

    pub fn session_cwd(&self, session_id: &str) -> Option<String> {
        self.session_cwds
            .lock()
            .expect("session cwds lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Fire-and-forget git probe: branch/worktree plus cached status, applied
    /// to the agent when the subprocess returns. Errors leave git fields
    /// untouched.
    pub fn spawn_git_probe(self: &Arc<Self>, agent_id: &str, cwd: &str) {
        let state = Arc::clone(self);
        let agent_id = agent_id.to_string();
        let cwd = cwd.to_string();
        tokio::spawn(async move {
            let exec = state.git_exec.clone();
            let cache = state.git_status.clone();
            let probe_cwd = cwd.clone();
            let result = tokio::task::spawn_blocking(move || {
                let path = Path::new(&probe_cwd);
                let worktree = detect_git_worktree(path, &exec);
                let status = cache.detect(path, &exec);
                (worktree, status)
            })
            .await;
            match result {
                Ok((worktree, status)) => {
                    if worktree.branch.is_some() || status.is_some() {
                        state.registry.update_agent_git_info(
                            &agent_id,
                            worktree.branch.as_deref(),
                            worktree.worktree_path.as_deref(),
                            status,
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, cwd = %cwd, error = %e, "git probe task failed");
                }
            }
        });
    }

    /// Probe a cwd at most once per process lifetime (hook preamble step).
    /// Returns true when this call claimed the first probe.
    pub fn claim_first_probe(&self, cwd: &str) -> bool {
        self.probed_cwds
            .lock()
            .expect("probed cwds lock poisoned")
            .insert(cwd.to_string())
    }
}
