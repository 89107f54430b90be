// crates/server/src/teams.rs
//! Team configuration and task-file watcher.
//!
//! Observes `<home>/.claude/teams/<name>/config.json` and
//! `<home>/.claude/tasks/<name>/<taskId>.json`. Config changes register the
//! team session and its members; task-file changes upsert tasks. Both trees
//! share one notify watcher with a 150 ms per-path debounce (files are
//! rewritten whole, often twice in quick succession).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use agent_town_core::{parse_task_file, parse_team_config, paths};
use agent_town_types::{team_session_id, Agent, Session};

use crate::state::AppState;
use crate::util::now_ms;

/// Per-path debounce for team-config and task-file events.
pub const TEAM_FILE_DEBOUNCE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
enum TeamEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Processing half, testable without a filesystem notifier.
pub struct TeamsWatcher {
    state: Arc<AppState>,
    teams_root: PathBuf,
    tasks_root: PathBuf,
}

impl TeamsWatcher {
    pub fn new(state: Arc<AppState>, teams_root: PathBuf, tasks_root: PathBuf) -> Self {
        Self {
            state,
            teams_root,
            tasks_root,
        }
    }

    /// Load everything already on disk.
    pub fn run_initial_scan(&self) {
        for config in list_team_configs(&self.teams_root) {
            self.on_config_changed(&config);
        }
        for task_file in list_task_files(&self.tasks_root) {
            self.on_task_changed(&task_file);
        }
    }

    pub fn on_changed(&self, path: &Path) {
        if path.starts_with(&self.tasks_root) {
            self.on_task_changed(path);
        } else if path.file_name().map(|n| n == "config.json").unwrap_or(false) {
            self.on_config_changed(path);
        }
    }

    pub fn on_removed(&self, path: &Path) {
        if path.starts_with(&self.tasks_root) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.state.registry.remove_task(stem);
            }
        } else if path.file_name().map(|n| n == "config.json").unwrap_or(false) {
            if let Some(team) = team_name_from_config_path(path) {
                self.state.registry.clear_team_agents(&team);
                self.state.registry.remove_session(&team_session_id(&team));
            }
        }
    }

    fn on_config_changed(&self, path: &Path) {
        let Some(config) = parse_team_config(path) else {
            // Malformed or mid-write; the next event will retry.
            return;
        };
        let Some(team) = config
            .name
            .clone()
            .or_else(|| team_name_from_config_path(path))
        else {
            return;
        };

        let mut session = Session::new(team_session_id(&team), &team);
        session.is_team = true;
        session.team_name = Some(team.clone());
        session.last_activity = now_ms();
        self.state.registry.add_session(session);

        for member in &config.members {
            let mut agent = Agent::new(&member.id, &member.name, member.role);
            agent.team_name = Some(team.clone());
            agent.subagent_type = member.agent_type.clone();
            self.state.registry.register_agent(agent);
        }
    }

    fn on_task_changed(&self, path: &Path) {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return;
        }
        let Some(task) = parse_task_file(path) else {
            return;
        };
        self.state.registry.update_task(task);
    }
}

/// Spawn the watcher over both trees with a debounced event loop.
///
/// The notify watcher is started before the loop task is spawned so a
/// watch-root failure reaches the caller; that failure is fatal. A missing
/// home directory merely disables the watcher.
pub fn spawn(state: Arc<AppState>) -> anyhow::Result<()> {
    let (Some(teams_root), Some(tasks_root)) = (paths::teams_dir(), paths::tasks_dir()) else {
        tracing::warn!("no home directory; team watcher disabled");
        return Ok(());
    };

    let (tx, mut rx) = mpsc::channel::<TeamEvent>(256);
    let fs_watcher = start_notify(&teams_root, &tasks_root, tx)
        .with_context(|| format!("cannot watch team roots under {}", teams_root.display()))?;

    tokio::spawn(async move {
        // Dropping the notify handle would silently stop the watch.
        let _fs_watcher = fs_watcher;
        let watcher = TeamsWatcher::new(state, teams_root, tasks_root);
        watcher.run_initial_scan();

        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        TeamEvent::Changed(path) => {
                            pending.insert(path, Instant::now() + TEAM_FILE_DEBOUNCE);
                        }
                        TeamEvent::Removed(path) => {
                            pending.remove(&path);
                            watcher.on_removed(&path);
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
                        watcher.on_changed(&path);
                    }
                }
            }
        }
    });

    Ok(())
}

fn start_notify(
    teams_root: &Path,
    tasks_root: &Path,
    tx: mpsc::Sender<TeamEvent>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                for path in event.paths {
                    let interesting = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e == "json")
                        .unwrap_or(false);
                    if !interesting {
                        continue;
                    }
                    let team_event = match event.kind {
                        EventKind::Remove(_) => TeamEvent::Removed(path),
                        EventKind::Modify(_) | EventKind::Create(_) => TeamEvent::Changed(path),
                        _ => continue,
                    };
                    let _ = tx.try_send(team_event);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "team watcher error");
            }
        })?;

    for root in [teams_root, tasks_root] {
        if root.exists() {
            watcher.watch(root, RecursiveMode::Recursive)?;
            tracing::info!(root = %root.display(), "watching for team changes");
        }
    }
    Ok(watcher)
}

fn team_name_from_config_path(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()?
        .to_str()
        .map(String::from)
        .filter(|s| !s.is_empty())
}

fn list_team_configs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path().join("config.json"))
        .filter(|p| p.is_file())
        .collect()
}

fn list_task_files(root: &Path) -> Vec<PathBuf> {
    let Ok(teams) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for team_dir in teams.flatten() {
        let Ok(files) = std::fs::read_dir(team_dir.path()) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                out.push(path);
            }
        }
    }
    out
}
