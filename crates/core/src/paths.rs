// crates/core/src/paths.rs
//! Discovery of the observed `~/.claude` tree.
//!
//! All path lookups go through this module so tests can redirect the entire
//! tree into a tempdir via `AGENT_TOWN_HOME`.

use std::path::PathBuf;

/// Environment variable overriding the `~/.claude` root (tests).
pub const HOME_ENV: &str = "AGENT_TOWN_HOME";

/// The root of the observed tree: `$AGENT_TOWN_HOME` or `~/.claude`.
pub fn claude_home() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::home_dir().map(|home| home.join(".claude"))
}

/// `<home>/.claude/projects` — per-project transcript directories.
pub fn projects_dir() -> Option<PathBuf> {
    claude_home().map(|c| c.join("projects"))
}

/// `<home>/.claude/teams` — one `config.json` per team.
pub fn teams_dir() -> Option<PathBuf> {
    claude_home().map(|c| c.join("teams"))
}

/// `<home>/.claude/tasks` — one JSON file per team task.
pub fn tasks_dir() -> Option<PathBuf> {
    claude_home().map(|c| c.join("tasks"))
}
