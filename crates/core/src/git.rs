// crates/core/src/git.rs
//! Git worktree and status probes.
//!
//! All git access goes through an injected exec capability — a pure
//! `(cmd, args, cwd) → stdout` function — so tests never spawn processes.
//! Status probes are cached per working directory with a short TTL because
//! hook bursts would otherwise hammer `git status` on every tool call.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Injected exec capability: run `cmd args...` in `cwd`, return stdout.
pub type GitExec = Arc<dyn Fn(&str, &[&str], &Path) -> io::Result<String> + Send + Sync>;

/// Default freshness window for cached status probes.
pub const STATUS_CACHE_TTL: Duration = Duration::from_secs(10);

/// The production exec: spawns the command and captures stdout.
///
/// A non-zero exit reports as an error so probe code can treat "not a repo"
/// and "git missing" uniformly.
pub fn system_exec() -> GitExec {
    Arc::new(|cmd: &str, args: &[&str], cwd: &Path| {
        let output = Command::new(cmd).args(args).current_dir(cwd).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{cmd} exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    })
}

/// Branch and worktree placement for a working directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitWorktreeInfo {
    pub branch: Option<String>,
    /// Set only when `cwd` is inside a linked worktree (not the main one).
    pub worktree_path: Option<String>,
}

/// Probe the branch and worktree layout of `cwd`.
///
/// An empty branch means detached HEAD — the probe returns empty rather than
/// inventing a name. A directory is a linked worktree iff its git-dir is not
/// `.git` and differs from the common dir.
pub fn detect_git_worktree(cwd: &Path, exec: &GitExec) -> GitWorktreeInfo {
    let branch = match exec("git", &["branch", "--show-current"], cwd) {
        Ok(out) => out.trim().to_string(),
        Err(_) => return GitWorktreeInfo::default(),
    };
    if branch.is_empty() {
        // Detached HEAD.
        return GitWorktreeInfo::default();
    }

    let git_dir = exec("git", &["rev-parse", "--git-dir"], cwd)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let common_dir = exec("git", &["rev-parse", "--git-common-dir"], cwd)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let is_worktree = !git_dir.is_empty() && git_dir != ".git" && common_dir != git_dir;

    let worktree_path = if is_worktree {
        exec("git", &["rev-parse", "--show-toplevel"], cwd)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    } else {
        None
    };

    GitWorktreeInfo {
        branch: Some(branch),
        worktree_path,
    }
}

/// Upstream divergence and dirtiness for a working directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GitStatusInfo {
    pub ahead: u32,
    pub behind: u32,
    pub has_upstream: bool,
    pub is_dirty: bool,
}

/// TTL cache over status probes, keyed by working directory.
pub struct GitStatusCache {
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, (GitStatusInfo, Instant)>>,
}

impl Default for GitStatusCache {
    fn default() -> Self {
        Self::new(STATUS_CACHE_TTL)
    }
}

impl GitStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Probe `cwd`, serving from cache while fresh.
    ///
    /// Returns `None` when `cwd` is not a git repository (the status command
    /// itself fails). A missing upstream is not an error: the result has
    /// `has_upstream = false` with zero counts.
    pub fn detect(&self, cwd: &Path, exec: &GitExec) -> Option<GitStatusInfo> {
        {
            let entries = self.entries.lock().expect("git status cache poisoned");
            if let Some((info, at)) = entries.get(cwd) {
                if at.elapsed() < self.ttl {
                    return Some(*info);
                }
            }
        }

        let porcelain = exec("git", &["status", "--porcelain"], cwd).ok()?;
        let is_dirty = !porcelain.trim().is_empty();

        let (ahead, behind, has_upstream) = match exec(
            "git",
            &["rev-list", "--left-right", "--count", "@{upstream}...HEAD"],
            cwd,
        ) {
            Ok(out) => {
                let mut parts = out.split_whitespace();
                // Left count = commits only on upstream (behind),
                // right count = commits only on HEAD (ahead).
                let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                (ahead, behind, true)
            }
            Err(_) => (0, 0, false),
        };

        let info = GitStatusInfo {
            ahead,
            behind,
            has_upstream,
            is_dirty,
        };
        self.entries
            .lock()
            .expect("git status cache poisoned")
            .insert(cwd.to_path_buf(), (info, Instant::now()));
        Some(info)
    }

    /// Drop the cached entry for `cwd` (e.g. after a push/commit).
    pub fn clear(&self, cwd: &Path) {
        self.entries
            .lock()
            .expect("git status cache poisoned")
            .remove(cwd);
    }

    /// Drop everything (tests).
    pub fn clear_all(&self) {
        self.entries
            .lock()
            .expect("git status cache poisoned")
            .clear();
    }
}
