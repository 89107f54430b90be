// crates/core/src/metadata.rs
//! Session metadata extraction from the head of a transcript.
//!
//! The first few lines of a transcript carry the session's identity: its id,
//! slug, working directory, git branch, and (for team members) the team name
//! and agent id. The watcher reads up to 20 head lines and takes the first
//! one that yields metadata.

use serde_json::Value;

/// Metadata lifted from a single transcript line.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub session_id: String,
    pub slug: Option<String>,
    /// Working directory from `cwd`.
    pub project_path: Option<String>,
    /// Derived display name; see [`derive_project_name`].
    pub project_name: String,
    pub git_branch: Option<String>,
    /// Presence promotes the session to a team session.
    pub team_name: Option<String>,
    /// Team-member transcripts carry the member's agent id.
    pub agent_id: Option<String>,
}

/// Extract session metadata from one transcript line.
///
/// Returns `None` for corrupt JSON, non-objects, and lines without a
/// `sessionId` — the caller keeps scanning.
pub fn parse_session_metadata(line: &str) -> Option<SessionMetadata> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    if !value.is_object() {
        return None;
    }

    let session_id = value
        .get("sessionId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?
        .to_string();

    let slug = opt_string(&value, "slug");
    let project_path = opt_string(&value, "cwd");
    let git_branch = opt_string(&value, "gitBranch");
    let team_name = opt_string(&value, "teamName");
    let agent_id = opt_string(&value, "agentId");

    let project_name = derive_project_name(project_path.as_deref(), slug.as_deref());

    Some(SessionMetadata {
        session_id,
        slug,
        project_path,
        project_name,
        git_branch,
        team_name,
        agent_id,
    })
}

fn opt_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Derive a display name for the project.
///
/// Prefers the last non-empty segment of `cwd`. Falls back to the directory
/// slug, which encodes the path with dashes: everything after the last
/// `-Source-` separator when present, else the last dash segment.
pub fn derive_project_name(cwd: Option<&str>, slug: Option<&str>) -> String {
    if let Some(cwd) = cwd {
        if let Some(segment) = cwd.split('/').rev().find(|s| !s.is_empty()) {
            return segment.to_string();
        }
    }
    if let Some(slug) = slug {
        if let Some(idx) = slug.rfind("-Source-") {
            let tail = &slug[idx + "-Source-".len()..];
            if !tail.is_empty() {
                return tail.to_string();
            }
        }
        if let Some(segment) = slug.rsplit('-').find(|s| !s.is_empty()) {
            return segment.to_string();
        }
    }
    String::new()
}
