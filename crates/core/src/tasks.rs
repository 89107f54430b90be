// crates/core/src/tasks.rs
//! Team task-file reader.
//!
//! Each task lives in `~/.claude/tasks/<team>/<taskId>.json`. Files are
//! rewritten whole on every update, so an empty read means we raced a write
//! and the caller should wait for the next change event.

use std::path::Path;

use agent_town_types::{Task, TaskStatus};
use serde_json::Value;

/// Read one task file. `None` on empty (mid-write) or malformed content.
///
/// Normalization: the external "deleted" status maps to completed, unknown
/// statuses map to pending, a missing subject becomes "Untitled", and the id
/// falls back to the filename stem.
pub fn parse_task_file(path: &Path) -> Option<Task> {
    let raw = std::fs::read_to_string(path).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(&raw).ok()?;
    if !value.is_object() {
        return None;
    }

    let id = value
        .get("id")
        .and_then(id_string)
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
        })
        .filter(|s| !s.is_empty())?;

    let subject = value
        .get("subject")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("Untitled")
        .to_string();

    let status = value
        .get("status")
        .and_then(Value::as_str)
        .map(TaskStatus::normalize)
        .unwrap_or(TaskStatus::Pending);

    let owner = value
        .get("owner")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);

    Some(Task {
        id,
        subject,
        status,
        owner,
        blocked_by: string_array(&value, "blockedBy"),
        blocks: string_array(&value, "blocks"),
    })
}

/// Task ids appear as strings or bare numbers.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| id_string(v))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_task(dir: &tempfile::TempDir, file: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(file);
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{content}").unwrap();
        path
    }

    #[test]
    fn parses_complete_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(
            &dir,
            "7.json",
            r#"{"id":"7","subject":"Wire auth","status":"in_progress","owner":"lead","blockedBy":["3"],"blocks":["9"]}"#,
        );
        let t = parse_task_file(&path).unwrap();
        assert_eq!(t.id, "7");
        assert_eq!(t.subject, "Wire auth");
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.owner.as_deref(), Some("lead"));
        assert_eq!(t.blocked_by, vec!["3"]);
        assert_eq!(t.blocks, vec!["9"]);
    }

    #[test]
    fn id_from_filename_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(&dir, "42.json", r#"{"subject":"No id field"}"#);
        let t = parse_task_file(&path).unwrap();
        assert_eq!(t.id, "42");
    }

    #[test]
    fn numeric_id_normalized_to_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(&dir, "x.json", r#"{"id":12,"subject":"s"}"#);
        assert_eq!(parse_task_file(&path).unwrap().id, "12");
    }

    #[test]
    fn defaults_subject_untitled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(&dir, "1.json", r#"{"id":"1"}"#);
        assert_eq!(parse_task_file(&path).unwrap().subject, "Untitled");
    }

    #[test]
    fn deleted_normalizes_to_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(&dir, "1.json", r#"{"id":"1","status":"deleted"}"#);
        assert_eq!(parse_task_file(&path).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn unknown_status_normalizes_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(&dir, "1.json", r#"{"id":"1","status":"limbo"}"#);
        assert_eq!(parse_task_file(&path).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn none_on_empty_file_mid_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(&dir, "1.json", "");
        assert_eq!(parse_task_file(&path), None);
    }

    #[test]
    fn none_on_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_task(&dir, "1.json", "{oops");
        assert_eq!(parse_task_file(&path), None);
    }
}
