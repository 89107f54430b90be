// crates/core/src/describe.rs
//! Human-readable labels for tool invocations.
//!
//! Turns a tool name plus its duck-typed input object into a short activity
//! string ("Editing main.rs", "Running: cargo test"). Labels cap at 60 chars.

use serde_json::Value;

/// Overall cap on a describer label.
const MAX_LABEL_CHARS: usize = 60;

/// Cap on the command head embedded in a Bash label.
const MAX_CMD_CHARS: usize = 50;

/// Produce a ≤60-char activity label for a tool call.
///
/// Unknown tools fall through to the raw tool name.
pub fn describe_tool_action(name: &str, input: &Value) -> String {
    let label = match name {
        "Edit" => format!("Editing {}", file_basename(input)),
        "Write" => format!("Writing {}", file_basename(input)),
        "Read" => format!("Reading {}", file_basename(input)),
        "Bash" => match str_field(input, "description") {
            Some(desc) if !desc.is_empty() => desc.to_string(),
            _ => format!("Running: {}", command_head(input)),
        },
        "Grep" | "Glob" => format!(
            "Searching: {}",
            str_field(input, "pattern").unwrap_or_default()
        ),
        "Task" => format!(
            "Spawning: {}",
            str_field(input, "description").unwrap_or_default()
        ),
        "TaskCreate" => format!(
            "Creating task: {}",
            str_field(input, "subject").unwrap_or_default()
        ),
        "TaskUpdate" => format!(
            "Updating task → {}",
            str_field(input, "status").unwrap_or("updated")
        ),
        "WebSearch" => format!(
            "Searching web: {}",
            str_field(input, "query").unwrap_or_default()
        ),
        "WebFetch" => format!("Fetching {}", str_field(input, "url").unwrap_or_default()),
        other => other.to_string(),
    };
    truncate_chars(&label, MAX_LABEL_CHARS)
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

/// Basename of the `file_path` input, or empty.
fn file_basename(input: &Value) -> String {
    str_field(input, "file_path")
        .map(|p| {
            p.rsplit(['/', '\\'])
                .next()
                .unwrap_or(p)
                .to_string()
        })
        .unwrap_or_default()
}

/// First segment of the Bash command (up to `&&` or `|`), capped at 50 chars.
fn command_head(input: &Value) -> String {
    let cmd = str_field(input, "command").unwrap_or_default();
    let head = cmd
        .split("&&")
        .next()
        .unwrap_or(cmd)
        .split('|')
        .next()
        .unwrap_or(cmd)
        .trim();
    truncate_chars(head, MAX_CMD_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn edit_write_read_use_basename() {
        assert_eq!(
            describe_tool_action("Edit", &json!({"file_path": "/src/app/main.rs"})),
            "Editing main.rs"
        );
        assert_eq!(
            describe_tool_action("Write", &json!({"file_path": "/x/y.ts"})),
            "Writing y.ts"
        );
        assert_eq!(
            describe_tool_action("Read", &json!({"file_path": "README.md"})),
            "Reading README.md"
        );
    }

    #[test]
    fn bash_prefers_description() {
        assert_eq!(
            describe_tool_action(
                "Bash",
                &json!({"command": "ls -la", "description": "List files"})
            ),
            "List files"
        );
    }

    #[test]
    fn bash_falls_back_to_command_head() {
        assert_eq!(
            describe_tool_action("Bash", &json!({"command": "cargo test && cargo build"})),
            "Running: cargo test"
        );
        assert_eq!(
            describe_tool_action("Bash", &json!({"command": "cat foo | grep bar"})),
            "Running: cat foo"
        );
    }

    #[test]
    fn bash_command_head_caps_at_fifty() {
        let cmd = "a".repeat(120);
        let label = describe_tool_action("Bash", &json!({ "command": cmd }));
        assert_eq!(label, format!("Running: {}", "a".repeat(50)));
    }

    #[test]
    fn search_tools() {
        assert_eq!(
            describe_tool_action("Grep", &json!({"pattern": "fn main"})),
            "Searching: fn main"
        );
        assert_eq!(
            describe_tool_action("Glob", &json!({"pattern": "**/*.rs"})),
            "Searching: **/*.rs"
        );
    }

    #[test]
    fn task_tools() {
        assert_eq!(
            describe_tool_action("Task", &json!({"description": "Research API"})),
            "Spawning: Research API"
        );
        assert_eq!(
            describe_tool_action("TaskCreate", &json!({"subject": "Fix login"})),
            "Creating task: Fix login"
        );
        assert_eq!(
            describe_tool_action("TaskUpdate", &json!({"status": "completed"})),
            "Updating task → completed"
        );
        assert_eq!(
            describe_tool_action("TaskUpdate", &json!({})),
            "Updating task → updated"
        );
    }

    #[test]
    fn web_tools() {
        assert_eq!(
            describe_tool_action("WebSearch", &json!({"query": "rust notify crate"})),
            "Searching web: rust notify crate"
        );
        assert_eq!(
            describe_tool_action("WebFetch", &json!({"url": "https://docs.rs"})),
            "Fetching https://docs.rs"
        );
    }

    #[test]
    fn unknown_tool_passes_through() {
        assert_eq!(
            describe_tool_action("CustomMcpTool", &json!({})),
            "CustomMcpTool"
        );
    }

    #[test]
    fn label_caps_at_sixty() {
        let input = json!({ "file_path": format!("/{}", "b".repeat(100)) });
        let label = describe_tool_action("Edit", &input);
        assert_eq!(label.chars().count(), 60);
        assert!(label.starts_with("Editing b"));
    }
}
