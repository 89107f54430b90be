// crates/core/src/transcript.rs
//! JSONL transcript line classifier.
//!
//! The host appends one JSON object per line. Lines carry wildly different
//! shapes: wrapped API messages, system boundary markers, progress entries,
//! tool results. This module classifies a raw line into a [`ParsedLine`]
//! variant the watcher can act on.
//!
//! SIMD substring pre-filters (`memchr`) skip the full JSON parse for lines
//! that cannot possibly be interesting; everything else goes through
//! `serde_json` and duck-typed field extraction. Tool-use blocks are
//! discovered in three positional layouts: top-level `content[]`, a top-level
//! `type == "tool_use"` object, or nested `message.content[]`.

use memchr::memmem;
use serde_json::Value;
use std::sync::OnceLock;

use crate::describe::describe_tool_action;

/// An inter-agent message lifted from a SendMessage tool-use block.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    /// The tool-use block id when present (stable across replays), else a
    /// synthesized `from-to-timestamp` key.
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    /// Unix milliseconds; 0 when the line carried no timestamp.
    pub timestamp_ms: i64,
}

/// Classification of one transcript line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Inter-agent message extracted from a `SendMessage` tool call.
    Message(TranscriptMessage),
    /// A tool invocation by the agent.
    ToolCall {
        tool_name: String,
        label: String,
        /// True for tools that hand control to the user
        /// (AskUserQuestion, EnterPlanMode, ExitPlanMode).
        is_user_prompt: bool,
    },
    /// Conversation compaction boundary.
    Compact,
    /// Assistant is thinking or writing prose.
    Thinking { label: String },
    /// Host progress entry (command running, subagent working).
    Progress { label: String },
    /// End of a turn (`system`/`turn_duration`).
    TurnEnd,
    /// A tool result landed — the agent is between tool calls.
    AgentActivity,
    /// Valid JSON we don't recognize.
    Unknown,
}

/// Pre-compiled substring finders, built once per process.
struct LineFinders {
    tool_use: memmem::Finder<'static>,
    system: memmem::Finder<'static>,
    progress: memmem::Finder<'static>,
    tool_result: memmem::Finder<'static>,
    assistant: memmem::Finder<'static>,
    send_message: memmem::Finder<'static>,
}

fn finders() -> &'static LineFinders {
    static FINDERS: OnceLock<LineFinders> = OnceLock::new();
    FINDERS.get_or_init(|| LineFinders {
        tool_use: memmem::Finder::new(b"\"tool_use\""),
        system: memmem::Finder::new(b"\"system\""),
        progress: memmem::Finder::new(b"\"progress\""),
        tool_result: memmem::Finder::new(b"\"tool_result\""),
        assistant: memmem::Finder::new(b"\"assistant\""),
        send_message: memmem::Finder::new(b"\"SendMessage"),
    })
}

/// Parse an ISO-8601 timestamp into unix milliseconds.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Classify a single transcript line.
///
/// Returns `None` for blank lines, corrupt JSON, and non-object JSON
/// (arrays, null, scalars) — callers skip those and continue. Returns
/// `Some(ParsedLine::Unknown)` for well-formed objects we don't recognize.
pub fn parse_transcript_line(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return None;
    }

    let raw = trimmed.as_bytes();
    let f = finders();

    // Cheap bail-out: a line with none of the interesting needles can only
    // classify as Unknown, and most transcript bulk (plain user prompts,
    // summaries) lands here without paying for a full parse.
    let interesting = f.tool_use.find(raw).is_some()
        || f.system.find(raw).is_some()
        || f.progress.find(raw).is_some()
        || f.tool_result.find(raw).is_some()
        || f.assistant.find(raw).is_some()
        || f.send_message.find(raw).is_some();
    if !interesting {
        // Still reject malformed JSON so callers can count skipped lines.
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(v) if v.is_object() => Some(ParsedLine::Unknown),
            _ => None,
        };
    }

    let value: Value = serde_json::from_str(trimmed).ok()?;
    if !value.is_object() {
        return None;
    }

    let line_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    match line_type {
        "system" => {
            let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("");
            return Some(match subtype {
                "compact_boundary" | "microcompact_boundary" => ParsedLine::Compact,
                "turn_duration" => ParsedLine::TurnEnd,
                _ => ParsedLine::Unknown,
            });
        }
        "progress" => return Some(ParsedLine::Progress { label: progress_label(&value) }),
        "tool_result" | "tool_output" => return Some(ParsedLine::AgentActivity),
        _ => {}
    }

    // Tool-use blocks take precedence over thinking/text classification:
    // an assistant line that calls a tool *is* that tool call.
    let blocks = collect_tool_use_blocks(&value);
    if !blocks.is_empty() {
        for &block in &blocks {
            let name = block.get("name").and_then(Value::as_str).unwrap_or("");
            if name == "SendMessage" || name == "SendMessageTool" {
                return parse_send_message(&value, block);
            }
        }
        let block = blocks[0];
        let name = block.get("name").and_then(Value::as_str).unwrap_or("");
        let empty = Value::Object(Default::default());
        let input = block.get("input").unwrap_or(&empty);
        return Some(ParsedLine::ToolCall {
            tool_name: name.to_string(),
            label: describe_tool_action(name, input),
            is_user_prompt: matches!(
                name,
                "AskUserQuestion" | "EnterPlanMode" | "ExitPlanMode"
            ),
        });
    }

    // User lines carrying a tool_result content block are activity markers.
    if line_type == "user" && has_tool_result_block(&value) {
        return Some(ParsedLine::AgentActivity);
    }

    if line_type == "assistant" {
        if let Some(first) = first_content_block_type(&value) {
            return Some(match first.as_str() {
                "thinking" => ParsedLine::Thinking {
                    label: "Thinking...".to_string(),
                },
                "text" => ParsedLine::Thinking {
                    label: "Responding...".to_string(),
                },
                _ => ParsedLine::Unknown,
            });
        }
    }

    Some(ParsedLine::Unknown)
}

/// Progress labels keyed off the embedded progress kind.
fn progress_label(value: &Value) -> String {
    let kind = value
        .get("subtype")
        .and_then(Value::as_str)
        .or_else(|| {
            value
                .get("data")
                .and_then(|d| d.get("type"))
                .and_then(Value::as_str)
        })
        .unwrap_or("");
    match kind {
        "bash_progress" | "command_progress" => "Running command...",
        "agent_progress" => "Agent working...",
        _ => "Processing...",
    }
    .to_string()
}

/// Find tool_use blocks in the three layouts the host emits.
fn collect_tool_use_blocks(value: &Value) -> Vec<&Value> {
    let mut blocks = Vec::new();

    // Layout 1: top-level content[]
    if let Some(content) = value.get("content").and_then(Value::as_array) {
        for item in content {
            if item.get("type").and_then(Value::as_str) == Some("tool_use") {
                blocks.push(item);
            }
        }
    }

    // Layout 2: the line itself is a tool_use object
    if value.get("type").and_then(Value::as_str) == Some("tool_use") {
        blocks.push(value);
    }

    // Layout 3: nested message.content[]
    if let Some(content) = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    {
        for item in content {
            if item.get("type").and_then(Value::as_str) == Some("tool_use") {
                blocks.push(item);
            }
        }
    }

    blocks
}

fn has_tool_result_block(value: &Value) -> bool {
    let content = value
        .get("content")
        .and_then(Value::as_array)
        .or_else(|| {
            value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
        });
    match content {
        Some(items) => items.iter().any(|item| {
            item.get("type").and_then(Value::as_str) == Some("tool_result")
        }),
        None => false,
    }
}

fn first_content_block_type(value: &Value) -> Option<String> {
    let content = value
        .get("content")
        .and_then(Value::as_array)
        .or_else(|| {
            value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
        })?;
    content
        .first()
        .and_then(|b| b.get("type"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Lift a message out of a SendMessage tool-use block.
///
/// Yields `None` when the sender name or (for direct messages) the recipient
/// is missing — the hook-side path owns those.
fn parse_send_message(line: &Value, block: &Value) -> Option<ParsedLine> {
    let input = block.get("input")?;
    let msg_type = input
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("message");
    if msg_type != "message" && msg_type != "broadcast" {
        return None;
    }

    let from = line
        .get("agentName")
        .or_else(|| line.get("agent_name"))
        .and_then(Value::as_str)?
        .to_string();

    let to = match input.get("recipient").and_then(Value::as_str) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ if msg_type == "broadcast" => "all".to_string(),
        _ => return None,
    };

    let content = input
        .get("content")
        .and_then(Value::as_str)
        .or_else(|| input.get("summary").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();

    let timestamp_ms = line
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp_ms)
        .unwrap_or(0);

    let id = block
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("{from}-{to}-{timestamp_ms}"));

    Some(ParsedLine::Message(TranscriptMessage {
        id,
        from,
        to,
        content,
        timestamp_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_blank_and_corrupt() {
        assert_eq!(parse_transcript_line(""), None);
        assert_eq!(parse_transcript_line("   "), None);
        assert_eq!(parse_transcript_line("{not json"), None);
        assert_eq!(parse_transcript_line("not json at all"), None);
    }

    #[test]
    fn rejects_arrays_and_null() {
        assert_eq!(parse_transcript_line("[1,2,3]"), None);
        assert_eq!(parse_transcript_line("null"), None);
        assert_eq!(parse_transcript_line("42"), None);
    }

    #[test]
    fn classifies_turn_end() {
        let line = r#"{"type":"system","subtype":"turn_duration","duration_ms":3000}"#;
        assert_eq!(parse_transcript_line(line), Some(ParsedLine::TurnEnd));
    }

    #[test]
    fn classifies_compact_boundaries() {
        let a = r#"{"type":"system","subtype":"compact_boundary"}"#;
        let b = r#"{"type":"system","subtype":"microcompact_boundary"}"#;
        assert_eq!(parse_transcript_line(a), Some(ParsedLine::Compact));
        assert_eq!(parse_transcript_line(b), Some(ParsedLine::Compact));
    }

    #[test]
    fn unknown_system_subtype() {
        let line = r#"{"type":"system","subtype":"mystery"}"#;
        assert_eq!(parse_transcript_line(line), Some(ParsedLine::Unknown));
    }

    #[test]
    fn classifies_progress_labels() {
        let bash = r#"{"type":"progress","subtype":"bash_progress"}"#;
        let agent = r#"{"type":"progress","data":{"type":"agent_progress"}}"#;
        let other = r#"{"type":"progress"}"#;
        assert_eq!(
            parse_transcript_line(bash),
            Some(ParsedLine::Progress {
                label: "Running command...".into()
            })
        );
        assert_eq!(
            parse_transcript_line(agent),
            Some(ParsedLine::Progress {
                label: "Agent working...".into()
            })
        );
        assert_eq!(
            parse_transcript_line(other),
            Some(ParsedLine::Progress {
                label: "Processing...".into()
            })
        );
    }

    #[test]
    fn classifies_tool_result_lines() {
        let top = r#"{"type":"tool_result","content":"ok"}"#;
        let out = r#"{"type":"tool_output"}"#;
        assert_eq!(parse_transcript_line(top), Some(ParsedLine::AgentActivity));
        assert_eq!(parse_transcript_line(out), Some(ParsedLine::AgentActivity));
    }

    #[test]
    fn classifies_user_tool_result_block() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1"}]}}"#;
        assert_eq!(parse_transcript_line(line), Some(ParsedLine::AgentActivity));
    }

    #[test]
    fn tool_call_from_nested_message_content() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Edit","input":{"file_path":"/a/b.rs"}}]}}"#;
        assert_eq!(
            parse_transcript_line(line),
            Some(ParsedLine::ToolCall {
                tool_name: "Edit".into(),
                label: "Editing b.rs".into(),
                is_user_prompt: false,
            })
        );
    }

    #[test]
    fn tool_call_from_top_level_content() {
        let line = r#"{"type":"assistant","content":[{"type":"tool_use","name":"Bash","input":{"command":"cargo check"}}]}"#;
        assert_eq!(
            parse_transcript_line(line),
            Some(ParsedLine::ToolCall {
                tool_name: "Bash".into(),
                label: "Running: cargo check".into(),
                is_user_prompt: false,
            })
        );
    }

    #[test]
    fn tool_call_from_bare_tool_use_line() {
        let line = r#"{"type":"tool_use","name":"Grep","input":{"pattern":"todo"}}"#;
        assert_eq!(
            parse_transcript_line(line),
            Some(ParsedLine::ToolCall {
                tool_name: "Grep".into(),
                label: "Searching: todo".into(),
                is_user_prompt: false,
            })
        );
    }

    #[test]
    fn user_prompt_tools_flagged() {
        for tool in ["AskUserQuestion", "EnterPlanMode", "ExitPlanMode"] {
            let line = format!(
                r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","name":"{tool}","input":{{}}}}]}}}}"#
            );
            match parse_transcript_line(&line) {
                Some(ParsedLine::ToolCall { is_user_prompt, .. }) => assert!(is_user_prompt),
                other => panic!("expected tool call for {tool}, got {other:?}"),
            }
        }
    }

    #[test]
    fn thinking_and_responding() {
        let think = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"}]}}"#;
        let text = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Here is"}]}}"#;
        assert_eq!(
            parse_transcript_line(think),
            Some(ParsedLine::Thinking {
                label: "Thinking...".into()
            })
        );
        assert_eq!(
            parse_transcript_line(text),
            Some(ParsedLine::Thinking {
                label: "Responding...".into()
            })
        );
    }

    #[test]
    fn send_message_direct() {
        let line = r#"{"type":"assistant","agentName":"lead","timestamp":"2026-01-05T10:00:00Z","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"SendMessage","input":{"type":"message","recipient":"tester","content":"please verify"}}]}}"#;
        match parse_transcript_line(line) {
            Some(ParsedLine::Message(m)) => {
                assert_eq!(m.id, "toolu_1");
                assert_eq!(m.from, "lead");
                assert_eq!(m.to, "tester");
                assert_eq!(m.content, "please verify");
                assert!(m.timestamp_ms > 0);
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn send_message_broadcast_defaults_recipient() {
        let line = r#"{"type":"assistant","agentName":"lead","message":{"content":[{"type":"tool_use","name":"SendMessageTool","input":{"type":"broadcast","content":"standup"}}]}}"#;
        match parse_transcript_line(line) {
            Some(ParsedLine::Message(m)) => assert_eq!(m.to, "all"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn send_message_missing_sender_yields_none() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"SendMessage","input":{"type":"message","recipient":"x","content":"hi"}}]}}"#;
        assert_eq!(parse_transcript_line(line), None);
    }

    #[test]
    fn send_message_missing_recipient_yields_none() {
        let line = r#"{"type":"assistant","agentName":"lead","message":{"content":[{"type":"tool_use","name":"SendMessage","input":{"type":"message","content":"hi"}}]}}"#;
        assert_eq!(parse_transcript_line(line), None);
    }

    #[test]
    fn send_message_falls_back_to_summary() {
        let line = r#"{"type":"assistant","agentName":"lead","message":{"content":[{"type":"tool_use","name":"SendMessage","input":{"type":"broadcast","summary":"short version"}}]}}"#;
        match parse_transcript_line(line) {
            Some(ParsedLine::Message(m)) => assert_eq!(m.content, "short version"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn plain_user_prompt_is_unknown() {
        let line = r#"{"type":"user","message":{"role":"user","content":"fix the bug"}}"#;
        assert_eq!(parse_transcript_line(line), Some(ParsedLine::Unknown));
    }

    #[test]
    fn timestamp_parsing() {
        assert_eq!(
            parse_timestamp_ms("2026-01-05T10:00:00Z"),
            Some(1767607200000)
        );
        assert_eq!(parse_timestamp_ms("garbage"), None);
    }
}
