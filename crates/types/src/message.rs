// crates/types/src/message.rs
//! Inter-agent messages extracted from SendMessage tool calls.

use serde::{Deserialize, Serialize};

/// Maximum characters of message content kept for display.
pub const MAX_CONTENT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Message {
    /// Build a message, truncating content to `MAX_CONTENT_CHARS` characters.
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        content: &str,
        timestamp: i64,
    ) -> Self {
        let content = if content.chars().count() > MAX_CONTENT_CHARS {
            content.chars().take(MAX_CONTENT_CHARS).collect()
        } else {
            content.to_string()
        };
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            content,
            timestamp,
        }
    }
}
