// crates/core/src/lib.rs
//! agent-town core library.
//!
//! Pure parsers and I/O helpers shared by the server: the JSONL transcript
//! line classifier, session metadata extraction, team-config and task-file
//! readers, the tool-action describer, role inference, incremental/backward
//! file readers, and the git probe (exec injected for testability).

pub mod describe;
pub mod git;
pub mod metadata;
pub mod paths;
pub mod roles;
pub mod tail;
pub mod tasks;
pub mod team;
pub mod transcript;

pub use describe::describe_tool_action;
pub use metadata::{parse_session_metadata, SessionMetadata};
pub use roles::infer_role;
pub use tasks::parse_task_file;
pub use team::{parse_team_config, TeamConfig, TeamMember};
pub use transcript::{parse_timestamp_ms, parse_transcript_line, ParsedLine};
