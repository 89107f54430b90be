// crates/types/src/lib.rs
//! Shared data model for agent-town.
//!
//! Everything the Registry owns — agents, sessions, tasks, messages — plus the
//! typed deltas it emits and the WebSocket wire frames derived from them.
//! All wire-facing structs serialize camelCase; the frontend expects camelCase
//! everywhere.

pub mod agent;
pub mod delta;
pub mod message;
pub mod session;
pub mod task;
pub mod wire;

pub use agent::{Agent, AgentRole, AgentStatus, RecentAction, WaitingType};
pub use delta::Delta;
pub use message::Message;
pub use session::{team_session_id, Session};
pub use task::{Task, TaskStatus};
pub use wire::{ClientFrame, FullState, ServerFrame, SessionSummary};
