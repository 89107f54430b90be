// crates/core/src/team.rs
//! Team configuration reader.
//!
//! `~/.claude/teams/<name>/config.json` describes the members of a team. The
//! reader is forgiving: a missing, empty, or malformed file yields `None`
//! (config files are rewritten in place; we may observe a mid-write state).

use std::path::Path;

use agent_town_types::AgentRole;
use serde_json::Value;

use crate::roles::infer_role;

/// One configured team member.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub agent_type: Option<String>,
}

/// Parsed team configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamConfig {
    pub name: Option<String>,
    pub members: Vec<TeamMember>,
}

/// Read and validate a team config file. `None` on any malformed input.
pub fn parse_team_config(path: &Path) -> Option<TeamConfig> {
    let raw = std::fs::read_to_string(path).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(&raw).ok()?;

    let members_raw = value.get("members")?.as_array()?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let mut members = Vec::with_capacity(members_raw.len());
    for member in members_raw {
        let id_field = member
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let name_field = member
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        // A member without id and name is unaddressable; skip it.
        let Some(id) = id_field.or(name_field) else {
            continue;
        };
        let member_name = name_field.unwrap_or(id);
        let agent_type = member
            .get("agentType")
            .or_else(|| member.get("type"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        members.push(TeamMember {
            id: id.to_string(),
            name: member_name.to_string(),
            role: infer_role(agent_type.as_deref().unwrap_or(""), member_name),
            agent_type,
        });
    }

    Some(TeamConfig { name, members })
}
