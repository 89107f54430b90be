// crates/core/src/roles.rs
//! Role inference from agent type and name substrings.

use agent_town_types::AgentRole;

/// Infer a role bucket from an agent's type and display name.
///
/// Case-insensitive substring match over the concatenation of both, with
/// fixed precedence: lead > researcher > tester > planner > implementer.
/// The precedence order is part of the contract — "test-lead" is a lead,
/// not a tester.
pub fn infer_role(agent_type: &str, name: &str) -> AgentRole {
    let haystack = format!("{agent_type} {name}").to_lowercase();

    if haystack.contains("team-lead") || haystack.contains("lead") {
        AgentRole::Lead
    } else if haystack.contains("research")
        || haystack.contains("explore")
        || haystack.contains("architect")
    {
        AgentRole::Researcher
    } else if haystack.contains("test") || haystack.contains("validat") {
        AgentRole::Tester
    } else if haystack.contains("plan")
        || haystack.contains("design")
        || haystack.contains("artist")
        || haystack.contains("scribe")
    {
        AgentRole::Planner
    } else {
        AgentRole::Implementer
    }
}
