//! Agent identities and `transfer_to_<agent>` handoff detection.
//!
//! Handoffs are performed by the remote session; this only mirrors which
//! agent is currently speaking so that callers can display it.

const HANDOFF_PREFIX: &str = "transfer_to_";

/// Returns the candidate agent named by a `transfer_to_<agent>` tool call.
pub fn parse_handoff_target(tool_name: &str) -> Option<&str> {
    tool_name
        .strip_prefix(HANDOFF_PREFIX)
        .filter(|candidate| !candidate.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRoster {
    known: Vec<String>,
    active: Option<String>,
}

impl AgentRoster {
    pub fn new(known: Vec<String>, active: Option<String>) -> Self {
        Self { known, active }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Finds a known agent by case-insensitive name.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.known
            .iter()
            .find(|agent| agent.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Switches the active agent when `tool_name` is a handoff to a known
    /// agent other than the current one. Returns the new active agent.
    pub fn resolve_handoff(&mut self, tool_name: &str) -> Option<String> {
        let candidate = parse_handoff_target(tool_name)?;
        let agent = self.find(candidate)?.to_string();
        if self.active.as_deref() == Some(agent.as_str()) {
            return None;
        }
        self.active = Some(agent.clone());
        Some(agent)
    }

    /// Explicit selection. Unknown names are rejected when the roster is
    /// non-empty.
    pub fn select(&mut self, name: &str) -> Result<String, String> {
        let agent = if self.known.is_empty() {
            name.trim().to_string()
        } else {
            self.find(name.trim())
                .map(str::to_string)
                .ok_or_else(|| {
                    format!(
                        "Unknown agent '{}'. Known agents: {}",
                        name.trim(),
                        self.known.join(", ")
                    )
                })?
        };
        if agent.is_empty() {
            return Err("Agent name must not be empty.".to_string());
        }
        self.active = Some(agent.clone());
        Ok(agent)
    }
}
