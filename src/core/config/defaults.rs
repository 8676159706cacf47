use crate::core::config::data::{Config, McpSettings, SessionSettings};
use crate::core::constants::MCP_URL_ENV;
use std::time::Duration;

impl McpSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

impl SessionSettings {
    /// The agent a new session starts with. An explicit default wins when it
    /// names a known agent (case-insensitive); otherwise the first known agent.
    pub fn root_agent(&self) -> Option<&str> {
        if let Some(default) = self.default_agent.as_deref() {
            if self.agents.is_empty() {
                return Some(default);
            }
            if let Some(known) = self
                .agents
                .iter()
                .find(|agent| agent.eq_ignore_ascii_case(default))
            {
                return Some(known.as_str());
            }
        }
        self.agents.first().map(String::as_str)
    }
}

impl Config {
    /// Applies environment overrides on top of file-backed values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(MCP_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.mcp.base_url = url.to_string();
            }
        }
    }
}
