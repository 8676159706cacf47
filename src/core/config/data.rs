use crate::core::constants::{
    DEFAULT_MCP_BASE_URL, DEFAULT_MCP_CLIENT_NAME, DEFAULT_MCP_PROBE_TIMEOUT_MS,
    DEFAULT_MCP_PROTOCOL_VERSION, DEFAULT_MCP_RETRY_ATTEMPTS, DEFAULT_MCP_TIMEOUT_MS,
    FALLBACK_TOOLS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A tool descriptor as written in the config file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FallbackTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Connection settings for the remote tool server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct McpSettings {
    pub base_url: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Timeout for the liveness probe that precedes the handshake
    pub probe_timeout_ms: u64,
    /// How many times callers may reconnect and retry a failed call
    pub retry_attempts: u32,
    pub protocol_version: String,
    pub client_name: String,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// Catalogue advertised while the server is unreachable
    pub fallback_tools: Vec<FallbackTool>,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MCP_BASE_URL.to_string(),
            timeout_ms: DEFAULT_MCP_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_MCP_PROBE_TIMEOUT_MS,
            retry_attempts: DEFAULT_MCP_RETRY_ATTEMPTS,
            protocol_version: DEFAULT_MCP_PROTOCOL_VERSION.to_string(),
            client_name: DEFAULT_MCP_CLIENT_NAME.to_string(),
            headers: BTreeMap::from([(
                "User-Agent".to_string(),
                format!("parley/{}", env!("CARGO_PKG_VERSION")),
            )]),
            fallback_tools: FALLBACK_TOOLS
                .iter()
                .map(|(name, description)| FallbackTool {
                    name: (*name).to_string(),
                    description: (*description).to_string(),
                })
                .collect(),
        }
    }
}

/// Conversation settings consumed by the session controller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SessionSettings {
    /// Agent identities a handoff may resolve to
    pub agents: Vec<String>,
    /// Root agent for new sessions; the first entry of `agents` when unset
    pub default_agent: Option<String>,
    /// Disable server-side voice activity detection and rely on push-to-talk
    pub push_to_talk: bool,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
