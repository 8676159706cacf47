use serde::Deserialize;
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Failure causes surfaced by the MCP session client.
///
/// Callers usually only display these; the variants exist so that a timeout
/// can be told apart from a dropped connection when diagnosing a call.
#[derive(Debug, Clone, PartialEq)]
pub enum McpError {
    /// The client has not been initialized or was disconnected.
    NotConnected,
    /// The requested tool is absent from the catalogue.
    ToolNotFound { name: String, available: Vec<String> },
    /// The call did not finish within the configured timeout.
    Timeout { method: String, after: Duration },
    /// The caller cancelled the call.
    Cancelled { method: String },
    /// The request never produced an HTTP response.
    Network(String),
    /// The server answered with a non-success status.
    HttpStatus { status: u16, body: String },
    /// The server answered with a JSON-RPC error object.
    Rpc(RpcError),
    /// A streamed body contained no parseable frame.
    NoFrame,
    /// The body could not be decoded as a JSON-RPC response.
    Decode(String),
    /// The outbound message could not be built.
    Encode(String),
}

impl McpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::NotConnected => write!(f, "MCP server is not connected."),
            McpError::ToolNotFound { name, available } => {
                write!(
                    f,
                    "Tool '{}' was not found. Available tools: {}",
                    name,
                    available.join(", ")
                )
            }
            McpError::Timeout { method, after } => write!(
                f,
                "Request timed out after {}ms: MCP server did not answer {}.",
                after.as_millis(),
                method
            ),
            McpError::Cancelled { method } => write!(f, "MCP {method} request was cancelled."),
            McpError::Network(message) => {
                write!(f, "Could not reach the MCP server: {message}")
            }
            McpError::HttpStatus { status, body } => {
                if body.trim().is_empty() {
                    write!(f, "HTTP error: {status}")
                } else {
                    write!(f, "HTTP error: {status} - {}", body.trim())
                }
            }
            McpError::Rpc(error) => f.write_str(&format_rpc_error(error)),
            McpError::NoFrame => write!(f, "No parseable frame in event-stream response."),
            McpError::Decode(message) => write!(f, "Invalid MCP response: {message}"),
            McpError::Encode(message) => write!(f, "Failed to encode MCP request: {message}"),
        }
    }
}

impl StdError for McpError {}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl From<RpcError> for McpError {
    fn from(error: RpcError) -> Self {
        McpError::Rpc(error)
    }
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}
