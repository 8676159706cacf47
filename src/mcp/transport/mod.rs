//! Transport seam for the MCP session client.
//!
//! The client builds JSON-RPC envelopes and interprets replies; a transport
//! only moves bytes and surfaces the out-of-band session metadata. The HTTP
//! implementation lives in [`http`], response-body decoding in
//! [`streamable_http`].

use crate::mcp::error::McpError;
use async_trait::async_trait;
use std::time::Duration;

pub mod http;
pub mod streamable_http;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// A serialized JSON-RPC message ready to be posted.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// JSON-RPC method, carried for logging only.
    pub method: String,
    pub payload: String,
    pub session_id: Option<String>,
    pub protocol_version: String,
}

/// The raw answer to an [`OutboundMessage`].
#[derive(Debug, Clone)]
pub struct RawReply {
    /// Session id issued through the response headers, if any.
    pub session_id: Option<String>,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[async_trait]
/// Transport contract required by the MCP session client.
pub trait McpTransport: Send + Sync {
    /// Checks that the endpoint answers at all, within `timeout`.
    async fn probe(&self, timeout: Duration) -> Result<(), McpError>;

    /// Posts one message and returns the complete reply.
    ///
    /// A non-success status must surface as [`McpError::HttpStatus`] and a
    /// failed round-trip as [`McpError::Network`].
    async fn post(&self, message: OutboundMessage) -> Result<RawReply, McpError>;
}
