//! MCP session client.
//!
//! Owns the handshake (`probe → initialize → notifications/initialized →
//! tools/list`), the session id issued by the server, the tool catalogue, and
//! the request-id counter. Any handshake failure leaves the client `Degraded`
//! with the configured fallback catalogue so agent code still has a tool
//! surface to reason about.

use crate::core::config::McpSettings;
use crate::mcp::error::McpError;
use crate::mcp::tools::{ToolCallOutput, ToolCallResponse, ToolDescriptor, ToolListPage};
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::streamable_http::decode_reply;
use crate::mcp::transport::{McpTransport, OutboundMessage, RawReply};
use rust_mcp_schema::schema_utils::RequestFromClient;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) mod protocol;

/// Upper bound on catalogue size when following `nextCursor`.
pub const MCP_MAX_TOOL_LIST: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Initializing,
    Connected,
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Initializing => "INITIALIZING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Degraded => "DEGRADED",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the client state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct McpSnapshot {
    pub connection: ConnectionState,
    pub session_id: Option<String>,
    pub negotiated_protocol_version: Option<String>,
    pub tools: Vec<ToolDescriptor>,
    /// Why the last handshake ended degraded, if it did.
    pub last_error: Option<String>,
}

/// Outcome of [`McpSessionClient::test_connection`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    pub tools: Vec<String>,
}

pub struct McpSessionClient {
    settings: McpSettings,
    transport: Arc<dyn McpTransport>,
    next_request_id: AtomicI64,
    state: RwLock<McpSnapshot>,
}

impl McpSessionClient {
    pub fn new(settings: McpSettings, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            settings,
            transport,
            next_request_id: AtomicI64::new(1),
            state: RwLock::new(McpSnapshot::default()),
        }
    }

    /// Builds a client that talks streamable HTTP to `settings.base_url`.
    pub fn with_http(settings: McpSettings) -> Result<Self, McpError> {
        let transport = HttpTransport::new(&settings)?;
        Ok(Self::new(settings, Arc::new(transport)))
    }

    pub fn settings(&self) -> &McpSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> McpSnapshot {
        self.state.read().await.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.read().await.session_id.clone()
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.state.read().await.tools.clone()
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .tools
            .iter()
            .map(|tool| tool.name.clone())
            .collect()
    }

    /// Runs the full handshake and returns the resulting state, which is
    /// either `Connected` or `Degraded`.
    pub async fn initialize(&self) -> ConnectionState {
        {
            let mut state = self.state.write().await;
            *state = McpSnapshot {
                connection: ConnectionState::Initializing,
                ..McpSnapshot::default()
            };
        }
        info!(url = %self.settings.base_url, "Initializing MCP session");

        let outcome = self.handshake().await;
        let mut state = self.state.write().await;
        if state.connection != ConnectionState::Initializing {
            debug!("MCP handshake finished after the client was reset");
            return state.connection;
        }
        match outcome {
            Ok(tools) => {
                info!(
                    tools = tools.len(),
                    session_id = state.session_id.as_deref().unwrap_or("-"),
                    "MCP session connected"
                );
                state.tools = tools;
                state.connection = ConnectionState::Connected;
            }
            Err(err) => {
                warn!(error = %err, "MCP handshake failed; using fallback tool catalogue");
                state.tools = self
                    .settings
                    .fallback_tools
                    .iter()
                    .map(ToolDescriptor::from)
                    .collect();
                state.last_error = Some(err.to_string());
                state.connection = ConnectionState::Degraded;
            }
        }
        state.connection
    }

    /// Drops the session and replays the handshake. Returns true when the
    /// client ends up fully connected.
    pub async fn reconnect(&self) -> bool {
        self.disconnect().await;
        self.initialize().await == ConnectionState::Connected
    }

    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        if state.connection != ConnectionState::Disconnected {
            info!("MCP session disconnected");
        }
        *state = McpSnapshot::default();
    }

    /// Initializes when needed and reports whether the server is usable.
    pub async fn test_connection(&self) -> ConnectionReport {
        if self.connection_state().await == ConnectionState::Disconnected {
            self.initialize().await;
        }
        let snapshot = self.snapshot().await;
        let tools = snapshot
            .tools
            .iter()
            .map(|tool| tool.name.clone())
            .collect::<Vec<_>>();
        match snapshot.connection {
            ConnectionState::Connected => ConnectionReport {
                success: true,
                message: format!("Connected to MCP server: {} tools available.", tools.len()),
                tools,
            },
            state => ConnectionReport {
                success: false,
                message: format!(
                    "MCP server unavailable ({}): {}",
                    state,
                    snapshot
                        .last_error
                        .as_deref()
                        .unwrap_or("handshake has not completed")
                ),
                tools,
            },
        }
    }

    /// Calls a tool and folds any failure into the response shape.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolCallResponse {
        ToolCallResponse::from_result(self.try_call_tool(name, arguments).await)
    }

    /// Like [`Self::call_tool`], but gives up as soon as `cancel_token` fires.
    pub async fn call_tool_with_cancel(
        &self,
        name: &str,
        arguments: Value,
        cancel_token: &CancellationToken,
    ) -> ToolCallResponse {
        let result = tokio::select! {
            _ = cancel_token.cancelled() => Err(McpError::Cancelled {
                method: "tools/call".to_string(),
            }),
            result = self.try_call_tool(name, arguments) => result,
        };
        ToolCallResponse::from_result(result)
    }

    pub async fn try_call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallOutput, McpError> {
        {
            let state = self.state.read().await;
            if state.connection == ConnectionState::Disconnected {
                return Err(McpError::NotConnected);
            }
            if !state.tools.iter().any(|tool| tool.name == name) {
                return Err(McpError::ToolNotFound {
                    name: name.to_string(),
                    available: state.tools.iter().map(|tool| tool.name.clone()).collect(),
                });
            }
        }

        let request = protocol::call_tool_request(name, arguments)?;
        debug!(tool = %name, "Calling MCP tool");
        let result = self.send_request(request).await?;
        Ok(ToolCallOutput::from_result(result))
    }

    async fn handshake(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let probe_timeout = self.settings.probe_timeout();
        match tokio::time::timeout(probe_timeout, self.transport.probe(probe_timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(McpError::Timeout {
                    method: "liveness probe".to_string(),
                    after: probe_timeout,
                })
            }
        }

        let initialize = RequestFromClient::InitializeRequest(protocol::client_details_for(
            &self.settings,
        ));
        let result = protocol::parse_initialize_result(self.send_request(initialize).await?)?;
        let session_id = {
            let mut state = self.state.write().await;
            state.negotiated_protocol_version = Some(result.protocol_version);
            state.session_id.clone()
        };

        if session_id.is_some() {
            let payload = protocol::initialized_notification_payload()?;
            self.post_with_timeout("notifications/initialized", payload)
                .await?;
        } else {
            warn!("MCP server issued no session id; skipping initialized notification");
        }

        self.fetch_tool_catalogue().await
    }

    async fn fetch_tool_catalogue(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let value = self
                .send_request(protocol::list_tools_request(cursor.take()))
                .await?;
            let page: ToolListPage =
                serde_json::from_value(value).map_err(|err| McpError::Decode(err.to_string()))?;
            let page_was_empty = page.tools.is_empty();
            tools.extend(page.tools);
            if tools.len() >= MCP_MAX_TOOL_LIST {
                tools.truncate(MCP_MAX_TOOL_LIST);
                break;
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() && !page_was_empty => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn send_request(&self, request: RequestFromClient) -> Result<Value, McpError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let method = protocol::method_name(&request);
        let payload = protocol::request_payload(request, request_id)?;
        debug!(method, request_id, "Sending MCP request");
        let reply = self.post_with_timeout(method, payload).await?;
        decode_reply(&reply, Some(request_id))
    }

    async fn post_with_timeout(&self, method: &str, payload: String) -> Result<RawReply, McpError> {
        let (session_id, protocol_version) = {
            let state = self.state.read().await;
            (
                state.session_id.clone(),
                protocol::effective_protocol_version(
                    &self.settings,
                    state.negotiated_protocol_version.as_deref(),
                ),
            )
        };
        let message = OutboundMessage {
            method: method.to_string(),
            payload,
            session_id,
            protocol_version,
        };

        let timeout = self.settings.request_timeout();
        let reply = match tokio::time::timeout(timeout, self.transport.post(message)).await {
            Ok(reply) => reply?,
            Err(_) => return Err(timeout_error(method, timeout)),
        };

        if let Some(session_id) = &reply.session_id {
            let mut state = self.state.write().await;
            if state.connection != ConnectionState::Disconnected
                && state.session_id.as_deref() != Some(session_id.as_str())
            {
                debug!(session_id = %session_id, "Captured MCP session id");
                state.session_id = Some(session_id.clone());
            }
        }
        Ok(reply)
    }
}

fn timeout_error(method: &str, after: Duration) -> McpError {
    warn!(method, timeout_ms = after.as_millis() as u64, "MCP request timed out");
    McpError::Timeout {
        method: method.to_string(),
        after,
    }
}

#[cfg(test)]
mod tests;
