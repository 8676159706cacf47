use super::{
    McpTransport, OutboundMessage, RawReply, MCP_JSON_AND_SSE_ACCEPT, MCP_JSON_CONTENT_TYPE,
    MCP_PROTOCOL_VERSION_HEADER, MCP_SESSION_ID_HEADER,
};
use crate::core::config::McpSettings;
use crate::mcp::error::McpError;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const MCP_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

fn build_mcp_http_client() -> Result<reqwest::Client, McpError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(MCP_HTTP_CONNECT_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| McpError::Network(err.to_string()))
}

fn apply_streamable_http_client_post_headers(
    request: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    request
        .header("Content-Type", MCP_JSON_CONTENT_TYPE)
        .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
        .header("Cache-Control", "no-cache")
}

fn apply_streamable_http_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: &str,
) -> reqwest::RequestBuilder {
    if protocol_version.trim().is_empty() {
        request
    } else {
        request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
    }
}

/// Streamable HTTP transport: every message is a POST to one endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    headers: BTreeMap<String, String>,
}

impl HttpTransport {
    pub fn new(settings: &McpSettings) -> Result<Self, McpError> {
        let base_url = settings.base_url.trim();
        if base_url.is_empty() {
            return Err(McpError::Network(
                "MCP base_url is required for HTTP transports.".to_string(),
            ));
        }
        Ok(Self {
            client: build_mcp_http_client()?,
            base_url: base_url.to_string(),
            headers: settings.headers.clone(),
        })
    }

    fn apply_configured_headers(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn probe(&self, timeout: Duration) -> Result<(), McpError> {
        debug!(url = %self.base_url, "Probing MCP endpoint");
        let request = self
            .apply_configured_headers(self.client.get(&self.base_url))
            .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
            .timeout(timeout);

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                McpError::Timeout {
                    method: "liveness probe".to_string(),
                    after: timeout,
                }
            } else {
                McpError::Network(err.to_string())
            }
        })?;

        // Streamable endpoints commonly reject GET with 4xx; only 5xx means down.
        let status = response.status();
        if status.is_server_error() {
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }

    async fn post(&self, message: OutboundMessage) -> Result<RawReply, McpError> {
        debug!(
            url = %self.base_url,
            method = %message.method,
            has_session = message.session_id.is_some(),
            "Sending MCP HTTP request"
        );
        let mut request = apply_streamable_http_protocol_version_header(
            apply_streamable_http_client_post_headers(
                self.apply_configured_headers(self.client.post(&self.base_url)),
            ),
            &message.protocol_version,
        )
        .body(message.payload);

        if let Some(session_id) = &message.session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let response = request
            .send()
            .await
            .map_err(|err| McpError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let session_id = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| McpError::Network(err.to_string()))?;
            body.extend_from_slice(&chunk);
        }

        Ok(RawReply {
            session_id,
            content_type,
            body,
        })
    }
}
