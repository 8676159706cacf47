use crate::core::config::McpSettings;
use crate::mcp::error::McpError;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
};
use rust_mcp_schema::{
    CallToolRequestParams, ClientCapabilities, Implementation, InitializeRequestParams,
    InitializeResult, PaginatedRequestParams, RequestId,
};
use serde_json::Value;

pub(crate) fn requested_protocol_version(settings: &McpSettings) -> String {
    settings.protocol_version.trim().to_string()
}

pub(crate) fn effective_protocol_version(
    settings: &McpSettings,
    negotiated_version: Option<&str>,
) -> String {
    match negotiated_version {
        Some(version) if !version.trim().is_empty() => version.to_string(),
        _ => requested_protocol_version(settings),
    }
}

pub(crate) fn client_details_for(settings: &McpSettings) -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: settings.client_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Parley MCP Client".to_string()),
            description: Some("Parley voice session tool client".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: requested_protocol_version(settings),
    }
}

pub(crate) fn list_tools_request(cursor: Option<String>) -> RequestFromClient {
    RequestFromClient::ListToolsRequest(cursor.map(|cursor| PaginatedRequestParams {
        cursor: Some(cursor),
        meta: None,
    }))
}

/// Builds a `tools/call` request. `arguments` must be a JSON object or null.
pub(crate) fn call_tool_request(
    name: &str,
    arguments: Value,
) -> Result<RequestFromClient, McpError> {
    let mut params = CallToolRequestParams::new(name);
    match arguments {
        Value::Null => {}
        Value::Object(arguments) => params = params.with_arguments(arguments),
        other => {
            return Err(McpError::Encode(format!(
                "tool arguments must be a JSON object, got {other}"
            )))
        }
    }
    Ok(RequestFromClient::CallToolRequest(params))
}

pub(crate) fn method_name(request: &RequestFromClient) -> &'static str {
    match request {
        RequestFromClient::InitializeRequest(_) => "initialize",
        RequestFromClient::ListToolsRequest(_) => "tools/list",
        RequestFromClient::CallToolRequest(_) => "tools/call",
        _ => "request",
    }
}

pub(crate) fn request_payload(request: RequestFromClient, id: i64) -> Result<String, McpError> {
    let message = ClientMessage::from_message(
        MessageFromClient::RequestFromClient(request),
        Some(RequestId::Integer(id)),
    )
    .map_err(|err| McpError::Encode(err.to_string()))?;
    serde_json::to_string(&message).map_err(|err| McpError::Encode(err.to_string()))
}

pub(crate) fn initialized_notification_payload() -> Result<String, McpError> {
    let message = ClientMessage::from_message(
        MessageFromClient::NotificationFromClient(
            NotificationFromClient::InitializedNotification(None),
        ),
        None,
    )
    .map_err(|err| McpError::Encode(err.to_string()))?;
    serde_json::to_string(&message).map_err(|err| McpError::Encode(err.to_string()))
}

pub(crate) fn parse_initialize_result(value: Value) -> Result<InitializeResult, McpError> {
    let result = serde_json::from_value::<InitializeResult>(value)
        .map_err(|err| McpError::Decode(err.to_string()))?;
    if result.protocol_version.trim().is_empty() {
        return Err(McpError::Decode("Unexpected initialize response.".to_string()));
    }
    Ok(result)
}
