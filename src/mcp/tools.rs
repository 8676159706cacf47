//! Tool catalogue entries and tool-call results.

use crate::core::config::FallbackTool;
use crate::mcp::error::McpError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the tool catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(Map::new()));
    Value::Object(schema)
}

impl From<&FallbackTool> for ToolDescriptor {
    fn from(tool: &FallbackTool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: empty_object_schema(),
        }
    }
}

/// A page of `tools/list` results.
#[derive(Debug, Deserialize)]
pub(crate) struct ToolListPage {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

/// A content block of a tool result (`text`, `image`, `resource`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Successful tool-call payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutput {
    pub content: Vec<ToolContent>,
    /// The whole JSON-RPC `result` object.
    pub data: Value,
}

impl ToolCallOutput {
    pub(crate) fn from_result(result: Value) -> Self {
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            content,
            data: result,
        }
    }
}

/// The `{success, content?, data?, error?}` shape handed to agent code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ToolContent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn from_result(result: Result<ToolCallOutput, McpError>) -> Self {
        match result {
            Ok(output) => Self {
                success: true,
                content: Some(output.content),
                data: Some(output.data),
                error: None,
            },
            Err(err) => Self::failure(err.to_string()),
        }
    }

    /// Renders the response as display text.
    pub fn extract_text(&self) -> String {
        if !self.success {
            return self
                .error
                .clone()
                .unwrap_or_else(|| "The tool call failed.".to_string());
        }

        let content = match self.content.as_deref() {
            Some(content) if !content.is_empty() => content,
            _ => {
                return match &self.data {
                    Some(data) => pretty_json(data),
                    None => "The tool returned no content.".to_string(),
                };
            }
        };

        let text = content
            .iter()
            .filter(|item| item.kind == "text")
            .filter_map(|item| item.text.as_deref())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return serde_json::to_string_pretty(content).unwrap_or_default();
        }

        let trimmed = text.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Array(entries)) => return numbered_listing(&entries),
                Ok(parsed) => return pretty_json(&parsed),
                Err(_) => {}
            }
        }
        text
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn numbered_listing(entries: &[Value]) -> String {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::String(text) => format!("{}. {}", index + 1, text),
            other => format!("{}. {}", index + 1, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_response(texts: &[&str]) -> ToolCallResponse {
        let result = json!({
            "content": texts
                .iter()
                .map(|text| json!({"type": "text", "text": text}))
                .collect::<Vec<_>>(),
        });
        ToolCallResponse::from_result(Ok(ToolCallOutput::from_result(result)))
    }

    #[test]
    fn failure_text_is_the_error() {
        let response = ToolCallResponse::from_result(Err(McpError::NotConnected));
        assert!(!response.success);
        assert_eq!(response.extract_text(), "MCP server is not connected.");
    }

    #[test]
    fn joins_text_parts_with_newlines() {
        assert_eq!(text_response(&["one", "two"]).extract_text(), "one\ntwo");
    }

    #[test]
    fn json_text_is_pretty_printed() {
        let response = text_response(&[r#"{"fee":0}"#]);
        assert_eq!(response.extract_text(), "{\n  \"fee\": 0\n}");

        let listing = text_response(&[r#"["Gold", {"name": "Blue"}]"#]);
        assert_eq!(listing.extract_text(), "1. Gold\n2. {\"name\":\"Blue\"}");
    }

    #[test]
    fn malformed_json_text_is_returned_verbatim() {
        assert_eq!(text_response(&["[not json"]).extract_text(), "[not json");
    }

    #[test]
    fn missing_content_falls_back_to_data() {
        let response =
            ToolCallResponse::from_result(Ok(ToolCallOutput::from_result(json!({"rows": 2}))));
        assert_eq!(response.content, Some(Vec::new()));
        assert_eq!(response.extract_text(), "{\n  \"rows\": 2\n}");
    }

    #[test]
    fn non_text_content_is_serialized() {
        let response = ToolCallResponse::from_result(Ok(ToolCallOutput::from_result(json!({
            "content": [{"type": "image", "data": "AAAA", "mimeType": "image/png"}]
        }))));
        let text = response.extract_text();
        assert!(text.contains("\"mimeType\": \"image/png\""), "{text}");
    }

    #[test]
    fn descriptors_default_to_an_object_schema() {
        let tool: ToolDescriptor =
            serde_json::from_value(json!({"name": "get_card_info"})).expect("descriptor");
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_empty());
    }
}
