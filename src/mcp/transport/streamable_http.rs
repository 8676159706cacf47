//! Decoding of streamable HTTP response bodies.
//!
//! A server may answer a POST with a single JSON document or with an
//! event-stream body carrying several `data:` frames (progress notices,
//! partial results, the final result). [`select_result_frame`] picks the one
//! frame that represents the final JSON-RPC response.

use crate::mcp::error::{McpError, RpcError};
use serde_json::Value;
use tracing::{debug, warn};

use super::RawReply;

#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = memchr::memchr(b'\n', &self.buffer[search_index..]) {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            push_trimmed(&mut lines, &self.buffer[search_index..line_end]);
            search_index = newline_index + 1;
        }

        if flush {
            push_trimmed(&mut lines, &self.buffer[search_index..]);
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

fn push_trimmed(lines: &mut Vec<String>, bytes: &[u8]) {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        Err(err) => warn!(error = %err, "Skipping non-UTF-8 event-stream line"),
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Splits an event-stream body into its non-empty `data:` payloads.
pub fn event_stream_frames(body: &[u8]) -> Vec<String> {
    let mut buffer = SseLineBuffer::default();
    let mut lines = buffer.push(body);
    lines.extend(buffer.finish());
    lines
        .iter()
        .filter_map(|line| sse_data_payload(line))
        .filter(|payload| !payload.is_empty())
        .map(str::to_string)
        .collect()
}

fn looks_like_event_stream(body: &[u8]) -> bool {
    let start = body
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(body.len());
    let body = &body[start..];
    body.starts_with(b"data:") || body.starts_with(b"event:") || body.starts_with(b"id:")
}

fn has_result_content(frame: &Value) -> bool {
    match frame.get("result").and_then(|result| result.get("content")) {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn frame_matches_id(frame: &Value, expected_id: Option<i64>) -> bool {
    match (frame.get("id"), expected_id) {
        (Some(Value::Null) | None, _) | (_, None) => true,
        (Some(id), Some(expected)) => id.as_i64() == Some(expected),
    }
}

/// Chooses the authoritative JSON-RPC response among streamed frames.
///
/// The first frame whose `result.content` is non-empty wins; otherwise the
/// longest parseable frame is used. Frames that fail to parse, or whose `id`
/// names a different request, are skipped.
pub fn select_result_frame(frames: &[String], expected_id: Option<i64>) -> Result<Value, McpError> {
    let mut longest: Option<(usize, Value)> = None;

    for (index, raw) in frames.iter().enumerate() {
        let frame = match serde_json::from_str::<Value>(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(frame = index, error = %err, "Skipping unparseable event-stream frame");
                continue;
            }
        };
        if !frame_matches_id(&frame, expected_id) {
            debug!(frame = index, "Skipping event-stream frame for another request");
            continue;
        }
        if has_result_content(&frame) {
            return Ok(frame);
        }
        if longest.as_ref().is_none_or(|(len, _)| raw.len() > *len) {
            longest = Some((raw.len(), frame));
        }
    }

    longest.map(|(_, frame)| frame).ok_or(McpError::NoFrame)
}

/// Unwraps a JSON-RPC response envelope into its `result`.
pub fn response_result(frame: Value) -> Result<Value, McpError> {
    let Value::Object(mut envelope) = frame else {
        return Err(McpError::Decode(
            "expected a JSON-RPC response object".to_string(),
        ));
    };

    if let Some(error) = envelope.remove("error") {
        if !error.is_null() {
            let error: RpcError = serde_json::from_value(error)
                .map_err(|err| McpError::Decode(format!("malformed error object: {err}")))?;
            return Err(McpError::Rpc(error));
        }
    }

    match envelope.remove("result") {
        Some(result) => Ok(result),
        None => Err(McpError::Decode(
            "response carries neither result nor error".to_string(),
        )),
    }
}

/// Decodes a reply body, single document or event stream, into the JSON-RPC
/// `result` of the request numbered `expected_id`.
pub fn decode_reply(reply: &RawReply, expected_id: Option<i64>) -> Result<Value, McpError> {
    let frame = if is_event_stream_content_type(&reply.content_type)
        || looks_like_event_stream(&reply.body)
    {
        let frames = event_stream_frames(&reply.body);
        debug!(frames = frames.len(), "Decoding event-stream reply");
        select_result_frame(&frames, expected_id)?
    } else {
        serde_json::from_slice::<Value>(&reply.body)
            .map_err(|err| McpError::Decode(err.to_string()))?
    };
    response_result(frame)
}
