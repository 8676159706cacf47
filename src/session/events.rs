//! Decoding of raw realtime session events into [`SessionEvent`].
//!
//! The transport hands over loosely-typed JSON. Everything is decoded here,
//! once, into a closed set of variants; unknown `type` tags become
//! [`SessionEvent::Ignored`] and malformed payloads become a
//! [`MalformedEvent`] error that the caller logs and drops.

use crate::session::guardrail::{GuardrailCategory, DEFAULT_TRIP_CATEGORY, DEFAULT_TRIP_RATIONALE};
use crate::session::transcript::Role;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Streaming assistant text or audio transcript.
    AssistantDelta { item_id: String, delta: String },
    /// Streaming transcription of user audio.
    UserTranscriptionDelta { item_id: String, delta: String },
    SpeechStarted { item_id: String },
    TranscriptionCompleted { item_id: String, transcript: String },
    /// The assistant finished a response turn.
    TurnFinished,
    GuardrailTripped {
        category: GuardrailCategory,
        rationale: String,
    },
    HistoryAdded(HistoryItem),
    HistoryUpdated(Vec<HistoryItem>),
    Ignored { event_type: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryItem {
    Message(HistoryMessage),
    FunctionCall(ToolCallRecord),
    /// Any other item kind, or an item that could not be decoded.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryMessage {
    pub item_id: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    /// Upstream completion flag, when the item carries one.
    pub completed: Option<bool>,
}

impl HistoryMessage {
    /// Concatenates every textual fragment, space separated and trimmed.
    pub fn flattened_text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::text)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text", alias = "output_text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "input_text")]
    InputText {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "input_audio")]
    InputAudio {
        #[serde(default)]
        transcript: Option<String>,
    },
    #[serde(rename = "audio", alias = "output_audio")]
    Audio {
        #[serde(default)]
        transcript: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl ContentPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } | ContentPart::InputText { text } => Some(text),
            ContentPart::InputAudio { transcript } | ContentPart::Audio { transcript } => {
                transcript.as_deref()
            }
            ContentPart::Other => None,
        }
    }
}

/// A tool invocation observed in the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub item_id: String,
    pub name: String,
    pub arguments: Value,
    pub output: Option<Value>,
}

/// A known event whose payload could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent {
    pub event_type: String,
    pub reason: String,
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} event: {}", self.event_type, self.reason)
    }
}

impl StdError for MalformedEvent {}

#[derive(Debug, Default, Deserialize)]
struct DeltaFields {
    item_id: Option<String>,
    #[serde(rename = "itemId")]
    item_id_camel: Option<String>,
    delta: Option<String>,
    text: Option<String>,
}

impl DeltaFields {
    fn item_id(&mut self) -> Option<String> {
        self.item_id
            .take()
            .or_else(|| self.item_id_camel.take())
            .filter(|id| !id.is_empty())
    }

    fn delta(&mut self) -> Option<String> {
        self.delta.take().or_else(|| self.text.take())
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptFields {
    item_id: Option<String>,
    #[serde(rename = "itemId")]
    item_id_camel: Option<String>,
    transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(
        rename = "response.text.delta",
        alias = "response.audio_transcript.delta",
        alias = "response.output_text.delta",
        alias = "response.output_audio_transcript.delta"
    )]
    AssistantDelta(DeltaFields),
    #[serde(
        rename = "conversation.input_audio_transcription.delta",
        alias = "conversation.item.input_audio_transcription.delta"
    )]
    UserTranscriptionDelta(DeltaFields),
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted(DeltaFields),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted(TranscriptFields),
    #[serde(rename = "response.done")]
    TurnFinished,
    #[serde(rename = "guardrail_tripped")]
    GuardrailTripped(Map<String, Value>),
    #[serde(rename = "history_added")]
    HistoryAdded { item: Value },
    #[serde(rename = "history_updated")]
    HistoryUpdated {
        #[serde(default)]
        history: Vec<Value>,
    },
    #[serde(rename = "message", alias = "function_call")]
    BareHistoryItem,
    #[serde(other)]
    Unknown,
}

impl SessionEvent {
    /// Decodes one raw transport event.
    pub fn decode(raw: &Value) -> Result<SessionEvent, MalformedEvent> {
        let event_type = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let malformed = |reason: &str| MalformedEvent {
            event_type: if event_type.is_empty() {
                "untyped".to_string()
            } else {
                event_type.clone()
            },
            reason: reason.to_string(),
        };

        if event_type.is_empty() {
            return Err(malformed("missing type tag"));
        }

        let wire = WireEvent::deserialize(raw).map_err(|err| malformed(&err.to_string()))?;
        let event = match wire {
            WireEvent::AssistantDelta(mut fields) => SessionEvent::AssistantDelta {
                item_id: fields.item_id().ok_or_else(|| malformed("missing item id"))?,
                delta: fields.delta().ok_or_else(|| malformed("missing delta"))?,
            },
            WireEvent::UserTranscriptionDelta(mut fields) => {
                SessionEvent::UserTranscriptionDelta {
                    item_id: fields.item_id().ok_or_else(|| malformed("missing item id"))?,
                    delta: fields.delta().ok_or_else(|| malformed("missing delta"))?,
                }
            }
            WireEvent::SpeechStarted(mut fields) => SessionEvent::SpeechStarted {
                item_id: fields.item_id().ok_or_else(|| malformed("missing item id"))?,
            },
            WireEvent::TranscriptionCompleted(fields) => SessionEvent::TranscriptionCompleted {
                item_id: fields
                    .item_id
                    .or(fields.item_id_camel)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| malformed("missing item id"))?,
                transcript: fields
                    .transcript
                    .ok_or_else(|| malformed("missing transcript"))?,
            },
            WireEvent::TurnFinished => SessionEvent::TurnFinished,
            WireEvent::GuardrailTripped(payload) => guardrail_trip(&payload),
            WireEvent::HistoryAdded { item } => SessionEvent::HistoryAdded(decode_history_item(&item)),
            WireEvent::HistoryUpdated { history } => {
                SessionEvent::HistoryUpdated(history.iter().map(decode_history_item).collect())
            }
            WireEvent::BareHistoryItem => SessionEvent::HistoryAdded(decode_history_item(raw)),
            WireEvent::Unknown => SessionEvent::Ignored {
                event_type: event_type.clone(),
            },
        };
        Ok(event)
    }
}

fn non_empty_str<'a>(payload: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .filter_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

fn guardrail_trip(payload: &Map<String, Value>) -> SessionEvent {
    let payload = Value::Object(payload.clone());
    let category = non_empty_str(
        &payload,
        &[
            "/category",
            "/info/outputInfo/moderationCategory",
            "/guardrailResults/0/output/outputInfo/moderationCategory",
        ],
    )
    .unwrap_or(DEFAULT_TRIP_CATEGORY);
    let rationale = non_empty_str(
        &payload,
        &[
            "/rationale",
            "/info/outputInfo/moderationRationale",
            "/guardrailResults/0/output/outputInfo/moderationRationale",
        ],
    )
    .unwrap_or(DEFAULT_TRIP_RATIONALE);

    // A classifier that reports NONE on a trip still counts as a violation.
    let category = match GuardrailCategory::try_from(category.to_string()) {
        Ok(GuardrailCategory::Violation(tag)) => GuardrailCategory::Violation(tag),
        _ => GuardrailCategory::Violation(DEFAULT_TRIP_CATEGORY.to_string()),
    };

    SessionEvent::GuardrailTripped {
        category,
        rationale: rationale.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireHistoryItem {
    #[serde(rename = "message")]
    Message {
        #[serde(rename = "itemId", alias = "item_id")]
        item_id: String,
        role: String,
        #[serde(default)]
        content: Vec<Value>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        completed: Option<bool>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        #[serde(rename = "itemId", alias = "item_id")]
        item_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        output: Option<Value>,
    },
    #[serde(other)]
    Other,
}

/// Decodes one history item; anything unusable folds into
/// [`HistoryItem::Other`].
pub fn decode_history_item(raw: &Value) -> HistoryItem {
    let item = match WireHistoryItem::deserialize(raw) {
        Ok(item) => item,
        Err(err) => {
            debug!(error = %err, "Skipping undecodable history item");
            return HistoryItem::Other;
        }
    };

    match item {
        WireHistoryItem::Message {
            item_id,
            role,
            content,
            status,
            completed,
        } => {
            let Some(role) = Role::from_wire(&role) else {
                debug!(item_id = %item_id, role = %role, "Skipping history message with unsupported role");
                return HistoryItem::Other;
            };
            HistoryItem::Message(HistoryMessage {
                item_id,
                role,
                content: content
                    .iter()
                    .map(|part| ContentPart::deserialize(part).unwrap_or(ContentPart::Other))
                    .collect(),
                completed: completed.or_else(|| status.map(|status| status == "completed")),
            })
        }
        WireHistoryItem::FunctionCall {
            item_id,
            name,
            arguments,
            output,
        } => HistoryItem::FunctionCall(ToolCallRecord {
            item_id,
            name,
            arguments,
            output: output.filter(|output| !output.is_null()),
        }),
        WireHistoryItem::Other => HistoryItem::Other,
    }
}
