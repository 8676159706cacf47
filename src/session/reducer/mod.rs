//! Session event reducer.
//!
//! Turns the unordered stream of [`SessionEvent`]s into transcript
//! mutations. Every rule is idempotent under replay: full-history snapshots
//! repeat already-seen items on every update, so re-applying an event must
//! leave the transcript unchanged.

use crate::core::constants::TRANSCRIBING_PLACEHOLDER;
use crate::session::events::{HistoryItem, HistoryMessage, SessionEvent, ToolCallRecord};
use crate::session::guardrail::{settle_with_default_pass, GuardrailCategory, GuardrailVerdict};
use crate::session::handoff::AgentRoster;
use crate::session::transcript::{BreadcrumbId, ItemStatus, Role, Transcript, TranscriptItem};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What a single reducer step changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reduction {
    pub transcript_changed: bool,
    /// The step consumed a history notification.
    pub history_updated: bool,
    /// Set when a handoff switched the active agent.
    pub active_agent: Option<String>,
}

impl Reduction {
    fn changed(transcript_changed: bool) -> Self {
        Self {
            transcript_changed,
            ..Self::default()
        }
    }

    fn merge(&mut self, other: Reduction) {
        self.transcript_changed |= other.transcript_changed;
        self.history_updated |= other.history_updated;
        if other.active_agent.is_some() {
            self.active_agent = other.active_agent;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionReducer {
    transcript: Transcript,
    /// Tool-call item id to the id of the breadcrumb that surfaced it.
    recorded_tool_calls: HashMap<String, BreadcrumbId>,
    roster: AgentRoster,
}

impl SessionReducer {
    pub fn new(roster: AgentRoster) -> Self {
        Self {
            transcript: Transcript::new(),
            recorded_tool_calls: HashMap::new(),
            roster,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.roster.active()
    }

    /// Drops all per-session state. The agent roster survives.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.recorded_tool_calls.clear();
    }

    pub fn add_breadcrumb(&mut self, title: impl Into<String>, data: Option<Value>) -> BreadcrumbId {
        self.transcript.push_breadcrumb(title, data)
    }

    pub fn select_agent(&mut self, name: &str) -> Result<String, String> {
        self.roster.select(name)
    }

    /// Records which agent is speaking from here on.
    pub fn note_active_agent(&mut self) -> Option<String> {
        let agent = self.roster.active()?.to_string();
        self.add_breadcrumb(format!("Agent: {agent}"), None);
        Some(agent)
    }

    /// Decodes and applies one raw transport event. Malformed events are
    /// logged and dropped.
    pub fn apply_raw(&mut self, raw: &Value) -> Reduction {
        match SessionEvent::decode(raw) {
            Ok(event) => self.apply(event),
            Err(err) => {
                warn!(error = %err, "Dropping session event");
                Reduction::default()
            }
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Reduction {
        match event {
            SessionEvent::AssistantDelta { item_id, delta } => {
                Reduction::changed(self.assistant_delta(&item_id, &delta))
            }
            SessionEvent::UserTranscriptionDelta { item_id, delta } => {
                Reduction::changed(self.user_delta(&item_id, &delta))
            }
            SessionEvent::SpeechStarted { item_id } => {
                Reduction::changed(self.ensure_user_placeholder(&item_id))
            }
            SessionEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => Reduction::changed(self.transcription_completed(&item_id, &transcript)),
            SessionEvent::GuardrailTripped {
                category,
                rationale,
            } => Reduction::changed(self.guardrail_tripped(category, rationale)),
            SessionEvent::TurnFinished => Reduction::changed(self.turn_finished()),
            SessionEvent::HistoryAdded(item) => {
                let mut reduction = self.history_item(item);
                reduction.history_updated = true;
                reduction
            }
            SessionEvent::HistoryUpdated(items) => {
                let mut reduction = Reduction {
                    history_updated: true,
                    ..Reduction::default()
                };
                for item in items {
                    reduction.merge(self.history_item(item));
                }
                reduction
            }
            SessionEvent::Ignored { event_type } => {
                debug!(event_type = %event_type, "Ignoring session event");
                Reduction::default()
            }
        }
    }

    fn is_finalized(&self, item_id: &str) -> bool {
        self.transcript
            .get(item_id)
            .is_some_and(|item| item.status == ItemStatus::Done)
    }

    fn assistant_delta(&mut self, item_id: &str, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        if self.is_finalized(item_id) {
            debug!(item_id = %item_id, "Ignoring delta for finalized assistant item");
            return false;
        }
        self.transcript.insert(
            TranscriptItem::message(item_id, Role::Assistant, "")
                .with_guardrail(GuardrailVerdict::in_progress()),
        );
        self.transcript.append_text(item_id, delta)
    }

    fn ensure_user_placeholder(&mut self, item_id: &str) -> bool {
        self.transcript.insert(TranscriptItem::message(
            item_id,
            Role::User,
            TRANSCRIBING_PLACEHOLDER,
        ))
    }

    fn user_delta(&mut self, item_id: &str, delta: &str) -> bool {
        if self.is_finalized(item_id) {
            debug!(item_id = %item_id, "Ignoring delta for finalized user item");
            return false;
        }
        let inserted = self.ensure_user_placeholder(item_id);
        if delta.is_empty() {
            return inserted;
        }
        let showing_placeholder = self
            .transcript
            .get(item_id)
            .is_some_and(|item| item.text == TRANSCRIBING_PLACEHOLDER);
        let patched = if showing_placeholder {
            self.transcript.replace_text(item_id, delta)
        } else {
            self.transcript.append_text(item_id, delta)
        };
        inserted || patched
    }

    fn transcription_completed(&mut self, item_id: &str, transcript: &str) -> bool {
        let text = transcript.trim();
        if self.transcript.contains(item_id) {
            let replaced = self.transcript.replace_text(item_id, text);
            let finished = self.transcript.set_status(item_id, ItemStatus::Done);
            replaced || finished
        } else {
            self.transcript.insert(
                TranscriptItem::message(item_id, Role::User, text).with_status(ItemStatus::Done),
            )
        }
    }

    fn guardrail_tripped(&mut self, category: GuardrailCategory, rationale: String) -> bool {
        let Some(item_id) = self
            .transcript
            .last_message_id(Role::Assistant)
            .map(str::to_string)
        else {
            warn!(category = %category, "Guardrail tripped with no assistant message to flag");
            return false;
        };
        info!(item_id = %item_id, category = %category, "Guardrail tripped");
        let verdict = GuardrailVerdict::tripped(category, rationale);
        match self.transcript.get_mut(&item_id) {
            Some(item) if item.guardrail.as_ref() != Some(&verdict) => {
                item.guardrail = Some(verdict);
                true
            }
            _ => false,
        }
    }

    fn turn_finished(&mut self) -> bool {
        let Some(item_id) = self
            .transcript
            .last_message_id(Role::Assistant)
            .map(str::to_string)
        else {
            return false;
        };
        self.settle_guardrail(&item_id)
    }

    fn settle_guardrail(&mut self, item_id: &str) -> bool {
        self.transcript
            .get_mut(item_id)
            .is_some_and(|item| settle_with_default_pass(&mut item.guardrail))
    }

    fn history_item(&mut self, item: HistoryItem) -> Reduction {
        match item {
            HistoryItem::Message(message) => Reduction::changed(self.history_message(message)),
            HistoryItem::FunctionCall(record) => self.tool_call(record),
            HistoryItem::Other => Reduction::default(),
        }
    }

    fn history_message(&mut self, message: HistoryMessage) -> bool {
        let text = message.flattened_text();
        if text.is_empty() {
            return false;
        }
        let item_id = message.item_id.as_str();

        let mut changed = if self.transcript.contains(item_id) {
            self.transcript.replace_text(item_id, &text)
        } else {
            let mut item = TranscriptItem::message(item_id, message.role, text);
            if message.role == Role::Assistant {
                item = item.with_guardrail(GuardrailVerdict::in_progress());
            }
            self.transcript.insert(item)
        };

        if let Some(completed) = message.completed {
            if completed && message.role == Role::Assistant {
                changed |= self.settle_guardrail(item_id);
            }
            let status = if completed {
                ItemStatus::Done
            } else {
                ItemStatus::InProgress
            };
            changed |= self.transcript.set_status(item_id, status);
        }
        changed
    }

    fn tool_call(&mut self, record: ToolCallRecord) -> Reduction {
        if let Some(&breadcrumb_id) = self.recorded_tool_calls.get(&record.item_id) {
            let Some(output) = record.output else {
                return Reduction::default();
            };
            let mut data = self
                .transcript
                .breadcrumb(breadcrumb_id)
                .and_then(|item| item.data.clone())
                .and_then(|data| match data {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_else(Map::new);
            if data.get("output") == Some(&output) {
                return Reduction::default();
            }
            data.insert("output".to_string(), output);
            return Reduction::changed(
                self.transcript
                    .set_breadcrumb_data(breadcrumb_id, Value::Object(data)),
            );
        }

        let mut data = json!({ "arguments": record.arguments });
        if let Some(output) = record.output {
            data["output"] = output;
        }
        let breadcrumb_id = self.add_breadcrumb(format!("Tool call: {}", record.name), Some(data));
        self.recorded_tool_calls
            .insert(record.item_id.clone(), breadcrumb_id);

        let mut reduction = Reduction::changed(true);
        if let Some(agent) = self.roster.resolve_handoff(&record.name) {
            info!(agent = %agent, tool = %record.name, "Handoff switched active agent");
            self.note_active_agent();
            reduction.active_agent = Some(agent);
        }
        reduction
    }
}
