//! Transcript store: an append-only, id-keyed log of conversation items.
//!
//! The store knows nothing about session events; the reducer decides what to
//! insert or patch.

use crate::session::guardrail::GuardrailVerdict;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Message,
    /// A system-visible annotation such as a tool call.
    Breadcrumb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    InProgress,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptItem {
    pub item_id: String,
    pub role: Role,
    pub kind: ItemKind,
    pub text: String,
    /// Structured payload of a breadcrumb.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail: Option<GuardrailVerdict>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptItem {
    pub fn message(item_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            role,
            kind: ItemKind::Message,
            text: text.into(),
            data: None,
            status: ItemStatus::InProgress,
            guardrail: None,
            created_at: Utc::now(),
        }
    }

    pub fn breadcrumb(item_id: impl Into<String>, title: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            item_id: item_id.into(),
            role: Role::Assistant,
            kind: ItemKind::Breadcrumb,
            text: title.into(),
            data,
            status: ItemStatus::Done,
            guardrail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_guardrail(mut self, verdict: GuardrailVerdict) -> Self {
        self.guardrail = Some(verdict);
        self
    }

    pub fn is_message(&self) -> bool {
        self.kind == ItemKind::Message
    }
}

/// Handle to a locally generated breadcrumb. Breadcrumbs are indexed apart
/// from remote item ids, so no incoming id can address one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreadcrumbId(usize);

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    items: Vec<TranscriptItem>,
    /// Remote item id to position.
    positions: HashMap<String, usize>,
    /// Position of each breadcrumb, indexed by `BreadcrumbId`.
    breadcrumbs: Vec<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[TranscriptItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.positions.contains_key(item_id)
    }

    pub fn get(&self, item_id: &str) -> Option<&TranscriptItem> {
        self.positions.get(item_id).map(|&index| &self.items[index])
    }

    pub fn get_mut(&mut self, item_id: &str) -> Option<&mut TranscriptItem> {
        self.positions
            .get(item_id)
            .copied()
            .map(move |index| &mut self.items[index])
    }

    /// Inserts a remote item. Returns false, leaving the store untouched,
    /// when the id is already present.
    pub fn insert(&mut self, item: TranscriptItem) -> bool {
        if self.positions.contains_key(&item.item_id) {
            return false;
        }
        self.positions.insert(item.item_id.clone(), self.items.len());
        self.items.push(item);
        true
    }

    pub fn append_text(&mut self, item_id: &str, delta: &str) -> bool {
        match self.get_mut(item_id) {
            Some(item) if !delta.is_empty() => {
                item.text.push_str(delta);
                true
            }
            _ => false,
        }
    }

    pub fn replace_text(&mut self, item_id: &str, text: &str) -> bool {
        match self.get_mut(item_id) {
            Some(item) if item.text != text => {
                item.text = text.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn set_status(&mut self, item_id: &str, status: ItemStatus) -> bool {
        match self.get_mut(item_id) {
            Some(item) if item.status != status => {
                item.status = status;
                true
            }
            _ => false,
        }
    }

    /// Id of the most recently inserted message with the given role.
    pub fn last_message_id(&self, role: Role) -> Option<&str> {
        self.items
            .iter()
            .rev()
            .find(|item| item.is_message() && item.role == role)
            .map(|item| item.item_id.as_str())
    }

    /// Appends a breadcrumb. Its `item_id` is a display label only.
    pub fn push_breadcrumb(
        &mut self,
        title: impl Into<String>,
        data: Option<Value>,
    ) -> BreadcrumbId {
        let id = BreadcrumbId(self.breadcrumbs.len());
        let label = format!("breadcrumb-{}", id.0 + 1);
        self.breadcrumbs.push(self.items.len());
        self.items.push(TranscriptItem::breadcrumb(label, title, data));
        id
    }

    pub fn breadcrumb(&self, id: BreadcrumbId) -> Option<&TranscriptItem> {
        self.breadcrumbs.get(id.0).map(|&index| &self.items[index])
    }

    pub fn set_breadcrumb_data(&mut self, id: BreadcrumbId, data: Value) -> bool {
        let Some(&index) = self.breadcrumbs.get(id.0) else {
            return false;
        };
        let item = &mut self.items[index];
        if item.data.as_ref() == Some(&data) {
            return false;
        }
        item.data = Some(data);
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.positions.clear();
        self.breadcrumbs.clear();
    }
}
