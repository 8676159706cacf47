use serde::{Deserialize, Serialize};
use std::fmt;

/// Category attached when the remote side reports a trip without one.
pub const DEFAULT_TRIP_CATEGORY: &str = "OFF_BRAND";
pub const DEFAULT_TRIP_RATIONALE: &str = "Guardrail triggered";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GuardrailStatus {
    Pending,
    InProgress,
    Done,
}

impl GuardrailStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardrailStatus::Pending => "PENDING",
            GuardrailStatus::InProgress => "IN_PROGRESS",
            GuardrailStatus::Done => "DONE",
        }
    }
}

impl TryFrom<&str> for GuardrailStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PENDING" => Ok(GuardrailStatus::Pending),
            "IN_PROGRESS" => Ok(GuardrailStatus::InProgress),
            "DONE" => Ok(GuardrailStatus::Done),
            _ => Err(format!("invalid guardrail status: {value}")),
        }
    }
}

impl TryFrom<String> for GuardrailStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<GuardrailStatus> for String {
    fn from(value: GuardrailStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Outcome tag of a guardrail check: `NONE` for a pass, anything else names
/// the violated policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GuardrailCategory {
    None,
    Violation(String),
}

impl GuardrailCategory {
    pub fn as_str(&self) -> &str {
        match self {
            GuardrailCategory::None => "NONE",
            GuardrailCategory::Violation(tag) => tag,
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, GuardrailCategory::Violation(_))
    }
}

impl fmt::Display for GuardrailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for GuardrailCategory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Err("guardrail category must not be empty".to_string())
        } else if trimmed.eq_ignore_ascii_case("NONE") {
            Ok(GuardrailCategory::None)
        } else {
            Ok(GuardrailCategory::Violation(trimmed.to_string()))
        }
    }
}

impl From<GuardrailCategory> for String {
    fn from(value: GuardrailCategory) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub status: GuardrailStatus,
    pub category: GuardrailCategory,
    #[serde(default)]
    pub rationale: String,
}

impl GuardrailVerdict {
    pub fn in_progress() -> Self {
        Self {
            status: GuardrailStatus::InProgress,
            category: GuardrailCategory::None,
            rationale: String::new(),
        }
    }

    pub fn pass() -> Self {
        Self {
            status: GuardrailStatus::Done,
            category: GuardrailCategory::None,
            rationale: String::new(),
        }
    }

    pub fn tripped(category: GuardrailCategory, rationale: impl Into<String>) -> Self {
        Self {
            status: GuardrailStatus::Done,
            category,
            rationale: rationale.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == GuardrailStatus::Done
    }

    pub fn is_trip(&self) -> bool {
        self.is_terminal() && self.category.is_violation()
    }
}

/// Settles a verdict as a pass unless it already reached `DONE`.
/// Returns whether anything changed.
pub fn settle_with_default_pass(verdict: &mut Option<GuardrailVerdict>) -> bool {
    match verdict {
        Some(existing) if existing.is_terminal() => false,
        _ => {
            *verdict = Some(GuardrailVerdict::pass());
            true
        }
    }
}
