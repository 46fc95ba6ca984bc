//! Decision objects emitted by the model once per step.
//!
//! A reply is checked against `schemas/decision.schema.json` before it is
//! turned into a typed [`Decision`]. Anything that fails here is a fatal
//! protocol violation and never reaches orchestration.

use std::fmt;
use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

static DECISION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(DECISION_SCHEMA).expect("decision schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("decision schema should compile")
});

/// Phase the model claims for the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Act,
    Verify,
    Chat,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Act => "act",
            Phase::Verify => "verify",
            Phase::Chat => "chat",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the model wants to act on its own or needs the human first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    DirectExecute,
    AskUser,
}

/// Structured reply for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub phase: Phase,
    pub decision: DecisionKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cmd: String,
    /// Full replacement text for the task document.
    pub task_md_patch: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub say: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub checklist: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub memory_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Decision {
    /// Command text with surrounding whitespace removed.
    pub fn command(&self) -> &str {
        self.cmd.trim()
    }

    pub fn has_command(&self) -> bool {
        !self.command().is_empty()
    }

    /// Compact JSON form used for the assistant turn and the audit log.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Protocol violation that terminates the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalDecisionError {
    pub step: u32,
    pub reason: String,
}

impl FatalDecisionError {
    pub fn new(step: u32, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FatalDecisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: {}", self.step, self.reason)
    }
}

impl std::error::Error for FatalDecisionError {}

/// Validate a raw reply against the decision schema and parse it.
pub fn parse_decision(step: u32, raw: &Value) -> Result<Decision, FatalDecisionError> {
    let messages: Vec<String> = DECISION_VALIDATOR
        .iter_errors(raw)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(FatalDecisionError::new(
            step,
            format!("malformed decision:\n- {}", messages.join("\n- ")),
        ));
    }
    serde_json::from_value(raw.clone())
        .map_err(|err| FatalDecisionError::new(step, format!("malformed decision: {err}")))
}
