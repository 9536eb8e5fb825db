use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Engine-defined keys used to select a feedback message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKey {
    WrongOutput,
    NotFstring,
    WrongVariable,
    WrongPrintCount,
    NumericInputRejected,
    InvalidInputValue,
    WrongInputType,
    EmptyOutput,
}

impl FeedbackKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKey::WrongOutput => "wrong_output",
            FeedbackKey::NotFstring => "not_fstring",
            FeedbackKey::WrongVariable => "wrong_variable",
            FeedbackKey::WrongPrintCount => "wrong_print_count",
            FeedbackKey::NumericInputRejected => "numeric_input_rejected",
            FeedbackKey::InvalidInputValue => "invalid_input_value",
            FeedbackKey::WrongInputType => "wrong_input_type",
            FeedbackKey::EmptyOutput => "empty_output",
        }
    }
}

impl fmt::Display for FeedbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final structured answer for one grading call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ValidationVerdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            actual_output: None,
            details: Map::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            actual_output: None,
            details: Map::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.actual_output = Some(output.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details.extend(details);
        self
    }

    /// Exit code of the last sandbox run, if one happened
    pub fn exit_code(&self) -> Option<i32> {
        self.details
            .get("exit_code")
            .and_then(Value::as_i64)
            .map(|code| code as i32)
    }

    pub fn timed_out(&self) -> bool {
        self.details
            .get("timed_out")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn feedback_key(&self) -> Option<&str> {
        self.details.get("feedback_key").and_then(Value::as_str)
    }
}

/// Feedback messages for one exercise, keyed by [`FeedbackKey`]
#[derive(Debug, Clone, Default)]
pub struct Feedback {
    messages: BTreeMap<String, String>,
}

impl Feedback {
    /// Merge the descriptor's map with the rule set's map; rule entries win
    pub fn merged(
        descriptor: &BTreeMap<String, String>,
        rules: &BTreeMap<String, String>,
    ) -> Self {
        let mut messages = descriptor.clone();
        messages.extend(rules.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { messages }
    }

    pub fn message(&self, key: FeedbackKey, default: &str) -> String {
        self.messages
            .get(key.as_str())
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Failing verdict carrying the selected feedback and its key
    pub fn fail(&self, key: FeedbackKey, default: &str) -> ValidationVerdict {
        ValidationVerdict::fail(self.message(key, default)).with_detail("feedback_key", key.as_str())
    }
}
