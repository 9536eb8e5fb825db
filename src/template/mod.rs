//! Expected-output templates for input-driven exercises
//!
//! A template holds a `{var}` placeholder. The substituted text is either
//! the input itself or the result of a restricted transform expression over
//! the typed input (see [`expr`]).

pub mod expr;
pub mod generate;

use serde_json::Value;
use std::fmt;

use crate::rules::InputType;

pub const PLACEHOLDER: &str = "{var}";

/// Closed value model for typed inputs and transform results
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ExprValue>),
}

impl ExprValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ExprValue::None => "NoneType",
            ExprValue::Bool(_) => "bool",
            ExprValue::Int(_) => "int",
            ExprValue::Float(_) => "float",
            ExprValue::Str(_) => "str",
            ExprValue::List(_) => "list",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            ExprValue::None => false,
            ExprValue::Bool(b) => *b,
            ExprValue::Int(i) => *i != 0,
            ExprValue::Float(f) => *f != 0.0,
            ExprValue::Str(s) => !s.is_empty(),
            ExprValue::List(items) => !items.is_empty(),
        }
    }

    /// Python `repr`
    pub fn repr(&self) -> String {
        match self {
            ExprValue::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            ExprValue::List(items) => format!(
                "[{}]",
                items.iter().map(ExprValue::repr).collect::<Vec<_>>().join(", ")
            ),
            other => other.to_string(),
        }
    }

    /// Typed view of a case input given as JSON
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ExprValue::None,
            Value::Bool(b) => ExprValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ExprValue::Int(i),
                None => ExprValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => ExprValue::Str(s.clone()),
            Value::Array(items) => ExprValue::List(items.iter().map(ExprValue::from_json).collect()),
            Value::Object(_) => ExprValue::Str(value.to_string()),
        }
    }

    /// Parse stdin text the way the matching Python conversion would
    pub fn parse_typed(text: &str, kind: InputType) -> Option<Self> {
        let text = text.trim();
        match kind {
            InputType::Int => text.parse().ok().map(ExprValue::Int),
            InputType::Float => text
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(ExprValue::Float),
            InputType::Bool => match text {
                "True" | "true" => Some(ExprValue::Bool(true)),
                "False" | "false" => Some(ExprValue::Bool(false)),
                _ => None,
            },
            InputType::Str => Some(ExprValue::Str(text.to_string())),
        }
    }

    /// Text written to stdin for this input
    pub fn stdin_text(&self) -> String {
        match self {
            ExprValue::List(items) => items
                .iter()
                .map(ExprValue::stdin_text)
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }
}

pub(crate) fn float_str(x: f64) -> String {
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x.is_nan() {
        return "nan".to_string();
    }
    // Shortest round-trip digits; Python switches to exponent form outside [1e-4, 1e16)
    let scientific = format!("{:e}", x);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let fixed = format!("{}", x);
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// Python `str`
impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::None => write!(f, "None"),
            ExprValue::Bool(true) => write!(f, "True"),
            ExprValue::Bool(false) => write!(f, "False"),
            ExprValue::Int(i) => write!(f, "{}", i),
            ExprValue::Float(x) => write!(f, "{}", float_str(*x)),
            ExprValue::Str(s) => write!(f, "{}", s),
            ExprValue::List(_) => write!(f, "{}", self.repr()),
        }
    }
}

/// Substitute every `{var}` in `template`
pub fn render(template: &str, substitution: &str) -> String {
    template.replace(PLACEHOLDER, substitution)
}
