//! Values returned across the loader protocol
//!
//! The harness encodes every Python value into this closed model. Anything
//! outside it (objects, huge ints, non-finite floats) travels as its `repr`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Relative tolerance for float comparison
const FLOAT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PyValue>),
    Tuple(Vec<PyValue>),
    Set(Vec<PyValue>),
    Dict(Vec<(PyValue, PyValue)>),
    Object { type_name: String, repr: String },
}

impl PyValue {
    pub fn type_name(&self) -> &str {
        match self {
            PyValue::None => "NoneType",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Str(_) => "str",
            PyValue::List(_) => "list",
            PyValue::Tuple(_) => "tuple",
            PyValue::Set(_) => "set",
            PyValue::Dict(_) => "dict",
            PyValue::Object { type_name, .. } => type_name,
        }
    }

    /// Value equality against an expected JSON value
    ///
    /// Lists and tuples both match an array in order; a set matches an array
    /// as an unordered collection. Booleans never equal numbers.
    pub fn matches(&self, expected: &Value) -> bool {
        match (self, expected) {
            (PyValue::None, Value::Null) => true,
            (PyValue::Bool(actual), Value::Bool(wanted)) => actual == wanted,
            (PyValue::Int(actual), Value::Number(wanted)) => match wanted.as_i64() {
                Some(wanted) => *actual == wanted,
                None => wanted
                    .as_f64()
                    .is_some_and(|wanted| floats_close(*actual as f64, wanted)),
            },
            (PyValue::Float(actual), Value::Number(wanted)) => wanted
                .as_f64()
                .is_some_and(|wanted| floats_close(*actual, wanted)),
            (PyValue::Str(actual), Value::String(wanted)) => actual == wanted,
            (PyValue::Object { repr, .. }, Value::String(wanted)) => repr == wanted,
            (PyValue::List(items) | PyValue::Tuple(items), Value::Array(wanted)) => {
                items.len() == wanted.len() && items.iter().zip(wanted).all(|(a, w)| a.matches(w))
            }
            (PyValue::Set(items), Value::Array(wanted)) => unordered_match(items, wanted),
            (PyValue::Dict(entries), Value::Object(wanted)) => {
                entries.len() == wanted.len()
                    && entries.iter().all(|(key, value)| {
                        key.key_text()
                            .and_then(|key| wanted.get(&key))
                            .is_some_and(|w| value.matches(w))
                    })
            }
            _ => false,
        }
    }

    /// JSON object key a dict key compares against
    fn key_text(&self) -> Option<String> {
        match self {
            PyValue::Str(s) => Some(s.clone()),
            PyValue::Int(i) => Some(i.to_string()),
            PyValue::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
            PyValue::Object { repr, .. } => Some(repr.clone()),
            _ => None,
        }
    }

    /// Plain JSON rendering for verdict details
    pub fn to_json(&self) -> Value {
        match self {
            PyValue::None => Value::Null,
            PyValue::Bool(b) => Value::Bool(*b),
            PyValue::Int(i) => Value::from(*i),
            PyValue::Float(f) => Value::from(*f),
            PyValue::Str(s) => Value::String(s.clone()),
            PyValue::List(items) | PyValue::Tuple(items) | PyValue::Set(items) => {
                Value::Array(items.iter().map(PyValue::to_json).collect())
            }
            PyValue::Dict(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.key_text().unwrap_or_else(|| k.to_string()), v.to_json()))
                    .collect(),
            ),
            PyValue::Object { repr, .. } => Value::String(repr.clone()),
        }
    }
}

/// Each expected element pairs with a distinct actual element
fn unordered_match(items: &[PyValue], wanted: &[Value]) -> bool {
    if items.len() != wanted.len() {
        return false;
    }
    let mut used = vec![false; items.len()];
    wanted.iter().all(|w| {
        let found = items
            .iter()
            .enumerate()
            .find(|(i, item)| !used[*i] && item.matches(w))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

fn floats_close(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= FLOAT_TOLERANCE * scale
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[PyValue], close: &str) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "{}", close)
}

/// Python `repr` style
impl fmt::Display for PyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyValue::None => write!(f, "None"),
            PyValue::Bool(true) => write!(f, "True"),
            PyValue::Bool(false) => write!(f, "False"),
            PyValue::Int(i) => write!(f, "{}", i),
            PyValue::Float(x) => write!(f, "{}", float_repr(*x)),
            PyValue::Str(s) => write!(f, "{}", str_repr(s)),
            PyValue::List(items) => write_seq(f, "[", items, "]"),
            PyValue::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            PyValue::Tuple(items) => write_seq(f, "(", items, ")"),
            PyValue::Set(items) if items.is_empty() => write!(f, "set()"),
            PyValue::Set(items) => write_seq(f, "{", items, "}"),
            PyValue::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            PyValue::Object { repr, .. } => write!(f, "{}", repr),
        }
    }
}

fn float_repr(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python literal rendering of an expected JSON value, for messages
pub fn py_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => str_repr(s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(py_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", str_repr(k), py_literal(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
