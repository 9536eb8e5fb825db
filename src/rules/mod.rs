//! Declarative rule set attached to every exercise
//!
//! The rule map is decoded into a single record with explicit optional
//! fields. Any key this engine does not know is rejected as a configuration
//! error rather than silently ignored.

pub mod checker;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::GradeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleSet {
    // Output checks
    pub expected_exact_output: Option<String>,
    pub expected_print_count: Option<usize>,
    pub expected_script_output: Option<String>,

    // Variable checks
    pub required_variables_in_print: Vec<String>,
    pub required_variable_definitions: Vec<String>,
    pub require_fstring: bool,

    // Structural presence checks
    pub require_for_loop: bool,
    /// `None` lets the strategy pick its own default
    pub require_if_statement: Option<bool>,
    pub require_list_comprehension: bool,
    pub require_dict_comprehension: bool,
    pub require_set_comprehension: bool,
    pub require_lambda: bool,
    pub require_try_except: bool,
    pub require_yield: bool,
    pub require_with_statement: bool,
    pub require_return_statement: bool,
    pub require_async: bool,
    pub require_await: bool,

    // Input-driven exercises
    pub input_constraints: Option<InputConstraints>,
    pub num_cases: Option<usize>,
    pub inputs: Vec<Value>,
    pub output_format_template: Option<String>,
    pub transform_for_template: Option<String>,
    pub test_cases: Vec<TestCase>,
    pub expected_input_type: Option<InputType>,
    pub reject_numeric_input: bool,

    pub custom_feedback: BTreeMap<String, String>,

    // Exams
    pub functions: Vec<FunctionUnit>,
    pub classes: Vec<ClassUnit>,
    pub structural_requirements: Option<StructuralRequirements>,

    // Class exercises
    pub class_name: Option<String>,
    pub checks: Vec<ClassCheck>,
    pub require_dataclass: bool,
    pub require_frozen: bool,
}

impl RuleSet {
    /// Decode a raw rule map; `null` means no rules
    pub fn from_value(value: &Value) -> Result<Self, GradeError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| GradeError::Config(e.to_string()))
    }

    /// True when any structural or variable rule is set
    pub fn has_static_rules(&self) -> bool {
        self.require_for_loop
            || self.require_if_statement == Some(true)
            || self.require_list_comprehension
            || self.require_dict_comprehension
            || self.require_set_comprehension
            || self.require_lambda
            || self.require_try_except
            || self.require_yield
            || self.require_with_statement
            || self.require_return_statement
            || self.require_async
            || self.require_await
            || !self.required_variable_definitions.is_empty()
            || !self.required_variables_in_print.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "string")]
    Str,
    #[serde(alias = "boolean")]
    Bool,
    Float,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Int => "int",
            InputType::Str => "str",
            InputType::Bool => "bool",
            InputType::Float => "float",
        }
    }
}

/// Bounds for generated inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConstraints {
    #[serde(rename = "type")]
    pub kind: InputType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub charset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: Value,
    pub expected_output: String,
}

impl TestCase {
    pub fn input_text(&self) -> String {
        input_text(&self.input)
    }
}

/// Text fed to stdin for a case input; lists become one line per element
pub fn input_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Array(items) => items.iter().map(input_text).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralRequirements {
    pub imports: Vec<String>,
    pub decorators: Vec<DecoratorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoratorRequirement {
    pub function: String,
    pub decorator: String,
}

/// One function under test in an exam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionUnit {
    pub name: String,
    #[serde(default)]
    pub scenarios: Vec<FunctionScenario>,
    /// Static rules scoped to this function
    #[serde(default)]
    pub rules: RuleSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionScenario {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub expected_return_value: Value,
    #[serde(default)]
    pub description: Option<String>,
}

/// One class under test in an exam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassUnit {
    pub name: String,
    #[serde(default)]
    pub scenarios: Vec<ClassScenario>,
    #[serde(default)]
    pub rules: RuleSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScenario {
    #[serde(default)]
    pub setup_code: String,
    pub validation_code: String,
    #[serde(default)]
    pub expected_return_value: Value,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeUnit {
    Function(FunctionUnit),
    Class(ClassUnit),
}

impl CodeUnit {
    pub fn name(&self) -> &str {
        match self {
            CodeUnit::Function(unit) => &unit.name,
            CodeUnit::Class(unit) => &unit.name,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        match self {
            CodeUnit::Function(unit) => &unit.rules,
            CodeUnit::Class(unit) => &unit.rules,
        }
    }
}

fn default_instance() -> String {
    "instance".to_string()
}

/// A key that is present yields `Some`, even when its value is `null`
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Scripted step of a class exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassCheck {
    Instantiation {
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
        #[serde(default = "default_instance")]
        label: String,
    },
    AttributeCheck {
        #[serde(default = "default_instance")]
        instance: String,
        attribute: String,
        expected: Value,
    },
    PropertyCheck {
        #[serde(default = "default_instance")]
        instance: String,
        property: String,
        expected: Value,
    },
    MethodCall {
        #[serde(default = "default_instance")]
        instance: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
        /// Absent means no assertion; `null` asserts `None`
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        expected_return: Option<Value>,
        #[serde(default)]
        save_as: Option<String>,
    },
    StrCheck {
        #[serde(default = "default_instance")]
        instance: String,
        expected: String,
    },
}

/// Per-exercise configuration resolved by an exercise store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDescriptor {
    #[serde(alias = "validation_type", alias = "strategy")]
    pub strategy_tag: String,
    #[serde(default)]
    pub rules: Value,
    #[serde(default)]
    pub scenarios: Vec<CodeUnit>,
    #[serde(default)]
    pub custom_feedback: BTreeMap<String, String>,
}

impl ValidationDescriptor {
    pub fn new(strategy_tag: impl Into<String>, rules: Value) -> Self {
        Self {
            strategy_tag: strategy_tag.into(),
            rules,
            scenarios: Vec::new(),
            custom_feedback: BTreeMap::new(),
        }
    }
}
