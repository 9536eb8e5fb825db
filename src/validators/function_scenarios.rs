//! Multi-unit exams (`function_scenarios` / `exam`)
//!
//! Every requirement of an exam is an independent pass/fail check:
//! program-wide rules, required imports, decorator pairings, each unit's
//! scoped rules, each scenario of each unit and the optional whole-script
//! output. The verdict passes only when every check does, and the message
//! itemises all of them.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{case_stdin, ValidationContext, Validator};
use crate::analysis::queries::{find_class, find_function};
use crate::core::utils::{lines_match_stripped, normalize_output};
use crate::core::{GradeError, ValidationVerdict};
use crate::engine::value::py_literal;
use crate::engine::{InvocationRequest, LoaderOp, PyValue};
use crate::rules::checker::{check_rules, missing_decorator, missing_import, Scope};
use crate::rules::{ClassUnit, CodeUnit, FunctionScenario, FunctionUnit};

pub struct FunctionScenariosValidator;

#[derive(Debug, Clone, PartialEq)]
struct Check {
    name: String,
    failure: Option<String>,
}

impl Check {
    fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: None,
        }
    }

    fn fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: Some(reason.into()),
        }
    }

    fn from_failures(name: impl Into<String>, failures: Vec<String>) -> Self {
        if failures.is_empty() {
            Self::pass(name)
        } else {
            Self::fail(name, failures.join(" "))
        }
    }

    fn from_result(name: String, actual: &PyValue, expected: &Value) -> Self {
        if actual.matches(expected) {
            Self::pass(name)
        } else {
            Self::fail(
                name,
                format!("se esperaba {}, se obtuvo {}", py_literal(expected), actual),
            )
        }
    }

    fn passed(&self) -> bool {
        self.failure.is_none()
    }

    fn line(&self) -> String {
        match &self.failure {
            None => format!("✓ {}", self.name),
            Some(reason) => format!("✗ {}: {}", self.name, reason),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "passed": self.passed(),
            "message": self.failure,
        })
    }
}

fn call_label(name: &str, scenario: &FunctionScenario) -> String {
    if let Some(description) = &scenario.description {
        return description.clone();
    }
    let args = scenario
        .args
        .iter()
        .map(py_literal)
        .chain(
            scenario
                .kwargs
                .iter()
                .map(|(k, v)| format!("{}={}", k, py_literal(v))),
        )
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", name, args)
}

/// Units from the descriptor followed by those declared in the rules
fn collect_units(ctx: &ValidationContext<'_>) -> Vec<CodeUnit> {
    ctx.descriptor
        .scenarios
        .iter()
        .cloned()
        .chain(ctx.rules.functions.iter().cloned().map(CodeUnit::Function))
        .chain(ctx.rules.classes.iter().cloned().map(CodeUnit::Class))
        .collect()
}

/// Run every op of one unit in one loader process
async fn invoke_all(
    ctx: &ValidationContext<'_>,
    ops: Vec<LoaderOp>,
) -> Vec<Result<PyValue, String>> {
    let count = ops.len();
    let request = InvocationRequest {
        source: ctx.submission.source.clone(),
        ops,
        timeout: ctx.submission.timeout,
    };
    match ctx.backend.invoke(request).await {
        Ok(report) => {
            let mut results: Vec<Result<PyValue, String>> = report
                .results
                .into_iter()
                .map(|r| r.map_err(|e| GradeError::from(e).to_string()))
                .collect();
            results.resize(count, Err("sin resultado".to_string()));
            results
        }
        Err(err) => {
            warn!("Loader failed for exam unit: {}", err);
            let message = GradeError::from(err).to_string();
            vec![Err(message); count]
        }
    }
}

async fn function_checks(ctx: &ValidationContext<'_>, unit: &FunctionUnit) -> Vec<Check> {
    let mut checks = Vec::new();
    let info = find_function(ctx.summary, &unit.name);

    if unit.rules.has_static_rules() {
        let name = format!("Requisitos de la función '{}'", unit.name);
        checks.push(match info {
            Some(info) => Check::from_failures(name, check_rules(&unit.rules, ctx.summary, Scope::Function(info))),
            None => Check::fail(name, format!("No se encontró la función '{}'.", unit.name)),
        });
    }

    if unit.scenarios.is_empty() {
        let name = format!("Definición de la función '{}'", unit.name);
        checks.push(match info {
            Some(_) => Check::pass(name),
            None => Check::fail(name, format!("No se encontró la función '{}'.", unit.name)),
        });
        return checks;
    }

    let ops = unit
        .scenarios
        .iter()
        .map(|scenario| LoaderOp::CallFunction {
            name: unit.name.clone(),
            args: scenario.args.clone(),
            kwargs: scenario.kwargs.clone(),
        })
        .collect();
    let results = invoke_all(ctx, ops).await;

    for (scenario, result) in unit.scenarios.iter().zip(results) {
        let name = call_label(&unit.name, scenario);
        checks.push(match result {
            Ok(actual) => Check::from_result(name, &actual, &scenario.expected_return_value),
            Err(reason) => Check::fail(name, reason),
        });
    }
    checks
}

async fn class_checks(ctx: &ValidationContext<'_>, unit: &ClassUnit) -> Vec<Check> {
    let mut checks = Vec::new();
    let info = find_class(ctx.summary, &unit.name);

    if unit.rules.has_static_rules() {
        let name = format!("Requisitos de la clase '{}'", unit.name);
        checks.push(match info {
            Some(info) => Check::from_failures(name, check_rules(&unit.rules, ctx.summary, Scope::Class(info))),
            None => Check::fail(name, format!("No se encontró la clase '{}'.", unit.name)),
        });
    }

    if unit.scenarios.is_empty() {
        let name = format!("Definición de la clase '{}'", unit.name);
        checks.push(match info {
            Some(_) => Check::pass(name),
            None => Check::fail(name, format!("No se encontró la clase '{}'.", unit.name)),
        });
        return checks;
    }

    let ops = unit
        .scenarios
        .iter()
        .map(|scenario| LoaderOp::Evaluate {
            class_name: unit.name.clone(),
            setup: scenario.setup_code.clone(),
            expression: scenario.validation_code.clone(),
        })
        .collect();
    let results = invoke_all(ctx, ops).await;

    for (scenario, result) in unit.scenarios.iter().zip(results) {
        let name = scenario
            .description
            .clone()
            .unwrap_or_else(|| format!("{}: {}", unit.name, scenario.validation_code.trim()));
        checks.push(match result {
            Ok(actual) => Check::from_result(name, &actual, &scenario.expected_return_value),
            Err(reason) => Check::fail(name, reason),
        });
    }
    checks
}

async fn script_output_check(ctx: &ValidationContext<'_>, expected: &str) -> Check {
    let name = "Salida del programa";
    let stdin = ctx.submission.input_data.as_deref().map(case_stdin);
    let outcome = ctx.run(stdin, false).await;
    if outcome.timed_out {
        return Check::fail(name, GradeError::TimedOut { seconds: ctx.timeout_secs() }.to_string());
    }
    if outcome.exit_code != Some(0) {
        return Check::fail(
            name,
            GradeError::RuntimeFailure {
                exit_code: outcome.exit_code,
                stderr: outcome.stderr,
            }
            .to_string(),
        );
    }
    if lines_match_stripped(expected, &outcome.user_stdout) {
        Check::pass(name)
    } else {
        Check::fail(
            name,
            GradeError::OutputMismatch {
                expected: normalize_output(expected),
                actual: normalize_output(&outcome.user_stdout),
            }
            .to_string(),
        )
    }
}

#[async_trait]
impl Validator for FunctionScenariosValidator {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError> {
        let rules = ctx.rules;
        let mut checks = Vec::new();

        if rules.has_static_rules() {
            checks.push(Check::from_failures(
                "Requisitos de estructura del programa",
                check_rules(rules, ctx.summary, Scope::Program),
            ));
        }

        if let Some(required) = &rules.structural_requirements {
            for module in &required.imports {
                let name = format!("Importa el módulo '{}'", module);
                checks.push(match missing_import(ctx.summary, module) {
                    None => Check::pass(name),
                    Some(reason) => Check::fail(name, reason),
                });
            }
            for pairing in &required.decorators {
                let name = format!(
                    "La función '{}' usa @{}",
                    pairing.function,
                    pairing.decorator.trim_start_matches('@')
                );
                checks.push(match missing_decorator(ctx.summary, pairing) {
                    None => Check::pass(name),
                    Some(reason) => Check::fail(name, reason),
                });
            }
        }

        for unit in collect_units(ctx) {
            let unit_checks = match &unit {
                CodeUnit::Function(unit) => function_checks(ctx, unit).await,
                CodeUnit::Class(unit) => class_checks(ctx, unit).await,
            };
            debug!(
                "Exam unit '{}': {}/{} checks passed",
                unit.name(),
                unit_checks.iter().filter(|c| c.passed()).count(),
                unit_checks.len()
            );
            checks.extend(unit_checks);
        }

        if let Some(expected) = &rules.expected_script_output {
            checks.push(script_output_check(ctx, expected).await);
        }

        if checks.is_empty() {
            return Err(GradeError::Config(
                "el examen no define ninguna comprobación".to_string(),
            ));
        }

        let total = checks.len();
        let passed = checks.iter().filter(|c| c.passed()).count();
        let mut lines = vec![format!("Resultado: {}/{} pruebas pasadas", passed, total)];
        lines.extend(checks.iter().map(Check::line));

        let mut details = Map::new();
        details.insert("passed_count".to_string(), passed.into());
        details.insert("total_count".to_string(), total.into());
        details.insert(
            "checks".to_string(),
            Value::Array(checks.iter().map(Check::to_json).collect()),
        );

        let message = lines.join("\n");
        let verdict = if passed == total {
            ValidationVerdict::pass(message)
        } else {
            ValidationVerdict::fail(message)
        };
        Ok(verdict.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::grade;
    use super::super::{dispatch, Submission};
    use super::*;
    use crate::analysis::SecurityPolicy;
    use crate::engine::stub::{ok_run, StubBackend};
    use crate::engine::{InvocationReport, LoaderError};
    use crate::rules::ValidationDescriptor;

    const EXAM_SOURCE: &str = r#"
import math
from functools import lru_cache

@lru_cache
def doble(n):
    return n * 2

def triple(n):
    return n * 2

class Pila:
    def __init__(self):
        self.items = []

    def push(self, x):
        self.items.append(x)

    def size(self):
        return len(self.items)
"#;

    /// Plays the exam submission above
    fn exam_backend() -> StubBackend {
        StubBackend::default().with_invoke(|request| {
            let results = request
                .ops
                .iter()
                .map(|op| match op {
                    LoaderOp::CallFunction { name, args, .. } => {
                        let n = args[0].as_i64().unwrap_or(0);
                        match name.as_str() {
                            "doble" | "triple" => Ok(PyValue::Int(n * 2)),
                            other => Err(LoaderError::TargetNotDefined(other.to_string())),
                        }
                    }
                    LoaderOp::Evaluate { .. } => Ok(PyValue::Int(1)),
                    _ => Ok(PyValue::None),
                })
                .collect();
            Ok(InvocationReport {
                results,
                output: String::new(),
            })
        })
    }

    fn exam_descriptor() -> ValidationDescriptor {
        serde_json::from_value(json!({
            "strategy_tag": "exam",
            "rules": {
                "structural_requirements": {
                    "imports": ["math"],
                    "decorators": [{"function": "doble", "decorator": "@lru_cache"}]
                }
            },
            "scenarios": [
                {"kind": "function", "name": "doble", "scenarios": [
                    {"args": [2], "expected_return_value": 4},
                    {"args": [5], "expected_return_value": 10}
                ]},
                {"kind": "function", "name": "triple", "scenarios": [
                    {"args": [3], "expected_return_value": 9}
                ]},
                {"kind": "class", "name": "Pila", "scenarios": [
                    {"setup_code": "p = Pila()\np.push(1)", "validation_code": "p.size()",
                     "expected_return_value": 1}
                ]}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_exam_tally_itemises_failures() {
        let backend = exam_backend();
        let verdict = dispatch(
            &exam_descriptor(),
            &Submission::new(EXAM_SOURCE),
            &backend,
            &SecurityPolicy::default(),
        )
        .await;

        assert!(!verdict.passed);
        assert!(
            verdict.message.starts_with("Resultado: 5/6 pruebas pasadas"),
            "{}",
            verdict.message
        );
        assert!(verdict.message.contains("✗ triple(3): se esperaba 9, se obtuvo 6"));
        assert!(verdict.message.contains("✓ doble(2)"));
        assert!(verdict.message.contains("✓ Pila: p.size()"));
        assert_eq!(verdict.details["passed_count"], 5);
        assert_eq!(verdict.details["total_count"], 6);
        assert_eq!(backend.spawned(), 3);
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let backend = exam_backend();
        let rules = json!({
            "functions": [{"name": "doble", "scenarios": [{"args": [3], "expected_return_value": 6}],
                           "rules": {"require_return_statement": true}}]
        });
        let verdict = grade("function_scenarios", rules, Submission::new(EXAM_SOURCE), &backend).await;
        assert!(verdict.passed, "{}", verdict.message);
        assert!(verdict.message.starts_with("Resultado: 2/2 pruebas pasadas"));
    }

    #[tokio::test]
    async fn test_load_failure_fails_every_scenario_of_the_unit() {
        let backend = StubBackend::default()
            .with_invoke(|_| Err(LoaderError::LoadFailed("EOFError: EOF when reading a line".into())));
        let rules = json!({
            "functions": [{"name": "doble", "scenarios": [
                {"args": [1], "expected_return_value": 2},
                {"args": [2], "expected_return_value": 4}
            ]}]
        });
        let verdict = grade("exam", rules, Submission::new(EXAM_SOURCE), &backend).await;
        assert!(!verdict.passed);
        assert!(verdict.message.starts_with("Resultado: 0/2"));
        assert_eq!(verdict.message.matches("EOFError").count(), 2);
    }

    #[tokio::test]
    async fn test_missing_unit_without_scenarios() {
        let backend = exam_backend();
        let rules = json!({"classes": [{"name": "Cola"}]});
        let verdict = grade("exam", rules, Submission::new(EXAM_SOURCE), &backend).await;
        assert!(!verdict.passed);
        assert!(verdict.message.contains("No se encontró la clase 'Cola'"));
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_script_output_is_compared_per_line() {
        let backend = exam_backend().with_script(|_| ok_run("  4  \n6\n"));
        let rules = json!({"expected_script_output": "4\n6"});
        let verdict = grade("exam", rules, Submission::new(EXAM_SOURCE), &backend).await;
        assert!(verdict.passed, "{}", verdict.message);
    }

    #[tokio::test]
    async fn test_empty_exam_is_config_error() {
        let backend = exam_backend();
        let verdict = grade("exam", json!({}), Submission::new(EXAM_SOURCE), &backend).await;
        assert_eq!(verdict.details["error_kind"], "config_error");
    }

    #[test]
    fn test_call_label() {
        let scenario: FunctionScenario = serde_json::from_value(json!({
            "args": ["a", 1], "kwargs": {"sep": "-"}, "expected_return_value": null
        }))
        .unwrap();
        assert_eq!(call_label("unir", &scenario), "unir('a', 1, sep='-')");
    }
}
