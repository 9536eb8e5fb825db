//! Record-style class exercises
//!
//! Static decorator requirements are checked first; then the scripted
//! checks run in order against one loaded copy of the submission and the
//! first failing step decides the verdict.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ValidationContext, Validator};
use crate::analysis::queries::{find_class, sole_class};
use crate::analysis::ClassInfo;
use crate::core::{GradeError, ValidationVerdict};
use crate::engine::value::py_literal;
use crate::engine::{InvocationRequest, LoaderOp, PyValue};
use crate::rules::checker::{check_rules, Scope};
use crate::rules::{ClassCheck, RuleSet};

pub struct ClassExerciseValidator;

fn target_class<'a>(ctx: &ValidationContext<'a>) -> Result<&'a ClassInfo, GradeError> {
    match &ctx.rules.class_name {
        Some(name) => find_class(ctx.summary, name).ok_or_else(|| GradeError::TargetNotDefined(name.clone())),
        None => sole_class(ctx.summary).ok_or_else(|| {
            GradeError::Config("class_exercise necesita 'class_name'".to_string())
        }),
    }
}

fn decorator_failures(rules: &RuleSet, class: &ClassInfo) -> Vec<String> {
    let mut failures = Vec::new();
    if rules.require_dataclass && !class.is_dataclass() {
        failures.push(format!(
            "La clase '{}' debe usar el decorador @dataclass.",
            class.name
        ));
    }
    if rules.require_frozen && !class.is_frozen_dataclass() {
        failures.push(format!(
            "La clase '{}' debe ser inmutable: usa @dataclass(frozen=True).",
            class.name
        ));
    }
    failures
}

fn to_op(check: &ClassCheck, class_name: &str) -> LoaderOp {
    match check {
        ClassCheck::Instantiation {
            args,
            kwargs,
            label,
        } => LoaderOp::Instantiate {
            class_name: class_name.to_string(),
            args: args.clone(),
            kwargs: kwargs.clone(),
            label: label.clone(),
        },
        ClassCheck::AttributeCheck {
            instance,
            attribute,
            ..
        } => LoaderOp::GetAttribute {
            label: instance.clone(),
            name: attribute.clone(),
        },
        ClassCheck::PropertyCheck {
            instance, property, ..
        } => LoaderOp::GetProperty {
            label: instance.clone(),
            name: property.clone(),
        },
        ClassCheck::MethodCall {
            instance,
            method,
            args,
            kwargs,
            save_as,
            ..
        } => LoaderOp::CallMethod {
            label: instance.clone(),
            name: method.clone(),
            args: args.clone(),
            kwargs: kwargs.clone(),
            save_as: save_as.clone(),
        },
        ClassCheck::StrCheck { instance, .. } => LoaderOp::ToString {
            label: instance.clone(),
        },
    }
}

fn describe(check: &ClassCheck, class_name: &str) -> String {
    match check {
        ClassCheck::Instantiation { args, .. } => format!(
            "{}({})",
            class_name,
            args.iter().map(py_literal).collect::<Vec<_>>().join(", ")
        ),
        ClassCheck::AttributeCheck {
            instance,
            attribute,
            ..
        } => format!("{}.{}", instance, attribute),
        ClassCheck::PropertyCheck {
            instance, property, ..
        } => format!("{}.{}", instance, property),
        ClassCheck::MethodCall {
            instance,
            method,
            args,
            ..
        } => format!(
            "{}.{}({})",
            instance,
            method,
            args.iter().map(py_literal).collect::<Vec<_>>().join(", ")
        ),
        ClassCheck::StrCheck { instance, .. } => format!("str({})", instance),
    }
}

/// Expected value of a step, if the step asserts one
fn expectation(check: &ClassCheck) -> Option<Value> {
    match check {
        ClassCheck::Instantiation { .. } => None,
        ClassCheck::AttributeCheck { expected, .. } | ClassCheck::PropertyCheck { expected, .. } => {
            Some(expected.clone())
        }
        ClassCheck::MethodCall {
            expected_return, ..
        } => expected_return.clone(),
        ClassCheck::StrCheck { expected, .. } => Some(Value::String(expected.clone())),
    }
}

fn step_failure(index: usize, step: &str, message: String) -> ValidationVerdict {
    ValidationVerdict::fail(format!("Comprobación {} ({}): {}", index + 1, step, message))
        .with_detail("failed_check", index)
}

#[async_trait]
impl Validator for ClassExerciseValidator {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError> {
        let rules = ctx.rules;
        let class = target_class(ctx)?;

        let mut failures = decorator_failures(rules, class);
        failures.extend(check_rules(rules, ctx.summary, Scope::Class(class)));
        if !failures.is_empty() {
            return Err(GradeError::StaticRuleViolation(failures));
        }

        if rules.checks.is_empty() {
            return Ok(ValidationVerdict::pass(format!(
                "La clase '{}' cumple los requisitos.",
                class.name
            )));
        }

        let request = InvocationRequest {
            source: ctx.submission.source.clone(),
            ops: rules.checks.iter().map(|c| to_op(c, &class.name)).collect(),
            timeout: ctx.submission.timeout,
        };
        let report = ctx.backend.invoke(request).await?;
        debug!(
            "class_exercise '{}': {} results for {} checks",
            class.name,
            report.results.len(),
            rules.checks.len()
        );

        for (index, check) in rules.checks.iter().enumerate() {
            let step = describe(check, &class.name);
            let actual: PyValue = match report.results.get(index) {
                Some(Ok(value)) => value.clone(),
                Some(Err(err)) => {
                    let err = GradeError::from(err.clone());
                    let kind = err.kind();
                    return Ok(step_failure(index, &step, err.to_string())
                        .with_detail("error_kind", kind)
                        .with_output(report.output));
                }
                None => {
                    return Err(GradeError::LoadFailed(format!(
                        "sin resultado para la comprobación {}",
                        index + 1
                    )))
                }
            };

            if let Some(expected) = expectation(check) {
                if !actual.matches(&expected) {
                    let message = match check {
                        ClassCheck::StrCheck { expected, .. } => format!(
                            "se esperaba el texto '{}', se obtuvo {}",
                            expected, actual
                        ),
                        _ => format!("se esperaba {}, se obtuvo {}", py_literal(&expected), actual),
                    };
                    return Ok(step_failure(index, &step, message)
                        .with_detail("expected", expected)
                        .with_detail("actual", actual.to_json())
                        .with_output(report.output));
                }
            }
        }

        Ok(ValidationVerdict::pass(format!(
            "¡Correcto! La clase '{}' superó las {} comprobaciones.",
            class.name,
            rules.checks.len()
        ))
        .with_output(report.output))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::grade;
    use super::super::Submission;
    use super::*;
    use crate::engine::stub::StubBackend;
    use crate::engine::{InvocationReport, LoaderError};
    use serde_json::json;

    const POINT_SOURCE: &str = r#"
from dataclasses import dataclass

@dataclass(frozen=True)
class Punto:
    x: int
    y: int

    @property
    def norma2(self):
        return self.x ** 2 + self.y ** 2

    def mover(self, dx, dy):
        return Punto(self.x + dx, self.y + dy)
"#;

    /// Plays `Punto(1, 2)` from the submission above
    fn point_backend() -> StubBackend {
        StubBackend::default().with_invoke(|request| {
            let results = request
                .ops
                .iter()
                .map(|op| match op {
                    LoaderOp::Instantiate { .. } => Ok(PyValue::Object {
                        type_name: "Punto".into(),
                        repr: "Punto(x=1, y=2)".into(),
                    }),
                    LoaderOp::GetAttribute { name, .. } if name == "x" => Ok(PyValue::Int(1)),
                    LoaderOp::GetAttribute { name, .. } => Err(LoaderError::InvocationFailed {
                        kind: "AttributeError".into(),
                        message: format!("'Punto' object has no attribute '{}'", name),
                    }),
                    LoaderOp::GetProperty { .. } => Ok(PyValue::Int(5)),
                    LoaderOp::CallMethod { .. } => Ok(PyValue::Object {
                        type_name: "Punto".into(),
                        repr: "Punto(x=2, y=3)".into(),
                    }),
                    LoaderOp::ToString { label } if label == "q" => Ok(PyValue::Str("Punto(x=2, y=3)".into())),
                    LoaderOp::ToString { .. } => Ok(PyValue::Str("Punto(x=1, y=2)".into())),
                    _ => Ok(PyValue::None),
                })
                .collect();
            Ok(InvocationReport {
                results,
                output: String::new(),
            })
        })
    }

    fn point_rules() -> serde_json::Value {
        json!({
            "class_name": "Punto",
            "require_dataclass": true,
            "require_frozen": true,
            "checks": [
                {"type": "instantiation", "args": [1, 2], "label": "p"},
                {"type": "attribute_check", "instance": "p", "attribute": "x", "expected": 1},
                {"type": "property_check", "instance": "p", "property": "norma2", "expected": 5},
                {"type": "method_call", "instance": "p", "method": "mover", "args": [1, 1], "save_as": "q"},
                {"type": "str_check", "instance": "q", "expected": "Punto(x=2, y=3)"}
            ]
        })
    }

    #[tokio::test]
    async fn test_scripted_checks_pass() {
        let backend = point_backend();
        let verdict = grade("class_exercise", point_rules(), Submission::new(POINT_SOURCE), &backend).await;
        assert!(verdict.passed, "{}", verdict.message);
        assert_eq!(backend.spawned(), 1);
    }

    #[tokio::test]
    async fn test_first_failing_step_decides() {
        let backend = point_backend();
        let mut rules = point_rules();
        rules["checks"][2]["expected"] = json!(25);
        let verdict = grade("class_exercise", rules, Submission::new(POINT_SOURCE), &backend).await;
        assert!(!verdict.passed);
        assert!(verdict.message.starts_with("Comprobación 3 (p.norma2)"), "{}", verdict.message);
        assert_eq!(verdict.details["failed_check"], 2);
    }

    #[tokio::test]
    async fn test_missing_attribute_reports_error() {
        let backend = point_backend();
        let mut rules = point_rules();
        rules["checks"][1]["attribute"] = json!("z");
        let verdict = grade("class_exercise", rules, Submission::new(POINT_SOURCE), &backend).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.details["error_kind"], "invocation_failed");
        assert!(verdict.message.contains("AttributeError"));
    }

    #[tokio::test]
    async fn test_frozen_required_statically() {
        let backend = point_backend();
        let source = POINT_SOURCE.replace("@dataclass(frozen=True)", "@dataclass");
        let verdict = grade("class_exercise", point_rules(), Submission::new(source), &backend).await;
        assert_eq!(verdict.details["error_kind"], "static_rule_violation");
        assert!(verdict.message.contains("frozen=True"));
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_class_name_defaults_to_sole_class() {
        let backend = point_backend();
        let mut rules = point_rules();
        rules.as_object_mut().unwrap().remove("class_name");
        let verdict = grade("class_exercise", rules, Submission::new(POINT_SOURCE), &backend).await;
        assert!(verdict.passed, "{}", verdict.message);
    }

    #[tokio::test]
    async fn test_missing_class_is_target_not_defined() {
        let backend = point_backend();
        let mut rules = point_rules();
        rules["class_name"] = json!("Vector");
        let verdict = grade("class_exercise", rules, Submission::new(POINT_SOURCE), &backend).await;
        assert_eq!(verdict.details["error_kind"], "target_not_defined");
        assert!(verdict.message.contains("'Vector'"));
    }

    #[tokio::test]
    async fn test_method_returning_none_can_be_asserted() {
        let backend = point_backend();
        let mut rules = point_rules();
        rules["checks"][3]["expected_return"] = json!(null);
        let verdict = grade("class_exercise", rules, Submission::new(POINT_SOURCE), &backend).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.details["failed_check"], 3);
        assert!(verdict.message.contains("se esperaba None"), "{}", verdict.message);
    }

    #[tokio::test]
    async fn test_load_failure() {
        let backend = StubBackend::default()
            .with_invoke(|_| Err(LoaderError::LoadFailed("NameError: name 'y' is not defined".into())));
        let verdict = grade("class_exercise", point_rules(), Submission::new(POINT_SOURCE), &backend).await;
        assert_eq!(verdict.details["error_kind"], "load_failed");
    }
}
