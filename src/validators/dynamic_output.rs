//! Input-driven output check
//!
//! Every case feeds one input to the program and expects the rendered
//! template back. The substitution is the typed input itself, or the result
//! of `transform_for_template` evaluated over it.

use async_trait::async_trait;
use tracing::debug;

use super::{case_stdin, ensure_clean_run, with_run_details, ValidationContext, Validator};
use crate::core::utils::{mismatch_details, normalize_output, outputs_match};
use crate::core::{FeedbackKey, GradeError, ValidationVerdict};
use crate::rules::checker::{check_rules, Scope};
use crate::rules::{InputType, RuleSet};
use crate::template::expr::TransformExpr;
use crate::template::generate::{generate_inputs, DEFAULT_NUM_CASES};
use crate::template::{render, ExprValue};

pub struct DynamicOutputValidator;

/// Typed view of free-form input text
pub(crate) fn infer_typed(text: &str, declared: Option<InputType>) -> Option<ExprValue> {
    if let Some(kind) = declared {
        return ExprValue::parse_typed(text, kind);
    }
    [InputType::Int, InputType::Float]
        .into_iter()
        .find_map(|kind| ExprValue::parse_typed(text, kind))
        .or_else(|| ExprValue::parse_typed(text, InputType::Str))
}

/// Explicit inputs win, then generated ones, then the caller's single input
fn resolve_inputs(rules: &RuleSet, input_data: Option<&str>) -> Result<Vec<ExprValue>, GradeError> {
    if !rules.inputs.is_empty() {
        return Ok(rules.inputs.iter().map(ExprValue::from_json).collect());
    }
    if let Some(constraints) = &rules.input_constraints {
        let count = rules.num_cases.unwrap_or(DEFAULT_NUM_CASES).max(1);
        let mut rng = rand::thread_rng();
        return generate_inputs(constraints, count, &mut rng);
    }
    if let Some(text) = input_data {
        let declared = rules.expected_input_type;
        return match infer_typed(text, declared) {
            Some(value) => Ok(vec![value]),
            None => Err(GradeError::Config(format!(
                "la entrada '{}' no es de tipo {}",
                text.trim(),
                declared.map(|k| k.as_str()).unwrap_or("str")
            ))),
        };
    }
    Err(GradeError::Config(
        "dynamic_output necesita 'inputs' o 'input_constraints'".to_string(),
    ))
}

#[async_trait]
impl Validator for DynamicOutputValidator {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError> {
        let rules = ctx.rules;
        let failures = check_rules(rules, ctx.summary, Scope::Program);
        if !failures.is_empty() {
            return Err(GradeError::StaticRuleViolation(failures));
        }

        let template = rules.output_format_template.as_deref().ok_or_else(|| {
            GradeError::Config("dynamic_output necesita 'output_format_template'".to_string())
        })?;
        let transform = rules
            .transform_for_template
            .as_deref()
            .map(TransformExpr::parse)
            .transpose()?;
        let inputs = resolve_inputs(rules, ctx.submission.input_data.as_deref())?;
        debug!("dynamic_output: {} cases", inputs.len());

        let mut last = None;
        for (index, value) in inputs.iter().enumerate() {
            let substitution = match &transform {
                Some(expr) => expr.eval(value)?.to_string(),
                None => value.to_string(),
            };
            let expected = render(template, &substitution);
            let input = value.stdin_text();

            let outcome = ctx.run(Some(case_stdin(&input)), false).await;
            ensure_clean_run(&outcome, ctx.timeout_secs())?;

            if !outputs_match(&expected, &outcome.user_stdout) {
                let default = format!(
                    "Con la entrada '{}' se esperaba:\n{}\nPero se obtuvo:\n{}",
                    input,
                    normalize_output(&expected),
                    normalize_output(&outcome.user_stdout)
                );
                return Ok(with_run_details(
                    ctx.feedback
                        .fail(FeedbackKey::WrongOutput, &default)
                        .with_details(mismatch_details(&expected, &outcome.user_stdout))
                        .with_detail("case_index", index)
                        .with_detail("input", input)
                        .with_output(outcome.user_stdout.clone()),
                    &outcome,
                ));
            }
            last = Some(outcome);
        }

        let total = inputs.len();
        Ok(match last {
            Some(outcome) => with_run_details(
                ValidationVerdict::pass(format!("¡Correcto! Superaste los {} casos de prueba.", total))
                    .with_output(outcome.user_stdout.clone())
                    .with_detail("cases", total),
                &outcome,
            ),
            None => ValidationVerdict::pass("No hay casos que comprobar.").with_detail("cases", 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::grade;
    use super::super::Submission;
    use super::*;
    use crate::engine::stub::{ok_run, StubBackend};
    use serde_json::json;

    /// Plays a program that prints the double of the integer it reads
    fn doubling_backend() -> StubBackend {
        StubBackend::default().with_script(|request| {
            let n: i64 = request
                .stdin
                .as_deref()
                .unwrap_or("")
                .trim()
                .parse()
                .unwrap_or(0);
            ok_run(&format!("El doble es {}\n", n * 2))
        })
    }

    #[tokio::test]
    async fn test_explicit_inputs_with_transform() {
        let backend = doubling_backend();
        let rules = json!({
            "inputs": [1, 7, -4],
            "output_format_template": "El doble es {var}",
            "transform_for_template": "value * 2"
        });
        let source = "n = int(input())\nprint(f\"El doble es {n * 2}\")\n";
        let verdict = grade("dynamic_output", rules, Submission::new(source), &backend).await;
        assert!(verdict.passed, "{}", verdict.message);
        assert_eq!(verdict.details["cases"], 3);
        assert_eq!(
            backend.stdin_seen(),
            vec![Some("1\n".to_string()), Some("7\n".to_string()), Some("-4\n".to_string())]
        );
    }

    #[tokio::test]
    async fn test_generated_inputs_stop_at_first_mismatch() {
        let backend = doubling_backend();
        let rules = json!({
            "input_constraints": {"type": "int", "min": 1, "max": 50},
            "num_cases": 4,
            "output_format_template": "El doble es {var}",
            "transform_for_template": "value * 3"
        });
        let source = "n = int(input())\nprint(f\"El doble es {n * 2}\")\n";
        let verdict = grade("dynamic_output", rules, Submission::new(source), &backend).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.feedback_key(), Some("wrong_output"));
        assert_eq!(verdict.details["case_index"], 0);
        assert_eq!(backend.spawned(), 1);
    }

    #[tokio::test]
    async fn test_missing_template_is_config_error() {
        let backend = doubling_backend();
        let verdict = grade(
            "dynamic_output",
            json!({"inputs": [1]}),
            Submission::new("print(1)\n"),
            &backend,
        )
        .await;
        assert_eq!(verdict.details["error_kind"], "config_error");
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_disallowed_transform_is_config_error() {
        let backend = doubling_backend();
        let rules = json!({
            "inputs": [1],
            "output_format_template": "{var}",
            "transform_for_template": "__import__('os').getcwd()"
        });
        let verdict = grade("dynamic_output", rules, Submission::new("print(1)\n"), &backend).await;
        assert_eq!(verdict.details["error_kind"], "config_error");
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_static_rules_run_first() {
        let backend = doubling_backend();
        let rules = json!({
            "inputs": [1],
            "output_format_template": "El doble es {var}",
            "require_for_loop": true
        });
        let verdict = grade("dynamic_output", rules, Submission::new("print(input())\n"), &backend).await;
        assert_eq!(verdict.details["error_kind"], "static_rule_violation");
        assert_eq!(backend.spawned(), 0);
    }

    #[test]
    fn test_infer_typed() {
        assert_eq!(infer_typed("12", None), Some(ExprValue::Int(12)));
        assert_eq!(infer_typed("1.5", None), Some(ExprValue::Float(1.5)));
        assert_eq!(infer_typed("Ana", None), Some(ExprValue::Str("Ana".into())));
        assert_eq!(infer_typed("Ana", Some(InputType::Int)), None);
    }

    #[test]
    fn test_caller_input_used_last() {
        let rules = RuleSet::default();
        let inputs = resolve_inputs(&rules, Some("5")).unwrap();
        assert_eq!(inputs, vec![ExprValue::Int(5)]);
        assert_eq!(resolve_inputs(&rules, None).unwrap_err().kind(), "config_error");
    }
}
