//! Personalised greeting (`saludo_personalizado`)
//!
//! The supplied input is screened against the declared type before anything
//! runs; the program's output must equal the template with `{var}` replaced
//! by that input.

use async_trait::async_trait;

use super::{case_stdin, ensure_clean_run, with_run_details, ValidationContext, Validator};
use crate::core::utils::{mismatch_details, normalize_output, outputs_match};
use crate::core::{Feedback, FeedbackKey, GradeError, ValidationVerdict};
use crate::rules::{input_text, InputType, RuleSet};
use crate::template::{render, ExprValue};

pub struct GreetingValidator;

/// Text a numeric conversion would accept
fn looks_numeric(text: &str) -> bool {
    let text = text.trim();
    text.chars().any(|c| c.is_ascii_digit()) && text.parse::<f64>().is_ok()
}

/// Input screen; `Some` is the failing verdict
fn screen_input(input: &str, rules: &RuleSet, feedback: &Feedback) -> Option<ValidationVerdict> {
    if input.trim().is_empty() {
        return Some(feedback.fail(
            FeedbackKey::InvalidInputValue,
            "Debes ingresar un valor para ejecutar el programa.",
        ));
    }
    if rules.reject_numeric_input && looks_numeric(input) {
        return Some(feedback.fail(
            FeedbackKey::NumericInputRejected,
            "El valor ingresado no puede ser un número.",
        ));
    }
    match rules.expected_input_type {
        Some(InputType::Str) | None => None,
        Some(kind) if ExprValue::parse_typed(input, kind).is_none() => Some(
            feedback
                .fail(
                    FeedbackKey::WrongInputType,
                    &format!("Se esperaba un valor de tipo {}.", kind.as_str()),
                )
                .with_detail("expected_input_type", kind.as_str()),
        ),
        Some(_) => None,
    }
}

#[async_trait]
impl Validator for GreetingValidator {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError> {
        let rules = ctx.rules;
        let template = rules.output_format_template.as_deref().ok_or_else(|| {
            GradeError::Config("saludo_personalizado necesita 'output_format_template'".to_string())
        })?;

        let inputs: Vec<String> = match &ctx.submission.input_data {
            Some(input) => vec![input.clone()],
            None => rules.inputs.iter().map(input_text).collect(),
        };
        if inputs.is_empty() {
            return Ok(ctx.feedback.fail(
                FeedbackKey::InvalidInputValue,
                "Debes ingresar un valor para ejecutar el programa.",
            ));
        }
        if let Some(rejected) = inputs
            .iter()
            .find_map(|input| screen_input(input, rules, &ctx.feedback))
        {
            return Ok(rejected);
        }

        let mut last = None;
        for input in &inputs {
            let expected = render(template, input.trim());
            let outcome = ctx.run(Some(case_stdin(input)), false).await;
            ensure_clean_run(&outcome, ctx.timeout_secs())?;

            if !outputs_match(&expected, &outcome.user_stdout) {
                let default = format!(
                    "Se esperaba '{}', pero tu programa mostró '{}'.",
                    normalize_output(&expected),
                    normalize_output(&outcome.user_stdout)
                );
                return Ok(with_run_details(
                    ctx.feedback
                        .fail(FeedbackKey::WrongOutput, &default)
                        .with_details(mismatch_details(&expected, &outcome.user_stdout))
                        .with_detail("input", input.trim())
                        .with_output(outcome.user_stdout.clone()),
                    &outcome,
                ));
            }
            last = Some(outcome);
        }

        Ok(match last {
            Some(outcome) => with_run_details(
                ValidationVerdict::pass("¡Correcto! Tu saludo es el esperado.")
                    .with_output(outcome.user_stdout.clone()),
                &outcome,
            ),
            None => ValidationVerdict::pass("¡Correcto!"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::grade;
    use super::super::Submission;
    use super::*;
    use crate::engine::stub::{ok_run, StubBackend};
    use serde_json::{json, Value};

    const GREETING_SOURCE: &str = "nombre = input()\nprint(f\"¡Hola, {nombre}!\")\n";

    fn greeting_rules() -> Value {
        json!({
            "output_format_template": "¡Hola, {var}!",
            "expected_input_type": "str",
            "reject_numeric_input": true
        })
    }

    fn echo_backend() -> StubBackend {
        StubBackend::default().with_script(|request| {
            let name = request.stdin.as_deref().unwrap_or("").trim().to_string();
            ok_run(&format!("¡Hola, {}!\n", name))
        })
    }

    #[tokio::test]
    async fn test_numeric_input_rejected_before_running() {
        let backend = echo_backend();
        let verdict = grade(
            "saludo_personalizado",
            greeting_rules(),
            Submission::new(GREETING_SOURCE).with_input("123"),
            &backend,
        )
        .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.feedback_key(), Some("numeric_input_rejected"));
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_greeting_passes() {
        let backend = echo_backend();
        let verdict = grade(
            "saludo_personalizado",
            greeting_rules(),
            Submission::new(GREETING_SOURCE).with_input("Ana"),
            &backend,
        )
        .await;
        assert!(verdict.passed, "{}", verdict.message);
        assert_eq!(verdict.actual_output.as_deref(), Some("¡Hola, Ana!\n"));
        assert_eq!(backend.stdin_seen(), vec![Some("Ana\n".to_string())]);
    }

    #[tokio::test]
    async fn test_wrong_greeting() {
        let backend = StubBackend::default().with_script(|_| ok_run("Hola Ana\n"));
        let verdict = grade(
            "saludo_personalizado",
            greeting_rules(),
            Submission::new(GREETING_SOURCE).with_input("Ana"),
            &backend,
        )
        .await;
        assert_eq!(verdict.feedback_key(), Some("wrong_output"));
    }

    #[tokio::test]
    async fn test_wrong_input_type() {
        let backend = echo_backend();
        let rules = json!({"output_format_template": "Tienes {var} años", "expected_input_type": "int"});
        let verdict = grade(
            "saludo_personalizado",
            rules,
            Submission::new("edad = int(input())\nprint(f\"Tienes {edad} años\")\n").with_input("veinte"),
            &backend,
        )
        .await;
        assert_eq!(verdict.feedback_key(), Some("wrong_input_type"));
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_empty_input_is_invalid() {
        let backend = echo_backend();
        let verdict = grade(
            "saludo_personalizado",
            greeting_rules(),
            Submission::new(GREETING_SOURCE).with_input("   "),
            &backend,
        )
        .await;
        assert_eq!(verdict.feedback_key(), Some("invalid_input_value"));
    }

    #[test]
    fn test_looks_numeric() {
        assert!(looks_numeric("123"));
        assert!(looks_numeric(" -4.5 "));
        assert!(!looks_numeric("Ana"));
        assert!(!looks_numeric("inf"));
        assert!(!looks_numeric("A1"));
    }
}
