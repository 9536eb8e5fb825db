use async_trait::async_trait;

use super::{case_stdin, ensure_clean_run, with_run_details, ValidationContext, Validator};
use crate::core::utils::{mismatch_details, normalize_output, outputs_match};
use crate::core::{FeedbackKey, GradeError, ValidationVerdict};
use crate::rules::checker::{definition_failures, presence_failures, print_variable_failures, Scope};

pub struct SimplePrintValidator;

#[async_trait]
impl Validator for SimplePrintValidator {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError> {
        let rules = ctx.rules;
        let summary = ctx.summary;

        let failures = print_variable_failures(rules, summary, Scope::Program);
        if !failures.is_empty() {
            return Ok(ctx
                .feedback
                .fail(FeedbackKey::WrongVariable, &failures.join("\n"))
                .with_detail("failures", failures));
        }

        if rules.require_fstring {
            let first_is_fstring = summary
                .print_calls
                .first()
                .is_some_and(|call| call.is_formatted_string);
            if !first_is_fstring {
                return Ok(ctx.feedback.fail(
                    FeedbackKey::NotFstring,
                    "Debes usar un f-string (f\"...\") dentro de print().",
                ));
            }
        }

        let mut failures = presence_failures(rules, summary, Scope::Program);
        failures.extend(definition_failures(rules, summary, Scope::Program));
        if !failures.is_empty() {
            return Err(GradeError::StaticRuleViolation(failures));
        }

        let stdin = ctx.submission.input_data.as_deref().map(case_stdin);
        let outcome = ctx.run(stdin, true).await;
        ensure_clean_run(&outcome, ctx.timeout_secs())?;

        let output = outcome.user_stdout.clone();
        if normalize_output(&output).is_empty() {
            return Ok(with_run_details(
                ctx.feedback
                    .fail(FeedbackKey::EmptyOutput, "Tu programa no mostró nada en pantalla.")
                    .with_output(output),
                &outcome,
            ));
        }

        if let Some(expected_count) = rules.expected_print_count {
            let actual_count = outcome.captured_print_metadata.len();
            if actual_count != expected_count {
                let default = format!(
                    "Se esperaban {} llamadas a print(), pero se hicieron {}.",
                    expected_count, actual_count
                );
                return Ok(with_run_details(
                    ctx.feedback
                        .fail(FeedbackKey::WrongPrintCount, &default)
                        .with_output(output)
                        .with_detail("expected_print_count", expected_count)
                        .with_detail("actual_print_count", actual_count),
                    &outcome,
                ));
            }
        }

        if let Some(expected) = &rules.expected_exact_output {
            if !outputs_match(expected, &output) {
                let default = GradeError::OutputMismatch {
                    expected: normalize_output(expected),
                    actual: normalize_output(&output),
                }
                .to_string();
                return Ok(with_run_details(
                    ctx.feedback
                        .fail(FeedbackKey::WrongOutput, &default)
                        .with_details(mismatch_details(expected, &output))
                        .with_output(output),
                    &outcome,
                ));
            }
        }

        Ok(with_run_details(
            ValidationVerdict::pass("¡Correcto! Tu programa muestra la salida esperada.").with_output(output),
            &outcome,
        ))
    }
}
