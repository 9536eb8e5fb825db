use async_trait::async_trait;

use super::{case_stdin, ensure_clean_run, with_run_details, ValidationContext, Validator};
use crate::core::utils::{mismatch_details, normalize_output, outputs_match};
use crate::core::{FeedbackKey, GradeError, ValidationVerdict};
use crate::rules::checker::{check_rules, Scope};
use crate::rules::RuleSet;

pub struct ConditionalPrintValidator;

#[async_trait]
impl Validator for ConditionalPrintValidator {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError> {
        // if-statements are required unless the exercise opts out
        let rules = RuleSet {
            require_if_statement: Some(ctx.rules.require_if_statement.unwrap_or(true)),
            ..ctx.rules.clone()
        };
        let failures = check_rules(&rules, ctx.summary, Scope::Program);
        if !failures.is_empty() {
            return Err(GradeError::StaticRuleViolation(failures));
        }

        if rules.test_cases.is_empty() {
            let stdin = ctx.submission.input_data.as_deref().map(case_stdin);
            let outcome = ctx.run(stdin, false).await;
            ensure_clean_run(&outcome, ctx.timeout_secs())?;
            return Ok(with_run_details(
                ValidationVerdict::pass("Código ejecutado correctamente.")
                    .with_output(outcome.user_stdout.clone()),
                &outcome,
            ));
        }

        let mut last = None;
        for (index, case) in rules.test_cases.iter().enumerate() {
            let input = case.input_text();
            let outcome = ctx.run(Some(case_stdin(&input)), false).await;
            ensure_clean_run(&outcome, ctx.timeout_secs())?;

            if !outputs_match(&case.expected_output, &outcome.user_stdout) {
                let default = format!(
                    "Con la entrada '{}' se esperaba '{}', pero se obtuvo '{}'.",
                    input,
                    normalize_output(&case.expected_output),
                    normalize_output(&outcome.user_stdout)
                );
                return Ok(with_run_details(
                    ctx.feedback
                        .fail(FeedbackKey::WrongOutput, &default)
                        .with_details(mismatch_details(&case.expected_output, &outcome.user_stdout))
                        .with_detail("case_index", index)
                        .with_detail("input", input)
                        .with_output(outcome.user_stdout.clone()),
                    &outcome,
                ));
            }
            last = Some(outcome);
        }

        let total = rules.test_cases.len();
        let mut verdict = ValidationVerdict::pass(format!(
            "¡Correcto! Tu programa respondió bien a los {} casos.",
            total
        ))
        .with_detail("cases", total);
        if let Some(outcome) = last {
            verdict = with_run_details(verdict.with_output(outcome.user_stdout.clone()), &outcome);
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::grade;
    use super::super::Submission;
    use crate::engine::stub::{ok_run, StubBackend};
    use crate::engine::SandboxOutcome;
    use serde_json::{json, Value};
    use std::time::Duration;

    const SIGN_SOURCE: &str = "n = int(input())\nif n >= 0:\n    print(\"positivo\")\nelse:\n    print(\"negativo\")\n";

    fn sign_backend() -> StubBackend {
        StubBackend::default().with_script(|request| {
            let n: i64 = request
                .stdin
                .as_deref()
                .unwrap_or("")
                .trim()
                .parse()
                .unwrap_or(0);
            ok_run(if n >= 0 { "positivo\n" } else { "negativo\n" })
        })
    }

    fn sign_rules() -> Value {
        json!({"test_cases": [
            {"input": "10", "expected_output": "positivo"},
            {"input": "-3", "expected_output": "negativo"}
        ]})
    }

    #[tokio::test]
    async fn test_every_case_passes() {
        let backend = sign_backend();
        let verdict = grade("conditional_print", sign_rules(), Submission::new(SIGN_SOURCE), &backend).await;
        assert!(verdict.passed, "{}", verdict.message);
        assert_eq!(
            backend.stdin_seen(),
            vec![Some("10\n".to_string()), Some("-3\n".to_string())]
        );
    }

    #[tokio::test]
    async fn test_first_mismatch_stops() {
        let backend = StubBackend::default().with_script(|_| ok_run("positivo\n"));
        let mut rules = sign_rules();
        rules["test_cases"]
            .as_array_mut()
            .unwrap()
            .push(json!({"input": "5", "expected_output": "positivo"}));
        let verdict = grade("conditional_print", rules, Submission::new(SIGN_SOURCE), &backend).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.feedback_key(), Some("wrong_output"));
        assert_eq!(verdict.details["case_index"], 1);
        assert_eq!(backend.spawned(), 2);
    }

    #[tokio::test]
    async fn test_if_statement_required_by_default() {
        let backend = sign_backend();
        let verdict = grade(
            "conditional_print",
            sign_rules(),
            Submission::new("print('positivo')\n"),
            &backend,
        )
        .await;
        assert_eq!(verdict.details["error_kind"], "static_rule_violation");
        assert!(verdict.message.contains("sentencia if"));
        assert_eq!(backend.spawned(), 0);

        let mut rules = sign_rules();
        rules["require_if_statement"] = json!(false);
        rules["test_cases"] = json!([{"input": "1", "expected_output": "positivo"}]);
        let verdict = grade("conditional_print", rules, Submission::new("print('positivo')\n"), &backend).await;
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn test_single_adhoc_run() {
        let backend = sign_backend();
        let verdict = grade(
            "conditional_print",
            json!({}),
            Submission::new(SIGN_SOURCE).with_input("-1"),
            &backend,
        )
        .await;
        assert!(verdict.passed);
        assert_eq!(verdict.actual_output.as_deref(), Some("negativo\n"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let backend = StubBackend::default().with_script(|_| SandboxOutcome {
            timed_out: true,
            ..Default::default()
        });
        let verdict = grade(
            "conditional_print",
            sign_rules(),
            Submission::new("if True:\n    while True:\n        pass\n").with_timeout(Duration::from_secs(1)),
            &backend,
        )
        .await;
        assert!(!verdict.passed);
        assert!(verdict.timed_out());
        assert!(verdict.message.contains("1s"));
    }
}
