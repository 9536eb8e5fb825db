use async_trait::async_trait;

use super::{case_stdin, ensure_clean_run, with_run_details, ValidationContext, Validator};
use crate::core::utils::normalize_output;
use crate::core::{FeedbackKey, GradeError, ValidationVerdict};
use crate::rules::checker::{check_rules, structural_failures, Scope};

pub struct FlexibleValidator;

#[async_trait]
impl Validator for FlexibleValidator {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError> {
        let mut failures = check_rules(ctx.rules, ctx.summary, Scope::Program);
        if let Some(required) = &ctx.rules.structural_requirements {
            failures.extend(structural_failures(required, ctx.summary));
        }
        if !failures.is_empty() {
            return Err(GradeError::StaticRuleViolation(failures));
        }

        let stdin = ctx.submission.input_data.as_deref().map(case_stdin);
        let outcome = ctx.run(stdin, false).await;
        ensure_clean_run(&outcome, ctx.timeout_secs())?;

        let verdict = if normalize_output(&outcome.user_stdout).is_empty() {
            ctx.feedback
                .fail(FeedbackKey::EmptyOutput, "Tu programa no mostró nada en pantalla.")
        } else {
            ValidationVerdict::pass("¡Ejercicio completado!")
        };
        Ok(with_run_details(
            verdict.with_output(outcome.user_stdout.clone()),
            &outcome,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::grade;
    use super::super::Submission;
    use crate::engine::stub::{ok_run, StubBackend};
    use crate::engine::SandboxOutcome;
    use serde_json::json;

    #[tokio::test]
    async fn test_any_output_passes() {
        let backend = StubBackend::default().with_script(|_| ok_run("lo que sea\n"));
        let verdict = grade(
            "flexible_exercise",
            json!({"require_for_loop": true}),
            Submission::new("for i in range(2):\n    print(i)\n"),
            &backend,
        )
        .await;
        assert!(verdict.passed, "{}", verdict.message);
        assert_eq!(verdict.actual_output.as_deref(), Some("lo que sea\n"));
    }

    #[tokio::test]
    async fn test_structural_requirements_block_run() {
        let backend = StubBackend::default().with_script(|_| ok_run("x\n"));
        let verdict = grade(
            "flexible_exercise",
            json!({"structural_requirements": {"imports": ["random"]}}),
            Submission::new("print('x')\n"),
            &backend,
        )
        .await;
        assert_eq!(verdict.details["error_kind"], "static_rule_violation");
        assert!(verdict.message.contains("'random'"));
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_silent_program_fails() {
        let backend = StubBackend::default();
        let verdict = grade("flexible_exercise", json!({}), Submission::new("x = 1\n"), &backend).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.feedback_key(), Some("empty_output"));
    }

    #[tokio::test]
    async fn test_crash_fails_even_with_output() {
        let backend = StubBackend::default().with_script(|_| SandboxOutcome {
            user_stdout: "antes\n".to_string(),
            stderr: "ValueError: boom".to_string(),
            exit_code: Some(1),
            ..Default::default()
        });
        let verdict = grade(
            "flexible_exercise",
            json!({}),
            Submission::new("print('antes')\nraise ValueError('boom')\n"),
            &backend,
        )
        .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.details["error_kind"], "runtime_failure");
    }
}
