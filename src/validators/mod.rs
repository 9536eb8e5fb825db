//! Strategy dispatcher and validators
//!
//! `dispatch` runs the fixed pipeline for every grading call:
//! strategy tag -> rule set -> analysis -> syntax gate -> security gate ->
//! strategy-specific validation. Every failure along the way becomes a
//! failing verdict; nothing is returned as an error.

pub mod class_exercise;
pub mod conditional_print;
pub mod dynamic_output;
pub mod flexible;
pub mod function_scenarios;
pub mod greeting;
pub mod simple_print;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analysis::{analyze, AnalysisSummary, SecurityPolicy};
use crate::core::utils::fingerprint;
use crate::core::{Feedback, GradeError, ValidationVerdict};
use crate::engine::{ExecutionBackend, SandboxOutcome, ScriptRequest};
use crate::rules::{RuleSet, ValidationDescriptor};

/// Immutable grading input
#[derive(Debug, Clone)]
pub struct Submission {
    pub source: String,
    pub input_data: Option<String>,
    pub timeout: Duration,
}

impl Submission {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            input_data: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input_data = Some(input.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Closed set of validation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyTag {
    SimplePrint,
    DynamicOutput,
    ConditionalPrint,
    SaludoPersonalizado,
    FunctionScenarios,
    ClassExercise,
    FlexibleExercise,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::SimplePrint => "simple_print",
            StrategyTag::DynamicOutput => "dynamic_output",
            StrategyTag::ConditionalPrint => "conditional_print",
            StrategyTag::SaludoPersonalizado => "saludo_personalizado",
            StrategyTag::FunctionScenarios => "function_scenarios",
            StrategyTag::ClassExercise => "class_exercise",
            StrategyTag::FlexibleExercise => "flexible_exercise",
        }
    }

    fn validator(&self) -> Box<dyn Validator> {
        match self {
            StrategyTag::SimplePrint => Box::new(simple_print::SimplePrintValidator),
            StrategyTag::DynamicOutput => Box::new(dynamic_output::DynamicOutputValidator),
            StrategyTag::ConditionalPrint => {
                Box::new(conditional_print::ConditionalPrintValidator)
            }
            StrategyTag::SaludoPersonalizado => Box::new(greeting::GreetingValidator),
            StrategyTag::FunctionScenarios => {
                Box::new(function_scenarios::FunctionScenariosValidator)
            }
            StrategyTag::ClassExercise => Box::new(class_exercise::ClassExerciseValidator),
            StrategyTag::FlexibleExercise => Box::new(flexible::FlexibleValidator),
        }
    }
}

impl FromStr for StrategyTag {
    type Err = GradeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim() {
            "simple_print" => Ok(StrategyTag::SimplePrint),
            "dynamic_output" => Ok(StrategyTag::DynamicOutput),
            "conditional_print" => Ok(StrategyTag::ConditionalPrint),
            "saludo_personalizado" => Ok(StrategyTag::SaludoPersonalizado),
            "function_scenarios" | "exam" => Ok(StrategyTag::FunctionScenarios),
            "class_exercise" => Ok(StrategyTag::ClassExercise),
            "flexible_exercise" => Ok(StrategyTag::FlexibleExercise),
            other => Err(GradeError::Config(format!(
                "estrategia de validación desconocida '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a validator may look at for one grading call
pub struct ValidationContext<'a> {
    pub submission: &'a Submission,
    pub summary: &'a AnalysisSummary,
    pub rules: &'a RuleSet,
    pub descriptor: &'a ValidationDescriptor,
    pub feedback: Feedback,
    pub backend: &'a dyn ExecutionBackend,
}

impl ValidationContext<'_> {
    /// Run the whole submission once with the given stdin
    pub async fn run(&self, stdin: Option<String>, intercept_prints: bool) -> SandboxOutcome {
        let mut request = ScriptRequest::new(self.submission.source.clone(), self.submission.timeout);
        request.stdin = stdin;
        request.intercept_prints = intercept_prints;
        self.backend.run_script(request).await
    }

    pub fn timeout_secs(&self) -> f64 {
        self.submission.timeout.as_secs_f64()
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, ctx: &ValidationContext<'_>) -> Result<ValidationVerdict, GradeError>;
}

/// Timeout or non-zero exit as an error
pub fn ensure_clean_run(outcome: &SandboxOutcome, timeout_secs: f64) -> Result<(), GradeError> {
    if outcome.timed_out {
        return Err(GradeError::TimedOut {
            seconds: timeout_secs,
        });
    }
    if outcome.exit_code != Some(0) {
        return Err(GradeError::RuntimeFailure {
            exit_code: outcome.exit_code,
            stderr: outcome.stderr.clone(),
        });
    }
    Ok(())
}

/// Attach the run facts every verdict reports
pub fn with_run_details(verdict: ValidationVerdict, outcome: &SandboxOutcome) -> ValidationVerdict {
    let verdict = verdict
        .with_detail("timed_out", outcome.timed_out)
        .with_detail("output_truncated", outcome.stdout_truncated)
        .with_detail("duration_ms", outcome.duration.as_millis() as u64);
    match outcome.exit_code {
        Some(code) => verdict.with_detail("exit_code", code),
        None => verdict,
    }
}

/// Stdin text for one case: the input followed by a newline
pub fn case_stdin(input: &str) -> String {
    if input.ends_with('\n') {
        input.to_string()
    } else {
        format!("{}\n", input)
    }
}

/// Grade one submission against one exercise descriptor
pub async fn dispatch(
    descriptor: &ValidationDescriptor,
    submission: &Submission,
    backend: &dyn ExecutionBackend,
    policy: &SecurityPolicy,
) -> ValidationVerdict {
    let code_fingerprint = fingerprint(&submission.source);
    let verdict = match run_pipeline(descriptor, submission, backend, policy, &code_fingerprint).await {
        Ok(verdict) => verdict,
        Err(err) => {
            debug!("Submission {} failed with {}", code_fingerprint, err.kind());
            err.into_verdict()
        }
    };

    info!(
        "Verdict for {} ({}): passed={}",
        code_fingerprint, descriptor.strategy_tag, verdict.passed
    );
    verdict
        .with_detail("code_fingerprint", code_fingerprint)
        .with_detail("strategy", descriptor.strategy_tag.clone())
}

async fn run_pipeline(
    descriptor: &ValidationDescriptor,
    submission: &Submission,
    backend: &dyn ExecutionBackend,
    policy: &SecurityPolicy,
    code_fingerprint: &str,
) -> Result<ValidationVerdict, GradeError> {
    let tag: StrategyTag = descriptor.strategy_tag.parse()?;
    let rules = RuleSet::from_value(&descriptor.rules)?;

    let summary = analyze(&submission.source, policy);
    if let Some(message) = &summary.syntax_error {
        return Err(GradeError::Syntax(message.clone()));
    }
    if !summary.is_secure() {
        warn!(
            "Submission {} blocked: imports={:?} calls={:?}",
            code_fingerprint, summary.disallowed_imports, summary.disallowed_calls
        );
        return Err(GradeError::SecurityViolation {
            imports: summary.disallowed_imports.iter().cloned().collect(),
            calls: summary.disallowed_calls.iter().cloned().collect(),
        });
    }

    let ctx = ValidationContext {
        submission,
        summary: &summary,
        rules: &rules,
        descriptor,
        feedback: Feedback::merged(&descriptor.custom_feedback, &rules.custom_feedback),
        backend,
    };
    tag.validator().validate(&ctx).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::engine::stub::StubBackend;
    use serde_json::Value;

    pub async fn grade(
        tag: &str,
        rules: Value,
        submission: Submission,
        backend: &StubBackend,
    ) -> ValidationVerdict {
        let descriptor = ValidationDescriptor::new(tag, rules);
        dispatch(&descriptor, &submission, backend, &SecurityPolicy::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::grade;
    use super::*;
    use crate::engine::stub::{ok_run, StubBackend};
    use serde_json::json;

    #[test]
    fn test_strategy_tags() {
        assert_eq!("exam".parse::<StrategyTag>().unwrap(), StrategyTag::FunctionScenarios);
        assert_eq!(
            "saludo_personalizado".parse::<StrategyTag>().unwrap().to_string(),
            "saludo_personalizado"
        );
        assert_eq!(
            "desconocida".parse::<StrategyTag>().unwrap_err().kind(),
            "config_error"
        );
    }

    #[tokio::test]
    async fn test_syntax_error_blocks_every_strategy() {
        for tag in [
            "simple_print",
            "dynamic_output",
            "conditional_print",
            "saludo_personalizado",
            "function_scenarios",
            "class_exercise",
            "flexible_exercise",
        ] {
            let backend = StubBackend::default();
            let verdict = grade(tag, json!({}), Submission::new("print('hola'\n"), &backend).await;
            assert!(!verdict.passed, "{}", tag);
            assert!(verdict.message.starts_with("Error de sintaxis"), "{}", tag);
            assert_eq!(verdict.details["error_kind"], "syntax_error");
            assert_eq!(backend.spawned(), 0, "{}", tag);
        }
    }

    #[tokio::test]
    async fn test_security_block_spawns_nothing() {
        let backend = StubBackend::default();
        let verdict = grade(
            "flexible_exercise",
            json!({}),
            Submission::new("import os\nos.system(\"echo x\")\n"),
            &backend,
        )
        .await;
        assert!(!verdict.passed);
        assert!(verdict.message.contains("'os'"));
        assert_eq!(verdict.details["error_kind"], "security_violation");
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_unknown_rule_key_is_config_error() {
        let backend = StubBackend::default();
        let verdict = grade(
            "simple_print",
            json!({"expected_output": "x"}),
            Submission::new("print('x')\n"),
            &backend,
        )
        .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.details["error_kind"], "config_error");
        assert_eq!(backend.spawned(), 0);
    }

    #[tokio::test]
    async fn test_verdict_carries_fingerprint_and_strategy() {
        let backend = StubBackend::default().with_script(|_| ok_run("hola\n"));
        let verdict = grade(
            "flexible_exercise",
            json!({}),
            Submission::new("print('hola')\n"),
            &backend,
        )
        .await;
        assert!(verdict.passed);
        assert_eq!(verdict.details["strategy"], "flexible_exercise");
        assert_eq!(
            verdict.details["code_fingerprint"],
            fingerprint("print('hola')\n")
        );
    }

    #[test]
    fn test_ensure_clean_run() {
        let mut outcome = ok_run("x");
        assert!(ensure_clean_run(&outcome, 5.0).is_ok());
        outcome.exit_code = Some(1);
        assert_eq!(ensure_clean_run(&outcome, 5.0).unwrap_err().kind(), "runtime_failure");
        outcome.timed_out = true;
        assert_eq!(ensure_clean_run(&outcome, 5.0).unwrap_err().kind(), "timed_out");
    }
}
