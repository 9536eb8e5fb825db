//! Grading facade used by the worker
//!
//! Resolves the exercise, builds the submission with a clamped timeout and
//! hands it to the dispatcher. The code-execution flow shares the same
//! security screen and sandbox.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::analysis::analyze;
use crate::config::GraderConfig;
use crate::core::utils::fingerprint;
use crate::core::{GradeError, ValidationVerdict};
use crate::engine::{ExecutionBackend, ScriptRequest};
use crate::jobs::{GradeRequest, GradeResponse, RunRequest, RunResponse};
use crate::store::ExerciseStore;
use crate::validators::{dispatch, Submission};

pub struct Grader {
    config: GraderConfig,
    store: Box<dyn ExerciseStore>,
    backend: Arc<dyn ExecutionBackend>,
}

impl Grader {
    pub fn new(
        config: GraderConfig,
        store: Box<dyn ExerciseStore>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
        }
    }

    pub fn config(&self) -> &GraderConfig {
        &self.config
    }

    /// Grade one submission; every failure is reported inside the response
    pub async fn grade(&self, request: &GradeRequest) -> GradeResponse {
        let descriptor = match self
            .store
            .fetch_validation_descriptor(&request.exercise_id)
            .await
        {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                warn!("Unknown exercise {}", request.exercise_id);
                let verdict = ValidationVerdict::fail(format!(
                    "No se encontró el ejercicio '{}'.",
                    request.exercise_id
                ))
                .with_detail("error_kind", "exercise_not_found");
                return GradeResponse::from_verdict(&request.request_id, verdict);
            }
            Err(e) => {
                error!("Failed to load exercise {}: {:#}", request.exercise_id, e);
                return GradeResponse::system_error(
                    &request.request_id,
                    "No se pudo cargar el ejercicio. Inténtalo de nuevo más tarde.",
                );
            }
        };

        let mut submission = Submission::new(request.submitted_code.clone())
            .with_timeout(self.config.clamp_timeout(request.timeout_seconds));
        submission.input_data = request.input_data.clone();

        info!(
            "Grading {} for exercise {} ({})",
            fingerprint(&submission.source),
            request.exercise_id,
            descriptor.strategy_tag
        );
        let verdict = dispatch(&descriptor, &submission, self.backend.as_ref(), &self.config.policy).await;
        GradeResponse::from_verdict(&request.request_id, verdict)
    }

    /// Run code once through the sandbox, without grading
    pub async fn run_code(&self, request: &RunRequest) -> RunResponse {
        let respond = |output: String, error: Option<String>, seconds: f64| RunResponse {
            request_id: request.request_id.clone(),
            output,
            error,
            execution_time_seconds: seconds,
        };

        let summary = analyze(&request.code, &self.config.policy);
        if let Some(message) = summary.syntax_error {
            return respond(String::new(), Some(GradeError::Syntax(message).to_string()), 0.0);
        }
        if !summary.is_secure() {
            let err = GradeError::SecurityViolation {
                imports: summary.disallowed_imports.into_iter().collect(),
                calls: summary.disallowed_calls.into_iter().collect(),
            };
            return respond(String::new(), Some(err.to_string()), 0.0);
        }

        let timeout = self.config.clamp_timeout(request.timeout_seconds);
        let mut script = ScriptRequest::new(request.code.clone(), timeout);
        script.stdin = request.input_data.clone();
        let outcome = self.backend.run_script(script).await;

        let error = if outcome.timed_out {
            Some(GradeError::TimedOut { seconds: timeout.as_secs_f64() }.to_string())
        } else if !outcome.stderr.trim().is_empty() {
            Some(outcome.stderr.clone())
        } else if outcome.exit_code != Some(0) {
            Some(
                GradeError::RuntimeFailure {
                    exit_code: outcome.exit_code,
                    stderr: String::new(),
                }
                .to_string(),
            )
        } else {
            None
        };
        respond(outcome.user_stdout, error, outcome.duration.as_secs_f64())
    }
}
