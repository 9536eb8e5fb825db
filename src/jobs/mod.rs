//! Worker job payloads

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ValidationVerdict;

/// Worker job enum - represents different types of jobs the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Grade a submission against an exercise
    #[serde(rename = "grade")]
    Grade(GradeRequest),
    /// Run code once without grading
    #[serde(rename = "run")]
    Run(RunRequest),
}

impl WorkerJob {
    pub fn request_id(&self) -> &str {
        match self {
            WorkerJob::Grade(job) => &job.request_id,
            WorkerJob::Run(job) => &job.request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRequest {
    pub request_id: String,
    pub exercise_id: String,
    pub submitted_code: String,
    #[serde(default)]
    pub input_data: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResponse {
    pub request_id: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub details: Map<String, Value>,
}

impl GradeResponse {
    pub fn from_verdict(request_id: impl Into<String>, verdict: ValidationVerdict) -> Self {
        Self {
            request_id: request_id.into(),
            passed: verdict.passed,
            exit_code: verdict.exit_code(),
            timed_out: verdict.timed_out(),
            message: verdict.message,
            actual_output: verdict.actual_output,
            details: verdict.details,
        }
    }

    /// Failure not caused by the submission (store outage, bad payload)
    pub fn system_error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::from_verdict(
            request_id,
            ValidationVerdict::fail(message).with_detail("error_kind", "system_error"),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub request_id: String,
    pub code: String,
    #[serde(default)]
    pub input_data: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub request_id: String,
    pub output: String,
    pub error: Option<String>,
    pub execution_time_seconds: f64,
}
