use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use super::value::PyValue;

/// Failures of the dynamic loader
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoaderError {
    #[error("'{0}' is not defined")]
    TargetNotDefined(String),

    #[error("{kind}: {message}")]
    InvocationFailed { kind: String, message: String },

    #[error("load failed: {0}")]
    LoadFailed(String),

    #[error("timed out after {seconds}s")]
    TimedOut { seconds: f64 },

    #[error("loader protocol error: {0}")]
    Protocol(String),
}

/// One whole-program run
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub source: String,
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// Record the type of the first argument of every write-line call
    pub intercept_prints: bool,
}

impl ScriptRequest {
    pub fn new(source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            stdin: None,
            timeout,
            intercept_prints: false,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn intercepting(mut self) -> Self {
        self.intercept_prints = true;
        self
    }
}

/// One intercepted write-line call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintRecord {
    /// Type name of the first argument; `None` for a bare `print()`
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxOutcome {
    pub user_stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub captured_print_metadata: Vec<PrintRecord>,
    pub stdout_truncated: bool,
    pub duration: Duration,
}

impl SandboxOutcome {
    /// Outcome for a run that could not be started at all
    pub fn failed_to_start(message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            exit_code: Some(-1),
            ..Default::default()
        }
    }

    pub fn is_clean_exit(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// A step executed against the loaded submission, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LoaderOp {
    CallFunction {
        name: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
    Instantiate {
        class_name: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        label: String,
    },
    GetAttribute {
        label: String,
        name: String,
    },
    GetProperty {
        label: String,
        name: String,
    },
    CallMethod {
        label: String,
        name: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        save_as: Option<String>,
    },
    ToString {
        label: String,
    },
    /// Run `setup` then evaluate `expression` with only `class_name` and safe builtins visible
    Evaluate {
        class_name: String,
        setup: String,
        expression: String,
    },
}

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub source: String,
    pub ops: Vec<LoaderOp>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct InvocationReport {
    /// One entry per requested op
    pub results: Vec<Result<PyValue, LoaderError>>,
    /// Everything the submission wrote to stdout while loading and running
    pub output: String,
}

/// Where submissions actually run
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run the whole program; never fails, problems surface in `stderr`/`exit_code`
    async fn run_script(&self, request: ScriptRequest) -> SandboxOutcome;

    /// Load the program as a module and run `ops` against it in one process
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationReport, LoaderError>;
}
