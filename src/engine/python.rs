//! Production backend: a CPython subprocess per run
//!
//! Each call gets a private temporary directory holding the submission and,
//! when needed, the wrapper or harness. The directory is removed when the
//! call returns, on every path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, error, warn};

use super::backend::{
    ExecutionBackend, InvocationReport, InvocationRequest, LoaderError, SandboxOutcome,
    ScriptRequest,
};
use super::interception::{
    new_sentinel, parse_print_trailer, strip_trailer, TrailerError, INTERCEPT_WRAPPER,
    MISSING_TRAILER_NOTE,
};
use super::loader::{parse_report, LoaderRequest, LOADER_HARNESS};
use crate::config::GraderConfig;
use crate::runner::{CommandSpec, ProcessRunner, RunLimits, Runner};

const MAIN_FILE: &str = "main.py";
const WRAPPER_FILE: &str = "_grader_intercept.py";
const HARNESS_FILE: &str = "_grader_loader.py";
const SENTINEL_FILE: &str = "_grader_sentinel";

pub struct PythonBackend {
    python_bin: String,
    memory_mb: u64,
    max_output_bytes: usize,
    runner: Arc<dyn Runner>,
}

impl PythonBackend {
    pub fn new(python_bin: impl Into<String>) -> Self {
        let defaults = RunLimits::default();
        Self {
            python_bin: python_bin.into(),
            memory_mb: defaults.memory_mb,
            max_output_bytes: defaults.max_output_bytes,
            runner: Arc::new(ProcessRunner::new()),
        }
    }

    pub fn from_config(config: &GraderConfig) -> Self {
        Self {
            python_bin: config.python_bin.clone(),
            memory_mb: config.memory_limit_mb,
            max_output_bytes: config.max_output_bytes,
            runner: Arc::new(ProcessRunner::new()),
        }
    }

    fn limits(&self, timeout: Duration) -> RunLimits {
        RunLimits::new(timeout, self.memory_mb, self.max_output_bytes)
    }

    fn command(&self, workspace: &Path, script_args: Vec<String>) -> CommandSpec {
        let mut args = vec![
            "-I".to_string(),
            "-u".to_string(),
            "-X".to_string(),
            "utf8".to_string(),
        ];
        args.extend(script_args);
        CommandSpec::new(&self.python_bin)
            .with_args(args)
            .with_env([
                "PYTHONIOENCODING=utf-8".to_string(),
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
                format!("HOME={}", workspace.display()),
            ])
            .with_work_dir(workspace)
    }

    async fn workspace(&self, files: &[(&str, &str)]) -> Result<TempDir> {
        let dir = tempfile::Builder::new()
            .prefix("grader-")
            .tempdir()
            .context("Failed to create submission workspace")?;
        for (name, content) in files {
            tokio::fs::write(dir.path().join(name), content)
                .await
                .with_context(|| format!("Failed to write {}", name))?;
        }
        Ok(dir)
    }

    async fn try_run_script(&self, request: &ScriptRequest) -> Result<SandboxOutcome> {
        let sentinel = new_sentinel();
        let (workspace, script_args) = if request.intercept_prints {
            let dir = self
                .workspace(&[
                    (MAIN_FILE, request.source.as_str()),
                    (WRAPPER_FILE, INTERCEPT_WRAPPER),
                    (SENTINEL_FILE, sentinel.as_str()),
                ])
                .await?;
            let args = vec![
                WRAPPER_FILE.to_string(),
                MAIN_FILE.to_string(),
                SENTINEL_FILE.to_string(),
            ];
            (dir, args)
        } else {
            let dir = self.workspace(&[(MAIN_FILE, request.source.as_str())]).await?;
            (dir, vec![MAIN_FILE.to_string()])
        };

        let cmd = self.command(workspace.path(), script_args);
        let outcome = self
            .runner
            .run(&cmd, &self.limits(request.timeout), request.stdin.as_deref())
            .await?;
        drop(workspace);

        let mut sandbox = SandboxOutcome {
            user_stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            timed_out: outcome.timed_out(),
            exit_code: outcome.exit_code(),
            captured_print_metadata: Vec::new(),
            stdout_truncated: outcome.stdout_truncated,
            duration: outcome.duration,
        };
        if request.intercept_prints {
            match parse_print_trailer(&outcome.stdout, &sentinel, sandbox.exit_code) {
                Ok((user_stdout, records)) => {
                    sandbox.user_stdout = user_stdout;
                    sandbox.captured_print_metadata = records;
                }
                Err(TrailerError::UncleanExit(code)) => {
                    debug!("Print metadata discarded after exit {:?}", code);
                    sandbox.user_stdout = strip_trailer(&outcome.stdout, &sentinel).to_string();
                }
                Err(reason) => {
                    warn!("Print metadata discarded: {}", reason);
                    sandbox.user_stdout = strip_trailer(&outcome.stdout, &sentinel).to_string();
                    if !sandbox.stderr.is_empty() && !sandbox.stderr.ends_with('\n') {
                        sandbox.stderr.push('\n');
                    }
                    sandbox.stderr.push_str(&format!("{} ({})", MISSING_TRAILER_NOTE, reason));
                }
            }
        }
        Ok(sandbox)
    }
}

#[async_trait]
impl ExecutionBackend for PythonBackend {
    async fn run_script(&self, request: ScriptRequest) -> SandboxOutcome {
        match self.try_run_script(&request).await {
            Ok(outcome) => {
                debug!(
                    "Script finished: exit={:?}, timed_out={}, prints={}",
                    outcome.exit_code,
                    outcome.timed_out,
                    outcome.captured_print_metadata.len()
                );
                outcome
            }
            Err(e) => {
                error!("Failed to run submission: {:#}", e);
                SandboxOutcome::failed_to_start(format!("No se pudo ejecutar el programa: {:#}", e))
            }
        }
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationReport, LoaderError> {
        let sentinel = new_sentinel();
        let module_name = format!("submission_{:016x}", rand::random::<u64>());
        let module_file = format!("{}.py", module_name);

        let workspace = self
            .workspace(&[(module_file.as_str(), request.source.as_str()), (HARNESS_FILE, LOADER_HARNESS)])
            .await
            .map_err(|e| LoaderError::LoadFailed(format!("{:#}", e)))?;
        let module_path = workspace.path().join(&module_file);
        let module_path = module_path.to_string_lossy();

        let payload = serde_json::to_string(&LoaderRequest {
            sentinel: &sentinel,
            module_name: &module_name,
            module_path: &module_path,
            ops: &request.ops,
        })
        .map_err(|e| LoaderError::Protocol(e.to_string()))?;

        let cmd = self.command(workspace.path(), vec![HARNESS_FILE.to_string()]);
        let outcome = self
            .runner
            .run(&cmd, &self.limits(request.timeout), Some(payload.as_str()))
            .await
            .map_err(|e| {
                error!("Failed to start loader: {:#}", e);
                LoaderError::LoadFailed(format!("{:#}", e))
            })?;

        if outcome.timed_out() {
            warn!("Loader timed out after {:?}", request.timeout);
            return Err(LoaderError::TimedOut {
                seconds: request.timeout.as_secs_f64(),
            });
        }

        parse_report(
            &outcome.stdout,
            &outcome.stderr,
            outcome.exit_code(),
            &sentinel,
            request.ops.len(),
        )
    }
}
