//! Runner module - child process execution layer
//!
//! Runs one program in a fresh process group with stdin injection, capped
//! stdout/stderr capture, a wall-clock timeout and OS resource limits.
//!
//! The runner module does NOT:
//! - Know which language it is running
//! - Compare outputs or decide verdicts
//! - Interpret interception trailers (see `engine::interception`)

pub mod process;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Complete child environment (key=value); nothing is inherited
    pub env: Vec<String>,
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.env = env.into_iter().map(|e| e.into()).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Environment pairs; PATH falls back to the worker's own PATH
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .env
            .iter()
            .filter_map(|e| e.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if !pairs.iter().any(|(k, _)| k == "PATH") {
            let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
            pairs.push(("PATH".to_string(), path));
        }
        pairs
    }
}

pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Resource limits for execution
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock budget
    pub timeout: Duration,
    /// Address-space limit in MB (0 = unlimited)
    pub memory_mb: u64,
    /// Per-stream capture cap; also the largest file the child may write
    pub max_output_bytes: usize,
}

impl RunLimits {
    pub fn new(timeout: Duration, memory_mb: u64, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            memory_mb,
            max_output_bytes,
        }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_mb: 512,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Execution status (raw, no verdict interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Wall-clock limit exceeded; the process group was killed
    TimedOut,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

/// Outcome of running a program
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn timed_out(&self) -> bool {
        self.status == RunStatus::TimedOut
    }

    /// Exit code, with signals reported shell-style as 128 + signal
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => Some(code),
            RunStatus::Signaled(signal) => Some(128 + signal),
            RunStatus::TimedOut => None,
        }
    }
}

/// Runner trait for executing programs
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command with the given limits and optional stdin
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome>;
}

pub use process::ProcessRunner;
