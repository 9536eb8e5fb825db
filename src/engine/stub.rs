//! In-memory backend for validator tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::backend::{
    ExecutionBackend, InvocationReport, InvocationRequest, LoaderError, PrintRecord,
    SandboxOutcome, ScriptRequest,
};
use super::value::PyValue;

type ScriptFn = Box<dyn Fn(&ScriptRequest) -> SandboxOutcome + Send + Sync>;
type InvokeFn = Box<dyn Fn(&InvocationRequest) -> Result<InvocationReport, LoaderError> + Send + Sync>;

pub struct StubBackend {
    script: ScriptFn,
    invoke: InvokeFn,
    script_runs: AtomicUsize,
    invocations: AtomicUsize,
    last_stdin: Mutex<Vec<Option<String>>>,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self {
            script: Box::new(|_| ok_run("")),
            invoke: Box::new(|request| {
                Ok(InvocationReport {
                    results: request.ops.iter().map(|_| Ok(PyValue::None)).collect(),
                    output: String::new(),
                })
            }),
            script_runs: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
            last_stdin: Mutex::new(Vec::new()),
        }
    }
}

impl StubBackend {
    pub fn with_script(
        mut self,
        script: impl Fn(&ScriptRequest) -> SandboxOutcome + Send + Sync + 'static,
    ) -> Self {
        self.script = Box::new(script);
        self
    }

    pub fn with_invoke(
        mut self,
        invoke: impl Fn(&InvocationRequest) -> Result<InvocationReport, LoaderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.invoke = Box::new(invoke);
        self
    }

    /// Total number of processes the engine would have spawned
    pub fn spawned(&self) -> usize {
        self.script_runs.load(Ordering::SeqCst) + self.invocations.load(Ordering::SeqCst)
    }

    pub fn stdin_seen(&self) -> Vec<Option<String>> {
        self.last_stdin.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Clean run printing `stdout`, one `str` record per line
pub fn ok_run(stdout: &str) -> SandboxOutcome {
    SandboxOutcome {
        user_stdout: stdout.to_string(),
        exit_code: Some(0),
        captured_print_metadata: stdout
            .lines()
            .map(|_| PrintRecord {
                type_name: Some("str".to_string()),
            })
            .collect(),
        ..Default::default()
    }
}

#[async_trait]
impl ExecutionBackend for StubBackend {
    async fn run_script(&self, request: ScriptRequest) -> SandboxOutcome {
        self.script_runs.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.last_stdin.lock() {
            seen.push(request.stdin.clone());
        }
        (self.script)(&request)
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationReport, LoaderError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        (self.invoke)(&request)
    }
}
