//! Process runner
//!
//! Every child gets its own process group, a cleared environment and
//! rlimits applied between fork and exec. The whole group is killed on
//! every exit path, including normal exit, so no descendant outlives the run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};

/// How long to wait for the pipe readers once the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome> {
        debug!("Spawning {} {:?}", cmd.program, cmd.args);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .env_clear()
            .envs(cmd.env_pairs())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        if let Some(dir) = &cmd.work_dir {
            command.current_dir(dir);
        }

        let memory_bytes = limits.memory_mb * 1024 * 1024;
        let file_bytes = limits.max_output_bytes as u64;
        // SAFETY: only async-signal-safe setrlimit calls run between fork and exec
        unsafe {
            command.pre_exec(move || apply_rlimits(memory_bytes, file_bytes).map_err(Into::into));
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd.program))?;
        let pid = child.id();

        let stdin_task = child.stdin.take().map(|mut pipe| {
            let input = stdin.unwrap_or_default().to_string();
            tokio::spawn(async move {
                // A child that exits without reading closes the pipe; that is not an error
                let _ = pipe.write_all(input.as_bytes()).await;
                let _ = pipe.shutdown().await;
            })
        });
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| spawn_capped_reader(pipe, limits.max_output_bytes));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| spawn_capped_reader(pipe, limits.max_output_bytes));

        let waited = tokio::time::timeout(limits.timeout, child.wait()).await;
        kill_group(pid);

        let status = match waited {
            Ok(status) => {
                let status = status.context("Failed to wait for child process")?;
                match (status.code(), status.signal()) {
                    (Some(code), _) => RunStatus::Exited(code),
                    (None, Some(signal)) => RunStatus::Signaled(signal),
                    (None, None) => RunStatus::Exited(-1),
                }
            }
            Err(_) => {
                warn!(
                    "Child {:?} exceeded {:?}, process group killed",
                    pid, limits.timeout
                );
                let _ = child.kill().await;
                RunStatus::TimedOut
            }
        };
        let duration = started.elapsed();

        if let Some(task) = stdin_task {
            task.abort();
        }
        let (stdout, stdout_truncated) = join_reader(stdout_task).await;
        let (stderr, stderr_truncated) = join_reader(stderr_task).await;

        debug!("Child {:?} finished: {:?} in {:?}", pid, status, duration);

        Ok(RunOutcome {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stdout_truncated,
            stderr_truncated,
            duration,
        })
    }
}

fn apply_rlimits(memory_bytes: u64, file_bytes: u64) -> nix::Result<()> {
    if memory_bytes > 0 {
        setrlimit(Resource::RLIMIT_AS, memory_bytes, memory_bytes)?;
    }
    if file_bytes > 0 {
        setrlimit(Resource::RLIMIT_FSIZE, file_bytes, file_bytes)?;
    }
    setrlimit(Resource::RLIMIT_CORE, 0, 0)
}

/// SIGKILL the child's process group; an already empty group is fine
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes and discarding the rest
fn spawn_capped_reader<R>(mut reader: R, cap: usize) -> JoinHandle<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut truncated = false;
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = cap.saturating_sub(kept.len());
                    if n > room {
                        truncated = true;
                    }
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
        (kept, truncated)
    })
}

async fn join_reader(task: Option<JoinHandle<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    let Some(task) = task else {
        return (Vec::new(), false);
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            (Vec::new(), false)
        }
        Err(_) => {
            abort.abort();
            warn!("Output reader did not finish within {:?}", DRAIN_GRACE);
            (Vec::new(), false)
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::time::Duration;

    /// Gone, or a zombie waiting for its new parent to reap it
    fn is_gone(pid: i32) -> bool {
        match kill(Pid::from_raw(pid), None::<Signal>) {
            Err(Errno::ESRCH) => true,
            _ => std::fs::read_to_string(format!("/proc/{}/stat", pid))
                .map(|stat| {
                    stat.rsplit(')')
                        .next()
                        .is_some_and(|rest| rest.trim_start().starts_with('Z'))
                })
                .unwrap_or(true),
        }
    }

    /// Poll for up to two seconds
    pub(crate) async fn wait_until_gone(pid: i32) -> bool {
        for _ in 0..40 {
            if is_gone(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::wait_until_gone;
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").with_args(["-c", script])
    }

    fn limits(timeout_ms: u64) -> RunLimits {
        RunLimits::new(Duration::from_millis(timeout_ms), 0, 1024)
    }

    #[tokio::test]
    async fn test_captures_stdout_stderr_and_exit_code() {
        let outcome = ProcessRunner::new()
            .run(&sh("echo hola; echo fallo >&2; exit 3"), &limits(5000), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Exited(3));
        assert_eq!(outcome.exit_code(), Some(3));
        assert_eq!(outcome.stdout, "hola\n");
        assert_eq!(outcome.stderr, "fallo\n");
        assert!(!outcome.timed_out());
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let outcome = ProcessRunner::new()
            .run(&sh("read x; echo \"got $x\""), &limits(5000), Some("42\n"))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.stdout, "got 42\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_group() {
        let started = Instant::now();
        let outcome = ProcessRunner::new()
            .run(&sh("sleep 30 & sleep 30"), &limits(500), None)
            .await
            .unwrap();
        assert!(outcome.timed_out());
        assert_eq!(outcome.exit_code(), None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_background_process() {
        let outcome = ProcessRunner::new()
            .run(&sh("sleep 30 & echo $!; sleep 30"), &limits(500), None)
            .await
            .unwrap();
        assert!(outcome.timed_out());
        let pid: i32 = outcome.stdout.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "background pid {} survived", pid);
    }

    #[tokio::test]
    async fn test_normal_exit_leaves_no_background_process() {
        let outcome = ProcessRunner::new()
            .run(&sh("sleep 30 & echo $!"), &limits(5000), None)
            .await
            .unwrap();
        assert!(outcome.is_success());
        let pid: i32 = outcome.stdout.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "background pid {} survived", pid);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let outcome = ProcessRunner::new()
            .run(
                &sh("i=0; while [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done"),
                &limits(5000),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.stdout_truncated);
        assert_eq!(outcome.stdout.len(), 1024);
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("GRADER_TEST_SECRET", "leak");
        let outcome = ProcessRunner::new()
            .run(&sh("echo \"[$GRADER_TEST_SECRET]\""), &limits(5000), None)
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "[]\n");
    }
}
