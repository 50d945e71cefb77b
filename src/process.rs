//! Child-process runner for flow tasks.
//!
//! Every git / package-manager invocation made while installing a block goes
//! through [`Exec`]. Output is streamed into the flow's [`Logger`] as it
//! arrives, and the running child is registered in a shared
//! [`ProcessSlot`] so a cancel request can terminate it.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Notify;

use crate::cli::resolve_cli;
use crate::logger::{Logger, OutputCapture};

/// How long output is still collected after the child exits. Anything that
/// inherited its pipes (a daemonized grandchild) is not waited for.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Error from a child-process call.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The process could not be spawned (missing binary, permission error).
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed waiting for {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The process exited with a non-zero status code.
    #[error("{program} exited with code {}", format_code(.code))]
    NonZeroExit { program: String, code: Option<i32> },
    /// The process was terminated through its [`ProcessSlot`].
    #[error("{program} was terminated")]
    Killed { program: String },
}

fn format_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

impl ProcessError {
    /// True when the failure was caused by a termination request.
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Killed { .. })
    }
}

// ---------------------------------------------------------------------------
// Process slot
// ---------------------------------------------------------------------------

/// Handle to the child currently running on behalf of one flow.
///
/// At most one child is registered at a time because tasks run serially.
/// Once terminated, the slot refuses to start new children.
#[derive(Debug, Default)]
pub struct ProcessSlot {
    pid: Mutex<Option<u32>>,
    terminated: AtomicBool,
    notify: Notify,
}

impl ProcessSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Terminate the running child and its process group (if any) with
    /// SIGTERM. Fire-and-forget: does not wait for the child to exit.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        if let Some(pid) = *self.pid.lock() {
            tracing::info!(pid, "Terminating child process");
            send_sigterm(pid);
        }
        self.notify.notify_one();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn register(&self, pid: Option<u32>) {
        *self.pid.lock() = pid;
    }

    fn release(&self) {
        *self.pid.lock() = None;
    }
}

/// Children lead their own process group, so the signal also reaches
/// anything they spawned.
#[cfg(unix)]
fn send_sigterm(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }
}

// No SIGTERM outside unix; the wait loop in `ExecCmd::run` kills the child
// when the slot is notified.
#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Process launcher bound to one flow's logger and slot.
#[derive(Clone, Debug)]
pub struct Exec {
    logger: Logger,
    slot: Arc<ProcessSlot>,
}

impl Exec {
    pub fn new(logger: Logger, slot: Arc<ProcessSlot>) -> Self {
        Self { logger, slot }
    }

    pub fn slot(&self) -> &Arc<ProcessSlot> {
        &self.slot
    }

    /// Start building a command for `program` (resolved via well-known
    /// install locations).
    pub fn command(&self, program: &str) -> ExecCmd {
        let mut cmd = Command::new(resolve_cli(program));
        // Prevent git from prompting for credentials when there is no TTY.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        ExecCmd {
            program: program.to_string(),
            cmd,
            logger: self.logger.clone(),
            slot: self.slot.clone(),
        }
    }
}

/// Builder for configuring and running one child process.
///
/// # Examples
/// ```ignore
/// exec.command("git")
///     .args(["fetch"])
///     .current_dir(&repo)
///     .run()
///     .await?;
/// ```
pub struct ExecCmd {
    program: String,
    cmd: Command,
    logger: Logger,
    slot: Arc<ProcessSlot>,
}

impl ExecCmd {
    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.cmd.args(args);
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cmd.current_dir(dir);
        self
    }

    pub fn env(mut self, key: &str, val: &str) -> Self {
        self.cmd.env(key, val);
        self
    }

    /// Run to completion, streaming stdout and stderr into the logger.
    /// Non-zero exit is an error.
    pub async fn run(mut self) -> Result<(), ProcessError> {
        let program = self.program;
        if self.slot.is_terminated() {
            return Err(ProcessError::Killed { program });
        }

        self.cmd
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        self.cmd.process_group(0);

        tracing::debug!(program = %program, cmd = ?self.cmd.as_std(), "Spawning process");
        let mut child = self.cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: program.clone(),
            source,
        })?;
        self.slot.register(child.id());

        // A cancel may have raced with the spawn.
        if self.slot.is_terminated()
            && let Some(pid) = child.id()
        {
            send_sigterm(pid);
        }

        let pumps = [
            tokio::spawn(pump(child.stdout.take(), self.logger.capture())),
            tokio::spawn(pump(child.stderr.take(), self.logger.capture())),
        ];
        let slot = self.slot.clone();
        let wait = async {
            loop {
                tokio::select! {
                    status = child.wait() => return status,
                    _ = slot.notify.notified() => {}
                }
                #[cfg(not(unix))]
                let _ = child.start_kill();
            }
        };
        let status = wait.await;
        self.slot.release();

        let aborts: Vec<_> = pumps.iter().map(|p| p.abort_handle()).collect();
        let drained = async {
            for p in pumps {
                let _ = p.await;
            }
        };
        if tokio::time::timeout(OUTPUT_DRAIN, drained).await.is_err() {
            tracing::warn!(program = %program, "Output pipes still open after exit, not waiting");
            aborts.iter().for_each(|a| a.abort());
        }

        let status = status.map_err(|source| ProcessError::Io {
            program: program.clone(),
            source,
        })?;
        if status.success() {
            return Ok(());
        }
        if self.slot.is_terminated() {
            return Err(ProcessError::Killed { program });
        }
        Err(ProcessError::NonZeroExit {
            program,
            code: status.code(),
        })
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, mut capture: OutputCapture) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => capture.push(&buf[..n]),
            Err(e) => {
                tracing::warn!("Failed to read process output: {e}");
                break;
            }
        }
    }
    capture.finish();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use std::time::Duration;

    fn exec() -> (Exec, Logger) {
        let logger = Logger::new("test", EventSink::detached());
        (Exec::new(logger.clone(), ProcessSlot::new()), logger)
    }

    #[tokio::test]
    async fn test_run_streams_output_into_logger() {
        let (exec, logger) = exec();
        exec.command("sh")
            .args(["-c", "printf 'one\\n'; printf 'two' 1>&2"])
            .run()
            .await
            .unwrap();
        let log = logger.get_log();
        assert!(log.contains("one\n"));
        assert!(log.contains("two"));
    }

    #[tokio::test]
    async fn test_run_non_zero_exit() {
        let (exec, _logger) = exec();
        let err = exec
            .command("sh")
            .args(["-c", "exit 3"])
            .run()
            .await
            .unwrap_err();
        match &err {
            ProcessError::NonZeroExit { code, .. } => assert_eq!(*code, Some(3)),
            other => panic!("Expected NonZeroExit, got {other:?}"),
        }
        assert_eq!(err.to_string(), "sh exited with code 3");
        assert!(!err.is_termination());
    }

    #[tokio::test]
    async fn test_run_spawn_failed() {
        let (exec, _logger) = exec();
        let err = exec
            .command("/nonexistent/binary-that-does-not-exist")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_current_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, logger) = exec();
        exec.command("sh")
            .args(["-c", "pwd; echo $BLOCKFLOW_TEST"])
            .current_dir(dir.path())
            .env("BLOCKFLOW_TEST", "hello")
            .run()
            .await
            .unwrap();
        assert!(logger.get_log().contains("hello"));
    }

    #[tokio::test]
    async fn test_terminate_kills_running_child() {
        let (exec, _logger) = exec();
        let slot = exec.slot().clone();
        let handle = tokio::spawn(async move {
            exec.command("sleep").arg("30").run().await
        });
        // Wait until the child is registered
        for _ in 0..100 {
            if slot.pid.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        slot.terminate();
        let err = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_termination());
        assert!(slot.pid.lock().is_none());
    }

    #[tokio::test]
    async fn test_terminate_reaches_grandchildren() {
        let (exec, _logger) = exec();
        let slot = exec.slot().clone();
        let handle = tokio::spawn(async move {
            exec.command("sh")
                .args(["-c", "sleep 30 & wait"])
                .run()
                .await
        });
        for _ in 0..100 {
            if slot.pid.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        slot.terminate();
        let err = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.is_termination());
    }

    #[tokio::test]
    async fn test_run_returns_when_grandchild_holds_pipes() {
        let (exec, logger) = exec();
        let run = exec
            .command("sh")
            .args(["-c", "(sleep 10 &); echo done"])
            .run();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(logger.get_log().contains("done\n"));
    }

    #[tokio::test]
    async fn test_terminated_slot_refuses_new_children() {
        let (exec, logger) = exec();
        exec.slot().terminate();
        let err = exec.command("echo").arg("hi").run().await.unwrap_err();
        assert!(err.is_termination());
        assert_eq!(logger.get_log(), "");
    }

    #[test]
    fn test_format_code() {
        assert_eq!(format_code(&Some(128)), "128");
        assert_eq!(format_code(&None), "signal");
    }
}
