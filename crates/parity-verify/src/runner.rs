//! Command runner: one child process with a wall-clock budget.
//!
//! Every child is spawned as the leader of a fresh process group. The whole
//! group is killed on timeout, after the child exits (to reap descendants
//! still holding the pipes), and when the running future is dropped.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long output readers may keep draining after the process group died.
const CAPTURE_GRACE: Duration = Duration::from_secs(2);

const CHUNK_BYTES: usize = 8192;

/// Errors that prevent a command from producing an outcome at all.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("command has an empty program")]
    EmptyProgram,

    #[error("'{program}' not found")]
    NotFound { program: String },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A fully rendered command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub max_output_bytes: usize,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            timeout: Duration::from_secs(60),
            max_output_bytes: 1024 * 1024,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

/// Raw bytes of one output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCapture {
    /// At most `max_output_bytes` leading bytes.
    pub bytes: Vec<u8>,
    /// Bytes read past the limit.
    pub dropped: usize,
    /// Hex SHA-256 of the entire stream; `None` if it was not read to EOF.
    pub digest: Option<String>,
}

impl StreamCapture {
    /// Whether `bytes` is less than the whole stream.
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0 || self.digest.is_none()
    }

    /// True only when both streams were read to EOF and are byte-identical.
    pub fn same_stream(&self, other: &StreamCapture) -> bool {
        match (&self.digest, &other.digest) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Lossy text with a truncation marker, for logs and reports.
    pub fn to_text(&self, stream: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!("\n...[{} bytes of {stream} truncated]", self.dropped));
        }
        text
    }
}

/// Captured result of a process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Undecoded stdout; `stdout` is its lossy rendering.
    pub stdout_capture: StreamCapture,
    /// Exit code; `128 + signal` for signal deaths on unix, `None` if unknown.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Either the process finished, or its budget ran out and it was killed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed(CommandOutput),
    /// Output captured up to the kill; `exit_code` is always `None`.
    TimedOut(CommandOutput),
}

impl CommandOutcome {
    pub fn output(&self) -> &CommandOutput {
        match self {
            CommandOutcome::Completed(o) | CommandOutcome::TimedOut(o) => o,
        }
    }

    pub fn into_output(self) -> CommandOutput {
        match self {
            CommandOutcome::Completed(o) | CommandOutcome::TimedOut(o) => o,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandOutcome::TimedOut(_))
    }
}

/// Kills the child's process group unless already terminated.
struct ProcessGuard {
    pgid: Option<u32>,
}

impl ProcessGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn terminate(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; ESRCH for an empty group is fine.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!(pgid, "killed process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Executes commands with bounded time and bounded output capture.
pub struct CommandRunner;

impl CommandRunner {
    /// Run one command to completion or timeout.
    ///
    /// Stage failures (non-zero exit, timeout) are returned as data. Only
    /// conditions that leave nothing to report (the program cannot be spawned)
    /// are errors.
    pub async fn run(spec: &CommandSpec) -> Result<CommandOutcome, RunnerError> {
        if spec.program.trim().is_empty() {
            return Err(RunnerError::EmptyProgram);
        }
        let start = Instant::now();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                RunnerError::NotFound {
                    program: spec.program.clone(),
                }
            } else {
                RunnerError::Spawn {
                    program: spec.program.clone(),
                    source,
                }
            }
        })?;
        let mut guard = ProcessGuard::new(child.id());

        let limit = spec.max_output_bytes;
        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_bounded(s, limit)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_bounded(s, limit)));

        let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(source)) => {
                guard.terminate();
                abort_reader(stdout_task);
                abort_reader(stderr_task);
                return Err(RunnerError::Wait {
                    program: spec.program.clone(),
                    source,
                });
            }
            Err(_) => None,
        };

        guard.terminate();
        if status.is_none() {
            warn!(
                program = %spec.program,
                timeout_ms = spec.timeout.as_millis() as u64,
                "command timed out; killed process group"
            );
            if let Err(err) = child.kill().await {
                debug!(error = %err, "child already gone after group kill");
            }
        }

        let stdout_capture = collect_reader(stdout_task, "stdout").await;
        let stderr_capture = collect_reader(stderr_task, "stderr").await;

        let output = CommandOutput {
            stdout: stdout_capture.to_text("stdout"),
            stderr: stderr_capture.to_text("stderr"),
            stdout_capture,
            exit_code: status.and_then(exit_code_of),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        Ok(match status {
            Some(_) => CommandOutcome::Completed(output),
            None => CommandOutcome::TimedOut(output),
        })
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

/// Drain `reader`, keeping at most `limit` bytes and hashing all of them.
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> StreamCapture {
    let mut bytes = Vec::with_capacity(limit.min(CHUNK_BYTES));
    let mut dropped = 0usize;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; CHUNK_BYTES];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, "output stream closed with error");
                return StreamCapture {
                    bytes,
                    dropped,
                    digest: None,
                };
            }
        };
        hasher.update(&chunk[..n]);
        let room = limit.saturating_sub(bytes.len());
        let take = n.min(room);
        bytes.extend_from_slice(&chunk[..take]);
        dropped += n - take;
    }
    StreamCapture {
        bytes,
        dropped,
        digest: Some(hex::encode(hasher.finalize())),
    }
}

async fn collect_reader(task: Option<JoinHandle<StreamCapture>>, stream: &str) -> StreamCapture {
    let Some(mut task) = task else {
        return StreamCapture::default();
    };
    match tokio::time::timeout(CAPTURE_GRACE, &mut task).await {
        Ok(Ok(capture)) => capture,
        Ok(Err(err)) => {
            warn!(stream, error = %err, "output reader failed");
            StreamCapture::default()
        }
        Err(_) => {
            warn!(stream, "output capture timed out");
            task.abort();
            StreamCapture::default()
        }
    }
}

fn abort_reader(task: Option<JoinHandle<StreamCapture>>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script]).with_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let outcome = CommandRunner::run(&CommandSpec::new("echo", ["hello"]))
            .await
            .expect("run");
        let output = outcome.output();
        assert!(!outcome.is_timeout());
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let outcome = CommandRunner::run(&sh("echo oops >&2; exit 3")).await.expect("run");
        let output = outcome.output();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_descendants() {
        let spec = sh("sleep 30 & echo started; wait").with_timeout(Duration::from_millis(500));
        let start = Instant::now();
        let outcome = CommandRunner::run(&spec).await.expect("run");
        assert!(outcome.is_timeout());
        assert_eq!(outcome.output().exit_code, None);
        assert_eq!(outcome.output().stdout, "started\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stray_background_process_does_not_block() {
        let start = Instant::now();
        let outcome = CommandRunner::run(&sh("sleep 30 & echo done")).await.expect("run");
        assert!(!outcome.is_timeout());
        assert_eq!(outcome.output().stdout, "done\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_is_bounded() {
        let spec = sh("i=0; while [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done")
            .with_output_limit(100);
        let outcome = CommandRunner::run(&spec).await.expect("run");
        let stdout = &outcome.output().stdout;
        assert!(stdout.starts_with("0123456789\n"));
        assert!(stdout.contains("...[5400 bytes of stdout truncated]"));
    }

    #[tokio::test]
    async fn test_truncated_stream_keeps_full_digest() {
        let script = "printf AAAAAAAAAAxxxxx";
        let outcome = CommandRunner::run(&sh(script).with_output_limit(10))
            .await
            .expect("run");
        let capture = &outcome.output().stdout_capture;
        assert_eq!(capture.bytes, b"AAAAAAAAAA");
        assert_eq!(capture.dropped, 5);
        assert!(capture.is_truncated());
        assert_eq!(
            capture.digest.as_deref(),
            Some(hex::encode(Sha256::digest(b"AAAAAAAAAAxxxxx")).as_str())
        );

        let other = CommandRunner::run(&sh("printf AAAAAAAAAAyyyyy").with_output_limit(10))
            .await
            .expect("run");
        let other = &other.output().stdout_capture;
        assert_eq!(other.bytes, capture.bytes);
        assert!(!capture.same_stream(other));
    }

    #[tokio::test]
    async fn test_stdout_bytes_are_not_decoded() {
        let a = CommandRunner::run(&sh("printf '\\377'")).await.expect("run");
        let b = CommandRunner::run(&sh("printf '\\376'")).await.expect("run");
        let (a, b) = (a.output(), b.output());
        assert_eq!(a.stdout_capture.bytes, vec![0xff]);
        assert_eq!(b.stdout_capture.bytes, vec![0xfe]);
        assert_eq!(a.stdout, b.stdout);
        assert!(!a.stdout_capture.same_stream(&b.stdout_capture));
        assert!(!a.stdout_capture.is_truncated());
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = CommandRunner::run(&sh("pwd").in_dir(dir.path())).await.expect("run");
        let pwd = outcome.output().stdout.trim_end().to_string();
        assert_eq!(
            std::path::Path::new(&pwd).canonicalize().expect("canonicalize pwd"),
            dir.path().canonicalize().expect("canonicalize dir")
        );
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = CommandRunner::run(&CommandSpec::new("parity-no-such-binary", ["x"]))
            .await
            .expect_err("missing binary");
        assert!(matches!(err, RunnerError::NotFound { .. }));
        assert_eq!(err.to_string(), "'parity-no-such-binary' not found");
    }

    #[tokio::test]
    async fn test_empty_program() {
        let err = CommandRunner::run(&CommandSpec::new("  ", Vec::<String>::new()))
            .await
            .expect_err("empty");
        assert!(matches!(err, RunnerError::EmptyProgram));
    }
}
