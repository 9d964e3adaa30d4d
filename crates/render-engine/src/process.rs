//! Supervised execution of the external media tools.
//!
//! Every encoder and prober invocation goes through [`ProcessRunner`]: the
//! child gets no stdin, stderr is split into lines as it arrives (the
//! encoder terminates stats lines with `\r`), stdout is collected, and the
//! wait races against the session's cancel signal and an optional deadline.
//! A cancelled or timed-out child is killed before the call returns.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use montage_common::{MontageError, MontageResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stderr lines kept for failure diagnostics.
pub const DIAGNOSTIC_LINES: usize = 64;

/// How long to keep reading pipes after the child has exited.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One external tool invocation: program plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommand {
    program: PathBuf,
    args: Vec<OsString>,
    label: String,
}

impl EncoderCommand {
    /// `label` names the invocation in logs and errors (`audio`, `chunk 3`).
    pub fn new(program: impl AsRef<Path>, label: impl Into<String>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            label: label.into(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Arguments as lossy UTF-8, for assertions and logs.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Shell-like rendering for debug logs.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}

/// Hooks invoked while a process runs.
///
/// The session uses `spawned`/`exited` to track the active process; stages
/// use `stderr_line` to drive progress.
pub trait ProcessObserver: Send {
    fn spawned(&mut self, _label: &str, _pid: Option<u32>) {}

    fn stderr_line(&mut self, _line: &str) {}

    fn exited(&mut self, _label: &str) {}
}

impl ProcessObserver for () {}

/// Result of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    /// Last [`DIAGNOSTIC_LINES`] stderr lines.
    pub stderr_tail: String,
}

enum Outcome {
    Exited(ExitStatus),
    Cancelled,
    TimedOut,
}

/// Runs one [`EncoderCommand`] at a time with cancellation and timeout.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child as soon as `cancel_rx` reads `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_optional_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run without observing output.
    pub async fn run(&self, cmd: &EncoderCommand) -> MontageResult<ProcessOutput> {
        self.run_observed(cmd, &mut ()).await
    }

    /// Run `cmd` to completion.
    ///
    /// Non-zero exit maps to [`MontageError::Unknown`] carrying the exit code
    /// and the stderr tail; callers re-label it per stage.
    pub async fn run_observed(
        &self,
        cmd: &EncoderCommand,
        observer: &mut dyn ProcessObserver,
    ) -> MontageResult<ProcessOutput> {
        if self.cancel_requested() {
            return Err(MontageError::Cancelled);
        }

        debug!(label = cmd.label(), command = %cmd.display(), "Spawning process");
        let mut child = Command::new(cmd.program())
            .args(cmd.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MontageError::tool_unavailable(
                    cmd.program().display().to_string(),
                    format!("failed to start: {e}"),
                )
            })?;

        let pid = child.id();
        observer.spawned(cmd.label(), pid);
        debug!(label = cmd.label(), pid, "Process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MontageError::unknown("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MontageError::unknown("failed to capture stderr"))?;

        let stdout_task = tokio::spawn(read_all(stdout));
        let mut segments = BufReader::new(stderr).split(b'\r');
        let mut tail = StderrTail::new(DIAGNOSTIC_LINES);
        let mut cancel_rx = self.cancel_rx.clone();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut stderr_open = true;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancelled(&mut cancel_rx) => break Outcome::Cancelled,
                _ = expired(deadline) => break Outcome::TimedOut,
                segment = segments.next_segment(), if stderr_open => match segment {
                    Ok(Some(bytes)) => handle_segment(&bytes, observer, &mut tail),
                    Ok(None) => stderr_open = false,
                    Err(err) => {
                        warn!(label = cmd.label(), error = %err, "Failed reading stderr");
                        stderr_open = false;
                    }
                },
                status = child.wait() => match status {
                    Ok(status) => break Outcome::Exited(status),
                    Err(err) => {
                        observer.exited(cmd.label());
                        return Err(err.into());
                    }
                },
            }
        };

        let status = match outcome {
            Outcome::Exited(status) => status,
            Outcome::Cancelled => {
                kill_child(&mut child, cmd.label(), pid).await;
                stdout_task.abort();
                observer.exited(cmd.label());
                info!(label = cmd.label(), pid, "Process killed on cancel");
                return Err(MontageError::Cancelled);
            }
            Outcome::TimedOut => {
                kill_child(&mut child, cmd.label(), pid).await;
                stdout_task.abort();
                observer.exited(cmd.label());
                let secs = self.timeout.map_or(0.0, |t| t.as_secs_f64());
                warn!(label = cmd.label(), secs, "Process timed out and was killed");
                return Err(MontageError::Timeout {
                    program: cmd.label().to_string(),
                    secs,
                });
            }
        };

        if stderr_open {
            let drain = async {
                while let Ok(Some(bytes)) = segments.next_segment().await {
                    handle_segment(&bytes, observer, &mut tail);
                }
            };
            if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, drain).await.is_err() {
                debug!(label = cmd.label(), "Stopped draining stderr after exit");
            }
        }
        observer.exited(cmd.label());

        let stdout = match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, stdout_task).await {
            Ok(Ok(Ok(bytes))) => bytes,
            Ok(Ok(Err(err))) => {
                warn!(label = cmd.label(), error = %err, "Failed reading stdout");
                Vec::new()
            }
            Ok(Err(_)) | Err(_) => Vec::new(),
        };

        let stderr_tail = tail.into_text();
        if !status.success() {
            debug!(
                label = cmd.label(),
                code = status.code(),
                stderr = %stderr_tail,
                "Process failed"
            );
            return Err(MontageError::Unknown {
                message: format!("{} exited with {}", cmd.label(), status),
                exit_code: status.code(),
                diagnostics: (!stderr_tail.is_empty()).then_some(stderr_tail),
            });
        }

        Ok(ProcessOutput {
            stdout,
            stderr_tail,
        })
    }
}

async fn kill_child(child: &mut Child, label: &str, pid: Option<u32>) {
    if let Err(err) = child.kill().await {
        warn!(label, pid, error = %err, "Failed to kill process");
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Resolves once cancellation is requested; never if there is no signal.
async fn cancelled(rx: &mut Option<watch::Receiver<bool>>) {
    match rx {
        Some(rx) => {
            let closed = rx.wait_for(|c| *c).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn handle_segment(bytes: &[u8], observer: &mut dyn ProcessObserver, tail: &mut StderrTail) {
    for line in String::from_utf8_lossy(bytes).split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        observer.stderr_line(line);
        tail.push(line);
    }
}

/// Bounded ring of the most recent stderr lines.
#[derive(Debug)]
struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: &str) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn into_text(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
        spawned: Vec<String>,
        exited: usize,
    }

    impl ProcessObserver for Recorder {
        fn spawned(&mut self, label: &str, _pid: Option<u32>) {
            self.spawned.push(label.to_string());
        }

        fn stderr_line(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }

        fn exited(&mut self, _label: &str) {
            self.exited += 1;
        }
    }

    #[test]
    fn test_command_builder() {
        let cmd = EncoderCommand::new("ffmpeg", "mux")
            .arg("-y")
            .args(["-i", "list.txt"])
            .arg(Path::new("/tmp/out.mp4"));
        assert_eq!(cmd.args_lossy(), vec!["-y", "-i", "list.txt", "/tmp/out.mp4"]);
        assert_eq!(cmd.display(), "ffmpeg -y -i list.txt /tmp/out.mp4");
        assert_eq!(cmd.label(), "mux");
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let mut tail = StderrTail::new(2);
        tail.push("a");
        tail.push("b");
        tail.push("c");
        assert_eq!(tail.into_text(), "b\nc");
    }

    #[test]
    fn test_segments_split_on_carriage_return_and_newline() {
        let mut recorder = Recorder::default();
        let mut tail = StderrTail::new(8);
        handle_segment(b"frame=1 time=00:00:00.03\n", &mut recorder, &mut tail);
        handle_segment(b"line one\nline two\n\n", &mut recorder, &mut tail);
        assert_eq!(
            recorder.lines,
            vec!["frame=1 time=00:00:00.03", "line one", "line two"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_collects_output_and_lines() {
        let cmd = EncoderCommand::new("sh", "echo")
            .arg("-c")
            .arg("printf 'out'; printf 'frame=1\\rframe=2\\n' >&2");
        let mut recorder = Recorder::default();
        let output = ProcessRunner::new()
            .run_observed(&cmd, &mut recorder)
            .await
            .unwrap();
        assert_eq!(output.stdout, b"out");
        assert_eq!(recorder.lines, vec!["frame=1", "frame=2"]);
        assert_eq!(recorder.spawned, vec!["echo"]);
        assert_eq!(recorder.exited, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_carries_diagnostics() {
        let cmd = EncoderCommand::new("sh", "failing")
            .arg("-c")
            .arg("echo 'bad input' >&2; exit 3");
        let err = ProcessRunner::new().run(&cmd).await.unwrap_err();
        match err {
            MontageError::Unknown {
                exit_code,
                diagnostics,
                ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(diagnostics.as_deref(), Some("bad input"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_unavailable() {
        let cmd = EncoderCommand::new("/nonexistent/montage-encoder", "probe");
        let err = ProcessRunner::new().run(&cmd).await.unwrap_err();
        assert_eq!(err.code(), "tool_unavailable");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let cmd = EncoderCommand::new("sh", "sleeper")
            .arg("-c")
            .arg("exec sleep 30");
        let started = std::time::Instant::now();
        let err = ProcessRunner::new()
            .with_timeout(Duration::from_millis(200))
            .run(&cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, MontageError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let (tx, rx) = watch::channel(false);
        let cmd = EncoderCommand::new("sh", "sleeper")
            .arg("-c")
            .arg("exec sleep 30");
        let runner = ProcessRunner::new().with_cancel(rx);
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send_replace(true);
            tx
        });
        let started = std::time::Instant::now();
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
        drop(cancel.await);
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let (_tx, rx) = watch::channel(true);
        let cmd = EncoderCommand::new("/nonexistent/never-run", "skipped");
        let err = ProcessRunner::new()
            .with_cancel(rx)
            .run(&cmd)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
