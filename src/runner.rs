//! Child process execution with live output capture and an idle timeout.
//!
//! [`CommandRunner`] spawns one external command with separate stdout and
//! stderr pipes and multiplexes both on a single task with
//! `tokio::select!`. Whichever pipe is ready is drained first, so a child
//! that floods stderr while the runner waits on stdout can never wedge
//! itself on a full pipe.
//!
//! # Idle Timeout
//!
//! The timeout bounds *silence*, not total runtime. Every chunk of output on
//! either stream resets the clock. If the child is still alive and neither
//! stream produces a byte for the configured interval, the child is killed
//! and the result is flagged with [`CommandResult::timed_out`]. A test that
//! prints progress for an hour is fine; a test that hangs without output for
//! the interval is not. A child that has exited reports its real status even
//! if a background descendant keeps the pipes open.
//!
//! # Live Output
//!
//! Captured bytes are appended to an in-memory log in arrival order and, when
//! an [`OutputCallback`] is set, forwarded as complete lines while the child
//! is still running.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shardrun::command::Command;
//! use shardrun::runner::CommandRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = CommandRunner::new(Duration::from_secs(600));
//!     let result = runner.run(&Command::new("ctest").arg("-N"), "host").await?;
//!     println!("exit {} after {:?}", result.exit_code, result.duration);
//!     Ok(())
//! }
//! ```

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::command::{
    Command, CommandError, CommandResult, SIGNALED_EXIT_CODE, TIMEOUT_EXIT_CODE,
};

/// Read buffer size per stream.
const CHUNK_SIZE: usize = 8192;

/// How long pipes are still read after the child exits. Background
/// descendants may hold them open indefinitely.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that prevent a command from producing a [`CommandResult`].
///
/// A command that runs and exits non-zero is NOT an error; neither is a
/// timeout. These variants mean the process could not be started or its
/// pipes failed.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The command had no program. This is a caller bug.
    #[error("refusing to run an empty command")]
    EmptyCommand,

    /// The process could not be spawned.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing stdin, reading a pipe, or waiting on the child failed.
    #[error("I/O error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<CommandError> for RunnerError {
    fn from(_: CommandError) -> Self {
        RunnerError::EmptyCommand
    }
}

/// A line of live output from a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    /// A line from standard output.
    Stdout(String),
    /// A line from standard error.
    Stderr(String),
}

/// Callback for live output.
///
/// Receives the label of the worker running the command and one complete
/// line of output (without the trailing newline).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use shardrun::runner::{OutputCallback, OutputLine};
///
/// let callback: OutputCallback = Arc::new(|worker, line| match line {
///     OutputLine::Stdout(s) => println!("[{}] {}", worker, s),
///     OutputLine::Stderr(s) => eprintln!("[{}] {}", worker, s),
/// });
/// ```
pub type OutputCallback = Arc<dyn Fn(&str, &OutputLine) + Send + Sync>;

/// Runs commands to completion under an idle timeout.
///
/// Cheap to clone; every worker holds its own copy.
#[derive(Clone)]
pub struct CommandRunner {
    idle_timeout: Duration,
    output_callback: Option<OutputCallback>,
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("idle_timeout", &self.idle_timeout)
            .field("streaming", &self.output_callback.is_some())
            .finish()
    }
}

impl CommandRunner {
    /// Creates a runner that kills commands silent for longer than
    /// `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            output_callback: None,
        }
    }

    /// Forwards output lines to `callback` as they arrive.
    pub fn with_output_callback(mut self, callback: OutputCallback) -> Self {
        self.output_callback = Some(callback);
        self
    }

    /// Returns the configured idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Runs `command` to completion.
    ///
    /// `label` identifies the caller (usually a worker id) in logs and in the
    /// output callback.
    ///
    /// # Errors
    ///
    /// - [`RunnerError::EmptyCommand`] before anything is spawned
    /// - [`RunnerError::Spawn`] if the program cannot be started
    /// - [`RunnerError::Io`] if stdin or the pipes fail
    pub async fn run(&self, command: &Command, label: &str) -> RunnerResult<CommandResult> {
        command.validate()?;

        info!("[{}] RunCmd: {}", label, command.repro_line());
        let start = Instant::now();

        let mut process = tokio::process::Command::new(&command.program);
        process.args(&command.args);
        for (key, value) in &command.env {
            process.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            process.current_dir(dir);
        }
        process
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = process.spawn().map_err(|source| RunnerError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let io_err = |source: std::io::Error| RunnerError::Io {
            program: command.program.clone(),
            source,
        };
        let mut capture = Capture::new(label, self.output_callback.clone());

        // Stdin is written in full and closed before any output is read. The
        // write counts as silence for the idle timeout.
        if let Some(payload) = &command.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            let write = async {
                stdin.write_all(payload).await?;
                stdin.shutdown().await
            };
            match tokio::time::timeout(self.idle_timeout, write).await {
                Ok(Ok(())) => {}
                // The child exited or closed stdin without reading it all.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("[{}] child closed stdin early", label);
                }
                Ok(Err(e)) => return Err(io_err(e)),
                Err(_) => {
                    self.kill_on_timeout(&mut child, label, &mut capture).await;
                    return Ok(capture.finish(TIMEOUT_EXIT_CODE, true, start.elapsed()));
                }
            }
        }

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let end = self
            .pump(&mut child, &mut stdout, &mut stderr, &mut capture)
            .await
            .map_err(io_err)?;
        capture.flush();

        let (exit_code, timed_out) = match end {
            PumpEnd::Exited(status) => (status.code().unwrap_or(SIGNALED_EXIT_CODE), false),
            PumpEnd::IdleTimeout => {
                self.kill_on_timeout(&mut child, label, &mut capture).await;
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let duration = start.elapsed();
        if exit_code != 0 {
            debug!(
                "[{}] cmd failed with exit code {}: {}",
                label,
                exit_code,
                command.to_shell_string()
            );
        }
        Ok(capture.finish(exit_code, timed_out, duration))
    }

    /// Drains both pipes and waits for the child, until the child has
    /// exited and both pipes hit EOF, or until the idle timeout fires while
    /// the child is still alive.
    ///
    /// Once the child has exited, pipes held open by its descendants are
    /// read for at most [`EXIT_DRAIN_GRACE`] of silence.
    async fn pump<O, E>(
        &self,
        child: &mut Child,
        stdout: &mut Option<O>,
        stderr: &mut Option<E>,
        capture: &mut Capture,
    ) -> std::io::Result<PumpEnd>
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut out_buf = vec![0u8; CHUNK_SIZE];
        let mut err_buf = vec![0u8; CHUNK_SIZE];
        let mut status: Option<ExitStatus> = None;

        loop {
            if let Some(status) = status
                && stdout.is_none()
                && stderr.is_none()
            {
                return Ok(PumpEnd::Exited(status));
            }

            let running = status.is_none();
            let limit = if running {
                self.idle_timeout
            } else {
                EXIT_DRAIN_GRACE.min(self.idle_timeout)
            };
            let ready = tokio::time::timeout(limit, async {
                tokio::select! {
                    n = read_some(stdout, &mut out_buf), if stdout.is_some() => Pumped::Read(Stream::Stdout, n),
                    n = read_some(stderr, &mut err_buf), if stderr.is_some() => Pumped::Read(Stream::Stderr, n),
                    exited = child.wait(), if running => Pumped::Exited(exited),
                }
            })
            .await;

            let pumped = match ready {
                Ok(pumped) => pumped,
                Err(_) => match status {
                    Some(status) => {
                        debug!("[{}] pipes still open after exit, stop reading", capture.label);
                        return Ok(PumpEnd::Exited(status));
                    }
                    None => return Ok(PumpEnd::IdleTimeout),
                },
            };

            match pumped {
                Pumped::Exited(exited) => status = Some(exited?),
                Pumped::Read(stream, Ok(0)) => match stream {
                    Stream::Stdout => *stdout = None,
                    Stream::Stderr => *stderr = None,
                },
                Pumped::Read(stream, Ok(n)) => match stream {
                    Stream::Stdout => capture.push(Stream::Stdout, &out_buf[..n]),
                    Stream::Stderr => capture.push(Stream::Stderr, &err_buf[..n]),
                },
                Pumped::Read(_, Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Pumped::Read(_, Err(e)) => return Err(e),
            }
        }
    }

    async fn kill_on_timeout(&self, child: &mut Child, label: &str, capture: &mut Capture) {
        let msg = format!(
            "Reached idle timeout of {}s, killing process",
            self.idle_timeout.as_secs_f64()
        );
        warn!("[{}] {}", label, msg);
        capture.note(&msg);
        if let Err(e) = child.kill().await {
            warn!("[{}] failed to kill timed out process: {}", label, e);
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        // Disabled by the select guard; never polled.
        None => Ok(0),
    }
}

/// How [`CommandRunner::pump`] ended.
enum PumpEnd {
    Exited(ExitStatus),
    IdleTimeout,
}

/// One ready branch of the pump's select.
enum Pumped {
    Read(Stream, std::io::Result<usize>),
    Exited(std::io::Result<ExitStatus>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Accumulates output and splits it into lines for the live callback.
struct Capture {
    label: String,
    callback: Option<OutputCallback>,
    log: Vec<u8>,
    pending_out: Vec<u8>,
    pending_err: Vec<u8>,
}

impl Capture {
    fn new(label: &str, callback: Option<OutputCallback>) -> Self {
        Self {
            label: label.to_string(),
            callback,
            log: Vec::new(),
            pending_out: Vec::new(),
            pending_err: Vec::new(),
        }
    }

    fn push(&mut self, stream: Stream, chunk: &[u8]) {
        self.log.extend_from_slice(chunk);

        let Some(callback) = &self.callback else {
            return;
        };
        let pending = match stream {
            Stream::Stdout => &mut self.pending_out,
            Stream::Stderr => &mut self.pending_err,
        };
        pending.extend_from_slice(chunk);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            callback(&self.label, &tag(stream, text));
        }
    }

    /// Emits any trailing partial lines.
    fn flush(&mut self) {
        let Some(callback) = &self.callback else {
            return;
        };
        for (stream, pending) in [
            (Stream::Stdout, &mut self.pending_out),
            (Stream::Stderr, &mut self.pending_err),
        ] {
            if !pending.is_empty() {
                let text = String::from_utf8_lossy(pending).to_string();
                pending.clear();
                callback(&self.label, &tag(stream, text));
            }
        }
    }

    /// Appends an orchestrator-generated line to the log.
    fn note(&mut self, msg: &str) {
        if !self.log.is_empty() && !self.log.ends_with(b"\n") {
            self.log.push(b'\n');
        }
        self.log.extend_from_slice(msg.as_bytes());
        self.log.push(b'\n');
    }

    fn finish(self, exit_code: i32, timed_out: bool, duration: Duration) -> CommandResult {
        CommandResult {
            exit_code,
            combined_output: String::from_utf8_lossy(&self.log).into_owned(),
            timed_out,
            duration,
        }
    }
}

fn tag(stream: Stream, text: String) -> OutputLine {
    match stream {
        Stream::Stdout => OutputLine::Stdout(text),
        Stream::Stderr => OutputLine::Stderr(text),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn sh(script: &str) -> Command {
        Command::new("sh").arg("-c").arg(script)
    }

    fn runner() -> CommandRunner {
        CommandRunner::new(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let result = runner()
            .run(&sh("echo out; echo err >&2"), "t")
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert!(result.combined_output.contains("out\n"));
        assert!(result.combined_output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_reports_real_exit_code() {
        let result = runner().run(&sh("exit 3"), "t").await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_zero_byte_output_is_valid() {
        let result = runner().run(&Command::new("true"), "t").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.combined_output.is_empty());
    }

    #[tokio::test]
    async fn test_empty_command_fails_before_spawn() {
        let err = runner().run(&Command::new(""), "t").await.unwrap_err();
        assert!(matches!(err, RunnerError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = runner()
            .run(&Command::new("/nonexistent/shardrun-no-such-binary"), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_stdin_payload_is_delivered() {
        let result = runner()
            .run(&Command::new("cat").stdin("hello from stdin"), "t")
            .await
            .unwrap();
        assert_eq!(result.combined_output, "hello from stdin");
    }

    #[tokio::test]
    async fn test_env_and_working_dir_apply() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh("echo \"$SHARDRUN_TEST_VAR\"; pwd")
            .env("SHARDRUN_TEST_VAR", "pinned")
            .working_dir(dir.path());
        let result = runner().run(&cmd, "t").await.unwrap();

        assert!(result.combined_output.starts_with("pinned\n"));
        let canonical = dir.path().canonicalize().unwrap();
        assert!(
            result
                .combined_output
                .contains(canonical.to_string_lossy().as_ref())
        );
    }

    #[tokio::test]
    async fn test_idle_timeout_kills_silent_process() {
        let runner = CommandRunner::new(Duration::from_millis(300));
        let start = Instant::now();
        let result = runner.run(&sh("sleep 30"), "t").await.unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.combined_output.contains("Reached idle timeout"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_exited_child_with_background_descendant_is_not_timeout() {
        let runner = CommandRunner::new(Duration::from_secs(1));
        let start = Instant::now();
        let result = runner
            .run(&sh("echo started; sleep 4 & exit 0"), "t")
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert!(result.combined_output.contains("started"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_exit_code_survives_open_pipes() {
        let runner = CommandRunner::new(Duration::from_secs(1));
        let result = runner.run(&sh("sleep 4 & exit 5"), "t").await.unwrap();
        assert_eq!(result.exit_code, 5);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_unread_stdin_is_bounded_by_idle_timeout() {
        let runner = CommandRunner::new(Duration::from_secs(1));
        let payload = vec![b'x'; 4 * 1024 * 1024];
        let start = Instant::now();
        let result = runner
            .run(&sh("sleep 6").stdin(payload), "t")
            .await
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_output_resets_idle_clock() {
        // Total runtime exceeds the timeout but no single gap does.
        let runner = CommandRunner::new(Duration::from_millis(1500));
        let script = "for i in 1 2 3 4; do echo tick $i; sleep 0.5; done";
        let result = runner.run(&sh(script), "t").await.unwrap();

        assert!(!result.timed_out);
        assert_eq!(result.exit_code, 0);
        assert!(result.combined_output.contains("tick 4"));
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams_does_not_deadlock() {
        let script = "head -c 300000 /dev/zero | tr '\\0' a; head -c 300000 /dev/zero | tr '\\0' b >&2";
        let result = runner().run(&sh(script), "t").await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.combined_output.len(), 600_000);
    }

    #[tokio::test]
    async fn test_callback_receives_complete_lines() {
        let lines: Arc<Mutex<Vec<(String, OutputLine)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let runner = runner().with_output_callback(Arc::new(move |label, line| {
            sink.lock().unwrap().push((label.to_string(), line.clone()));
        }));

        runner
            .run(&sh("printf 'a\\nb\\n'; printf 'partial' >&2"), "gpu3")
            .await
            .unwrap();

        let lines = lines.lock().unwrap();
        assert!(lines.iter().all(|(label, _)| label == "gpu3"));
        let out: Vec<_> = lines
            .iter()
            .filter_map(|(_, l)| match l {
                OutputLine::Stdout(s) => Some(s.as_str()),
                OutputLine::Stderr(_) => None,
            })
            .collect();
        assert_eq!(out, vec!["a", "b"]);
        assert!(lines.contains(&("gpu3".to_string(), OutputLine::Stderr("partial".into()))));
    }
}
