//! Typed command values and their execution results.
//!
//! A [`Command`] is a stateless description of one process invocation:
//! argv, working directory, environment overrides, and an optional stdin
//! payload. Commands are built with a fluent builder and validated before
//! anything is spawned, so call sites never assemble argv or environment
//! from loose strings.
//!
//! # Example
//!
//! ```
//! use shardrun::command::Command;
//!
//! let cmd = Command::new("ctest")
//!     .arg("--output-on-failure")
//!     .args(["--tests-information", "1,,4"])
//!     .working_dir("build")
//!     .env("HIP_VISIBLE_DEVICES", "0");
//!
//! assert_eq!(cmd.program, "ctest");
//! assert_eq!(cmd.args.len(), 3);
//! assert!(cmd.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code reported for a process killed by the idle timeout.
///
/// Matches the convention of coreutils `timeout`. The
/// [`CommandResult::timed_out`] flag is authoritative; a program may exit
/// with 124 on its own.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when a process was terminated by a signal and the
/// platform provides no numeric status.
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// Exit code recorded when a command could not be spawned or its pipes
/// failed. Mirrors the shell's "command not found" status.
pub const SPAWN_FAILED_EXIT_CODE: i32 = 127;

/// Errors raised while building a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The argv was empty or the program name was blank.
    #[error("command is empty")]
    Empty,

    /// A command string could not be split into words.
    #[error("failed to parse command {input:?}: {reason}")]
    Parse {
        /// The offending input.
        input: String,
        /// Why shell-style splitting failed.
        reason: String,
    },
}

/// A command to execute on a worker.
///
/// Environment overrides are applied in insertion order on top of the
/// orchestrator's own environment; later entries win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for the process.
    ///
    /// If `None`, the orchestrator's current directory is used.
    pub working_dir: Option<PathBuf>,

    /// Environment variables to set for this command.
    pub env: Vec<(String, String)>,

    /// Bytes written to the child's stdin before output is read.
    ///
    /// When `None` the child's stdin is connected to the null device.
    pub stdin: Option<Vec<u8>>,
}

impl Command {
    /// Creates a new command with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Builds a command from a full argv vector.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Empty`] if `argv` is empty or its first
    /// element is blank.
    ///
    /// # Example
    ///
    /// ```
    /// use shardrun::command::{Command, CommandError};
    ///
    /// let cmd = Command::from_argv(vec!["ctest".to_string(), "-V".to_string()]).unwrap();
    /// assert_eq!(cmd.args, vec!["-V"]);
    ///
    /// assert_eq!(Command::from_argv(Vec::<String>::new()), Err(CommandError::Empty));
    /// ```
    pub fn from_argv<I, S>(argv: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or(CommandError::Empty)?;
        let cmd = Self::new(program).args(argv);
        cmd.validate()?;
        Ok(cmd)
    }

    /// Splits a shell-style command string into a command.
    ///
    /// Quoting follows POSIX shell rules; no expansion is performed.
    ///
    /// # Example
    ///
    /// ```
    /// use shardrun::command::Command;
    ///
    /// let cmd = Command::parse("ctest --test-dir 'my build'").unwrap();
    /// assert_eq!(cmd.program, "ctest");
    /// assert_eq!(cmd.args, vec!["--test-dir", "my build"]);
    /// ```
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let words = shell_words::split(input).map_err(|e| CommandError::Parse {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_argv(words)
    }

    /// Adds a single argument to the command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments to the command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory for command execution.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable for this command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds several environment variables at once.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the payload written to the child's stdin.
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Checks that the command names a program.
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.program.trim().is_empty() {
            return Err(CommandError::Empty);
        }
        Ok(())
    }

    /// Returns the effective value of an environment override, if set.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Converts the program and arguments to a shell-executable string.
    ///
    /// # Example
    ///
    /// ```
    /// use shardrun::command::Command;
    /// let cmd = Command::new("echo").arg("hello world");
    /// assert_eq!(cmd.to_shell_string(), "echo 'hello world'");
    /// ```
    pub fn to_shell_string(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }

    /// Renders a line that reproduces this invocation in a shell.
    ///
    /// Includes the working directory and environment overrides, e.g.
    /// `cd build; HIP_VISIBLE_DEVICES='0' ctest -V`.
    pub fn repro_line(&self) -> String {
        let mut line = String::new();
        if let Some(dir) = &self.working_dir {
            line.push_str(&format!(
                "cd {}; ",
                shell_words::quote(&dir.to_string_lossy())
            ));
        }
        for (key, value) in &self.env {
            line.push_str(&format!("{}='{}' ", key, value.replace('\'', "'\\''")));
        }
        line.push_str(&self.to_shell_string());
        line
    }
}

/// Result of running one command to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Process exit status, or one of the sentinel codes in this module.
    pub exit_code: i32,

    /// Captured stdout and stderr, in arrival order.
    pub combined_output: String,

    /// Whether the idle timeout fired and the process was killed.
    pub timed_out: bool,

    /// Wall-clock time from spawn to exit.
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl CommandResult {
    /// Returns `true` if the command exited 0 and did not time out.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Builds the result recorded for a command that never produced an
    /// exit status (spawn failure, broken pipe, worker task abort).
    pub fn infrastructure_failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: SPAWN_FAILED_EXIT_CODE,
            combined_output: message.into(),
            timed_out: false,
            duration: Duration::ZERO,
        }
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_parts() {
        let cmd = Command::new("ctest")
            .arg("-V")
            .env("A", "1")
            .envs([("B", "2")])
            .working_dir("/tmp")
            .stdin("payload");

        assert_eq!(cmd.args, vec!["-V"]);
        assert_eq!(cmd.env.len(), 2);
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(cmd.stdin.as_deref(), Some(b"payload".as_slice()));
    }

    #[test]
    fn test_blank_program_is_rejected() {
        assert_eq!(Command::new("").validate(), Err(CommandError::Empty));
        assert_eq!(Command::new("   ").validate(), Err(CommandError::Empty));
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
    }

    #[test]
    fn test_parse_reports_unbalanced_quotes() {
        let err = Command::parse("ctest 'oops").unwrap_err();
        assert!(matches!(err, CommandError::Parse { .. }));
    }

    #[test]
    fn test_env_value_prefers_last_override() {
        let cmd = Command::new("x").env("K", "a").env("K", "b");
        assert_eq!(cmd.env_value("K"), Some("b"));
        assert_eq!(cmd.env_value("missing"), None);
    }

    #[test]
    fn test_repro_line_includes_cwd_and_env() {
        let cmd = Command::new("ctest")
            .arg("-R")
            .arg("a b")
            .working_dir("/work")
            .env("HIP_VISIBLE_DEVICES", "1");
        assert_eq!(
            cmd.repro_line(),
            "cd /work; HIP_VISIBLE_DEVICES='1' ctest -R 'a b'"
        );
    }

    #[test]
    fn test_result_success_requires_no_timeout() {
        let mut result = CommandResult {
            exit_code: 0,
            combined_output: String::new(),
            timed_out: false,
            duration: Duration::ZERO,
        };
        assert!(result.success());
        result.timed_out = true;
        assert!(!result.success());
        assert!(!CommandResult::infrastructure_failure("boom").success());
    }
}
