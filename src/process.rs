//! Thin wrapper around `std::process::Command` for external tools.
//!
//! Every tool the pipeline drives (git, curl, unzip, patch, make,
//! update-grub) goes through [`Cmd`], so failures carry the full command
//! line, the exit code and the tail of stderr.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::{Command, ExitStatus, Output, Stdio};
use thiserror::Error;
use tracing::debug;

/// Lines of stderr kept in a [`CommandError`].
const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{context}: failed to spawn `{command}`: {source}")]
    Spawn {
        context: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: `{command}` exited with {}{}", format_code(.code), format_stderr(.stderr))]
    Failed {
        context: String,
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl CommandError {
    /// Exit code of the failed command, if it ran and exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            CommandError::Spawn { .. } => None,
            CommandError::Failed { code, .. } => *code,
        }
    }
}

fn format_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

fn format_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\n{stderr}")
    }
}

/// Builder for a single external command invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            error_msg: None,
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

    /// Message prefixed to any error this command produces.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Run with captured output. Non-zero exit is an error.
    pub fn run(&self) -> Result<Output, CommandError> {
        debug!("running: {}", self);
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failed_error(output.status, stderr_tail(&stderr)));
        }
        Ok(output)
    }

    /// Run with inherited stdio so the operator sees progress.
    pub fn run_interactive(&self) -> Result<(), CommandError> {
        debug!("running (interactive): {}", self);
        let status = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| self.spawn_error(source))?;

        if !status.success() {
            return Err(self.failed_error(status, String::new()));
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    fn context(&self) -> String {
        self.error_msg
            .clone()
            .unwrap_or_else(|| format!("{} failed", self.program.to_string_lossy()))
    }

    fn spawn_error(&self, source: std::io::Error) -> CommandError {
        CommandError::Spawn {
            context: self.context(),
            command: self.to_string(),
            source,
        }
    }

    fn failed_error(&self, status: ExitStatus, stderr: String) -> CommandError {
        CommandError::Failed {
            context: self.context(),
            command: self.to_string(),
            code: status.code(),
            stderr,
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
