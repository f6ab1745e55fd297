//! Error taxonomy for the build pipeline.
//!
//! Every variant is fatal: nothing is recovered locally. The pipeline wraps
//! the error in a [`StepFailure`] so the operator can tell which step broke.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Step;
use crate::process::CommandError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A host tool that could not be found on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub command: String,
    pub install_hint: String,
}

impl fmt::Display for MissingTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {} (install: {})", self.command, self.install_hint)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing required host tools:\n{}", join_lines(.0))]
    MissingTool(Vec<MissingTool>),

    #[error("must run as root for: {}", .steps.join(", "))]
    InsufficientPrivileges { steps: Vec<String> },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "cannot resolve extracted directory for '{archive}' under '{}'; tried: {}",
        .search_dir.display(),
        .candidates.join(", ")
    )]
    Resolution {
        archive: String,
        search_dir: PathBuf,
        candidates: Vec<String>,
    },

    #[error("checksum mismatch for '{}': expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("patch '{}' did not apply: {reason}", .patch.display())]
    PatchApplication { patch: PathBuf, reason: String },

    #[error("build stage '{stage}' failed: {source}")]
    Build {
        stage: String,
        #[source]
        source: CommandError,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("invalid kernel config option name '{0}'")]
    InvalidOption(String),

    #[error("text must be a single line: {0:?}")]
    MultiLine(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code reported by the binary for this kind of failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::MissingTool(_) | Error::InsufficientPrivileges { .. } => 2,
            Error::Io { .. } => 3,
            Error::Resolution { .. } | Error::ChecksumMismatch { .. } => 4,
            Error::PatchApplication { .. } => 5,
            Error::Build { .. } => 6,
            Error::Command(_) => 7,
            Error::InvalidOption(_) | Error::MultiLine(_) | Error::Config(_) => 1,
        }
    }
}

fn join_lines(missing: &[MissingTool]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// An [`Error`] tagged with the pipeline step it aborted.
#[derive(Error, Debug)]
#[error("step '{step}' failed: {source}")]
pub struct StepFailure {
    pub step: Step,
    pub work_dir: PathBuf,
    #[source]
    pub source: Error,
}
