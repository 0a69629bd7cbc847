//! Error taxonomy for the reconciliation engine.
//!
//! Every error knows how far it is allowed to propagate: a failed feed fetch
//! aborts the whole cycle, a failed checksum or git step aborts a single
//! release, and a failed notification is only logged.

use std::path::PathBuf;

use thiserror::Error;

/// How far an error is allowed to travel before it is contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Abort the running cycle; the next tick retries.
    Cycle,
    /// Abort the current release; siblings in the same cycle still run.
    Release,
    /// Log and carry on.
    Ignored,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Feed or registry unreachable, or its payload could not be decoded.
    #[error("fetch failed for {source_name}: {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    /// A single version string did not match the `major.minor.patch` grammar.
    #[error("invalid version {input:?}: {message}")]
    Parse { input: String, message: String },

    /// Artifact download or hashing failed.
    #[error("checksum for {version} failed: {message}")]
    Checksum { version: String, message: String },

    /// An external command exited non-zero or timed out.
    #[error("`{command}` failed (exit {exit_code:?}): {output}")]
    Command {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// A template file is missing or lacks the markers we rewrite.
    #[error("template {path}: {message}")]
    Template { path: PathBuf, message: String },

    /// Release notification could not be delivered.
    #[error("notification failed: {0}")]
    Notify(String),

    /// Local state (checksum cache, working directories) could not be read or written.
    #[error("local state at {path}: {message}")]
    State { path: PathBuf, message: String },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn fetch(source_name: impl Into<String>, message: impl ToString) -> Self {
        Error::Fetch {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn checksum(version: impl ToString, message: impl ToString) -> Self {
        Error::Checksum {
            version: version.to_string(),
            message: message.to_string(),
        }
    }

    pub fn template(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::Template {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn state(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::State {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Containment boundary for this error.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::Fetch { .. } | Error::Config(_) => ErrorScope::Cycle,
            Error::Checksum { .. }
            | Error::Command { .. }
            | Error::Template { .. }
            | Error::State { .. } => ErrorScope::Release,
            Error::Parse { .. } | Error::Notify(_) => ErrorScope::Ignored,
        }
    }
}
