// src/error.rs
//! Error taxonomy for the aggregation engine.
//!
//! Configuration errors (`DuplicatePlugin`, `DuplicateBuiltin`, `Script`,
//! `InvalidArguments`) surface before any fetch starts.
//! `Callable` and `Backend` errors are contained to the source that raised them
//! and end up inside `Sources` once a run completes. `Cancelled` is terminal.

use std::fmt;
use thiserror::Error;

/// Role a script callable plays for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableRole {
    Filter,
    Priority,
    Status,
}

impl fmt::Display for CallableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallableRole::Filter => "filter",
            CallableRole::Priority => "priority",
            CallableRole::Status => "status",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("plugin {0:?} is already registered")]
    DuplicatePlugin(String),

    #[error("builtin {name:?} is provided by both plugin {first:?} and plugin {second:?}")]
    DuplicateBuiltin {
        name: String,
        first: String,
        second: String,
    },

    #[error("configuration script {origin}: {message}")]
    Script { origin: String, message: String },

    #[error("invalid arguments to {builtin}(): {reason}")]
    InvalidArguments { builtin: String, reason: String },

    #[error("plugin {0:?} is frozen; sources can only be registered while the configuration script loads")]
    Frozen(String),

    #[error("calling {role} function {name:?}: {message}")]
    Callable {
        role: CallableRole,
        name: String,
        message: String,
    },

    #[error("fetching {source_name} project {project:?}: {message}")]
    Backend {
        source_name: String,
        project: String,
        message: String,
    },

    #[error("script runtime has shut down")]
    RuntimeGone,

    #[error("fetch task for {source_name} project {project:?} did not complete")]
    TaskAborted { source_name: String, project: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("{}", join_failures(.0))]
    Sources(Vec<SourceFailure>),
}

impl Error {
    pub fn invalid_arguments(builtin: &str, reason: impl Into<String>) -> Self {
        Error::InvalidArguments {
            builtin: builtin.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// One source's failure within an otherwise completed run.
#[derive(Debug)]
pub struct SourceFailure {
    pub source_name: String,
    pub project: String,
    pub error: Error,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.source_name, self.project, self.error)
    }
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;
