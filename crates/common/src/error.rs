//! Error types for privprobe

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the privprobe Error
pub type Result<T> = std::result::Result<T, Error>;

/// privprobe error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{program} exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{operation} did not succeed after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Instrumentation error: {0}")]
    Instrumentation(String),

    #[error("Capture proxy error: {0}")]
    Capture(String),

    #[error(
        "Could not resolve tracker domain {domain} (got {address}). \
         Ensure that you don't have DNS blocking enabled."
    )]
    DnsBlocked { domain: String, address: String },

    #[error("App {expected} isn't in foreground anymore (foreground: {})", .actual.as_deref().unwrap_or("unknown"))]
    AppNotForeground {
        expected: String,
        actual: Option<String>,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Interrupted by signal")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that abort the whole pipeline instead of failing a single app.
    pub fn is_pipeline_fatal(&self) -> bool {
        matches!(self, Error::DnsBlocked { .. } | Error::Interrupted)
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Database(_) => "database",
            Error::Serialization(_) => "serialization",
            Error::CommandFailed { .. } => "command_failed",
            Error::SpawnFailed { .. } => "spawn_failed",
            Error::Timeout { .. } => "timeout",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::Device(_) => "device",
            Error::Instrumentation(_) => "instrumentation",
            Error::Capture(_) => "capture",
            Error::DnsBlocked { .. } => "dns_blocked",
            Error::AppNotForeground { .. } => "app_not_foreground",
            Error::InvalidStateTransition { .. } => "invalid_state_transition",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Interrupted => "interrupted",
            Error::Internal(_) => "internal",
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

/// Error as persisted inside a failure record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    pub kind: String,
    pub message: String,
    /// Messages of the `source()` chain, outermost first.
    #[serde(default)]
    pub chain: Vec<String>,
}

impl From<&Error> for SerializedError {
    fn from(err: &Error) -> Self {
        let mut chain = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            chain,
        }
    }
}
