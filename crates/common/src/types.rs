//! Core types for privprobe

use crate::error::SerializedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An app discovered in the apps directory, to be tested in this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCandidate {
    /// Package identifier, e.g. `com.example.a`
    pub app_id: String,
    /// Path to the app binary
    pub path: PathBuf,
}

impl AppCandidate {
    pub fn new(app_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            app_id: app_id.into(),
            path: path.into(),
        }
    }
}

/// A successfully tested (or in-flight) app version in the run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: i64,
    /// App identifier
    pub name: String,
    pub version: String,
}

/// One capture-proxy session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub app_id: i64,
}

/// Persisted whenever testing an app fails. Its presence excludes the app from
/// automatic retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub app_id: String,
    pub date: DateTime<Utc>,
    pub error: SerializedError,
}

impl FailureRecord {
    pub fn new(app_id: impl Into<String>, error: &crate::Error) -> Self {
        Self {
            app_id: app_id.into(),
            date: Utc::now(),
            error: SerializedError::from(error),
        }
    }
}

/// Why an app was skipped without touching the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PreviouslyFailed,
    AlreadyDone,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PreviouslyFailed => write!(f, "it previously failed"),
            SkipReason::AlreadyDone => write!(f, "we already analyzed it"),
        }
    }
}

/// Per-app test state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Candidate,
    Skipped,
    DeviceReset,
    Capturing,
    Launched,
    Monitoring,
    Done,
    Failed,
}

impl Default for AppState {
    fn default() -> Self {
        Self::Candidate
    }
}

impl AppState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppState::Skipped | AppState::Done | AppState::Failed)
    }

    /// Whether `next` may follow `self`. Any non-terminal state may fail.
    pub fn can_transition_to(&self, next: AppState) -> bool {
        use AppState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Candidate, Skipped) | (Candidate, DeviceReset) => true,
            (DeviceReset, Capturing) => true,
            (Capturing, Launched) => true,
            (Launched, Monitoring) => true,
            (Monitoring, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Candidate => write!(f, "candidate"),
            AppState::Skipped => write!(f, "skipped"),
            AppState::DeviceReset => write!(f, "device_reset"),
            AppState::Capturing => write!(f, "capturing"),
            AppState::Launched => write!(f, "launched"),
            AppState::Monitoring => write!(f, "monitoring"),
            AppState::Done => write!(f, "done"),
            AppState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal result for one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppOutcome {
    pub app_id: String,
    pub version: Option<String>,
    pub state: AppState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Totals for one pipeline invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &AppOutcome) {
        self.total += 1;
        match outcome.state {
            AppState::Done => self.done += 1,
            AppState::Failed => self.failed += 1,
            AppState::Skipped => self.skipped += 1,
            _ => {}
        }
    }
}
