//! Transfer task model

use serde::{Deserialize, Serialize};

use crate::error::{Error, FailureKind};
use crate::path::LocationRef;
use crate::provider::ObjectDescriptor;

/// What a task does at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Stream the source object into the destination
    Copy,
    /// Create the destination directory
    EnsureDirectory,
}

/// Lifecycle of a task
///
/// Moves forward only, except for the retry edge `InProgress -> Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// The unit of work moving one object to one destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    pub source: ObjectDescriptor,
    pub destination: LocationRef,
    pub kind: TaskKind,
    pub status: TaskStatus,

    /// Attempts started so far
    pub attempt_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    /// Bytes written during the latest attempt
    #[serde(default)]
    pub bytes_transferred: u64,
}

impl TransferTask {
    /// A pending copy task
    pub fn copy(source: ObjectDescriptor, destination: LocationRef) -> Self {
        Self::new(source, destination, TaskKind::Copy)
    }

    /// A pending directory-creation task
    pub fn ensure_directory(source: ObjectDescriptor, destination: LocationRef) -> Self {
        Self::new(source, destination, TaskKind::EnsureDirectory)
    }

    fn new(source: ObjectDescriptor, destination: LocationRef, kind: TaskKind) -> Self {
        Self {
            source,
            destination,
            kind,
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
            failure: None,
            bytes_transferred: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Begin a new attempt
    pub(crate) fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.attempt_count += 1;
        self.bytes_transferred = 0;
    }

    pub(crate) fn succeed(&mut self, bytes: u64) {
        self.status = TaskStatus::Succeeded;
        self.bytes_transferred = bytes;
        self.last_error = None;
        self.failure = None;
    }

    pub(crate) fn fail(&mut self, err: &Error) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(err.to_string());
        self.failure = Some(err.failure_kind());
    }

    /// Back to the queue after a retryable failure
    pub(crate) fn retry_later(&mut self, err: &Error) {
        self.status = TaskStatus::Pending;
        self.last_error = Some(err.to_string());
        self.failure = Some(err.failure_kind());
    }

    pub(crate) fn skip(&mut self) {
        self.status = TaskStatus::Skipped;
    }

    /// Forget any previous outcome so the task can run again
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.attempt_count = 0;
        self.last_error = None;
        self.failure = None;
        self.bytes_transferred = 0;
    }
}
