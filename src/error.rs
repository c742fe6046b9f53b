//! Error types for the task pipeline, its status store, and the provider layer.

use crate::provider::RunStatus;
use crate::task::{Phase, TaskStatus};
use crate::types::TaskId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Status store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Status store backend error: {0}")]
    Backend(String),

    #[error("Corrupt status entry for task {id}: {reason}")]
    Corrupt { id: TaskId, reason: String },

    #[error("Status store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Errors raised by a completion provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Remote run ended with status '{status}'")]
    Incomplete { status: RunStatus },

    #[error("Remote run did not reach a terminal status within {0:?}")]
    Timeout(Duration),

    #[error("Remote run completed without an assistant reply")]
    EmptyReply,

    #[error("Failed to read attachment {path:?}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Provider resource not found: {0}")]
    NotFound(String),

    #[error("Failed to parse provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider error: {0}")]
    Other(String),
}

/// Error returned by a merger.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MergeError(pub String);

/// Pipeline and bookkeeping errors for a single task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{phase} generation ended with remote status '{status}'")]
    ProviderIncomplete { phase: Phase, status: RunStatus },

    #[error("{phase} generation failed: {source}")]
    Provider {
        phase: Phase,
        #[source]
        source: ProviderError,
    },

    #[error("Merge failed: {0}")]
    MergeFailed(#[from] MergeError),

    #[error("Task {0} has already been started")]
    AlreadyStarted(TaskId),

    #[error("Invalid status transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("No status entry for task {0}")]
    StatusMissing(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Task {0} was already submitted")]
    AlreadySubmitted(TaskId),

    #[error("Result of task {0} was already taken")]
    ResultTaken(TaskId),

    #[error("Worker for task {id} stopped: {reason}")]
    WorkerFailed { id: TaskId, reason: String },

    #[error("Status store error: {0}")]
    Storage(#[from] StorageError),
}

impl TaskError {
    /// Attach a pipeline phase to a provider error.
    ///
    /// A non-completed remote run becomes `ProviderIncomplete` so callers can match
    /// on the remote status directly; everything else is carried unchanged.
    pub fn provider(phase: Phase, err: ProviderError) -> Self {
        match err {
            ProviderError::Incomplete { status } => TaskError::ProviderIncomplete { phase, status },
            source => TaskError::Provider { phase, source },
        }
    }

    /// Remote run status carried by a `ProviderIncomplete` failure.
    pub fn remote_status(&self) -> Option<RunStatus> {
        match self {
            TaskError::ProviderIncomplete { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Credential not found: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Status store setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),
}
