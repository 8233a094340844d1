//! Step- and launch-level errors.

use nightbatch_core::ItemError;
use thiserror::Error;

use crate::context::ContextError;
use crate::metadata::ItemPhase;
use crate::repository::RepositoryError;

/// Why a step ended in FAILED.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// An error the fault policy does not tolerate (unclassified, overflow, ...).
    #[error("fatal {phase} error: {error}")]
    Fatal { phase: ItemPhase, error: ItemError },

    #[error("skip limit {limit} exceeded during {phase}: {error}")]
    SkipLimitExceeded {
        limit: u32,
        phase: ItemPhase,
        error: ItemError,
    },

    #[error("retry limit {limit} exhausted during {phase}: {error}")]
    RetryLimitExceeded {
        limit: u32,
        phase: ItemPhase,
        error: ItemError,
    },

    /// Opening, checkpointing or closing a reader/processor/writer failed.
    #[error("stream {operation} failed: {error}")]
    Stream {
        operation: &'static str,
        error: ItemError,
    },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl StepError {
    pub fn phase(&self) -> Option<ItemPhase> {
        match self {
            StepError::Fatal { phase, .. }
            | StepError::SkipLimitExceeded { phase, .. }
            | StepError::RetryLimitExceeded { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The item-level cause, when there is one.
    pub fn item_error(&self) -> Option<&ItemError> {
        match self {
            StepError::Fatal { error, .. }
            | StepError::SkipLimitExceeded { error, .. }
            | StepError::RetryLimitExceeded { error, .. }
            | StepError::Stream { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Launch/restart/operator request rejected.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    #[error("no job registered under '{0}'")]
    UnknownJob(String),

    #[error("missing job parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid job parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl LaunchError {
    pub fn is_concurrent_execution(&self) -> bool {
        matches!(
            self,
            LaunchError::Repository(RepositoryError::ConcurrentExecution { .. })
        )
    }
}
