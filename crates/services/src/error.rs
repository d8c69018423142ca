//! Error taxonomy of the attempt engine.

use thiserror::Error;

use quiz_core::BlockReason;
use quiz_core::model::{AttemptError, QuizError};
use storage::repository::StorageError;

/// Errors emitted by `QuizEngine` and its components.
///
/// Timer expiry is not an error; it surfaces as `TickOutcome::AutoSubmitted`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The backing store failed or timed out.
    #[error(transparent)]
    Infrastructure(#[from] StorageError),

    /// The quiz cannot be presented or scored as stored.
    #[error(transparent)]
    Validation(#[from] QuizError),

    /// A finished attempt could not be scored.
    #[error(transparent)]
    Attempt(#[from] AttemptError),

    /// The attempt gate refused to start the attempt.
    #[error("attempt blocked: {0}")]
    Rule(BlockReason),
}

impl EngineError {
    /// Rule violations are expected outcomes and are not worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Infrastructure(_))
    }
}
