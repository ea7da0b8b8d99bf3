//! Errors reported by the progression engine.

use std::future::Future;
use std::time::Duration;
use questline_core::{GoalId, LevelId, UnknownCategory, UserId};
use questline_storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Coarse classification of an error, used to decide how callers react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced record does not exist
    NotFound,
    /// The record belongs to a different user
    NotOwned,
    /// The request itself is malformed
    InvalidArgument,
    /// The operation is not legal in the record's current lifecycle state
    InvalidState,
    /// A concurrent writer won; re-read and retry
    Conflict,
    /// Records disagree with each other and need reconciliation
    InconsistentProgressState,
    /// The store failed or timed out; retrying the whole operation is safe
    Unavailable,
}

/// Errors returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// Goal does not exist
    #[error("Goal not found: {0}")]
    GoalNotFound(GoalId),

    /// Level does not exist
    #[error("Level not found: {0}")]
    LevelNotFound(LevelId),

    /// User has no progress record yet
    #[error("No progress record for user {0}")]
    ProgressNotFound(UserId),

    /// Goal belongs to someone else
    #[error("Goal {0} is not owned by the caller")]
    GoalNotOwned(GoalId),

    /// Level belongs to someone else
    #[error("Level {0} is not owned by the caller")]
    LevelNotOwned(LevelId),

    /// Title was empty after trimming
    #[error("Title must not be empty")]
    EmptyTitle,

    /// Avatar name was empty after trimming
    #[error("Avatar name must not be empty")]
    EmptyAvatarName,

    /// Target outside the allowed range
    #[error("Target levels must be between 1 and 100, got {0}")]
    InvalidTarget(u32),

    /// Category string is not one of the fixed set
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// User already has a progress record
    #[error("User {0} is already initialized")]
    AlreadyInitialized(UserId),

    /// Goal is completed and cannot change
    #[error("Goal {0} is already completed")]
    GoalAlreadyCompleted(GoalId),

    /// Goal already has as many levels as it targets
    #[error("Goal {goal_id} already has all {target_levels} levels")]
    LevelLimitReached {
        /// Goal
        goal_id: GoalId,
        /// Its target
        target_levels: u32,
    },

    /// Level is locked and cannot be completed yet
    #[error("Level {0} is not active")]
    LevelNotActive(LevelId),

    /// The seed level of a new goal could not be written
    #[error("Failed to create the first level of the goal: {0}")]
    SeedLevelFailed(#[source] Box<ProgressError>),

    /// Concurrent writers kept winning
    #[error("Gave up after {attempts} conflicting attempts")]
    Conflict {
        /// Attempts made
        attempts: u32,
    },

    /// Records disagree and a reconciliation pass is required
    #[error("Inconsistent progress state for goal {goal_id}: {detail}")]
    InconsistentProgressState {
        /// Goal whose records disagree
        goal_id: GoalId,
        /// What was detected
        detail: String,
    },

    /// A store call did not finish in time
    #[error("Store call timed out: {0}")]
    Timeout(&'static str),

    /// Store error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ProgressError {
    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProgressError::GoalNotFound(_)
            | ProgressError::LevelNotFound(_)
            | ProgressError::ProgressNotFound(_) => ErrorKind::NotFound,
            ProgressError::GoalNotOwned(_) | ProgressError::LevelNotOwned(_) => ErrorKind::NotOwned,
            ProgressError::EmptyTitle
            | ProgressError::EmptyAvatarName
            | ProgressError::InvalidTarget(_)
            | ProgressError::UnknownCategory(_) => ErrorKind::InvalidArgument,
            ProgressError::AlreadyInitialized(_)
            | ProgressError::GoalAlreadyCompleted(_)
            | ProgressError::LevelLimitReached { .. }
            | ProgressError::LevelNotActive(_) => ErrorKind::InvalidState,
            ProgressError::Conflict { .. } => ErrorKind::Conflict,
            ProgressError::Storage(e) if e.is_conflict() => ErrorKind::Conflict,
            ProgressError::InconsistentProgressState { .. } => ErrorKind::InconsistentProgressState,
            ProgressError::SeedLevelFailed(_)
            | ProgressError::Timeout(_)
            | ProgressError::Storage(_) => ErrorKind::Unavailable,
        }
    }

    /// Whether the caller may retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Unavailable)
    }
}

impl From<UnknownCategory> for ProgressError {
    fn from(e: UnknownCategory) -> Self {
        ProgressError::UnknownCategory(e.0)
    }
}

/// Run a store call, giving up after `limit`.
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, call: F) -> Result<T>
where
    F: Future<Output = questline_storage::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ProgressError::from),
        Err(_) => {
            tracing::warn!("Store call {} timed out after {:?}", op, limit);
            Err(ProgressError::Timeout(op))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ProgressError::GoalNotFound(GoalId::new()).kind(), ErrorKind::NotFound);
        assert_eq!(ProgressError::LevelNotOwned(LevelId::new()).kind(), ErrorKind::NotOwned);
        assert_eq!(ProgressError::InvalidTarget(0).kind(), ErrorKind::InvalidArgument);
        assert_eq!(ProgressError::LevelNotActive(LevelId::new()).kind(), ErrorKind::InvalidState);
        assert_eq!(ProgressError::Conflict { attempts: 3 }.kind(), ErrorKind::Conflict);
        assert_eq!(ProgressError::Timeout("update_goal").kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_store_conflict_is_retryable() {
        let err = ProgressError::from(StorageError::VersionConflict {
            id: "x".to_string(),
            expected: 1,
            found: 2,
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());
        assert!(!ProgressError::EmptyTitle.is_retryable());
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StorageError>(())
        };
        let err = bounded(Duration::from_millis(10), "slow_call", slow).await.unwrap_err();
        assert!(matches!(err, ProgressError::Timeout("slow_call")));
        assert!(err.is_retryable());
    }
}
