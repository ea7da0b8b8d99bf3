//! Entity store abstraction.

use async_trait::async_trait;
use questline_core::{
    Goal, GoalFilter, GoalId, Level, LevelFilter, LevelId, ProgressFilter, ProgressId,
    UserId, UserProgress,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create was called with an id that is already taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The stored record moved on since it was read
    #[error("Version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Record identifier
        id: String,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        found: u64,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether this error reports a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::VersionConflict { .. })
    }
}

/// Persistence for goals, levels and progress records.
///
/// There are no cross-record transactions. Each `update_*` is a
/// compare-and-swap on the record's `version`: it succeeds only if the stored
/// version equals the one passed in, and the returned record carries the
/// bumped version.
#[async_trait]
pub trait EntityStore: Send + Sync {
    // === Goal operations ===

    /// Insert a new goal.
    async fn create_goal(&self, goal: &Goal) -> Result<GoalId>;

    /// List goals matching the filter, in no particular order.
    async fn filter_goals(&self, filter: &GoalFilter) -> Result<Vec<Goal>>;

    /// Replace a goal if its version is current.
    async fn update_goal(&self, goal: &Goal) -> Result<Goal>;

    // === Level operations ===

    /// Insert a new level.
    async fn create_level(&self, level: &Level) -> Result<LevelId>;

    /// List levels matching the filter, in no particular order.
    async fn filter_levels(&self, filter: &LevelFilter) -> Result<Vec<Level>>;

    /// Replace a level if its version is current.
    async fn update_level(&self, level: &Level) -> Result<Level>;

    /// Remove a level. Only used to undo a half-finished goal creation.
    async fn delete_level(&self, id: LevelId) -> Result<()>;

    // === Progress operations ===

    /// Insert a new progress record.
    async fn create_progress(&self, progress: &UserProgress) -> Result<ProgressId>;

    /// List progress records matching the filter.
    async fn filter_progress(&self, filter: &ProgressFilter) -> Result<Vec<UserProgress>>;

    /// Replace a progress record if its version is current.
    async fn update_progress(&self, progress: &UserProgress) -> Result<UserProgress>;

    // === Lookups ===

    /// Load a goal by ID.
    async fn load_goal(&self, id: GoalId) -> Result<Option<Goal>> {
        Ok(self.filter_goals(&GoalFilter::by_id(id)).await?.into_iter().next())
    }

    /// Load a level by ID.
    async fn load_level(&self, id: LevelId) -> Result<Option<Level>> {
        Ok(self.filter_levels(&LevelFilter::by_id(id)).await?.into_iter().next())
    }

    /// Load the progress record of a user.
    async fn load_progress(&self, user_id: &UserId) -> Result<Option<UserProgress>> {
        let filter = ProgressFilter::by_user(user_id.clone());
        Ok(self.filter_progress(&filter).await?.into_iter().next())
    }
}

/// Check an incoming CAS write against the stored version.
pub(crate) fn check_version(id: &str, stored: u64, incoming: u64) -> Result<()> {
    if stored != incoming {
        return Err(StorageError::VersionConflict {
            id: id.to_string(),
            expected: incoming,
            found: stored,
        });
    }
    Ok(())
}
