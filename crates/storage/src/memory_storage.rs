//! In-memory storage backend.
//!
//! Useful for tests and for embedding the engine in a process that owns
//! persistence elsewhere.

use std::collections::HashMap;
use async_trait::async_trait;
use questline_core::{
    Goal, GoalFilter, GoalId, Level, LevelFilter, LevelId, ProgressFilter, ProgressId,
    UserProgress,
};
use tokio::sync::RwLock;
use super::trait_::check_version;
use super::{EntityStore, StorageError, Result};

/// In-memory entity store.
#[derive(Default)]
pub struct MemoryStorage {
    goals: RwLock<HashMap<GoalId, Goal>>,
    levels: RwLock<HashMap<LevelId, Level>>,
    progress: RwLock<HashMap<ProgressId, UserProgress>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStorage {
    async fn create_goal(&self, goal: &Goal) -> Result<GoalId> {
        let mut goals = self.goals.write().await;
        if goals.contains_key(&goal.id) {
            return Err(StorageError::AlreadyExists(goal.id.to_string()));
        }
        goals.insert(goal.id, goal.clone());
        Ok(goal.id)
    }

    async fn filter_goals(&self, filter: &GoalFilter) -> Result<Vec<Goal>> {
        let goals = self.goals.read().await;
        Ok(goals.values().filter(|g| filter.matches(g)).cloned().collect())
    }

    async fn update_goal(&self, goal: &Goal) -> Result<Goal> {
        let mut goals = self.goals.write().await;
        let stored = goals
            .get_mut(&goal.id)
            .ok_or_else(|| StorageError::NotFound(goal.id.to_string()))?;
        check_version(&goal.id.to_string(), stored.version, goal.version)?;

        let mut next = goal.clone();
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn create_level(&self, level: &Level) -> Result<LevelId> {
        let mut levels = self.levels.write().await;
        if levels.contains_key(&level.id) {
            return Err(StorageError::AlreadyExists(level.id.to_string()));
        }
        levels.insert(level.id, level.clone());
        Ok(level.id)
    }

    async fn filter_levels(&self, filter: &LevelFilter) -> Result<Vec<Level>> {
        let levels = self.levels.read().await;
        Ok(levels.values().filter(|l| filter.matches(l)).cloned().collect())
    }

    async fn update_level(&self, level: &Level) -> Result<Level> {
        let mut levels = self.levels.write().await;
        let stored = levels
            .get_mut(&level.id)
            .ok_or_else(|| StorageError::NotFound(level.id.to_string()))?;
        check_version(&level.id.to_string(), stored.version, level.version)?;

        let mut next = level.clone();
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn delete_level(&self, id: LevelId) -> Result<()> {
        self.levels.write().await.remove(&id);
        Ok(())
    }

    async fn create_progress(&self, progress: &UserProgress) -> Result<ProgressId> {
        let mut records = self.progress.write().await;
        if records.contains_key(&progress.id) {
            return Err(StorageError::AlreadyExists(progress.id.to_string()));
        }
        records.insert(progress.id, progress.clone());
        Ok(progress.id)
    }

    async fn filter_progress(&self, filter: &ProgressFilter) -> Result<Vec<UserProgress>> {
        let records = self.progress.read().await;
        Ok(records.values().filter(|p| filter.matches(p)).cloned().collect())
    }

    async fn update_progress(&self, progress: &UserProgress) -> Result<UserProgress> {
        let mut records = self.progress.write().await;
        let stored = records
            .get_mut(&progress.id)
            .ok_or_else(|| StorageError::NotFound(progress.id.to_string()))?;
        check_version(&progress.id.to_string(), stored.version, progress.version)?;

        let mut next = progress.clone();
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questline_core::{Category, GoalStatus, LevelStatus, UserId};

    fn test_goal() -> Goal {
        Goal::new(UserId::from("u1"), "Learn Rust", "", Category::Learning, 3)
    }

    #[tokio::test]
    async fn test_goal_create_and_load() {
        let storage = MemoryStorage::new();
        let goal = test_goal();

        let id = storage.create_goal(&goal).await.unwrap();
        assert_eq!(id, goal.id);

        let loaded = storage.load_goal(goal.id).await.unwrap().unwrap();
        assert_eq!(loaded, goal);
        assert!(storage.load_goal(GoalId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let storage = MemoryStorage::new();
        let goal = test_goal();
        storage.create_goal(&goal).await.unwrap();

        let err = storage.create_goal(&goal).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_rejects_stale() {
        let storage = MemoryStorage::new();
        let goal = test_goal();
        storage.create_goal(&goal).await.unwrap();

        let mut changed = goal.clone();
        changed.current_level = 1;
        let stored = storage.update_goal(&changed).await.unwrap();
        assert_eq!(stored.version, 1);

        // Writing from the original snapshot again must lose.
        let err = storage.update_goal(&changed).await.unwrap_err();
        assert!(err.is_conflict());

        let loaded = storage.load_goal(goal.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_level, 1);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage.update_goal(&test_goal()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_level_filter_and_delete() {
        let storage = MemoryStorage::new();
        let goal = test_goal();
        let first = Level::new(goal.id, goal.user_id.clone(), 1, "One", "", LevelStatus::Active);
        let second = Level::new(goal.id, goal.user_id.clone(), 2, "Two", "", LevelStatus::Locked);
        storage.create_level(&first).await.unwrap();
        storage.create_level(&second).await.unwrap();

        let all = storage.filter_levels(&LevelFilter::by_goal(goal.id)).await.unwrap();
        assert_eq!(all.len(), 2);

        storage.delete_level(second.id).await.unwrap();
        let all = storage.filter_levels(&LevelFilter::by_goal(goal.id)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
    }

    #[tokio::test]
    async fn test_goals_filtered_by_user_and_status() {
        let storage = MemoryStorage::new();
        let mut done = test_goal();
        done.status = GoalStatus::Completed;
        storage.create_goal(&done).await.unwrap();
        storage.create_goal(&test_goal()).await.unwrap();

        let filter = GoalFilter::by_user(UserId::from("u1"), Some(GoalStatus::Active));
        assert_eq!(storage.filter_goals(&filter).await.unwrap().len(), 1);

        let filter = GoalFilter::by_user(UserId::from("u1"), None);
        assert_eq!(storage.filter_goals(&filter).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_lookup_by_user() {
        let storage = MemoryStorage::new();
        let user = UserId::from("u1");
        let progress = UserProgress::new(user.clone(), "Nova", chrono::Utc::now().date_naive());
        storage.create_progress(&progress).await.unwrap();

        let loaded = storage.load_progress(&user).await.unwrap().unwrap();
        assert_eq!(loaded.id, progress.id);
        assert!(storage.load_progress(&UserId::from("u2")).await.unwrap().is_none());
    }
}
