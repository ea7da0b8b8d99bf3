//! Read-side projections over goals, levels and progress.
//!
//! Nothing here writes. Every call reads straight from the store, so results
//! reflect the latest committed state and are safe to run alongside writes.

use std::sync::Arc;
use std::time::Duration;
use questline_core::{
    Goal, GoalFilter, GoalId, GoalStatus, Level, LevelFilter, LevelStatus, UserId, UserProgress,
};
use questline_storage::EntityStore;
use serde::Serialize;
use tracing::warn;
use crate::error::{bounded, ProgressError, Result};

/// A goal together with its levels, as a goal page renders it.
#[derive(Debug, Clone, Serialize)]
pub struct GoalDetail {
    /// The goal
    pub goal: Goal,
    /// Levels ordered by number
    pub levels: Vec<Level>,
    /// The level being worked on, if any
    pub active_level: Option<Level>,
    /// Number of completed levels
    pub completed_levels: usize,
    /// Percentage of target reached
    pub percent_complete: f32,
}

impl GoalDetail {
    /// An active goal with no active level waits for a new level to be added.
    pub fn is_stalled(&self) -> bool {
        self.goal.status == GoalStatus::Active && self.active_level.is_none()
    }
}

/// Everything a dashboard shows for one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserOverview {
    /// The aggregate record
    pub progress: UserProgress,
    /// Goals still in progress
    pub active_goals: Vec<Goal>,
    /// Goals already finished
    pub completed_goals: Vec<Goal>,
}

/// Query façade over an entity store.
#[derive(Clone)]
pub struct ProgressQuery {
    store: Arc<dyn EntityStore>,
    timeout: Duration,
}

impl ProgressQuery {
    /// Create a query façade.
    pub fn new(store: Arc<dyn EntityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// The unique active level of a goal, or none for completed and stalled goals.
    pub async fn active_level(&self, goal_id: GoalId) -> Result<Option<Level>> {
        let filter = LevelFilter {
            goal_id: Some(goal_id),
            status: Some(LevelStatus::Active),
            ..Default::default()
        };
        let mut active = bounded(self.timeout, "filter_levels", self.store.filter_levels(&filter)).await?;
        if active.len() > 1 {
            warn!("Goal {} has {} active levels", goal_id, active.len());
        }
        active.sort_by_key(|l| l.level_number);
        Ok(active.into_iter().next())
    }

    /// Levels of a goal ordered by level number.
    pub async fn sorted_levels(&self, goal_id: GoalId) -> Result<Vec<Level>> {
        let filter = LevelFilter::by_goal(goal_id);
        let mut levels = bounded(self.timeout, "filter_levels", self.store.filter_levels(&filter)).await?;
        levels.sort_by_key(|l| l.level_number);
        Ok(levels)
    }

    /// Goals of a user, oldest first, optionally restricted to one status.
    pub async fn goals_by_user(&self, user_id: &UserId, status: Option<GoalStatus>) -> Result<Vec<Goal>> {
        let filter = GoalFilter::by_user(user_id.clone(), status);
        let mut goals = bounded(self.timeout, "filter_goals", self.store.filter_goals(&filter)).await?;
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(goals)
    }

    /// Load a single goal.
    pub async fn goal(&self, goal_id: GoalId) -> Result<Goal> {
        bounded(self.timeout, "load_goal", self.store.load_goal(goal_id))
            .await?
            .ok_or(ProgressError::GoalNotFound(goal_id))
    }

    /// A goal with its ordered levels and derived figures.
    pub async fn goal_detail(&self, goal_id: GoalId) -> Result<GoalDetail> {
        let goal = self.goal(goal_id).await?;
        let levels = self.sorted_levels(goal_id).await?;
        let active_level = levels.iter().find(|l| l.status == LevelStatus::Active).cloned();
        let completed_levels = levels.iter().filter(|l| l.status == LevelStatus::Completed).count();
        let percent_complete = goal.percent_complete();

        Ok(GoalDetail {
            goal,
            levels,
            active_level,
            completed_levels,
            percent_complete,
        })
    }

    /// The aggregate record of a user, if onboarding happened.
    pub async fn user_progress(&self, user_id: &UserId) -> Result<Option<UserProgress>> {
        bounded(self.timeout, "load_progress", self.store.load_progress(user_id)).await
    }

    /// Progress record plus goals split by status.
    pub async fn user_overview(&self, user_id: &UserId) -> Result<UserOverview> {
        let progress = self
            .user_progress(user_id)
            .await?
            .ok_or_else(|| ProgressError::ProgressNotFound(user_id.clone()))?;
        let (completed_goals, active_goals) = self
            .goals_by_user(user_id, None)
            .await?
            .into_iter()
            .partition(|g| g.status == GoalStatus::Completed);

        Ok(UserOverview {
            progress,
            active_goals,
            completed_goals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questline_core::Category;
    use questline_storage::MemoryStorage;

    async fn seeded() -> (ProgressQuery, Goal) {
        let store = Arc::new(MemoryStorage::new());
        let goal = Goal::new(UserId::from("u1"), "Read books", "", Category::Learning, 5);
        store.create_goal(&goal).await.unwrap();

        // Created out of order on purpose.
        for (number, status) in [(3, LevelStatus::Locked), (1, LevelStatus::Completed), (2, LevelStatus::Active)] {
            let level = Level::new(goal.id, goal.user_id.clone(), number, format!("Level {number}"), "", status);
            store.create_level(&level).await.unwrap();
        }

        (ProgressQuery::new(store, Duration::from_secs(1)), goal)
    }

    #[tokio::test]
    async fn test_sorted_levels_orders_by_number() {
        let (query, goal) = seeded().await;
        let numbers: Vec<u32> = query
            .sorted_levels(goal.id)
            .await
            .unwrap()
            .iter()
            .map(|l| l.level_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_active_level() {
        let (query, goal) = seeded().await;
        let active = query.active_level(goal.id).await.unwrap().unwrap();
        assert_eq!(active.level_number, 2);

        assert!(query.active_level(GoalId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_goal_detail() {
        let (query, goal) = seeded().await;
        let detail = query.goal_detail(goal.id).await.unwrap();
        assert_eq!(detail.levels.len(), 3);
        assert_eq!(detail.completed_levels, 1);
        assert!(!detail.is_stalled());
        assert_eq!(detail.active_level.map(|l| l.level_number), Some(2));
    }

    #[tokio::test]
    async fn test_missing_goal() {
        let (query, _) = seeded().await;
        let err = query.goal_detail(GoalId::new()).await.unwrap_err();
        assert!(matches!(err, ProgressError::GoalNotFound(_)));
    }

    #[tokio::test]
    async fn test_overview_requires_progress() {
        let (query, _) = seeded().await;
        let err = query.user_overview(&UserId::from("u1")).await.unwrap_err();
        assert!(matches!(err, ProgressError::ProgressNotFound(_)));
    }
}
