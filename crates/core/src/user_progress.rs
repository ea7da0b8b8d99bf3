//! Per-user aggregate of experience and completion counters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use crate::id::{ProgressId, UserId};
use crate::Time;

/// Aggregate progress for one user. Exactly one exists per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    /// Unique identifier
    pub id: ProgressId,

    /// Owner, unique across progress records
    pub user_id: UserId,

    /// Name the user picked during onboarding
    pub avatar_name: String,

    /// Experience points; never decreases
    pub xp_points: u64,

    /// Levels completed across all goals
    pub total_levels_completed: u64,

    /// Goals completed
    pub total_goals_completed: u64,

    /// Reserved; nothing in the engine updates it
    #[serde(default)]
    pub streak_count: u32,

    /// Day of the most recent completion
    pub last_active_date: NaiveDate,

    /// Optimistic concurrency token, bumped by the store on every update
    #[serde(default)]
    pub version: u64,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

impl UserProgress {
    /// Fresh record with every counter at zero.
    pub fn new(user_id: UserId, avatar_name: impl Into<String>, today: NaiveDate) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: ProgressId::new(),
            user_id,
            avatar_name: avatar_name.into(),
            xp_points: 0,
            total_levels_completed: 0,
            total_goals_completed: 0,
            streak_count: 0,
            last_active_date: today,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The record after one level completion worth `reward` XP.
    pub fn credited(&self, reward: u64, goal_completed: bool, now: Time) -> UserProgress {
        let mut next = self.clone();
        next.xp_points = self.xp_points.saturating_add(reward);
        next.total_levels_completed = self.total_levels_completed + 1;
        if goal_completed {
            next.total_goals_completed = self.total_goals_completed + 1;
        }
        next.last_active_date = now.date_naive();
        next.updated_at = now;
        next
    }
}

/// Filter for looking up progress records.
#[derive(Debug, Clone, Default)]
pub struct ProgressFilter {
    /// Filter by owner
    pub user_id: Option<UserId>,
}

impl ProgressFilter {
    /// Match the record of one user.
    pub fn by_user(user_id: UserId) -> Self {
        Self { user_id: Some(user_id) }
    }

    /// Whether `progress` passes the filter.
    pub fn matches(&self, progress: &UserProgress) -> bool {
        self.user_id.as_ref().map_or(true, |u| &progress.user_id == u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credited_counts_goal_only_when_completed() {
        let today = chrono::Utc::now().date_naive();
        let progress = UserProgress::new(UserId::from("u"), "Nova", today);
        let now = chrono::Utc::now();

        let once = progress.credited(100, false, now);
        assert_eq!(once.xp_points, 100);
        assert_eq!(once.total_levels_completed, 1);
        assert_eq!(once.total_goals_completed, 0);

        let twice = once.credited(100, true, now);
        assert_eq!(twice.xp_points, 200);
        assert_eq!(twice.total_levels_completed, 2);
        assert_eq!(twice.total_goals_completed, 1);
        assert_eq!(twice.streak_count, 0);
    }
}
