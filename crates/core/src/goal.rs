//! Goal model - a long-running objective split into ordered levels.

use serde::{Deserialize, Serialize};
use crate::id::{GoalId, UserId};
use crate::{Category, Time};

/// Allowed number of levels a goal may target.
pub const TARGET_LEVELS_RANGE: std::ops::RangeInclusive<u32> = 1..=100;

/// Target used when the caller does not pick one.
pub const DEFAULT_TARGET_LEVELS: u32 = 10;

/// A goal owned by a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier
    pub id: GoalId,

    /// Owner
    pub user_id: UserId,

    /// Goal title
    pub title: String,

    /// Detailed description
    #[serde(default)]
    pub description: String,

    /// Area of life this goal belongs to
    pub category: Category,

    /// How many levels finish the goal
    pub target_levels: u32,

    /// Number of completed levels
    pub current_level: u32,

    /// Goal status
    pub status: GoalStatus,

    /// Set iff status is `Completed`
    pub completed_date: Option<Time>,

    /// Optimistic concurrency token, bumped by the store on every update
    #[serde(default)]
    pub version: u64,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

impl Goal {
    /// Create a fresh, active goal with no completed levels.
    pub fn new(
        user_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        category: Category,
        target_levels: u32,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: GoalId::new(),
            user_id,
            title: title.into(),
            description: description.into(),
            category,
            target_levels,
            current_level: 0,
            status: GoalStatus::Active,
            completed_date: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the goal has reached its target.
    pub fn is_completed(&self) -> bool {
        self.status == GoalStatus::Completed
    }

    /// Percentage of target levels completed (0-100).
    pub fn percent_complete(&self) -> f32 {
        if self.target_levels == 0 {
            return 0.0;
        }
        (self.current_level as f32 / self.target_levels as f32) * 100.0
    }

    /// The goal as it looks after one more level is completed at `now`.
    pub fn advanced(&self, now: Time) -> Goal {
        let mut next = self.clone();
        next.current_level = self.current_level + 1;
        if next.current_level >= next.target_levels {
            next.current_level = next.target_levels;
            next.status = GoalStatus::Completed;
            next.completed_date = Some(now);
        }
        next.updated_at = now;
        next
    }
}

/// Goal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Goal is being worked on
    Active,
    /// Every target level has been completed
    Completed,
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GoalStatus::Active => write!(f, "active"),
            GoalStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for GoalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(GoalStatus::Active),
            "completed" => Ok(GoalStatus::Completed),
            other => Err(format!("unknown goal status: {other}")),
        }
    }
}

/// Filter for listing goals.
#[derive(Debug, Clone, Default)]
pub struct GoalFilter {
    /// Filter by ID
    pub id: Option<GoalId>,

    /// Filter by owner
    pub user_id: Option<UserId>,

    /// Filter by status
    pub status: Option<GoalStatus>,
}

impl GoalFilter {
    /// Match a single goal.
    pub fn by_id(id: GoalId) -> Self {
        Self { id: Some(id), ..Default::default() }
    }

    /// Match every goal of a user, optionally restricted to one status.
    pub fn by_user(user_id: UserId, status: Option<GoalStatus>) -> Self {
        Self { user_id: Some(user_id), status, ..Default::default() }
    }

    /// Whether `goal` passes the filter.
    pub fn matches(&self, goal: &Goal) -> bool {
        self.id.map_or(true, |id| goal.id == id)
            && self.user_id.as_ref().map_or(true, |u| &goal.user_id == u)
            && self.status.map_or(true, |s| goal.status == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal(target: u32) -> Goal {
        Goal::new(UserId::from("u"), "Run a marathon", "", Category::Health, target)
    }

    #[test]
    fn test_new_goal_is_active_at_zero() {
        let g = goal(10);
        assert_eq!(g.current_level, 0);
        assert_eq!(g.status, GoalStatus::Active);
        assert!(g.completed_date.is_none());
        assert_eq!(g.percent_complete(), 0.0);
    }

    #[test]
    fn test_advanced_completes_at_target() {
        let now = chrono::Utc::now();
        let g = goal(2).advanced(now);
        assert_eq!(g.current_level, 1);
        assert!(!g.is_completed());

        let g = g.advanced(now);
        assert_eq!(g.current_level, 2);
        assert!(g.is_completed());
        assert_eq!(g.completed_date, Some(now));
        assert_eq!(g.percent_complete(), 100.0);
    }

    #[test]
    fn test_filter_matches() {
        let g = goal(3);
        assert!(GoalFilter::default().matches(&g));
        assert!(GoalFilter::by_id(g.id).matches(&g));
        assert!(GoalFilter::by_user(UserId::from("u"), Some(GoalStatus::Active)).matches(&g));
        assert!(!GoalFilter::by_user(UserId::from("u"), Some(GoalStatus::Completed)).matches(&g));
        assert!(!GoalFilter::by_user(UserId::from("other"), None).matches(&g));
    }
}
