//! Level model - one milestone within a goal.

use serde::{Deserialize, Serialize};
use crate::id::{GoalId, LevelId, UserId};
use crate::Time;

/// A level is the unit of progress inside a goal.
///
/// Levels are numbered contiguously from 1 in append order and move through
/// `Locked -> Active -> Completed`, never backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Unique identifier
    pub id: LevelId,

    /// Owning goal
    pub goal_id: GoalId,

    /// Owner (same as the goal's owner)
    pub user_id: UserId,

    /// Position within the goal, starting at 1
    pub level_number: u32,

    /// Level title
    pub title: String,

    /// Detailed description
    #[serde(default)]
    pub description: String,

    /// Lifecycle status
    pub status: LevelStatus,

    /// When the level was completed
    pub completed_date: Option<Time>,

    /// Free text recorded on completion
    pub notes: Option<String>,

    /// Optimistic concurrency token, bumped by the store on every update
    #[serde(default)]
    pub version: u64,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

impl Level {
    /// Create a level for `goal_id`.
    pub fn new(
        goal_id: GoalId,
        user_id: UserId,
        level_number: u32,
        title: impl Into<String>,
        description: impl Into<String>,
        status: LevelStatus,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: LevelId::new(),
            goal_id,
            user_id,
            level_number,
            title: title.into(),
            description: description.into(),
            status,
            completed_date: None,
            notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The level as it looks once completed at `now`.
    pub fn completed(&self, now: Time, notes: Option<String>) -> Level {
        let mut next = self.clone();
        next.status = LevelStatus::Completed;
        next.completed_date = Some(now);
        next.notes = notes;
        next.updated_at = now;
        next
    }

    /// The level as it looks once unlocked at `now`.
    pub fn activated(&self, now: Time) -> Level {
        let mut next = self.clone();
        next.status = LevelStatus::Active;
        next.updated_at = now;
        next
    }
}

/// Level lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    /// Waiting for the previous level
    Locked,
    /// The level currently being worked on
    Active,
    /// Done
    Completed,
}

impl std::fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelStatus::Locked => write!(f, "locked"),
            LevelStatus::Active => write!(f, "active"),
            LevelStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Filter for listing levels.
#[derive(Debug, Clone, Default)]
pub struct LevelFilter {
    /// Filter by ID
    pub id: Option<LevelId>,

    /// Filter by owning goal
    pub goal_id: Option<GoalId>,

    /// Filter by owner
    pub user_id: Option<UserId>,

    /// Filter by status
    pub status: Option<LevelStatus>,

    /// Filter by position
    pub level_number: Option<u32>,
}

impl LevelFilter {
    /// Match a single level.
    pub fn by_id(id: LevelId) -> Self {
        Self { id: Some(id), ..Default::default() }
    }

    /// Match every level of a goal.
    pub fn by_goal(goal_id: GoalId) -> Self {
        Self { goal_id: Some(goal_id), ..Default::default() }
    }

    /// Whether `level` passes the filter.
    pub fn matches(&self, level: &Level) -> bool {
        self.id.map_or(true, |id| level.id == id)
            && self.goal_id.map_or(true, |g| level.goal_id == g)
            && self.user_id.as_ref().map_or(true, |u| &level.user_id == u)
            && self.status.map_or(true, |s| level.status == s)
            && self.level_number.map_or(true, |n| level.level_number == n)
    }
}
