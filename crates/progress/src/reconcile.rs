//! Repair of derived counters from level statuses.
//!
//! Level statuses are the source of truth. A goal's `current_level`, status
//! and completion date, and a user's completion totals, are recomputed from
//! them. XP is only ever raised.

use std::collections::HashSet;
use chrono::Utc;
use questline_core::{
    Goal, GoalFilter, GoalId, GoalStatus, LevelFilter, LevelId, LevelStatus, UserId,
};
use serde::Serialize;
use tracing::{debug, info};
use crate::engine::ProgressionEngine;
use crate::error::{ErrorKind, ProgressError, Result};

/// What reconciling one goal changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalRepair {
    /// Goal
    pub goal_id: GoalId,
    /// Counter before
    pub current_level_before: u32,
    /// Counter after
    pub current_level_after: u32,
    /// Status before
    pub status_before: GoalStatus,
    /// Status after
    pub status_after: GoalStatus,
    /// Locked level that was unlocked
    pub activated_level: Option<LevelId>,
}

impl GoalRepair {
    /// Whether anything was written.
    pub fn changed(&self) -> bool {
        self.current_level_before != self.current_level_after
            || self.status_before != self.status_after
            || self.activated_level.is_some()
    }
}

/// What reconciling a user's aggregate changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRepair {
    /// User
    pub user_id: UserId,
    /// Completed levels before
    pub levels_before: u64,
    /// Completed levels after
    pub levels_after: u64,
    /// Completed goals before
    pub goals_before: u64,
    /// Completed goals after
    pub goals_after: u64,
    /// XP before
    pub xp_before: u64,
    /// XP after
    pub xp_after: u64,
}

impl ProgressRepair {
    /// Whether anything was written.
    pub fn changed(&self) -> bool {
        self.levels_before != self.levels_after
            || self.goals_before != self.goals_after
            || self.xp_before != self.xp_after
    }
}

/// Result of reconciling everything a user owns.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Per-goal repairs, including goals left unchanged
    pub goals: Vec<GoalRepair>,
    /// Aggregate repair
    pub progress: ProgressRepair,
}

impl ProgressionEngine {
    /// Recompute a goal's counter and status from its levels.
    ///
    /// Also unlocks the next level when an active goal has none active but a
    /// locked successor of its completed levels exists. Stalled goals stay
    /// stalled.
    pub async fn reconcile_goal(&self, owner: &UserId, goal_id: GoalId) -> Result<GoalRepair> {
        let _scope = self.goal_scopes().acquire(&goal_id).await;
        let goal = self.load_owned_goal(owner, goal_id).await?;
        let levels = self.goal_levels(goal_id).await?;
        let now = Utc::now();

        let completed = levels.iter().filter(|l| l.status == LevelStatus::Completed).count() as u32;
        let mut fixed = goal.clone();
        fixed.current_level = completed.min(goal.target_levels);
        if completed >= goal.target_levels {
            fixed.status = GoalStatus::Completed;
            let last_completion = levels.iter().filter_map(|l| l.completed_date).max();
            fixed.completed_date = goal.completed_date.or(last_completion).or(Some(now));
        } else {
            fixed.status = GoalStatus::Active;
            fixed.completed_date = None;
        }

        let mut repair = GoalRepair {
            goal_id,
            current_level_before: goal.current_level,
            current_level_after: fixed.current_level,
            status_before: goal.status,
            status_after: fixed.status,
            activated_level: None,
        };

        if fixed != goal {
            fixed.updated_at = now;
            self.call("update_goal", self.store().update_goal(&fixed)).await?;
        }

        let has_active = levels.iter().any(|l| l.status == LevelStatus::Active);
        if fixed.status == GoalStatus::Active && !has_active {
            let candidate = levels
                .iter()
                .find(|l| l.status != LevelStatus::Completed)
                .filter(|l| l.status == LevelStatus::Locked && l.level_number == completed + 1);
            if let Some(level) = candidate {
                self.call("update_level", self.store().update_level(&level.activated(now))).await?;
                repair.activated_level = Some(level.id);
            }
        }

        if repair.changed() {
            info!(
                "Reconciled goal {}: level {} -> {}, {} -> {}",
                goal_id,
                repair.current_level_before,
                repair.current_level_after,
                repair.status_before,
                repair.status_after
            );
        } else {
            debug!("Goal {} already consistent", goal_id);
        }
        Ok(repair)
    }

    /// Recompute a user's completion totals from their goals and levels.
    pub async fn reconcile_user(&self, user_id: &UserId) -> Result<ProgressRepair> {
        let _scope = self.user_scopes().acquire(user_id).await;
        let max = self.config().max_conflict_retries.max(1);

        for attempt in 1..=max {
            let progress = self
                .load_progress(user_id)
                .await?
                .ok_or_else(|| ProgressError::ProgressNotFound(user_id.clone()))?;

            let goals: Vec<Goal> = self
                .call("filter_goals", self.store().filter_goals(&GoalFilter::by_user(user_id.clone(), None)))
                .await?;
            let goal_ids: HashSet<GoalId> = goals.iter().map(|g| g.id).collect();
            let completed_filter = LevelFilter {
                user_id: Some(user_id.clone()),
                status: Some(LevelStatus::Completed),
                ..Default::default()
            };
            let levels_done = self
                .call("filter_levels", self.store().filter_levels(&completed_filter))
                .await?
                .into_iter()
                .filter(|l| goal_ids.contains(&l.goal_id))
                .count() as u64;
            let goals_done = goals.iter().filter(|g| g.is_completed()).count() as u64;
            let xp_floor = levels_done.saturating_mul(self.config().level_reward);

            let repair = ProgressRepair {
                user_id: user_id.clone(),
                levels_before: progress.total_levels_completed,
                levels_after: levels_done,
                goals_before: progress.total_goals_completed,
                goals_after: goals_done,
                xp_before: progress.xp_points,
                xp_after: progress.xp_points.max(xp_floor),
            };
            if !repair.changed() {
                debug!("Progress of {} already consistent", user_id);
                return Ok(repair);
            }

            let mut fixed = progress.clone();
            fixed.total_levels_completed = repair.levels_after;
            fixed.total_goals_completed = repair.goals_after;
            fixed.xp_points = repair.xp_after;
            fixed.updated_at = Utc::now();

            match self.call("update_progress", self.store().update_progress(&fixed)).await {
                Ok(_) => {
                    info!(
                        "Reconciled progress of {}: levels {} -> {}, goals {} -> {}, xp {} -> {}",
                        user_id,
                        repair.levels_before,
                        repair.levels_after,
                        repair.goals_before,
                        repair.goals_after,
                        repair.xp_before,
                        repair.xp_after
                    );
                    return Ok(repair);
                }
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!("Reconciling {} conflicted (attempt {})", user_id, attempt);
                }
                Err(e) => return Err(e),
            }
        }
        Err(ProgressError::Conflict { attempts: max })
    }

    /// Reconcile every goal of a user, then the user's aggregate.
    pub async fn reconcile_all(&self, user_id: &UserId) -> Result<ReconcileReport> {
        let goals = self
            .call("filter_goals", self.store().filter_goals(&GoalFilter::by_user(user_id.clone(), None)))
            .await?;

        let mut repairs = Vec::with_capacity(goals.len());
        for goal in goals {
            repairs.push(self.reconcile_goal(user_id, goal.id).await?);
        }
        let progress = self.reconcile_user(user_id).await?;

        Ok(ReconcileReport {
            goals: repairs,
            progress,
        })
    }
}
