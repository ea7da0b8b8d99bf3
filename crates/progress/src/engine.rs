//! The progression engine - applies level/goal/progress transitions.
//!
//! The store has no cross-record transactions, so the engine provides them:
//! ```text
//! goal scope lock -> fresh read -> validate -> journaled writes -> rollback on failure
//! ```
//! Progress aggregates are shared across goals and use compare-and-swap with
//! bounded retry instead of a lock.

use std::sync::Arc;
use chrono::Utc;
use questline_core::{
    Category, Goal, GoalId, Level, LevelFilter, LevelId, LevelStatus, Time, UserId,
    UserProgress, TARGET_LEVELS_RANGE,
};
use questline_storage::{EntityStore, IdentityProvider, UserPatch};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use crate::config::EngineConfig;
use crate::error::{bounded, ErrorKind, ProgressError, Result};
use crate::locks::ScopeLocks;
use crate::query::ProgressQuery;

/// Input for creating a goal.
#[derive(Debug, Clone)]
pub struct NewGoal {
    /// Goal title, must not be blank
    pub title: String,
    /// Optional description
    pub description: Option<String>,
    /// Category
    pub category: Category,
    /// Number of levels that finish the goal (1-100)
    pub target_levels: u32,
    /// Title of the first level; configured default when absent
    pub first_level_title: Option<String>,
    /// Description of the first level; configured default when absent
    pub first_level_description: Option<String>,
}

impl NewGoal {
    /// Goal with default first level.
    pub fn new(title: impl Into<String>, category: Category, target_levels: u32) -> Self {
        Self {
            title: title.into(),
            description: None,
            category,
            target_levels,
            first_level_title: None,
            first_level_description: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of completing a level.
#[derive(Debug, Clone, Serialize)]
pub struct LevelCompletion {
    /// The goal after the transition
    pub goal: Goal,
    /// The completed level
    pub level: Level,
    /// The level that follows, if one exists
    pub next_level: Option<Level>,
    /// XP this completion earned. On a replay this is the currently
    /// configured reward, reported for display only; nothing is credited.
    pub xp_awarded: u64,
    /// Whether this completion finished the goal
    pub goal_completed: bool,
    /// True when the level had already been completed and nothing was written
    pub replayed: bool,
}

/// A write that has been applied and how to take it back.
enum Undo {
    Level(Level),
    Goal(Goal),
}

/// The progression engine.
pub struct ProgressionEngine {
    store: Arc<dyn EntityStore>,
    identity: Arc<dyn IdentityProvider>,
    config: EngineConfig,
    goal_scopes: ScopeLocks<GoalId>,
    user_scopes: ScopeLocks<UserId>,
}

impl ProgressionEngine {
    /// Create a new engine over a store and identity provider.
    pub fn new(store: Arc<dyn EntityStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            config: EngineConfig::default(),
            goal_scopes: ScopeLocks::new(),
            user_scopes: ScopeLocks::new(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-side façade over the same store.
    pub fn query(&self) -> ProgressQuery {
        ProgressQuery::new(self.store.clone(), self.config.store_timeout())
    }

    pub(crate) fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub(crate) fn goal_scopes(&self) -> &ScopeLocks<GoalId> {
        &self.goal_scopes
    }

    pub(crate) fn user_scopes(&self) -> &ScopeLocks<UserId> {
        &self.user_scopes
    }

    // === Bootstrap ===

    /// Create the progress record for `user_id` with all counters at zero.
    ///
    /// When `user_id` is the identity provider's current user, its
    /// `onboarding_completed` flag is set as well.
    pub async fn initialize_user(&self, user_id: &UserId, avatar_name: &str) -> Result<UserProgress> {
        let avatar_name = avatar_name.trim();
        if avatar_name.is_empty() {
            return Err(ProgressError::EmptyAvatarName);
        }

        let progress = {
            let _scope = self.user_scopes.acquire(user_id).await;
            if self.load_progress(user_id).await?.is_some() {
                return Err(ProgressError::AlreadyInitialized(user_id.clone()));
            }

            let progress = UserProgress::new(user_id.clone(), avatar_name, Utc::now().date_naive());
            self.call("create_progress", self.store.create_progress(&progress)).await?;
            progress
        };
        info!("Initialized progress for user {} ({})", user_id, avatar_name);

        let current = self.call("current_user", self.identity.current_user()).await?;
        if &current.id == user_id {
            self.mark_onboarded(avatar_name).await?;
        }

        Ok(progress)
    }

    /// Onboard the identity provider's current user.
    ///
    /// Safe to retry: if the progress record already exists but the profile
    /// flag was never set, the flag is set and the existing record returned.
    pub async fn onboard(&self, avatar_name: &str) -> Result<UserProgress> {
        let user = self.call("current_user", self.identity.current_user()).await?;
        match self.initialize_user(&user.id, avatar_name).await {
            Err(ProgressError::AlreadyInitialized(_)) if !user.onboarding_completed => {
                let progress = self
                    .load_progress(&user.id)
                    .await?
                    .ok_or_else(|| ProgressError::ProgressNotFound(user.id.clone()))?;
                warn!("User {} had progress but no onboarding flag; setting it", user.id);
                self.mark_onboarded(&progress.avatar_name).await?;
                Ok(progress)
            }
            other => other,
        }
    }

    async fn mark_onboarded(&self, avatar_name: &str) -> Result<()> {
        let patch = UserPatch {
            avatar_name: Some(avatar_name.to_string()),
            onboarding_completed: Some(true),
        };
        self.call("update_current_user", self.identity.update_current_user(patch)).await?;
        Ok(())
    }

    // === Goals and levels ===

    /// Create a goal together with its first, active level.
    ///
    /// The level is written first so the goal is never visible without it;
    /// if the goal write fails the level is removed again.
    pub async fn create_goal(&self, owner: &UserId, spec: NewGoal) -> Result<Goal> {
        let title = spec.title.trim();
        if title.is_empty() {
            return Err(ProgressError::EmptyTitle);
        }
        if !TARGET_LEVELS_RANGE.contains(&spec.target_levels) {
            return Err(ProgressError::InvalidTarget(spec.target_levels));
        }

        let goal = Goal::new(
            owner.clone(),
            title,
            spec.description.unwrap_or_default(),
            spec.category,
            spec.target_levels,
        );
        let seed_title = spec
            .first_level_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.config.seed_level_title.clone());
        let seed_description = spec
            .first_level_description
            .unwrap_or_else(|| self.config.seed_level_description.clone());
        let seed = Level::new(goal.id, owner.clone(), 1, seed_title, seed_description, LevelStatus::Active);

        if let Err(e) = self.call("create_level", self.store.create_level(&seed)).await {
            warn!("Seed level for goal {} failed: {}", goal.id, e);
            return Err(ProgressError::SeedLevelFailed(Box::new(e)));
        }

        if let Err(e) = self.call("create_goal", self.store.create_goal(&goal)).await {
            warn!("Goal {} could not be written, removing its seed level: {}", goal.id, e);
            if let Err(cleanup) = self.call("delete_level", self.store.delete_level(seed.id)).await {
                error!("Orphan seed level {} of missing goal {} left behind: {}", seed.id, goal.id, cleanup);
            }
            return Err(e);
        }

        info!("Created goal {} '{}' with {} target levels", goal.id, goal.title, goal.target_levels);
        Ok(goal)
    }

    /// Append a level to an active goal.
    ///
    /// The new level is locked, unless the goal is stalled (every existing
    /// level completed), in which case it becomes the active level.
    pub async fn add_level(
        &self,
        owner: &UserId,
        goal_id: GoalId,
        title: &str,
        description: Option<&str>,
    ) -> Result<Level> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ProgressError::EmptyTitle);
        }

        let _scope = self.goal_scopes.acquire(&goal_id).await;
        let goal = self.load_owned_goal(owner, goal_id).await?;
        if goal.is_completed() {
            return Err(ProgressError::GoalAlreadyCompleted(goal_id));
        }

        let levels = self.goal_levels(goal_id).await?;
        let last_number = levels.iter().map(|l| l.level_number).max().unwrap_or(0);
        if last_number >= goal.target_levels {
            return Err(ProgressError::LevelLimitReached {
                goal_id,
                target_levels: goal.target_levels,
            });
        }

        let stalled = levels.iter().all(|l| l.status == LevelStatus::Completed);
        let status = if stalled { LevelStatus::Active } else { LevelStatus::Locked };
        let level = Level::new(
            goal_id,
            owner.clone(),
            last_number + 1,
            title,
            description.unwrap_or_default(),
            status,
        );
        self.call("create_level", self.store.create_level(&level)).await?;

        info!("Added level {} to goal {} as {}", level.level_number, goal_id, level.status);
        Ok(level)
    }

    /// Complete the active level `level_id`.
    ///
    /// Completing an already completed level is a no-op that reports the
    /// earlier result with `replayed` set. Lost write races are retried up to
    /// `max_conflict_retries` times.
    pub async fn complete_level(
        &self,
        owner: &UserId,
        level_id: LevelId,
        notes: Option<String>,
    ) -> Result<LevelCompletion> {
        let max = self.config.max_conflict_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_complete_level(owner, level_id, notes.clone()).await {
                Err(e) if e.kind() == ErrorKind::Conflict && attempt < max => {
                    debug!("Completing level {} lost a race (attempt {}): {}", level_id, attempt, e);
                }
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    warn!("Giving up on level {} after {} attempts", level_id, attempt);
                    return Err(ProgressError::Conflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    async fn try_complete_level(
        &self,
        owner: &UserId,
        level_id: LevelId,
        notes: Option<String>,
    ) -> Result<LevelCompletion> {
        let level = self.load_owned_level(owner, level_id).await?;

        let _scope = self.goal_scopes.acquire(&level.goal_id).await;
        // Re-read: another completion may have finished while we waited.
        let level = self.load_owned_level(owner, level_id).await?;
        let goal = self.load_owned_goal(owner, level.goal_id).await?;
        let levels = self.goal_levels(goal.id).await?;
        check_counter(&goal, &levels)?;

        match level.status {
            LevelStatus::Completed => return Ok(self.replay(goal, level, &levels)),
            LevelStatus::Locked => return Err(ProgressError::LevelNotActive(level_id)),
            LevelStatus::Active => {}
        }
        if goal.is_completed() {
            return Err(ProgressError::GoalAlreadyCompleted(goal.id));
        }

        // Lock order: goal, then user. Held until the credit or rollback is done.
        let _user_scope = self.user_scopes.acquire(owner).await;
        let progress = self
            .load_progress(owner)
            .await?
            .ok_or_else(|| ProgressError::ProgressNotFound(owner.clone()))?;
        let next = levels
            .iter()
            .find(|l| l.level_number == level.level_number + 1)
            .cloned();

        let now = Utc::now();
        let mut journal = Vec::new();

        let stored_level = self
            .call("update_level", self.store.update_level(&level.completed(now, notes)))
            .await?;
        journal.push(Undo::Level(Level { version: stored_level.version, ..level.clone() }));

        let stored_goal = match self.call("update_goal", self.store.update_goal(&goal.advanced(now))).await {
            Ok(g) => g,
            Err(e) => return Err(self.rollback(journal, goal.id, e).await),
        };
        journal.push(Undo::Goal(Goal { version: stored_goal.version, ..goal.clone() }));
        let goal_completed = stored_goal.is_completed();

        let next_level = match next {
            Some(next) if next.status == LevelStatus::Locked && !goal_completed => {
                match self.call("update_level", self.store.update_level(&next.activated(now))).await {
                    Ok(activated) => {
                        journal.push(Undo::Level(Level { version: activated.version, ..next }));
                        Some(activated)
                    }
                    Err(e) => return Err(self.rollback(journal, goal.id, e).await),
                }
            }
            other => other,
        };

        if let Err(e) = self.credit(owner, progress, goal_completed, now).await {
            return Err(self.rollback(journal, goal.id, e).await);
        }

        if goal_completed {
            info!("Goal {} completed with level {}", goal.id, level.level_number);
        } else if next_level.is_none() {
            info!("Goal {} is stalled after level {}; add a level to continue", goal.id, level.level_number);
        }
        info!(
            "Completed level {} of goal {} (+{} XP)",
            stored_level.level_number, goal.id, self.config.level_reward
        );

        Ok(LevelCompletion {
            goal: stored_goal,
            level: stored_level,
            next_level,
            xp_awarded: self.config.level_reward,
            goal_completed,
            replayed: false,
        })
    }

    /// Result for an already completed level. `xp_awarded` is informational.
    fn replay(&self, goal: Goal, level: Level, levels: &[Level]) -> LevelCompletion {
        debug!("Level {} already completed; replaying result", level.id);
        let next_level = levels
            .iter()
            .find(|l| l.level_number == level.level_number + 1)
            .cloned();
        let goal_completed = goal.is_completed() && level.level_number == goal.target_levels;

        LevelCompletion {
            goal,
            level,
            next_level,
            xp_awarded: self.config.level_reward,
            goal_completed,
            replayed: true,
        }
    }

    /// Add one level's reward to the user's aggregate, re-reading on conflict.
    async fn credit(
        &self,
        owner: &UserId,
        mut current: UserProgress,
        goal_completed: bool,
        now: Time,
    ) -> Result<UserProgress> {
        let max = self.config.max_conflict_retries.max(1);
        for attempt in 1..=max {
            let next = current.credited(self.config.level_reward, goal_completed, now);
            match self.call("update_progress", self.store.update_progress(&next)).await {
                Ok(stored) => return Ok(stored),
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!("Progress update for {} conflicted (attempt {})", owner, attempt);
                    current = self
                        .load_progress(owner)
                        .await?
                        .ok_or_else(|| ProgressError::ProgressNotFound(owner.clone()))?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ProgressError::Conflict { attempts: max })
    }

    /// Undo applied writes newest first; returns the error to report.
    async fn rollback(&self, journal: Vec<Undo>, goal_id: GoalId, cause: ProgressError) -> ProgressError {
        warn!("Rolling back {} write(s) on goal {}: {}", journal.len(), goal_id, cause);
        for undo in journal.into_iter().rev() {
            let undone = match &undo {
                Undo::Level(level) => self
                    .call("update_level", self.store.update_level(level))
                    .await
                    .map(drop),
                Undo::Goal(goal) => self
                    .call("update_goal", self.store.update_goal(goal))
                    .await
                    .map(drop),
            };
            if let Err(e) = undone {
                error!("Rollback on goal {} failed, records need reconciliation: {}", goal_id, e);
                return ProgressError::InconsistentProgressState {
                    goal_id,
                    detail: format!("{cause}; rollback failed: {e}"),
                };
            }
        }
        cause
    }

    // === Shared reads ===

    pub(crate) async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = questline_storage::Result<T>>,
    {
        bounded(self.config.store_timeout(), op, fut).await
    }

    pub(crate) async fn load_progress(&self, user_id: &UserId) -> Result<Option<UserProgress>> {
        self.call("load_progress", self.store.load_progress(user_id)).await
    }

    pub(crate) async fn goal_levels(&self, goal_id: GoalId) -> Result<Vec<Level>> {
        let mut levels = self
            .call("filter_levels", self.store.filter_levels(&LevelFilter::by_goal(goal_id)))
            .await?;
        levels.sort_by_key(|l| l.level_number);
        Ok(levels)
    }

    pub(crate) async fn load_owned_goal(&self, owner: &UserId, goal_id: GoalId) -> Result<Goal> {
        let goal = self
            .call("load_goal", self.store.load_goal(goal_id))
            .await?
            .ok_or(ProgressError::GoalNotFound(goal_id))?;
        if &goal.user_id != owner {
            return Err(ProgressError::GoalNotOwned(goal_id));
        }
        Ok(goal)
    }

    async fn load_owned_level(&self, owner: &UserId, level_id: LevelId) -> Result<Level> {
        let level = self
            .call("load_level", self.store.load_level(level_id))
            .await?
            .ok_or(ProgressError::LevelNotFound(level_id))?;
        if &level.user_id != owner {
            return Err(ProgressError::LevelNotOwned(level_id));
        }
        Ok(level)
    }
}

/// The goal's counter must match its completed levels before anything is built on it.
fn check_counter(goal: &Goal, levels: &[Level]) -> Result<()> {
    let completed = levels.iter().filter(|l| l.status == LevelStatus::Completed).count();
    if completed as u32 != goal.current_level {
        error!(
            "Goal {} records current_level {} but has {} completed levels",
            goal.id, goal.current_level, completed
        );
        return Err(ProgressError::InconsistentProgressState {
            goal_id: goal.id,
            detail: format!(
                "current_level is {} but {} levels are completed",
                goal.current_level, completed
            ),
        });
    }
    Ok(())
}
