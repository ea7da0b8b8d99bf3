//! Store wrapper that injects failures, for exercising rollback paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::Notify;
use questline_core::{
    Goal, GoalFilter, GoalId, Level, LevelFilter, LevelId, ProgressFilter, ProgressId,
    UserProgress,
};
use questline_storage::{EntityStore, MemoryStorage, Result, StorageError};

/// What an armed operation does instead of succeeding.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Fail with a generic store error
    Fail,
    /// Report a lost CAS race
    Conflict,
    /// Hang far longer than any test timeout
    Stall,
    /// Wait for `release`, then succeed
    Pause,
}

struct Plan {
    skip: u32,
    remaining: u32,
    fault: Fault,
}

/// `MemoryStorage` with per-operation fault injection.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStorage,
    plans: Mutex<HashMap<&'static str, Plan>>,
    paused: Notify,
    released: Notify,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `skip` calls of `op` through, then apply `fault` to the next `times`.
    pub fn arm(&self, op: &'static str, skip: u32, times: u32, fault: Fault) {
        self.plans.lock().unwrap().insert(op, Plan { skip, remaining: times, fault });
    }

    /// Wait until a `Pause` fault is holding a call.
    pub async fn wait_paused(&self) {
        self.paused.notified().await;
    }

    /// Let the paused call continue.
    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn check(&self, op: &'static str) -> Result<()> {
        let fault = {
            let mut plans = self.plans.lock().unwrap();
            match plans.get_mut(op) {
                Some(plan) if plan.skip > 0 => {
                    plan.skip -= 1;
                    None
                }
                Some(plan) if plan.remaining > 0 => {
                    plan.remaining -= 1;
                    Some(plan.fault)
                }
                _ => None,
            }
        };
        match fault {
            None => Ok(()),
            Some(Fault::Fail) => Err(StorageError::Other(format!("injected failure in {op}"))),
            Some(Fault::Conflict) => Err(StorageError::VersionConflict {
                id: op.to_string(),
                expected: 0,
                found: 1,
            }),
            Some(Fault::Stall) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            Some(Fault::Pause) => {
                self.paused.notify_one();
                self.released.notified().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn create_goal(&self, goal: &Goal) -> Result<GoalId> {
        self.check("create_goal").await?;
        self.inner.create_goal(goal).await
    }

    async fn filter_goals(&self, filter: &GoalFilter) -> Result<Vec<Goal>> {
        self.check("filter_goals").await?;
        self.inner.filter_goals(filter).await
    }

    async fn update_goal(&self, goal: &Goal) -> Result<Goal> {
        self.check("update_goal").await?;
        self.inner.update_goal(goal).await
    }

    async fn create_level(&self, level: &Level) -> Result<LevelId> {
        self.check("create_level").await?;
        self.inner.create_level(level).await
    }

    async fn filter_levels(&self, filter: &LevelFilter) -> Result<Vec<Level>> {
        self.check("filter_levels").await?;
        self.inner.filter_levels(filter).await
    }

    async fn update_level(&self, level: &Level) -> Result<Level> {
        self.check("update_level").await?;
        self.inner.update_level(level).await
    }

    async fn delete_level(&self, id: LevelId) -> Result<()> {
        self.check("delete_level").await?;
        self.inner.delete_level(id).await
    }

    async fn create_progress(&self, progress: &UserProgress) -> Result<ProgressId> {
        self.check("create_progress").await?;
        self.inner.create_progress(progress).await
    }

    async fn filter_progress(&self, filter: &ProgressFilter) -> Result<Vec<UserProgress>> {
        self.check("filter_progress").await?;
        self.inner.filter_progress(filter).await
    }

    async fn update_progress(&self, progress: &UserProgress) -> Result<UserProgress> {
        self.check("update_progress").await?;
        self.inner.update_progress(progress).await
    }
}
