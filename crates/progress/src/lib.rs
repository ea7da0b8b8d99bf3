//! Goal progression engine
//!
//! Level lifecycle transitions, the goal and user aggregates they drive,
//! read-side projections and reconciliation of derived counters.

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod query;
pub mod reconcile;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, EngineConfig, DEFAULT_LEVEL_REWARD};
pub use engine::{LevelCompletion, NewGoal, ProgressionEngine};
pub use error::{ErrorKind, ProgressError, Result};
pub use locks::ScopeLocks;
pub use query::{GoalDetail, ProgressQuery, UserOverview};
pub use reconcile::{GoalRepair, ProgressRepair, ReconcileReport};
