//! questline core data models.
//!
//! This crate defines the three records the progression engine keeps
//! consistent: goals, the levels they are split into, and the per-user
//! progress aggregate.

#![warn(missing_docs)]

// Core identities
mod id;

// Goals and their levels
mod category;
mod goal;
mod level;

// Aggregate progress
mod user_progress;

// Re-exports
pub use id::*;

pub use category::{Category, UnknownCategory};
pub use goal::{Goal, GoalStatus, GoalFilter, TARGET_LEVELS_RANGE, DEFAULT_TARGET_LEVELS};
pub use level::{Level, LevelStatus, LevelFilter};
pub use user_progress::{UserProgress, ProgressFilter};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Calendar date type
pub type Date = chrono::NaiveDate;
