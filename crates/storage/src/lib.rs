//! Storage and identity abstractions for questline.
//!
//! This crate provides the entity store the progression engine writes
//! through, with in-memory and JSON file backends, plus the identity
//! provider seam.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_storage;
pub mod json_storage;
pub mod identity;

pub use trait_::{EntityStore, StorageError, Result};
pub use memory_storage::MemoryStorage;
pub use json_storage::JsonStorage;
pub use identity::{IdentityProvider, JsonIdentity, MemoryIdentity, UserPatch, UserProfile};
