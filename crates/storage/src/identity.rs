//! Identity provider abstraction.
//!
//! The progression engine only needs to know who the caller is and to flip
//! the `onboarding_completed` flag once a progress record exists.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use questline_core::UserId;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use super::json_storage::write_json;
use super::Result;

/// Profile fields the engine reads from the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier
    pub id: UserId,

    /// Avatar name chosen during onboarding
    #[serde(default)]
    pub avatar_name: Option<String>,

    /// Whether onboarding has been completed
    #[serde(default)]
    pub onboarding_completed: bool,
}

impl UserProfile {
    /// A profile that has not been onboarded yet.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            avatar_name: None,
            onboarding_completed: false,
        }
    }
}

/// Partial update of the current user's profile.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    /// New avatar name
    pub avatar_name: Option<String>,

    /// New onboarding flag
    pub onboarding_completed: Option<bool>,
}

impl UserPatch {
    fn apply(&self, profile: &mut UserProfile) {
        if let Some(name) = &self.avatar_name {
            profile.avatar_name = Some(name.clone());
        }
        if let Some(done) = self.onboarding_completed {
            profile.onboarding_completed = done;
        }
    }
}

/// Source of the authenticated user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The user on whose behalf operations run.
    async fn current_user(&self) -> Result<UserProfile>;

    /// Apply a partial update to the current user's profile.
    async fn update_current_user(&self, patch: UserPatch) -> Result<UserProfile>;
}

/// Identity held in memory.
pub struct MemoryIdentity {
    profile: Mutex<UserProfile>,
}

impl MemoryIdentity {
    /// Identity for `user_id`, not yet onboarded.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            profile: Mutex::new(UserProfile::new(user_id.into())),
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn current_user(&self) -> Result<UserProfile> {
        Ok(self.profile.lock().await.clone())
    }

    async fn update_current_user(&self, patch: UserPatch) -> Result<UserProfile> {
        let mut profile = self.profile.lock().await;
        patch.apply(&mut profile);
        Ok(profile.clone())
    }
}

/// Identity persisted as `user.json` in a data directory.
///
/// The first access generates a fresh user id.
pub struct JsonIdentity {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonIdentity {
    /// Identity stored under `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;
        Ok(Self {
            path: root.join("user.json"),
            lock: Mutex::new(()),
        })
    }

    async fn load_or_create(&self) -> Result<UserProfile> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let profile = UserProfile::new(UserId::new(ulid::Ulid::new().to_string()));
                self.save(&profile).await?;
                tracing::info!("Created local user {}", profile.id);
                Ok(profile)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, profile: &UserProfile) -> Result<()> {
        write_json(&self.path, profile).await
    }
}

#[async_trait]
impl IdentityProvider for JsonIdentity {
    async fn current_user(&self) -> Result<UserProfile> {
        let _guard = self.lock.lock().await;
        self.load_or_create().await
    }

    async fn update_current_user(&self, patch: UserPatch) -> Result<UserProfile> {
        let _guard = self.lock.lock().await;
        let mut profile = self.load_or_create().await?;
        patch.apply(&mut profile);
        self.save(&profile).await?;
        Ok(profile)
    }
}
