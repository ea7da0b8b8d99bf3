//! JSON file storage implementation.
//!
//! Stores each record as a pretty-printed JSON file under `goals/`, `levels/`
//! and `progress/` inside the storage root. Versions live inside the records
//! themselves, so a CAS update is read, compare, write under a per-kind lock.
//! Writes go to a `.tmp` sibling that is renamed into place, so unlocked
//! readers never observe a partially written record.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use questline_core::{
    Goal, GoalFilter, GoalId, Level, LevelFilter, LevelId, ProgressFilter, ProgressId,
    UserProgress,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use super::trait_::check_version;
use super::{EntityStore, StorageError, Result};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    goal_lock: Mutex<()>,
    level_lock: Mutex<()>,
    progress_lock: Mutex<()>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the record directories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("goals")).await?;
        fs::create_dir_all(root.join("levels")).await?;
        fs::create_dir_all(root.join("progress")).await?;

        Ok(Self {
            root,
            goal_lock: Mutex::new(()),
            level_lock: Mutex::new(()),
            progress_lock: Mutex::new(()),
        })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn goal_path(&self, id: GoalId) -> PathBuf {
        self.root.join("goals").join(format!("{}.json", id))
    }
    fn level_path(&self, id: LevelId) -> PathBuf {
        self.root.join("levels").join(format!("{}.json", id))
    }
    fn progress_path(&self, id: ProgressId) -> PathBuf {
        self.root.join("progress").join(format!("{}.json", id))
    }
}

#[async_trait]
impl EntityStore for JsonStorage {
    async fn create_goal(&self, goal: &Goal) -> Result<GoalId> {
        let _guard = self.goal_lock.lock().await;
        create_json(&self.goal_path(goal.id), goal, &goal.id.to_string()).await?;
        Ok(goal.id)
    }

    async fn filter_goals(&self, filter: &GoalFilter) -> Result<Vec<Goal>> {
        if let Some(id) = filter.id {
            let goal: Option<Goal> = read_json(&self.goal_path(id)).await?;
            return Ok(goal.into_iter().filter(|g| filter.matches(g)).collect());
        }
        let all: Vec<Goal> = list_dir(&self.root.join("goals")).await?;
        Ok(all.into_iter().filter(|g| filter.matches(g)).collect())
    }

    async fn update_goal(&self, goal: &Goal) -> Result<Goal> {
        let _guard = self.goal_lock.lock().await;
        let path = self.goal_path(goal.id);
        let stored: Goal = read_json(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(goal.id.to_string()))?;
        check_version(&goal.id.to_string(), stored.version, goal.version)?;

        let mut next = goal.clone();
        next.version = stored.version + 1;
        write_json(&path, &next).await?;
        Ok(next)
    }

    async fn create_level(&self, level: &Level) -> Result<LevelId> {
        let _guard = self.level_lock.lock().await;
        create_json(&self.level_path(level.id), level, &level.id.to_string()).await?;
        Ok(level.id)
    }

    async fn filter_levels(&self, filter: &LevelFilter) -> Result<Vec<Level>> {
        if let Some(id) = filter.id {
            let level: Option<Level> = read_json(&self.level_path(id)).await?;
            return Ok(level.into_iter().filter(|l| filter.matches(l)).collect());
        }
        let all: Vec<Level> = list_dir(&self.root.join("levels")).await?;
        Ok(all.into_iter().filter(|l| filter.matches(l)).collect())
    }

    async fn update_level(&self, level: &Level) -> Result<Level> {
        let _guard = self.level_lock.lock().await;
        let path = self.level_path(level.id);
        let stored: Level = read_json(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(level.id.to_string()))?;
        check_version(&level.id.to_string(), stored.version, level.version)?;

        let mut next = level.clone();
        next.version = stored.version + 1;
        write_json(&path, &next).await?;
        Ok(next)
    }

    async fn delete_level(&self, id: LevelId) -> Result<()> {
        let _guard = self.level_lock.lock().await;
        fs::remove_file(self.level_path(id)).await.or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
        })?;
        Ok(())
    }

    async fn create_progress(&self, progress: &UserProgress) -> Result<ProgressId> {
        let _guard = self.progress_lock.lock().await;
        create_json(&self.progress_path(progress.id), progress, &progress.id.to_string()).await?;
        Ok(progress.id)
    }

    async fn filter_progress(&self, filter: &ProgressFilter) -> Result<Vec<UserProgress>> {
        let all: Vec<UserProgress> = list_dir(&self.root.join("progress")).await?;
        Ok(all.into_iter().filter(|p| filter.matches(p)).collect())
    }

    async fn update_progress(&self, progress: &UserProgress) -> Result<UserProgress> {
        let _guard = self.progress_lock.lock().await;
        let path = self.progress_path(progress.id);
        let stored: UserProgress = read_json(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(progress.id.to_string()))?;
        check_version(&progress.id.to_string(), stored.version, progress.version)?;

        let mut next = progress.clone();
        next.version = stored.version + 1;
        write_json(&path, &next).await?;
        Ok(next)
    }
}

async fn create_json<T: Serialize>(path: &Path, value: &T, id: &str) -> Result<()> {
    if fs::try_exists(path).await? {
        return Err(StorageError::AlreadyExists(id.to_string()));
    }
    write_json(path, value).await
}

/// Replace `path` atomically: readers see either the old or the new record.
pub(crate) async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json.as_bytes()).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    debug!("Wrote {}", path.display());
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable record {}: {}", entry.path().display(), e),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use questline_core::{Category, LevelStatus, UserId};

    #[tokio::test]
    async fn test_goal_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let goal = Goal::new(UserId::from("u1"), "Save money", "", Category::Finance, 5);

        storage.create_goal(&goal).await.unwrap();
        assert!(dir.path().join("goals").join(format!("{}.json", goal.id)).exists());

        // A second handle on the same directory sees the record.
        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        let loaded = reopened.load_goal(goal.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Save money");
        assert_eq!(loaded.category, Category::Finance);
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let level = Level::new(GoalId::new(), UserId::from("u1"), 1, "One", "", LevelStatus::Active);
        storage.create_level(&level).await.unwrap();

        let done = level.completed(chrono::Utc::now(), None);
        let stored = storage.update_level(&done).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, LevelStatus::Completed);

        let err = storage.update_level(&done).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_duplicate_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let level = Level::new(GoalId::new(), UserId::from("u1"), 1, "One", "", LevelStatus::Active);

        storage.create_level(&level).await.unwrap();
        assert!(matches!(
            storage.create_level(&level).await.unwrap_err(),
            StorageError::AlreadyExists(_)
        ));

        storage.delete_level(level.id).await.unwrap();
        assert!(storage.load_level(level.id).await.unwrap().is_none());
        // Deleting twice is fine.
        storage.delete_level(level.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_filter_by_user() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let today = chrono::Utc::now().date_naive();
        storage.create_progress(&UserProgress::new(UserId::from("a"), "A", today)).await.unwrap();
        storage.create_progress(&UserProgress::new(UserId::from("b"), "B", today)).await.unwrap();

        let b = storage.load_progress(&UserId::from("b")).await.unwrap().unwrap();
        assert_eq!(b.avatar_name, "B");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_miss_a_record_being_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let storage = std::sync::Arc::new(JsonStorage::new(dir.path()).await.unwrap());
        let goal_id = GoalId::new();
        let big = "x".repeat(200 * 1024);
        let level = Level::new(goal_id, UserId::from("u1"), 1, "One", big.clone(), LevelStatus::Active);
        storage.create_level(&level).await.unwrap();

        let writer = {
            let storage = storage.clone();
            tokio::spawn(async move {
                let mut current = level;
                for i in 0..100 {
                    current.description = format!("{big}{i}");
                    current = storage.update_level(&current).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let storage = storage.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let found = storage.filter_levels(&LevelFilter::by_goal(goal_id)).await.unwrap();
                    assert_eq!(found.len(), 1);
                    assert!(storage.load_level(found[0].id).await.unwrap().is_some());
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("levels"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
