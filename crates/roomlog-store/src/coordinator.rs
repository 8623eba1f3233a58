//! # Atomic Update Coordinator
//!
//! Every write to a room goes through [`Coordinator::update`]:
//!
//! 1. take the in-process lock for the room
//! 2. create the room file if it is missing (never clobbers), then take the
//!    cross-process file lock
//! 3. reload the room from disk
//! 4. apply the mutations
//! 5. enforce retention
//! 6. check the file lock is still ours, then save
//! 7. release both locks (on every path, including errors)
//!
//! The file lock in step 2 is the linearization point; step 3 guarantees no
//! mutation is ever applied to a stale snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use roomlog_config::path::compute_room_id;
use roomlog_config::{log_store_debug, Config};
use tracing::instrument;

use crate::error::{Result, RoomError};
use crate::file_lock::{self, LockOptions};
use crate::model::{LogEntry, RoomLog};
use crate::mutex::LockManager;
use crate::retention::RetentionPolicy;
use crate::store::DurableStore;

/// A change applied to a room inside the critical section.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Append an entry and mark its sender as active at its timestamp
    Append(LogEntry),
    /// Mark a label as active without appending
    Touch { label: String, at: DateTime<Utc> },
}

impl Mutation {
    pub fn touch_now(label: impl Into<String>) -> Self {
        Mutation::Touch {
            label: label.into(),
            at: Utc::now(),
        }
    }

    fn apply(self, log: &mut RoomLog) -> Result<()> {
        match self {
            Mutation::Append(entry) => {
                if entry.sender.trim().is_empty() {
                    return Err(RoomError::mutation("entry has no sender"));
                }
                if log.contains_entry(&entry.id) {
                    return Err(RoomError::mutation(format!(
                        "entry {} already appended",
                        entry.id
                    )));
                }
                log.touch(&entry.sender, entry.timestamp);
                log.entries.push(entry);
            }
            Mutation::Touch { label, at } => {
                if label.trim().is_empty() {
                    return Err(RoomError::mutation("empty label"));
                }
                log.touch(&label, at);
            }
        }
        Ok(())
    }
}

/// What an update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub appended: usize,
    pub pruned: usize,
    pub total_entries: usize,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    store: DurableStore,
    retention: RetentionPolicy,
    lock_options: LockOptions,
    locks: Arc<LockManager>,
}

impl Coordinator {
    pub fn new(store: DurableStore, retention: RetentionPolicy, lock_options: LockOptions) -> Self {
        Self {
            store,
            retention,
            lock_options,
            locks: LockManager::global(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            DurableStore::from_config(config)?,
            RetentionPolicy::from_config(&config.retention),
            LockOptions::from(&config.lock),
        ))
    }

    /// Use a private lock registry instead of the process-wide one.
    pub fn with_lock_manager(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Apply `mutations` atomically to the room for `resource_id`.
    ///
    /// Either every mutation lands and the room is saved, or nothing is saved
    /// and the first error is returned unchanged.
    #[instrument(skip(self, mutations), fields(count = mutations.len()), level = "debug")]
    pub async fn update(&self, resource_id: &str, mutations: Vec<Mutation>) -> Result<UpdateOutcome> {
        let key = compute_room_id(resource_id);
        self.locks
            .run_exclusive(&key, move || self.update_exclusive(resource_id, mutations))
            .await
    }

    async fn update_exclusive(&self, resource_id: &str, mutations: Vec<Mutation>) -> Result<UpdateOutcome> {
        let owned_id = resource_id.to_string();
        self.blocking(move |store| store.create_if_missing(&owned_id))
            .await?;

        let guard = file_lock::acquire(&self.store.lock_path(resource_id), &self.lock_options).await?;

        let owned_id = resource_id.to_string();
        let mut log = self
            .blocking(move |store| store.load(&owned_id))
            .await?
            .ok_or_else(|| RoomError::ResourceDisappeared {
                resource_id: resource_id.to_string(),
            })?;

        let mut appended = 0;
        for mutation in mutations {
            if matches!(mutation, Mutation::Append(_)) {
                appended += 1;
            }
            mutation.apply(&mut log)?;
        }

        let pruned = self.retention.enforce(&mut log);
        let total_entries = log.entries.len();

        guard.verify()?;
        self.blocking(move |store| store.save(&log)).await?;

        log_store_debug!(
            "Room updated",
            appended = appended,
            pruned = pruned,
            total_entries = total_entries,
        );
        Ok(UpdateOutcome {
            appended,
            pruned,
            total_entries,
        })
    }

    /// Read the room as it is on disk right now (no locking).
    pub async fn snapshot(&self, resource_id: &str) -> Result<Option<RoomLog>> {
        let owned_id = resource_id.to_string();
        self.blocking(move |store| store.load(&owned_id)).await
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.blocking(|store| store.list()).await
    }

    /// Remove a room under its locks. Returns whether it existed.
    pub async fn delete(&self, resource_id: &str) -> Result<bool> {
        let key = compute_room_id(resource_id);
        self.locks
            .run_exclusive(&key, move || async move {
                let _guard =
                    file_lock::acquire(&self.store.lock_path(resource_id), &self.lock_options)
                        .await?;
                let owned_id = resource_id.to_string();
                self.blocking(move |store| store.delete_resource(&owned_id))
                    .await
            })
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(DurableStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn coordinator(max_entries: usize) -> (TempDir, Coordinator) {
        let temp = TempDir::new().unwrap();
        let store = DurableStore::new(temp.path().join("rooms")).unwrap();
        let coordinator = Coordinator::new(store, RetentionPolicy::new(max_entries), LockOptions::default())
            .with_lock_manager(Arc::new(LockManager::new()));
        (temp, coordinator)
    }

    fn entry(sender: &str, content: &str) -> LogEntry {
        LogEntry::new(sender, content, MessageKind::Text)
    }

    #[tokio::test]
    async fn test_update_creates_room() {
        let (_t, c) = coordinator(100);
        let outcome = c
            .update("/p", vec![Mutation::Append(entry("Amber", "hi"))])
            .await
            .unwrap();
        assert_eq!(outcome.appended, 1);
        assert_eq!(outcome.total_entries, 1);

        let log = c.snapshot("/p").await.unwrap().unwrap();
        assert_eq!(log.resource_id, "/p");
        assert_eq!(log.entries[0].content, "hi");
        assert!(log.last_seen.contains_key("Amber"));
    }

    #[tokio::test]
    async fn test_ceiling_one_keeps_latest() {
        let (_t, c) = coordinator(1);
        c.update("/p", vec![Mutation::Append(entry("Amber", "A"))])
            .await
            .unwrap();
        let outcome = c
            .update("/p", vec![Mutation::Append(entry("Amber", "B"))])
            .await
            .unwrap();
        assert_eq!(outcome.pruned, 1);

        let log = c.snapshot("/p").await.unwrap().unwrap();
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].content, "B");
    }

    #[tokio::test]
    async fn test_failed_mutation_saves_nothing_and_releases_lock() {
        let (_t, c) = coordinator(100);
        let first = entry("Amber", "once");
        c.update("/p", vec![Mutation::Append(first.clone())])
            .await
            .unwrap();

        let err = c
            .update(
                "/p",
                vec![
                    Mutation::Append(entry("Birch", "would be lost")),
                    Mutation::Append(first),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::MutationFailed { .. }));

        let log = c.snapshot("/p").await.unwrap().unwrap();
        assert_eq!(log.entries.len(), 1);
        assert!(!log.last_seen.contains_key("Birch"));

        // lock was released: the next update goes through promptly
        let next = tokio::time::timeout(
            Duration::from_secs(2),
            c.update("/p", vec![Mutation::touch_now("Birch")]),
        )
        .await
        .unwrap();
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_touch_does_not_append() {
        let (_t, c) = coordinator(100);
        let outcome = c
            .update("/p", vec![Mutation::touch_now("Amber")])
            .await
            .unwrap();
        assert_eq!(outcome.appended, 0);
        assert_eq!(outcome.total_entries, 0);
        let log = c.snapshot("/p").await.unwrap().unwrap();
        assert!(log.last_seen.contains_key("Amber"));
    }

    #[tokio::test]
    async fn test_empty_touch_label_rejected() {
        let (_t, c) = coordinator(100);
        let err = c
            .update("/p", vec![Mutation::touch_now("  ")])
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::MutationFailed { .. }));
    }

    #[tokio::test]
    async fn test_lock_timeout_when_held_elsewhere() {
        let temp = TempDir::new().unwrap();
        let store = DurableStore::new(temp.path().join("rooms")).unwrap();
        let options = LockOptions {
            attempts: 3,
            min_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            stale_after: Duration::from_secs(30),
        };
        let c = Coordinator::new(store.clone(), RetentionPolicy::new(10), options.clone())
            .with_lock_manager(Arc::new(LockManager::new()));

        let _foreign = file_lock::acquire(&store.lock_path("/p"), &options)
            .await
            .unwrap();
        let err = c
            .update("/p", vec![Mutation::touch_now("Amber")])
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::LockTimeout { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_corrupt_room_is_reported_not_overwritten() {
        let (_t, c) = coordinator(100);
        let path = c.store().resource_path("/p");
        std::fs::write(&path, b"not a room").unwrap();

        let err = c
            .update("/p", vec![Mutation::touch_now("Amber")])
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::CorruptData { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"not a room");
    }

    #[tokio::test]
    async fn test_delete_then_update_recreates() {
        let (_t, c) = coordinator(100);
        c.update("/p", vec![Mutation::Append(entry("Amber", "x"))])
            .await
            .unwrap();
        assert!(c.delete("/p").await.unwrap());
        assert!(!c.delete("/p").await.unwrap());
        assert!(c.snapshot("/p").await.unwrap().is_none());

        c.update("/p", vec![Mutation::Append(entry("Amber", "y"))])
            .await
            .unwrap();
        let log = c.snapshot("/p").await.unwrap().unwrap();
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].content, "y");
    }

    #[tokio::test]
    async fn test_room_deleted_before_lock_is_resource_disappeared() {
        let temp = TempDir::new().unwrap();
        let store = DurableStore::new(temp.path().join("rooms")).unwrap();
        let options = LockOptions {
            attempts: 200,
            min_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            stale_after: Duration::from_secs(30),
        };
        let c = Coordinator::new(store.clone(), RetentionPolicy::new(10), options.clone())
            .with_lock_manager(Arc::new(LockManager::new()));
        c.update("/p", vec![Mutation::touch_now("Amber")])
            .await
            .unwrap();

        let held = file_lock::acquire(&store.lock_path("/p"), &options)
            .await
            .unwrap();
        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.update("/p", vec![Mutation::touch_now("Birch")]).await })
        };
        // let the update get past room creation and queue on the file lock
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.delete_resource("/p").unwrap());
        drop(held);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RoomError::ResourceDisappeared { .. }));
        assert!(c.snapshot("/p").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_save_keeps_prior_content_and_releases_lock() {
        use std::fs::{self, Permissions};
        use std::os::unix::fs::PermissionsExt;

        let (_t, c) = coordinator(100);
        c.update("/p", vec![Mutation::Append(entry("Amber", "kept"))])
            .await
            .unwrap();
        let path = c.store().resource_path("/p");
        let before = fs::read(&path).unwrap();

        let dir = c.store().rooms_dir().to_path_buf();
        fs::set_permissions(&dir, Permissions::from_mode(0o555)).unwrap();
        // permission bits do not bind a privileged user
        let write_check = dir.join("write-check");
        if fs::write(&write_check, b"").is_ok() {
            fs::remove_file(&write_check).unwrap();
            fs::set_permissions(&dir, Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let err = c
            .update("/p", vec![Mutation::Append(entry("Birch", "lost"))])
            .await
            .unwrap_err();
        fs::set_permissions(&dir, Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(err, RoomError::Io(_)));
        assert_eq!(fs::read(&path).unwrap(), before);

        let next = tokio::time::timeout(
            Duration::from_secs(2),
            c.update("/p", vec![Mutation::touch_now("Birch")]),
        )
        .await
        .unwrap();
        assert!(next.is_ok());
        let log = c.snapshot("/p").await.unwrap().unwrap();
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].content, "kept");
    }
}
