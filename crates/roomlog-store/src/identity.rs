//! # Identity Assignment
//!
//! Each process gets one human-readable label for its lifetime. The label is
//! written to `<identities_dir>/<pid>-<start_ms>.json`, a file no other
//! process ever writes, and read back on every later use.
//!
//! Picking a label scans every identity record to see what is already
//! claimed, then chooses at random among free pool labels. Once the pool is
//! exhausted, labels are pool names with a numeric suffix (`Amber2`,
//! `Birch2`, ... `Amber3`). Assignment runs under a cross-process lock on
//! the identities directory, so two processes starting together cannot
//! pick the same label from the same snapshot.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use roomlog_config::path::IDENTITY_LOCK_NAME;
use roomlog_config::{log_identity_debug, log_identity_info, Config};
use tempfile::NamedTempFile;
use tracing::field::display;

use crate::error::{Result, RoomError};
use crate::file_lock::{self, LockOptions};
use crate::model::Identity;
use crate::mutex::LockManager;

/// Default label pool
pub const DEFAULT_LABEL_POOL: [&str; 50] = [
    "Amber", "Birch", "Cedar", "Dune", "Ember", "Fjord", "Glade", "Harbor", "Iris", "Juniper",
    "Kestrel", "Lark", "Maple", "Nimbus", "Onyx", "Pike", "Quartz", "Raven", "Sable", "Thistle",
    "Umber", "Vale", "Willow", "Xenon", "Yarrow", "Zephyr", "Aspen", "Basalt", "Cobalt", "Delta",
    "Egret", "Flint", "Garnet", "Heron", "Indigo", "Jasper", "Kelp", "Lichen", "Marsh", "Nettle",
    "Opal", "Pebble", "Quill", "Reed", "Slate", "Tundra", "Upland", "Vesper", "Wren", "Yew",
];

static CURRENT_PROCESS: Lazy<ProcessKey> = Lazy::new(|| ProcessKey {
    pid: std::process::id(),
    started_ms: Utc::now().timestamp_millis(),
});

/// Identifies one process lifetime: pid plus the moment the process first
/// asked for its identity (pids are reused, the pair is not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub pid: u32,
    pub started_ms: i64,
}

impl ProcessKey {
    pub fn current() -> Self {
        *CURRENT_PROCESS
    }

    fn file_name(&self) -> String {
        format!("{}-{}.json", self.pid, self.started_ms)
    }
}

/// Choose a label not in `claimed`.
///
/// Free pool labels are picked at random. After exhaustion the k-th
/// candidate is `pool[k % len]` followed by `k / len + 2`.
pub fn pick_label(pool: &[String], claimed: &HashSet<String>) -> String {
    let free: Vec<&String> = pool.iter().filter(|l| !claimed.contains(*l)).collect();
    if let Some(label) = free.choose(&mut rand::rng()) {
        return (*label).clone();
    }

    let fallback = ["Writer".to_string()];
    let bases = if pool.is_empty() { &fallback[..] } else { pool };
    let mut k = 0usize;
    loop {
        let candidate = format!("{}{}", bases[k % bases.len()], k / bases.len() + 2);
        if !claimed.contains(&candidate) {
            return candidate;
        }
        k += 1;
    }
}

#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    dir: PathBuf,
    pool: Vec<String>,
    lock_options: LockOptions,
    locks: Arc<LockManager>,
}

impl IdentityRegistry {
    /// Open a registry in `dir`, creating it.
    pub fn new<P: AsRef<Path>>(dir: P, lock_options: LockOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pool: DEFAULT_LABEL_POOL.iter().map(|s| s.to_string()).collect(),
            lock_options,
            locks: LockManager::global(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.identities_dir(), LockOptions::from(&config.lock))
    }

    pub fn with_pool(mut self, pool: Vec<String>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_lock_manager(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn identity_path(&self, key: ProcessKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the identity recorded for `key`, if any.
    pub fn read(&self, key: ProcessKey) -> Result<Option<Identity>> {
        let path = self.identity_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RoomError::corrupt(path.display().to_string(), e))
    }

    /// Labels held by every readable identity record.
    pub fn claimed_labels(&self) -> Result<HashSet<String>> {
        let mut claimed = HashSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(_) => continue,
            };
            if path.extension() != Some(OsStr::new("json")) {
                continue;
            }
            match fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Identity>(&bytes).ok())
            {
                Some(identity) => {
                    claimed.insert(identity.label);
                }
                None => log_identity_debug!(
                    "Skipping unreadable identity record",
                    path = display(path.display()),
                ),
            }
        }
        Ok(claimed)
    }

    /// This process's identity, assigned on first use.
    pub async fn own_identity(&self) -> Result<Identity> {
        self.identity_for(ProcessKey::current()).await
    }

    /// The identity for `key`, assigning one if none is recorded.
    pub async fn identity_for(&self, key: ProcessKey) -> Result<Identity> {
        if let Some(identity) = self.read(key)? {
            return Ok(identity);
        }

        let lock_key = format!("identity:{}", self.dir.display());
        self.locks
            .run_exclusive(&lock_key, move || self.assign(key))
            .await
    }

    async fn assign(&self, key: ProcessKey) -> Result<Identity> {
        let _guard =
            file_lock::acquire(&self.dir.join(IDENTITY_LOCK_NAME), &self.lock_options).await?;

        // another task for the same key may have won the race
        if let Some(identity) = self.read(key)? {
            return Ok(identity);
        }

        let claimed = self.claimed_labels()?;
        let identity = Identity {
            label: pick_label(&self.pool, &claimed),
            created_at: Utc::now(),
        };
        self.write(key, &identity)?;

        log_identity_info!(
            "Assigned identity",
            label = identity.label.as_str(),
            pid = key.pid,
            claimed = claimed.len(),
        );
        Ok(identity)
    }

    fn write(&self, key: ProcessKey, identity: &Identity) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(identity).map_err(io::Error::other)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.identity_path(key))
            .map_err(|e| RoomError::Io(e.error))?;
        Ok(())
    }
}
