//! # Durable Store
//!
//! Maps a resource identifier to its room file and moves whole room logs
//! between memory and disk.
//!
//! Writes go to a temp file in the same directory, are synced, then
//! renamed over the target, so a reader never sees a partially written log.
//! The store takes no locks itself; mutation goes through the
//! [`Coordinator`](crate::Coordinator).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use roomlog_config::path::{self as layout, compute_room_id};
use roomlog_config::{log_store_debug, log_store_warn};
use tempfile::NamedTempFile;
use tracing::field::display;
use tracing::instrument;

use crate::codec;
use crate::error::{Result, RoomError};
use crate::model::RoomLog;

/// Directory of room files, one per resource.
#[derive(Debug, Clone)]
pub struct DurableStore {
    rooms_dir: PathBuf,
}

impl DurableStore {
    /// Open a store rooted at `rooms_dir`, creating the directory.
    pub fn new<P: AsRef<Path>>(rooms_dir: P) -> Result<Self> {
        let rooms_dir = rooms_dir.as_ref().to_path_buf();
        fs::create_dir_all(&rooms_dir)?;
        Ok(Self { rooms_dir })
    }

    pub fn from_config(config: &roomlog_config::Config) -> Result<Self> {
        Self::new(config.rooms_dir())
    }

    pub fn rooms_dir(&self) -> &Path {
        &self.rooms_dir
    }

    /// `<rooms_dir>/<sha256(resource_id)>.room`
    pub fn resource_path(&self, resource_id: &str) -> PathBuf {
        self.rooms_dir.join(layout::room_file_name(resource_id))
    }

    /// Path of the cross-process lock guarding a room file.
    pub fn lock_path(&self, resource_id: &str) -> PathBuf {
        layout::lock_path_for(&self.resource_path(resource_id))
    }

    /// Load a room. A missing file is `Ok(None)`.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self, resource_id: &str) -> Result<Option<RoomLog>> {
        Self::load_path(&self.resource_path(resource_id))
    }

    /// Load whatever room log lives at `path`.
    pub fn load_path(path: &Path) -> Result<Option<RoomLog>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        codec::decode(&bytes).map(Some).map_err(|e| e.at(path))
    }

    /// Overwrite the room file with the full log (temp + fsync + rename).
    #[instrument(skip(self, log), fields(resource_id = %log.resource_id), level = "debug")]
    pub fn save(&self, log: &RoomLog) -> Result<()> {
        let path = self.resource_path(&log.resource_id);
        let tmp = self.write_temp(log)?;
        tmp.persist(&path).map_err(|e| RoomError::Io(e.error))?;
        log_store_debug!(
            "Saved room",
            path = display(path.display()),
            entries = log.entries.len(),
        );
        Ok(())
    }

    /// Persist an empty log for `resource_id` unless a file already exists.
    ///
    /// Never clobbers: if another process created the file first, its
    /// content wins and this returns `false`.
    pub fn create_if_missing(&self, resource_id: &str) -> Result<bool> {
        let path = self.resource_path(resource_id);
        if path.exists() {
            return Ok(false);
        }

        let tmp = self.write_temp(&RoomLog::new(resource_id))?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                log_store_debug!("Created room", path = display(path.display()));
                Ok(true)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(RoomError::Io(e.error)),
        }
    }

    /// Resource identifiers of every decodable room file, sorted.
    ///
    /// Files that cannot be read or decoded are skipped with a warning.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.rooms_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    log_store_warn!("Skipping unreadable directory entry", error = display(&e));
                    continue;
                }
            };
            if !layout::is_room_file(&path) {
                continue;
            }
            match Self::load_path(&path) {
                Ok(Some(log)) => ids.push(log.resource_id),
                Ok(None) => {}
                Err(e) => {
                    log_store_warn!(
                        "Skipping undecodable room file",
                        path = display(path.display()),
                        error = display(&e),
                    );
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove the room file. Returns whether a file was removed.
    ///
    /// The lock file is left in place: removing it could let two writers
    /// lock different inodes.
    pub fn delete_resource(&self, resource_id: &str) -> Result<bool> {
        let path = self.resource_path(resource_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                log_store_debug!("Deleted room", room_id = display(compute_room_id(resource_id)));
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn write_temp(&self, log: &RoomLog) -> Result<NamedTempFile> {
        let bytes = codec::encode(log)?;
        let mut tmp = NamedTempFile::new_in(&self.rooms_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}
