//! Cross-process advisory lock on a sidecar lock file.
//!
//! The lock is an exclusive `flock` on `<file>.lock`. Acquisition never
//! blocks the runtime: it polls with `try_lock_exclusive` and sleeps with
//! doubling backoff between attempts, giving up with `LockTimeout` once the
//! attempt budget is spent.
//!
//! A lock file whose holder stamp is older than the staleness ceiling is
//! treated as abandoned. It is unlinked so the next attempt locks a fresh
//! inode; the old holder, if it is still alive, keeps a lock nobody else
//! looks at. A waiter only unlinks the exact inode it found stale, so a
//! lock that another waiter has just reclaimed and relocked survives.
//! After locking, the holder checks that the inode it locked is still the
//! one at the lock path and starts over if not; [`FileLockGuard::verify`]
//! repeats that check before a holder writes.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use fs2::FileExt;
use rand::Rng;
use roomlog_config::{log_lock_debug, log_lock_trace, log_lock_warn, LockConfig};
use tracing::field::display;

use crate::error::{Result, RoomError};

/// Retry and staleness tuning for [`acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    pub attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            min_backoff: config.min_backoff(),
            max_backoff: config.max_backoff(),
            stale_after: config.stale_after(),
        }
    }
}

/// Held lock. Dropping it releases the lock; release failures are logged.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that the locked inode is still the one at the lock path.
    ///
    /// A holder whose lock file was reclaimed as stale no longer excludes
    /// anyone; it must not write.
    pub fn verify(&self) -> Result<()> {
        if still_linked(&self.file, &self.path)? {
            Ok(())
        } else {
            Err(RoomError::LockLost {
                path: self.path.clone(),
            })
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => log_lock_trace!("Released lock", path = display(self.path.display())),
            Err(e) => log_lock_warn!(
                "Failed to release lock",
                path = display(self.path.display()),
                error = display(&e),
            ),
        }
    }
}

enum Attempt {
    Acquired(FileLockGuard),
    Busy,
    /// The lock file was replaced or reclaimed; try again without waiting
    Retry,
}

/// Acquire the lock at `lock_path`, creating the file if needed.
pub async fn acquire(lock_path: &Path, options: &LockOptions) -> Result<FileLockGuard> {
    let attempts = options.attempts.max(1);
    let mut delay = options.min_backoff;

    for attempt in 1..=attempts {
        let path = lock_path.to_path_buf();
        let stale_after = options.stale_after;
        // open, flock, stat and unlink are blocking syscalls
        let outcome = tokio::task::spawn_blocking(move || attempt_once(&path, stale_after)).await??;

        match outcome {
            Attempt::Acquired(guard) => {
                log_lock_debug!(
                    "Acquired lock",
                    path = display(lock_path.display()),
                    attempt = attempt,
                );
                return Ok(guard);
            }
            Attempt::Retry => continue,
            Attempt::Busy => {
                if attempt < attempts {
                    tokio::time::sleep(jittered(delay)).await;
                    delay = (delay * 2).min(options.max_backoff);
                }
            }
        }
    }

    Err(RoomError::LockTimeout {
        path: lock_path.to_path_buf(),
        attempts,
    })
}

fn attempt_once(lock_path: &Path, stale_after: Duration) -> Result<Attempt> {
    match try_acquire(lock_path)? {
        Attempt::Busy if reclaim_if_stale(lock_path, stale_after) => Ok(Attempt::Retry),
        other => Ok(other),
    }
}

fn try_acquire(lock_path: &Path) -> Result<Attempt> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            if !still_linked(&file, lock_path)? {
                let _ = FileExt::unlock(&file);
                return Ok(Attempt::Retry);
            }
            stamp(&file)?;
            Ok(Attempt::Acquired(FileLockGuard {
                file,
                path: lock_path.to_path_buf(),
            }))
        }
        Err(e) if is_contended(&e) => Ok(Attempt::Busy),
        Err(e) => Err(e.into()),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Record the holder; also refreshes the mtime used for staleness.
fn stamp(mut file: &File) -> io::Result<()> {
    file.set_len(0)?;
    writeln!(
        file,
        "pid={} acquired_at={}",
        std::process::id(),
        Utc::now().to_rfc3339()
    )
}

#[cfg(unix)]
fn same_inode(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.ino() == b.ino() && a.dev() == b.dev()
}

#[cfg(not(unix))]
fn same_inode(_a: &Metadata, _b: &Metadata) -> bool {
    true
}

fn still_linked(file: &File, lock_path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(lock_path) {
        Ok(current) => Ok(same_inode(&held, &current)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Age of the holder stamp recorded in `meta`.
fn stamp_age(meta: &Metadata) -> Duration {
    meta.modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

fn reclaim_if_stale(lock_path: &Path, stale_after: Duration) -> bool {
    let Ok(observed) = fs::metadata(lock_path) else {
        return false;
    };
    let age = stamp_age(&observed);
    if age <= stale_after {
        return false;
    }

    let holder = fs::read_to_string(lock_path).unwrap_or_default();
    log_lock_warn!(
        "Reclaiming stale lock",
        path = display(lock_path.display()),
        age_ms = age.as_millis() as u64,
        holder = holder.trim(),
    );
    remove_if_unchanged(lock_path, &observed, stale_after)
}

/// Unlink the lock file only if it is still the stale inode in `observed`.
///
/// Another waiter may have reclaimed it and locked a fresh file since the
/// staleness check; that file must survive.
fn remove_if_unchanged(lock_path: &Path, observed: &Metadata, stale_after: Duration) -> bool {
    match fs::metadata(lock_path) {
        Ok(current) if same_inode(observed, &current) && stamp_age(&current) > stale_after => {}
        Ok(_) => {
            log_lock_debug!(
                "Stale lock already reclaimed elsewhere",
                path = display(lock_path.display()),
            );
            return false;
        }
        Err(e) => return e.kind() == io::ErrorKind::NotFound,
    }

    match fs::remove_file(lock_path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            log_lock_warn!(
                "Failed to remove stale lock",
                path = display(lock_path.display()),
                error = display(&e),
            );
            false
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let spread = (delay.as_millis() as u64 / 4).max(1);
    delay + Duration::from_millis(rand::rng().random_range(0..=spread))
}
