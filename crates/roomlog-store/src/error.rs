//! Error types for roomlog-store
//!
//! A missing room is not an error anywhere in this crate: reads return
//! `Option`/empty collections. Everything here is something that went wrong.

use std::io;
use std::path::PathBuf;

use roomlog_config::ConfigError;
use thiserror::Error;

/// Errors that can occur in room log operations
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An existing file could not be decoded
    #[error("Corrupt room data at {location}: {reason}")]
    CorruptData { location: String, reason: String },

    /// The cross-process lock stayed busy for the whole retry budget
    #[error("Timed out acquiring lock {} after {attempts} attempts", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    /// The held lock file was reclaimed as stale before the holder wrote
    #[error("Lock {} was reclaimed while held", path.display())]
    LockLost { path: PathBuf },

    /// The room file vanished between pre-creation and lock acquisition
    #[error("Room {resource_id:?} disappeared before its lock was acquired")]
    ResourceDisappeared { resource_id: String },

    /// A mutation was rejected; nothing was saved
    #[error("Mutation rejected: {reason}")]
    MutationFailed { reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, RoomError>;

impl RoomError {
    pub fn corrupt(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptData {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn mutation(reason: impl Into<String>) -> Self {
        Self::MutationFailed {
            reason: reason.into(),
        }
    }

    /// Attach a file location to a `CorruptData` raised on an in-memory buffer.
    pub(crate) fn at(self, path: &std::path::Path) -> Self {
        match self {
            Self::CorruptData { reason, .. } => Self::CorruptData {
                location: path.display().to_string(),
                reason,
            },
            other => other,
        }
    }
}

impl From<tokio::task::JoinError> for RoomError {
    fn from(err: tokio::task::JoinError) -> Self {
        RoomError::Io(io::Error::other(err))
    }
}
