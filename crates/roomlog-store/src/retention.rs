//! Bounded retention: keep only the newest N entries of a room.

use roomlog_config::{RetentionConfig, DEFAULT_MAX_MESSAGES};

use crate::model::RoomLog;

/// FIFO pruning by append order. Content, sender and kind are never
/// considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_entries: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl RetentionPolicy {
    /// An explicit ceiling. Not range-checked (at least one entry is kept);
    /// use [`RetentionPolicy::from_config`] for user-supplied values.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(config.effective_max_messages())
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Drop the oldest entries beyond the ceiling. Returns how many were dropped.
    pub fn enforce(&self, log: &mut RoomLog) -> usize {
        let len = log.entries.len();
        if len <= self.max_entries {
            return 0;
        }
        let excess = len - self.max_entries;
        log.entries.drain(..excess);
        excess
    }
}
