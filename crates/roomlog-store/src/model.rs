//! Room log data model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key/value attachment carried by an entry
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Kind of a log entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    System,
    Command,
    Notification,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::System => "system",
            MessageKind::Command => "command",
            MessageKind::Notification => "notification",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(MessageKind::Text),
            "system" => Ok(MessageKind::System),
            "command" => Ok(MessageKind::Command),
            "notification" => Ok(MessageKind::Notification),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// One message in a room. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl LogEntry {
    /// New entry stamped now with a fresh id
    pub fn new(sender: impl Into<String>, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
            kind,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// The shared log of one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomLog {
    /// External identifier the room was created for
    pub resource_id: String,
    /// Append order; only ever truncated from the front
    pub entries: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    /// Writer label -> most recent activity
    #[serde(default)]
    pub last_seen: BTreeMap<String, DateTime<Utc>>,
}

impl RoomLog {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            entries: Vec::new(),
            created_at: Utc::now(),
            last_seen: BTreeMap::new(),
        }
    }

    /// Record activity for a label (last write wins)
    pub fn touch(&mut self, label: &str, at: DateTime<Utc>) {
        self.last_seen.insert(label.to_string(), at);
    }

    pub fn contains_entry(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Distinct senders among retained entries
    pub fn distinct_senders(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.sender.as_str()).collect()
    }
}

/// Label owned by one process for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub label: String,
    pub created_at: DateTime<Utc>,
}
