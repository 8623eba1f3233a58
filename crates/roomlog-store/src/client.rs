//! High-level room operations for front ends.
//!
//! Writes go through the [`Coordinator`]; reads load the room fresh from
//! disk on every call and never cache.

use std::time::Duration;

use chrono::Utc;
use roomlog_config::Config;

use crate::coordinator::{Coordinator, Mutation, UpdateOutcome};
use crate::error::Result;
use crate::identity::IdentityRegistry;
use crate::model::{Identity, LogEntry, MessageKind, Metadata};
use crate::query::{self, EntryFilter, RoomStats};

#[derive(Debug, Clone)]
pub struct RoomClient {
    coordinator: Coordinator,
    identities: IdentityRegistry,
}

impl RoomClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::from_parts(
            Coordinator::from_config(config)?,
            IdentityRegistry::from_config(config)?,
        ))
    }

    pub fn from_parts(coordinator: Coordinator, identities: IdentityRegistry) -> Self {
        Self {
            coordinator,
            identities,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Claim this process's identity up front.
    pub async fn initialize(&self) -> Result<Identity> {
        self.identities.own_identity().await
    }

    pub async fn own_label(&self) -> Result<String> {
        Ok(self.identities.own_identity().await?.label)
    }

    /// Append a message as this process. Returns the new entry id.
    pub async fn append(
        &self,
        resource_id: &str,
        content: &str,
        kind: MessageKind,
        metadata: Option<Metadata>,
    ) -> Result<String> {
        let sender = self.own_label().await?;
        let entry = LogEntry::new(sender, content, kind).with_metadata(metadata);
        let id = entry.id.clone();
        self.coordinator
            .update(resource_id, vec![Mutation::Append(entry)])
            .await?;
        Ok(id)
    }

    /// Heartbeat: mark this process active without appending.
    pub async fn touch(&self, resource_id: &str) -> Result<UpdateOutcome> {
        let label = self.own_label().await?;
        self.coordinator
            .update(resource_id, vec![Mutation::touch_now(label)])
            .await
    }

    pub async fn recent(&self, resource_id: &str, count: usize) -> Result<Vec<LogEntry>> {
        Ok(self
            .coordinator
            .snapshot(resource_id)
            .await?
            .map(|log| query::recent_entries(&log, count))
            .unwrap_or_default())
    }

    pub async fn filtered(&self, resource_id: &str, filter: &EntryFilter) -> Result<Vec<LogEntry>> {
        Ok(self
            .coordinator
            .snapshot(resource_id)
            .await?
            .map(|log| query::filter_entries(&log, filter, Utc::now()))
            .unwrap_or_default())
    }

    pub async fn search(&self, resource_id: &str, query: &str) -> Result<Vec<LogEntry>> {
        Ok(self
            .coordinator
            .snapshot(resource_id)
            .await?
            .map(|log| query::search_entries(&log, query))
            .unwrap_or_default())
    }

    pub async fn active_labels(&self, resource_id: &str, window: Duration) -> Result<Vec<String>> {
        Ok(self
            .coordinator
            .snapshot(resource_id)
            .await?
            .map(|log| query::active_labels(&log, window, Utc::now()))
            .unwrap_or_default())
    }

    pub async fn room_stats(&self, resource_id: &str) -> Result<Option<RoomStats>> {
        Ok(self
            .coordinator
            .snapshot(resource_id)
            .await?
            .map(|log| RoomStats::of(&log)))
    }

    pub async fn list_rooms(&self) -> Result<Vec<String>> {
        self.coordinator.list().await
    }

    pub async fn delete_room(&self, resource_id: &str) -> Result<bool> {
        self.coordinator.delete(resource_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomlog_config::testing::TestEnvironment;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let env = TestEnvironment::new().unwrap();
        let client = RoomClient::new(&env.config()).unwrap();
        let room = env.room_key();

        let label = client.initialize().await.unwrap().label;
        let id = client
            .append(&room, "hello", MessageKind::Text, None)
            .await
            .unwrap();

        let entries = client.recent(&room, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].sender, label);
        assert_eq!(
            client.active_labels(&room, Duration::from_secs(60)).await.unwrap(),
            vec![label]
        );
    }

    #[tokio::test]
    async fn test_missing_room_reads_empty() {
        let env = TestEnvironment::new().unwrap();
        let client = RoomClient::new(&env.config()).unwrap();

        assert!(client.recent("nowhere", 10).await.unwrap().is_empty());
        assert!(client.search("nowhere", "x").await.unwrap().is_empty());
        assert!(client
            .filtered("nowhere", &EntryFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(client
            .active_labels("nowhere", Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty());
        assert!(client.room_stats("nowhere").await.unwrap().is_none());
        assert_eq!(env.room_file_count(), 0);
    }

    #[tokio::test]
    async fn test_touch_without_append() {
        let env = TestEnvironment::new().unwrap();
        let client = RoomClient::new(&env.config()).unwrap();
        let room = env.room_key();

        client.touch(&room).await.unwrap();
        let stats = client.room_stats(&room).await.unwrap().unwrap();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(
            client.active_labels(&room, Duration::from_secs(60)).await.unwrap(),
            vec![client.own_label().await.unwrap()]
        );
    }

    #[tokio::test]
    async fn test_metadata_round_trips() {
        let env = TestEnvironment::new().unwrap();
        let client = RoomClient::new(&env.config()).unwrap();
        let room = env.room_key();

        let mut meta = Metadata::new();
        meta.insert("reply_to".into(), serde_json::json!("abc"));
        client
            .append(&room, "/deploy", MessageKind::Command, Some(meta.clone()))
            .await
            .unwrap();

        let entry = client.recent(&room, 1).await.unwrap().remove(0);
        assert_eq!(entry.kind, MessageKind::Command);
        assert_eq!(entry.metadata, Some(meta));
    }

    #[tokio::test]
    async fn test_list_and_delete_rooms() {
        let env = TestEnvironment::new().unwrap();
        let client = RoomClient::new(&env.config()).unwrap();

        client.append("room-b", "x", MessageKind::Text, None).await.unwrap();
        client.append("room-a", "y", MessageKind::Text, None).await.unwrap();
        assert_eq!(client.list_rooms().await.unwrap(), vec!["room-a", "room-b"]);

        assert!(client.delete_room("room-a").await.unwrap());
        assert_eq!(client.list_rooms().await.unwrap(), vec!["room-b"]);
    }
}
