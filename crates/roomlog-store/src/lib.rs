//! # roomlog-store
//!
//! Shared room logs for cooperating processes on one machine.
//!
//! Each room is a gzip-compressed JSON document in `<home>/rooms/`, named by
//! the sha256 of its resource identifier. Any number of processes may append
//! to the same room at once; every write is a locked read-modify-write
//! ([`Coordinator::update`]) so no append is ever lost, and every save is a
//! temp-file rename so readers never see a torn file.
//!
//! ## Layers
//!
//! - [`codec`]: room <-> compressed bytes
//! - [`store`]: crash-safe load/save of one room file
//! - [`file_lock`]: cross-process advisory lock with backoff and stale reclaim
//! - [`mutex`]: in-process FIFO lock keyed by room
//! - [`coordinator`]: the atomic update cycle plus retention
//! - [`identity`]: one human-readable label per process
//! - [`query`]: read-side filters
//! - [`client`]: the facade front ends use
//!
//! ## Example
//!
//! ```ignore
//! use roomlog_store::{MessageKind, RoomClient};
//!
//! let client = RoomClient::new(&roomlog_config::Config::load()?)?;
//! client.append("/src/app", "build is green", MessageKind::Text, None).await?;
//! for entry in client.recent("/src/app", 20).await? {
//!     println!("{}: {}", entry.sender, entry.content);
//! }
//! ```

pub mod client;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod file_lock;
pub mod identity;
pub mod model;
pub mod mutex;
pub mod query;
pub mod retention;
pub mod store;

pub use client::RoomClient;
pub use coordinator::{Coordinator, Mutation, UpdateOutcome};
pub use error::{Result, RoomError};
pub use file_lock::{FileLockGuard, LockOptions};
pub use identity::{IdentityRegistry, ProcessKey, DEFAULT_LABEL_POOL};
pub use model::{Identity, LogEntry, MessageKind, Metadata, RoomLog};
pub use mutex::{AsyncLock, LockManager};
pub use query::{EntryFilter, RoomStats};
pub use retention::RetentionPolicy;
pub use store::DurableStore;
