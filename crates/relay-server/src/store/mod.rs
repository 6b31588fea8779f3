//! Persistence gateway
//!
//! Durable storage for messages and presence. The relay engine only needs
//! `save_message` and `set_presence`; the history queries back the HTTP API.

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryGateway;
pub use sqlite_store::SqliteGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PersistenceError;
use crate::models::{MessageStats, PersistedMessage, PresenceRecord};

pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Store a message, assigning its id and timestamp.
    async fn save_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
    ) -> StoreResult<PersistedMessage>;

    async fn set_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Messages exchanged between `a` and `b` in either direction, oldest first.
    /// Equal timestamps keep insertion order.
    async fn conversation(&self, a: &str, b: &str) -> StoreResult<Vec<PersistedMessage>>;

    /// Messages sent or received by `user_id`, newest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<PersistedMessage>>;

    async fn message_stats(&self, user_id: &str) -> StoreResult<MessageStats>;

    /// Delete a message, but only when `user_id` is its sender or receiver.
    async fn delete_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<PersistedMessage>>;

    async fn presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>>;

    /// Users the store last recorded as online. Live presence is the
    /// registry; this is only the persisted view.
    async fn online_users(&self) -> StoreResult<Vec<PresenceRecord>>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> StoreResult<()>;
}

/// Mark every user the store still holds as online offline. A fresh process
/// has no live channels, so such records are left over from a previous run.
pub async fn clear_stale_presence(store: &dyn PersistenceGateway) -> StoreResult<usize> {
    let stale = store.online_users().await?;
    let now = Utc::now();
    for record in &stale {
        store.set_presence(&record.user_id, false, now).await?;
    }
    Ok(stale.len())
}
