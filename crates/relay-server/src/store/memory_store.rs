//! In-memory persistence gateway
//!
//! Nothing survives a restart. Used by tests and by `RELAY_STORE=memory`.
//! `set_failing(true)` makes every call fail with `Unavailable`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{PersistenceGateway, StoreResult};
use crate::error::PersistenceError;
use crate::models::{MessageStats, PersistedMessage, PresenceRecord};

#[derive(Default)]
struct MemoryInner {
    /// Insertion order
    messages: Vec<PersistedMessage>,
    presence: HashMap<String, PresenceRecord>,
}

#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<MemoryInner>,
    failing: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn save_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
    ) -> StoreResult<PersistedMessage> {
        self.check()?;
        let message = PersistedMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            message: body.to_string(),
            timestamp: Utc::now(),
        };
        self.inner.lock().messages.push(message.clone());
        Ok(message)
    }

    async fn set_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        if let Some(current) = inner.presence.get(user_id) {
            if at < current.last_seen {
                return Ok(());
            }
        }
        inner.presence.insert(
            user_id.to_string(),
            PresenceRecord {
                user_id: user_id.to_string(),
                is_online,
                last_seen: at,
            },
        );
        Ok(())
    }

    async fn conversation(&self, a: &str, b: &str) -> StoreResult<Vec<PersistedMessage>> {
        self.check()?;
        let mut found: Vec<PersistedMessage> = self
            .inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        found.sort_by_key(|m| m.timestamp);
        Ok(found)
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<PersistedMessage>> {
        self.check()?;
        let inner = self.inner.lock();
        let mut found: Vec<(usize, &PersistedMessage)> = inner
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.involves(user_id))
            .collect();
        found.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
        Ok(found
            .into_iter()
            .take(limit as usize)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn message_stats(&self, user_id: &str) -> StoreResult<MessageStats> {
        self.check()?;
        let inner = self.inner.lock();
        let mut stats = MessageStats::default();
        for m in inner.messages.iter().filter(|m| m.involves(user_id)) {
            stats.total_messages += 1;
            if m.sender_id == user_id {
                stats.sent_messages += 1;
            }
            if m.receiver_id == user_id {
                stats.received_messages += 1;
            }
        }
        Ok(stats)
    }

    async fn delete_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<PersistedMessage>> {
        self.check()?;
        let mut inner = self.inner.lock();
        let position = inner
            .messages
            .iter()
            .position(|m| m.id == message_id && m.involves(user_id));
        Ok(position.map(|i| inner.messages.remove(i)))
    }

    async fn presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        self.check()?;
        Ok(self.inner.lock().presence.get(user_id).cloned())
    }

    async fn online_users(&self) -> StoreResult<Vec<PresenceRecord>> {
        self.check()?;
        let mut online: Vec<PresenceRecord> = self
            .inner
            .lock()
            .presence
            .values()
            .filter(|p| p.is_online)
            .cloned()
            .collect();
        online.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(online)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }
}
