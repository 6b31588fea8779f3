//! Connection registry
//!
//! Who is online, and on which channel. Both directions of the mapping
//! (identity -> session and channel -> identity) live under one mutex, so a
//! join and a disconnect for the same identity are linearised and never lose
//! an update. Nothing here awaits.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::models::UserId;
use crate::protocol::OutboundEvent;

pub type ChannelId = u64;

/// Sending half of one open channel. Cheap to clone; every clone pushes to
/// the same connection.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    id: ChannelId,
    tx: mpsc::Sender<OutboundEvent>,
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelHandle {}

impl ChannelHandle {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue an event without waiting. Returns false if the channel is gone
    /// or its buffer is full; the event is dropped in both cases.
    pub fn push(&self, event: OutboundEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(
                    channel_id = self.id,
                    event = event.name(),
                    "channel buffer full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(channel_id = self.id, event = event.name(), "channel gone");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One identity bound to one channel.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: UserId,
    pub handle: ChannelHandle,
    pub joined_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<UserId, Session>,
    by_channel: HashMap<ChannelId, UserId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    next_channel: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a channel with a process-unique id. The receiver is drained
    /// by whoever owns the underlying connection.
    pub fn open_channel(&self, buffer: usize) -> (ChannelHandle, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed) + 1;
        (ChannelHandle { id, tx }, rx)
    }

    /// Bind `user_id` to `handle`, replacing any earlier session for that
    /// identity (last join wins). Returns the replaced channel, if it was a
    /// different one. The replaced channel is not notified.
    pub fn join(&self, user_id: &str, handle: ChannelHandle) -> Option<ChannelHandle> {
        let mut inner = self.inner.lock();
        let channel_id = handle.id();

        // A channel carries at most one identity.
        if let Some(bound) = inner.by_channel.remove(&channel_id) {
            if bound != user_id {
                inner.by_user.remove(&bound);
            }
        }

        let previous = inner.by_user.insert(
            user_id.to_string(),
            Session {
                user_id: user_id.to_string(),
                handle,
                joined_at: Utc::now(),
            },
        );
        inner.by_channel.insert(channel_id, user_id.to_string());

        match previous {
            Some(old) if old.handle.id() != channel_id => {
                inner.by_channel.remove(&old.handle.id());
                debug!(user_id, old_channel = old.handle.id(), new_channel = channel_id, "session replaced");
                Some(old.handle)
            }
            _ => None,
        }
    }

    /// Remove the session bound to `channel_id`. Returns the identity that
    /// went offline, or `None` when the channel was never joined or has
    /// already been replaced by a newer join.
    pub fn leave(&self, channel_id: ChannelId) -> Option<UserId> {
        let mut inner = self.inner.lock();
        let user_id = inner.by_channel.remove(&channel_id)?;
        inner.by_user.remove(&user_id);
        Some(user_id)
    }

    pub fn lookup(&self, user_id: &str) -> Option<ChannelHandle> {
        self.inner
            .lock()
            .by_user
            .get(user_id)
            .map(|s| s.handle.clone())
    }

    pub fn session(&self, user_id: &str) -> Option<Session> {
        self.inner.lock().by_user.get(user_id).cloned()
    }

    /// Identity currently bound to `channel_id`.
    pub fn identity_of(&self, channel_id: ChannelId) -> Option<UserId> {
        self.inner.lock().by_channel.get(&channel_id).cloned()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().by_user.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().by_user.len()
    }

    /// Point-in-time copy of every online identity.
    pub fn snapshot_identities(&self) -> BTreeSet<UserId> {
        self.inner.lock().by_user.keys().cloned().collect()
    }

    /// Point-in-time copy of every registered channel, for fan-out outside
    /// the lock.
    pub fn snapshot_channels(&self) -> Vec<ChannelHandle> {
        self.inner
            .lock()
            .by_user
            .values()
            .map(|s| s.handle.clone())
            .collect()
    }
}
