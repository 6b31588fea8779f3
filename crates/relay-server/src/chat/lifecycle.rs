//! Channel session lifecycle
//!
//! `Connecting -> Joined -> Closed`. A channel starts out anonymous, becomes
//! bound to an identity on `join`, and is closed exactly once when its socket
//! ends. Presence changes always run registry -> store -> broadcast.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::presence::PresenceBroadcaster;
use super::registry::{ChannelHandle, ChannelId, ConnectionRegistry};
use super::relay::MessageRelay;
use crate::models::UserId;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::store::PersistenceGateway;

pub const JOIN_FAILED: &str = "Failed to join chat";
pub const USER_ID_REQUIRED: &str = "User ID is required";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Joined(UserId),
    Closed,
}

/// Per-connection state, owned by the task reading that connection.
#[derive(Debug)]
pub struct ChannelSession {
    handle: ChannelHandle,
    state: ChannelState,
}

impl ChannelSession {
    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.state {
            ChannelState::Joined(user_id) => Some(user_id),
            _ => None,
        }
    }
}

pub struct SessionLifecycle {
    registry: Arc<ConnectionRegistry>,
    broadcaster: PresenceBroadcaster,
    relay: Arc<MessageRelay>,
    store: Arc<dyn PersistenceGateway>,
    channel_buffer: usize,
}

impl SessionLifecycle {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn PersistenceGateway>,
        channel_buffer: usize,
    ) -> Self {
        Self {
            broadcaster: PresenceBroadcaster::new(Arc::clone(&registry)),
            relay: Arc::new(MessageRelay::new(Arc::clone(&registry), Arc::clone(&store))),
            registry,
            store,
            channel_buffer,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<MessageRelay> {
        &self.relay
    }

    /// A new connection, not yet bound to anyone.
    pub fn open(&self) -> (ChannelSession, mpsc::Receiver<OutboundEvent>) {
        let (handle, rx) = self.registry.open_channel(self.channel_buffer);
        debug!(channel_id = handle.id(), "channel opened");
        (
            ChannelSession {
                handle,
                state: ChannelState::Connecting,
            },
            rx,
        )
    }

    /// Handle one inbound event. Events on a channel are dispatched in the
    /// order they arrived.
    pub async fn dispatch(&self, session: &mut ChannelSession, event: InboundEvent) {
        if session.state == ChannelState::Closed {
            warn!(channel_id = session.handle.id(), "event on closed channel ignored");
            return;
        }

        match event {
            InboundEvent::Join(user_id) => self.join(session, &user_id).await,
            InboundEvent::SendMessage(payload) => {
                // Failures were already reported on the channel.
                let _ = self
                    .relay
                    .submit(
                        &session.handle,
                        payload.sender_id.as_deref(),
                        payload.receiver_id.as_deref(),
                        payload.message.as_deref(),
                    )
                    .await;
            }
            InboundEvent::Typing(payload) => {
                self.relay.relay_typing(
                    &session.handle,
                    payload.sender_id.as_deref(),
                    payload.receiver_id.as_deref(),
                    payload.is_typing,
                );
            }
        }
    }

    /// Bind the channel to `user_id` and announce it online.
    pub async fn join(&self, session: &mut ChannelSession, user_id: &str) {
        if session.state == ChannelState::Closed {
            return;
        }
        if user_id.is_empty() {
            session.handle.push(OutboundEvent::error(USER_ID_REQUIRED));
            return;
        }

        // Switching identity on one channel takes the old identity offline first.
        if let ChannelState::Joined(current) = &session.state {
            if current != user_id {
                self.go_offline(session.handle.id()).await;
            }
        }

        if let Some(replaced) = self.registry.join(user_id, session.handle.clone()) {
            info!(
                user_id,
                replaced_channel = replaced.id(),
                channel_id = session.handle.id(),
                "session replaced by newer join"
            );
        }
        session.state = ChannelState::Joined(user_id.to_string());

        if let Err(e) = self.store.set_presence(user_id, true, Utc::now()).await {
            error!(user_id, error = %e, "error handling user join");
            session.handle.push(OutboundEvent::error(JOIN_FAILED));
            return;
        }

        self.broadcaster.announce(user_id, true);
        info!(user_id, channel_id = session.handle.id(), "user joined");
    }

    /// The socket ended, gracefully or not. Safe to call more than once.
    pub async fn close(&self, session: &mut ChannelSession) {
        if matches!(session.state, ChannelState::Joined(_)) {
            self.go_offline(session.handle.id()).await;
        }
        if session.state != ChannelState::Closed {
            debug!(channel_id = session.handle.id(), "channel closed");
        }
        session.state = ChannelState::Closed;
    }

    /// Remove the session on `channel_id` and announce its identity offline.
    /// Nothing happens if a newer join already replaced that session.
    async fn go_offline(&self, channel_id: ChannelId) -> Option<UserId> {
        let Some(user_id) = self.registry.leave(channel_id) else {
            debug!(channel_id, "session already replaced, no presence change");
            return None;
        };

        // Stamped at leave time so a rejoin during the write stays newer.
        let left_at = Utc::now();
        if let Err(e) = self.store.set_presence(&user_id, false, left_at).await {
            error!(user_id = %user_id, error = %e, "error handling user disconnect");
        }

        if self.registry.is_online(&user_id) {
            debug!(user_id = %user_id, channel_id, "rejoined while leaving, offline not announced");
            return Some(user_id);
        }

        self.broadcaster.announce(&user_id, false);
        info!(user_id = %user_id, channel_id, "user left");
        Some(user_id)
    }
}
