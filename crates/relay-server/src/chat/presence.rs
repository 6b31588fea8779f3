//! Presence broadcaster
//!
//! Fans status changes out to every registered channel. Any user may be
//! looking at any other user's status, so there is no narrower audience.

use std::sync::Arc;

use tracing::debug;

use super::registry::ConnectionRegistry;
use crate::protocol::OutboundEvent;

pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push `userStatusUpdate` to every channel registered right now.
    /// A channel that fails to take the event is skipped.
    pub fn announce(&self, user_id: &str, is_online: bool) {
        let channels = self.registry.snapshot_channels();
        let event = OutboundEvent::status(user_id, is_online);

        let delivered = channels
            .iter()
            .filter(|handle| handle.push(event.clone()))
            .count();

        debug!(
            user_id,
            is_online,
            recipients = channels.len(),
            delivered,
            "presence broadcast"
        );
    }
}
