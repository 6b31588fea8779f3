//! Message relay
//!
//! A message is validated, then stored, then delivered. Delivery never
//! happens before the store has accepted the message.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::registry::{ChannelHandle, ConnectionRegistry};
use crate::error::{RelayError, Result};
use crate::models::{validate_message, PersistedMessage};
use crate::protocol::OutboundEvent;
use crate::store::PersistenceGateway;

/// Error text pushed to the sender when the store rejects a message.
pub const SEND_FAILED: &str = "Failed to send message";

pub struct MessageRelay {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn PersistenceGateway>,
}

impl MessageRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn PersistenceGateway>) -> Self {
        Self { registry, store }
    }

    /// Validate and store a message without live delivery.
    pub async fn record(
        &self,
        sender_id: Option<&str>,
        receiver_id: Option<&str>,
        body: Option<&str>,
    ) -> Result<PersistedMessage> {
        let outgoing = validate_message(sender_id, receiver_id, body)?;
        let saved = self
            .store
            .save_message(&outgoing.sender_id, &outgoing.receiver_id, &outgoing.body)
            .await?;

        info!(
            message_id = %saved.id,
            sender_id = %saved.sender_id,
            receiver_id = %saved.receiver_id,
            "message recorded"
        );
        Ok(saved)
    }

    /// Store a message submitted on `origin` and route it.
    ///
    /// On success the receiver's live channel (if any) gets `receiveMessage`
    /// and `origin` gets `messageSent`. On failure `origin` gets an `error`
    /// event and nothing is delivered.
    pub async fn submit(
        &self,
        origin: &ChannelHandle,
        sender_id: Option<&str>,
        receiver_id: Option<&str>,
        body: Option<&str>,
    ) -> Result<PersistedMessage> {
        let saved = match self.record(sender_id, receiver_id, body).await {
            Ok(saved) => saved,
            Err(RelayError::Validation(failure)) => {
                debug!(channel_id = origin.id(), errors = ?failure.errors, "message rejected");
                origin.push(OutboundEvent::error(failure.to_string()));
                return Err(failure.into());
            }
            Err(err) => {
                error!(channel_id = origin.id(), error = %err, "error sending message");
                origin.push(OutboundEvent::error(SEND_FAILED));
                return Err(err);
            }
        };

        match self.registry.lookup(&saved.receiver_id) {
            // The sender's own channel only gets the acknowledgment.
            Some(target) if target != *origin => {
                if !target.push(OutboundEvent::ReceiveMessage(saved.clone())) {
                    debug!(receiver_id = %saved.receiver_id, "receiver channel gone, delivery skipped");
                }
            }
            Some(_) => {}
            None => {
                debug!(receiver_id = %saved.receiver_id, "receiver offline, message stored only");
            }
        }

        origin.push(OutboundEvent::MessageSent(saved.clone()));
        Ok(saved)
    }

    /// Forward a typing signal to the receiver's live channel. Never touches
    /// the store. Returns whether the signal was handed to a channel.
    pub fn relay_typing(
        &self,
        origin: &ChannelHandle,
        sender_id: Option<&str>,
        receiver_id: Option<&str>,
        is_typing: bool,
    ) -> bool {
        let (Some(sender_id), Some(receiver_id)) = (
            sender_id.filter(|s| !s.is_empty()),
            receiver_id.filter(|r| !r.is_empty()),
        ) else {
            return false;
        };

        match self.registry.lookup(receiver_id) {
            Some(target) if target != *origin => {
                target.push(OutboundEvent::typing(sender_id, is_typing))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RULE_MESSAGE_REQUIRED;
    use crate::store::MemoryGateway;

    fn setup() -> (Arc<ConnectionRegistry>, Arc<MemoryGateway>, MessageRelay) {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryGateway::new());
        let relay = MessageRelay::new(Arc::clone(&registry), store.clone());
        (registry, store, relay)
    }

    #[tokio::test]
    async fn test_submit_delivers_and_acknowledges() {
        let (registry, _store, relay) = setup();
        let (a, mut ra) = registry.open_channel(8);
        let (b, mut rb) = registry.open_channel(8);
        registry.join("a", a.clone());
        registry.join("b", b);

        let saved = relay
            .submit(&a, Some("a"), Some("b"), Some(" hi "))
            .await
            .unwrap();
        assert_eq!(saved.message, "hi");

        assert_eq!(rb.try_recv().unwrap(), OutboundEvent::ReceiveMessage(saved.clone()));
        assert_eq!(ra.try_recv().unwrap(), OutboundEvent::MessageSent(saved));
    }

    #[tokio::test]
    async fn test_validation_failure_stores_nothing() {
        let (registry, store, relay) = setup();
        let (a, mut ra) = registry.open_channel(8);

        let err = relay
            .submit(&a, Some("a"), Some("b"), Some("   "))
            .await
            .unwrap_err();
        match err {
            RelayError::Validation(failure) => assert!(failure.contains(RULE_MESSAGE_REQUIRED)),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.message_count(), 0);
        assert!(matches!(ra.try_recv().unwrap(), OutboundEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_store_failure_reports_to_sender_only() {
        let (registry, store, relay) = setup();
        let (a, mut ra) = registry.open_channel(8);
        let (b, mut rb) = registry.open_channel(8);
        registry.join("a", a.clone());
        registry.join("b", b);
        store.set_failing(true);

        let err = relay.submit(&a, Some("a"), Some("b"), Some("hi")).await;
        assert!(matches!(err, Err(RelayError::Persistence(_))));
        assert_eq!(ra.try_recv().unwrap(), OutboundEvent::error(SEND_FAILED));
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_message_to_self_is_only_acknowledged() {
        let (registry, _store, relay) = setup();
        let (a, mut ra) = registry.open_channel(8);
        registry.join("a", a.clone());

        let saved = relay.submit(&a, Some("a"), Some("a"), Some("note")).await.unwrap();
        assert_eq!(ra.try_recv().unwrap(), OutboundEvent::MessageSent(saved));
        assert!(ra.try_recv().is_err());
    }

    #[test]
    fn test_typing_requires_both_identities() {
        let (registry, _store, relay) = setup();
        let (a, _ra) = registry.open_channel(8);
        let (b, mut rb) = registry.open_channel(8);
        registry.join("b", b);

        assert!(!relay.relay_typing(&a, None, Some("b"), true));
        assert!(!relay.relay_typing(&a, Some("a"), Some(""), true));
        assert!(rb.try_recv().is_err());

        assert!(relay.relay_typing(&a, Some("a"), Some("b"), true));
        assert_eq!(rb.try_recv().unwrap(), OutboundEvent::typing("a", true));
    }
}
