use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_server::chat::{ChannelSession, ConnectionRegistry, SessionLifecycle};
use relay_server::models::{
    MessageStats, PersistedMessage, PresenceRecord, MAX_MESSAGE_LEN, RULE_MESSAGE_REQUIRED,
};
use relay_server::protocol::{InboundEvent, OutboundEvent, SendMessagePayload, TypingPayload};
use relay_server::store::{MemoryGateway, PersistenceGateway, StoreResult};
use tokio::sync::mpsc::Receiver;

struct Harness {
    lifecycle: SessionLifecycle,
    store: Arc<MemoryGateway>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryGateway::new());
        Self::over(store.clone(), store)
    }

    fn over(store: Arc<MemoryGateway>, gateway: Arc<dyn PersistenceGateway>) -> Self {
        let lifecycle = SessionLifecycle::new(Arc::new(ConnectionRegistry::new()), gateway, 64);
        Self { lifecycle, store }
    }

    async fn joined(&self, user_id: &str) -> (ChannelSession, Receiver<OutboundEvent>) {
        let (mut session, rx) = self.lifecycle.open();
        self.lifecycle
            .dispatch(&mut session, InboundEvent::Join(user_id.to_string()))
            .await;
        (session, rx)
    }

    async fn send(&self, session: &mut ChannelSession, from: &str, to: &str, body: &str) {
        self.lifecycle
            .dispatch(
                session,
                InboundEvent::SendMessage(SendMessagePayload {
                    sender_id: Some(from.to_string()),
                    receiver_id: Some(to.to_string()),
                    message: Some(body.to_string()),
                }),
            )
            .await;
    }
}

/// Holds every offline presence write for `delay` before storing it.
struct SlowOfflineGateway {
    inner: Arc<MemoryGateway>,
    delay: Duration,
}

#[async_trait]
impl PersistenceGateway for SlowOfflineGateway {
    async fn save_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
    ) -> StoreResult<PersistedMessage> {
        self.inner.save_message(sender_id, receiver_id, body).await
    }

    async fn set_presence(
        &self,
        user_id: &str,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if !is_online {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.set_presence(user_id, is_online, at).await
    }

    async fn conversation(&self, a: &str, b: &str) -> StoreResult<Vec<PersistedMessage>> {
        self.inner.conversation(a, b).await
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<PersistedMessage>> {
        self.inner.recent_messages(user_id, limit).await
    }

    async fn message_stats(&self, user_id: &str) -> StoreResult<MessageStats> {
        self.inner.message_stats(user_id).await
    }

    async fn delete_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<PersistedMessage>> {
        self.inner.delete_message(message_id, user_id).await
    }

    async fn presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        self.inner.presence(user_id).await
    }

    async fn online_users(&self) -> StoreResult<Vec<PresenceRecord>> {
        self.inner.online_users().await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

fn drain(rx: &mut Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_round_trip_between_live_users() {
    let h = Harness::new();
    let (mut a, mut a_rx) = h.joined("A").await;
    let (_b, mut b_rx) = h.joined("B").await;
    drain(&mut a_rx);
    drain(&mut b_rx);

    h.send(&mut a, "A", "B", "hi").await;

    let received = drain(&mut b_rx);
    let sent = drain(&mut a_rx);
    assert_eq!(received.len(), 1);
    assert_eq!(sent.len(), 1);

    let (OutboundEvent::ReceiveMessage(got), OutboundEvent::MessageSent(ack)) =
        (&received[0], &sent[0])
    else {
        panic!("unexpected events: {:?} / {:?}", received, sent);
    };
    assert_eq!(got.message, "hi");
    assert_eq!(got.sender_id, "A");
    assert_eq!(ack.id, got.id);
    assert_eq!(ack.message, got.message);
}

#[tokio::test]
async fn test_offline_receiver_gets_stored_message_only() {
    let h = Harness::new();
    let (mut a, mut a_rx) = h.joined("A").await;
    drain(&mut a_rx);

    h.send(&mut a, "A", "B", "are you there?").await;
    assert!(matches!(drain(&mut a_rx).as_slice(), [OutboundEvent::MessageSent(_)]));

    // B connects later: the message is in history, nothing is replayed live.
    let (_b, mut b_rx) = h.joined("B").await;
    let events = drain(&mut b_rx);
    assert_eq!(events, vec![OutboundEvent::status("B", true)]);

    let history = h.store.conversation("B", "A").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "are you there?");
}

#[tokio::test]
async fn test_blank_message_is_rejected_without_side_effects() {
    let h = Harness::new();
    let (mut a, mut a_rx) = h.joined("A").await;
    let (_b, mut b_rx) = h.joined("B").await;
    drain(&mut a_rx);
    drain(&mut b_rx);

    h.send(&mut a, "A", "B", "   \n\t").await;

    assert_eq!(h.store.message_count(), 0);
    assert!(drain(&mut b_rx).is_empty());
    match drain(&mut a_rx).as_slice() {
        [OutboundEvent::Error(notice)] => assert!(notice.message.contains(RULE_MESSAGE_REQUIRED)),
        other => panic!("unexpected events: {:?}", other),
    }

    let err = h
        .lifecycle
        .relay()
        .record(Some("A"), Some("B"), Some(""))
        .await
        .unwrap_err();
    assert!(err.to_string().contains(RULE_MESSAGE_REQUIRED));
}

#[tokio::test]
async fn test_length_limit_boundary() {
    let h = Harness::new();
    let relay = h.lifecycle.relay();

    let exact = "a".repeat(MAX_MESSAGE_LEN);
    assert!(relay.record(Some("A"), Some("B"), Some(&exact)).await.is_ok());

    let over = "a".repeat(MAX_MESSAGE_LEN + 1);
    assert!(relay.record(Some("A"), Some("B"), Some(&over)).await.is_err());
    assert_eq!(h.store.message_count(), 1);
}

#[tokio::test]
async fn test_typing_to_absent_receiver_is_dropped() {
    let h = Harness::new();
    let (mut a, mut a_rx) = h.joined("A").await;
    drain(&mut a_rx);

    h.lifecycle
        .dispatch(
            &mut a,
            InboundEvent::Typing(TypingPayload {
                sender_id: Some("A".into()),
                receiver_id: Some("B".into()),
                is_typing: true,
            }),
        )
        .await;

    assert!(drain(&mut a_rx).is_empty());
}

#[tokio::test]
async fn test_typing_reaches_receiver_only_and_skips_store() {
    let h = Harness::new();
    let (mut a, mut a_rx) = h.joined("A").await;
    let (_b, mut b_rx) = h.joined("B").await;
    let (_c, mut c_rx) = h.joined("C").await;
    drain(&mut a_rx);
    drain(&mut b_rx);
    drain(&mut c_rx);
    h.store.set_failing(true);

    h.lifecycle
        .dispatch(
            &mut a,
            InboundEvent::Typing(TypingPayload {
                sender_id: Some("A".into()),
                receiver_id: Some("B".into()),
                is_typing: true,
            }),
        )
        .await;

    assert_eq!(drain(&mut b_rx), vec![OutboundEvent::typing("A", true)]);
    assert!(drain(&mut a_rx).is_empty());
    assert!(drain(&mut c_rx).is_empty());
}

#[tokio::test]
async fn test_presence_is_broadcast_to_everyone() {
    let h = Harness::new();
    let (_b, mut b_rx) = h.joined("B").await;
    let (_c, mut c_rx) = h.joined("C").await;
    drain(&mut b_rx);
    drain(&mut c_rx);

    let (mut a, mut a_rx) = h.joined("A").await;
    let online = OutboundEvent::status("A", true);
    assert_eq!(drain(&mut a_rx), vec![online.clone()]);
    assert_eq!(drain(&mut b_rx), vec![online.clone()]);
    assert_eq!(drain(&mut c_rx), vec![online]);

    h.lifecycle.close(&mut a).await;
    let offline = OutboundEvent::status("A", false);
    assert_eq!(drain(&mut b_rx), vec![offline.clone()]);
    assert_eq!(drain(&mut c_rx), vec![offline]);

    let record = h.store.presence("A").await.unwrap().unwrap();
    assert!(!record.is_online);
}

#[tokio::test]
async fn test_messages_keep_submission_order() {
    let h = Harness::new();
    let (mut a, _a_rx) = h.joined("A").await;

    for body in ["m1", "m2", "m3"] {
        h.send(&mut a, "A", "B", body).await;
    }

    let order: Vec<String> = h
        .store
        .conversation("A", "B")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.message)
        .collect();
    assert_eq!(order, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_rejoin_evicts_old_channel_silently() {
    let h = Harness::new();
    let (mut old, mut old_rx) = h.joined("A").await;
    let (_b, mut b_rx) = h.joined("B").await;
    drain(&mut old_rx);
    drain(&mut b_rx);

    let (_new, mut new_rx) = h.joined("A").await;
    drain(&mut new_rx);
    // The evicted channel is no longer registered: it hears nothing more.
    assert!(drain(&mut old_rx).is_empty());
    assert_eq!(drain(&mut b_rx), vec![OutboundEvent::status("A", true)]);

    // Closing the evicted channel does not take A offline.
    h.lifecycle.close(&mut old).await;
    assert!(h.lifecycle.registry().is_online("A"));
    assert!(drain(&mut b_rx).is_empty());

    // Messages for A now reach the newer channel.
    let (mut b2, _b2_rx) = h.joined("B").await;
    h.send(&mut b2, "B", "A", "ping").await;
    assert!(matches!(
        drain(&mut new_rx).as_slice(),
        [OutboundEvent::UserStatusUpdate(_), OutboundEvent::ReceiveMessage(_)]
    ));
}

#[tokio::test]
async fn test_store_outage_reports_error_and_delivers_nothing() {
    let h = Harness::new();
    let (mut a, mut a_rx) = h.joined("A").await;
    let (_b, mut b_rx) = h.joined("B").await;
    drain(&mut a_rx);
    drain(&mut b_rx);
    h.store.set_failing(true);

    h.send(&mut a, "A", "B", "lost").await;

    assert_eq!(
        drain(&mut a_rx),
        vec![OutboundEvent::error("Failed to send message")]
    );
    assert!(drain(&mut b_rx).is_empty());

    // The channel keeps working once the store is back.
    h.store.set_failing(false);
    h.send(&mut a, "A", "B", "found").await;
    assert!(matches!(drain(&mut b_rx).as_slice(), [OutboundEvent::ReceiveMessage(_)]));
}

#[tokio::test]
async fn test_sender_gone_mid_send_still_persists() {
    let h = Harness::new();
    let (mut a, a_rx) = h.joined("A").await;
    let (_b, mut b_rx) = h.joined("B").await;
    drain(&mut b_rx);
    drop(a_rx);

    h.send(&mut a, "A", "B", "parting words").await;

    assert_eq!(h.store.message_count(), 1);
    assert!(matches!(drain(&mut b_rx).as_slice(), [OutboundEvent::ReceiveMessage(_)]));
}

#[tokio::test]
async fn test_concurrent_channels_for_many_users() {
    let h = Arc::new(Harness::new());
    let mut tasks = Vec::new();
    for i in 0..16 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let user = format!("user-{}", i);
            let (mut session, _rx) = h.joined(&user).await;
            h.send(&mut session, &user, "hub", "hello").await;
            h.lifecycle.close(&mut session).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(h.lifecycle.registry().online_count(), 0);
    assert_eq!(h.store.message_count(), 16);
    assert!(h.store.online_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_with_store_down_still_takes_user_offline() {
    let h = Harness::new();
    let (mut a, _a_rx) = h.joined("A").await;
    let (_b, mut b_rx) = h.joined("B").await;
    drain(&mut b_rx);
    h.store.set_failing(true);

    h.lifecycle.close(&mut a).await;

    assert!(!h.lifecycle.registry().is_online("A"));
    assert_eq!(drain(&mut b_rx), vec![OutboundEvent::status("A", false)]);
}

#[tokio::test]
async fn test_rejoin_during_slow_disconnect_stays_online() {
    let store = Arc::new(MemoryGateway::new());
    let gateway = Arc::new(SlowOfflineGateway {
        inner: store.clone(),
        delay: Duration::from_millis(200),
    });
    let h = Arc::new(Harness::over(store, gateway));

    let (mut old, _old_rx) = h.joined("alice").await;
    let (_watcher, mut watcher_rx) = h.joined("watcher").await;
    drain(&mut watcher_rx);

    let closing = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.lifecycle.close(&mut old).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (_new, _new_rx) = h.joined("alice").await;
    closing.await.unwrap();

    assert!(h.lifecycle.registry().is_online("alice"));
    let stored = h.store.presence("alice").await.unwrap().unwrap();
    assert!(stored.is_online);
    assert_eq!(drain(&mut watcher_rx), vec![OutboundEvent::status("alice", true)]);
}
