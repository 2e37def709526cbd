//! End-to-end engine tests against an in-memory transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use waba_connect_engine::{
    EngineConfig, EngineError, Lead, MessageStatus, MessageTransport, RawMessage, Result,
    SyncEngine,
};

/// In-memory provider double: a swappable collection plus send accounting.
struct MockTransport {
    messages: Mutex<Vec<RawMessage>>,
    sent: Mutex<Vec<(String, String)>>,
    fail_send: AtomicBool,
    fetches: AtomicUsize,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            fail_send: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        })
    }

    fn set_messages(&self, records: Vec<RawMessage>) {
        if let Ok(mut guard) = self.messages.lock() {
            *guard = records;
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn fetch_messages(&self) -> Result<Vec<RawMessage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .messages
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default())
    }

    async fn send_message(&self, phone: &str, body: &str) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(EngineError::Transport(
                "recipient blocked the account".to_string(),
            ));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((phone.to_string(), body.to_string()));
        }
        Ok(())
    }
}

fn incoming(id: &str, from: &str, body: &str, ts: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        from: Some(from.to_string()),
        body: body.to_string(),
        status: MessageStatus::Received,
        timestamp: ts,
        source_account_id: "acct-1".to_string(),
        ..Default::default()
    }
}

fn outgoing(id: &str, to: &str, body: &str, ts: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        to: Some(to.to_string()),
        body: body.to_string(),
        status: MessageStatus::Sent,
        timestamp: ts,
        source_account_id: "acct-1".to_string(),
        ..Default::default()
    }
}

fn engine_with(transport: &Arc<MockTransport>) -> SyncEngine {
    SyncEngine::new(
        Arc::clone(transport) as Arc<dyn MessageTransport>,
        EngineConfig {
            poll_interval: Duration::from_millis(25),
            reconcile_delay: Duration::from_millis(10),
            default_account: Some("acct-1".to_string()),
        },
    )
}

#[tokio::test]
async fn initial_load_aggregates_threads_and_unread() {
    let transport = MockTransport::new();
    transport.set_messages(vec![
        incoming("m1", "49170000001", "hi", 1),
        outgoing("m2", "49170000001", "hello", 2),
    ]);

    let engine = engine_with(&transport);
    engine.refresh_now().await;

    let conversations = engine.conversations().await;
    assert_eq!(conversations.len(), 1);
    let conversation = &conversations[0];
    assert_eq!(conversation.key, "49170000001");
    let bodies: Vec<&str> = conversation
        .messages
        .iter()
        .map(|m| m.body.as_str())
        .collect();
    assert_eq!(bodies, vec!["hi", "hello"]);
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(engine.total_unread().await, 1);
}

#[tokio::test]
async fn optimistic_send_lifecycle_to_new_conversation() {
    let transport = MockTransport::new();
    let engine = engine_with(&transport);
    engine.refresh_now().await;

    // No prior conversation for this number.
    assert!(engine.conversation("49170000002").await.is_none());

    engine.send("49170000002", "test").await.unwrap();

    // Synchronously visible: one conversation, exactly one pending entry,
    // and it is the last message.
    let conversation = engine.conversation("49170000002").await.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert!(conversation.messages[0].pending);
    assert_eq!(
        conversation.last_message.as_ref().map(|m| m.pending),
        Some(true)
    );
    assert_eq!(transport.sent_count(), 1);

    // The provider now returns the authoritative message; a refresh must
    // supersede the pending entry, leaving exactly one message.
    transport.set_messages(vec![outgoing(
        "srv-1",
        "49170000002",
        "test",
        waba_connect_engine::now_millis(),
    )]);
    engine.refresh_now().await;

    let conversation = engine.conversation("49170000002").await.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert!(!conversation.messages[0].pending);
    assert_eq!(conversation.messages[0].id, "srv-1");
}

#[tokio::test]
async fn rejected_send_rolls_back_the_optimistic_append() {
    let transport = MockTransport::new();
    transport.set_messages(vec![incoming("m1", "49170000003", "hi", 1)]);

    let engine = engine_with(&transport);
    engine.refresh_now().await;
    transport.fail_send.store(true, Ordering::SeqCst);

    let result = engine.send("49170000003", "will fail").await;
    match result {
        Err(EngineError::SendRejected(reason)) => {
            assert!(reason.contains("recipient blocked"));
        }
        other => panic!("expected SendRejected, got {:?}", other.err()),
    }

    // Only the authoritative message remains.
    let conversation = engine.conversation("49170000003").await.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].body, "hi");
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn lead_seeds_an_empty_conversation_that_survives_refreshes() {
    let transport = MockTransport::new();
    let engine = engine_with(&transport);
    engine.refresh_now().await;

    engine
        .start_conversation(&Lead {
            name: "Nia".to_string(),
            phone: "+49 170 000 0004".to_string(),
        })
        .await
        .unwrap();

    let conversation = engine.conversation("491700000004").await.unwrap();
    assert!(conversation.messages.is_empty());
    assert_eq!(conversation.display_name, "Nia");
    assert!(conversation.last_message.is_some());
    assert_eq!(conversation.unread_count, 0);

    // Still there after an empty refresh.
    engine.refresh_now().await;
    assert!(engine.conversation("491700000004").await.is_some());

    // Real traffic adopts the thread and keeps the lead name.
    transport.set_messages(vec![incoming("m1", "491700000004", "hello", 100)]);
    engine.refresh_now().await;
    let conversation = engine.conversation("491700000004").await.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.display_name, "Nia");
}

#[tokio::test]
async fn seeded_conversation_keeps_a_stable_timestamp_across_refreshes() {
    let transport = MockTransport::new();
    let engine = engine_with(&transport);
    engine.refresh_now().await;

    engine
        .start_conversation(&Lead {
            name: "Ada".to_string(),
            phone: "49170000008".to_string(),
        })
        .await
        .unwrap();
    let seeded_at = engine
        .conversation("49170000008")
        .await
        .unwrap()
        .last_timestamp();

    // Rebuilds on identical input must not move the seed.
    engine.refresh_now().await;
    engine.refresh_now().await;
    assert_eq!(
        engine
            .conversation("49170000008")
            .await
            .unwrap()
            .last_timestamp(),
        seeded_at
    );

    // A thread with newer traffic sorts above the seed.
    transport.set_messages(vec![incoming(
        "m1",
        "49170000009",
        "hi",
        waba_connect_engine::now_millis() + 1_000,
    )]);
    engine.refresh_now().await;
    let keys: Vec<String> = engine
        .conversations()
        .await
        .iter()
        .map(|c| c.key.clone())
        .collect();
    assert_eq!(keys, vec!["49170000009", "49170000008"]);
}

#[tokio::test]
async fn invalid_phone_is_rejected_up_front() {
    let transport = MockTransport::new();
    let engine = engine_with(&transport);

    assert!(matches!(
        engine.send("not a number", "hi").await,
        Err(EngineError::InvalidPhone(_))
    ));
    assert!(matches!(
        engine
            .start_conversation(&Lead {
                name: "X".to_string(),
                phone: "---".to_string(),
            })
            .await,
        Err(EngineError::InvalidPhone(_))
    ));
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn subscription_sees_optimistic_and_refresh_changes() {
    let transport = MockTransport::new();
    let engine = engine_with(&transport);
    let mut revisions = engine.subscribe();
    let before = *revisions.borrow();

    transport.set_messages(vec![incoming("m1", "49170000005", "hi", 1)]);
    engine.refresh_now().await;
    revisions.changed().await.unwrap();
    assert!(*revisions.borrow() > before);

    let mid = *revisions.borrow();
    engine.send("49170000005", "reply").await.unwrap();
    revisions.changed().await.unwrap();
    assert!(*revisions.borrow() > mid);
}

#[tokio::test]
async fn polling_loop_refreshes_until_stopped() {
    let transport = MockTransport::new();
    transport.set_messages(vec![incoming("m1", "49170000006", "hi", 1)]);

    let engine = engine_with(&transport);
    engine.start();
    assert!(engine.is_running());

    tokio::time::sleep(Duration::from_millis(120)).await;
    engine.stop();
    assert!(!engine.is_running());

    let polled = transport.fetches.load(Ordering::SeqCst);
    assert!(polled >= 2, "expected at least two poll cycles, got {polled}");
    assert_eq!(engine.conversations().await.len(), 1);

    // No further fetches once stopped (allow one in-flight tick to land).
    tokio::time::sleep(Duration::from_millis(40)).await;
    let frozen = transport.fetches.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(transport.fetches.load(Ordering::SeqCst), frozen);
}

#[tokio::test]
async fn reconciling_refresh_fires_after_successful_send() {
    let transport = MockTransport::new();
    let engine = engine_with(&transport);
    engine.refresh_now().await;
    let before = transport.fetches.load(Ordering::SeqCst);

    transport.set_messages(vec![outgoing(
        "srv-9",
        "49170000007",
        "ping",
        waba_connect_engine::now_millis(),
    )]);
    engine.send("49170000007", "ping").await.unwrap();

    // The post-send refresh is delayed by reconcile_delay (10 ms here).
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(transport.fetches.load(Ordering::SeqCst) > before);

    let conversation = engine.conversation("49170000007").await.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert!(!conversation.messages[0].pending);
}
