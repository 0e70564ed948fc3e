use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use convo_live::{
    ConnectionState, ConversationSnapshot, ConversationStatus, Credential, CredentialSupplier,
    InboundFrame, LiveError, LiveTranscript, Message, Result, Subscription, Transport, Update,
};

// --- Fakes ---

#[derive(Default)]
struct FakeCredentials {
    calls: AtomicUsize,
    fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeCredentials {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The next fetch blocks until the returned handle is notified.
    fn hold_next(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }
}

#[async_trait]
impl CredentialSupplier for FakeCredentials {
    async fn fetch_credential(&self) -> Result<Credential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(LiveError::Credential("token endpoint returned 503".into()));
        }
        Ok(Credential(json!({ "token": format!("t{n}") })))
    }
}

struct FakeChannel {
    name: String,
    tx: Option<mpsc::Sender<InboundFrame>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct FakeTransport {
    channels: Mutex<Vec<FakeChannel>>,
}

impl FakeTransport {
    fn subscribe_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name == channel)
            .count()
    }

    /// Publishes on the newest subscription to `channel`. Returns false if
    /// nobody is listening anymore.
    fn publish(&self, channel: &str, name: &str, data: Value) -> bool {
        let channels = self.channels.lock().unwrap();
        let Some(sub) = channels.iter().rev().find(|c| c.name == channel) else {
            return false;
        };
        match &sub.tx {
            Some(tx) => tx
                .try_send(InboundFrame {
                    channel: channel.to_string(),
                    name: name.to_string(),
                    data,
                })
                .is_ok(),
            None => false,
        }
    }

    fn is_cancelled(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name == channel)
            .all(|c| c.cancel.is_cancelled())
    }

    /// Server-side close of every subscription to `channel`.
    fn close(&self, channel: &str) {
        for c in self.channels.lock().unwrap().iter_mut() {
            if c.name == channel {
                c.tx = None;
            }
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn subscribe(&self, _credential: Credential, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        self.channels.lock().unwrap().push(FakeChannel {
            name: channel.to_string(),
            tx: Some(tx),
            cancel: cancel.clone(),
        });
        Ok(Subscription::new(channel, rx, cancel))
    }
}

// --- Helpers ---

fn setup() -> (Arc<FakeCredentials>, Arc<FakeTransport>, LiveTranscript) {
    let credentials = Arc::new(FakeCredentials::default());
    let transport = Arc::new(FakeTransport::default());
    let live = LiveTranscript::new(credentials.clone(), transport.clone());
    (credentials, transport, live)
}

async fn next(live: &mut LiveTranscript) -> Update {
    tokio::time::timeout(Duration::from_secs(2), live.next_update())
        .await
        .expect("timed out waiting for update")
        .expect("live transcript has nothing to wait on")
}

fn message_json(id: &str, conversation: &str, second: u32) -> Value {
    json!({
        "id": id,
        "conversation_id": conversation,
        "role": "assistant",
        "content": format!("content of {id}"),
        "created_at": format!("2024-05-01T10:00:{second:02}Z"),
    })
}

fn snapshot(conversation: &str, messages: &[Value]) -> ConversationSnapshot {
    let mut s = ConversationSnapshot::new(conversation, ConversationStatus::Processing);
    s.messages = messages
        .iter()
        .map(|m| serde_json::from_value(m.clone()).unwrap())
        .collect();
    s
}

fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.clone()).collect()
}

// --- Scenarios ---

#[tokio::test]
async fn live_messages_merge_with_snapshot() {
    let (_credentials, transport, mut live) = setup();

    live.set_conversation(Some("A"));
    assert_eq!(live.state(), ConnectionState::Connecting);
    assert!(live.apply_snapshot(snapshot("A", &[message_json("m1", "A", 0)])));
    assert!(matches!(next(&mut live).await, Update::Connected));
    assert!(live.is_live());

    // New message after the snapshot
    assert!(transport.publish(
        "conversation:A",
        "message",
        json!({ "message": message_json("m2", "A", 1) })
    ));
    assert!(matches!(next(&mut live).await, Update::Transcript));
    assert_eq!(ids(&live.messages()), ["m1", "m2"]);

    // Live copy of a snapshot message is swallowed; the status is not
    transport.publish(
        "conversation:A",
        "message",
        json!({ "message": message_json("m1", "A", 0) }),
    );
    transport.publish(
        "conversation:A",
        "status",
        json!({ "message": "searching", "status": "searching" }),
    );
    assert!(matches!(next(&mut live).await, Update::Transcript));

    let messages = live.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(&ids(&messages)[..2], ["m1", "m2"]);
    assert!(messages[2].is_status());
    assert_eq!(messages[2].content, "searching");
}

#[tokio::test]
async fn switching_conversation_drops_old_events() {
    let (credentials, transport, mut live) = setup();

    live.set_conversation(Some("A"));
    assert!(matches!(next(&mut live).await, Update::Connected));
    transport.publish(
        "conversation:A",
        "message",
        json!({ "message": message_json("a1", "A", 0) }),
    );
    assert!(matches!(next(&mut live).await, Update::Transcript));

    live.set_conversation(Some("B"));
    assert_eq!(live.conversation_id(), Some("B"));
    assert!(live.messages().is_empty());
    assert!(transport.is_cancelled("conversation:A"));
    // Nobody listens on A anymore
    assert!(!transport.publish(
        "conversation:A",
        "message",
        json!({ "message": message_json("a2", "A", 1) })
    ));

    assert!(matches!(next(&mut live).await, Update::Connected));
    assert_eq!(credentials.calls(), 2);

    // An A message leaking onto B's channel is still not B's
    transport.publish(
        "conversation:B",
        "message",
        json!({ "message": message_json("a3", "A", 2) }),
    );
    transport.publish(
        "conversation:B",
        "message",
        json!({ "message": message_json("b1", "B", 3) }),
    );
    assert!(matches!(next(&mut live).await, Update::Transcript));
    assert_eq!(ids(&live.messages()), ["b1"]);

    // A snapshot fetched for A before the switch lands too late
    assert!(!live.apply_snapshot(snapshot("A", &[message_json("a1", "A", 0)])));
    assert_eq!(ids(&live.messages()), ["b1"]);
}

#[tokio::test]
async fn credential_failure_then_reconnect() {
    let (credentials, transport, mut live) = setup();
    credentials.fail.store(true, Ordering::SeqCst);

    live.set_conversation(Some("A"));
    match next(&mut live).await {
        Update::Failed(err) => assert!(matches!(err, LiveError::Credential(_))),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(live.state(), ConnectionState::Failed);
    assert!(!live.is_live());
    assert_eq!(transport.subscribe_count("conversation:A"), 0);

    credentials.fail.store(false, Ordering::SeqCst);
    assert!(live.reconnect());
    assert!(matches!(next(&mut live).await, Update::Connected));
    assert!(live.is_live());
    assert_eq!(credentials.calls(), 2);
    assert_eq!(transport.subscribe_count("conversation:A"), 1);
}

// --- Lifecycle ---

#[tokio::test]
async fn same_conversation_keeps_connection() {
    let (credentials, transport, mut live) = setup();

    live.set_conversation(Some("A"));
    live.set_conversation(Some("A"));
    assert!(matches!(next(&mut live).await, Update::Connected));
    live.set_conversation(Some("A"));
    assert!(!live.reconnect());

    assert_eq!(credentials.calls(), 1);
    assert_eq!(transport.subscribe_count("conversation:A"), 1);
    assert!(!transport.is_cancelled("conversation:A"));
}

#[tokio::test]
async fn stale_connect_outcome_is_discarded() {
    let (credentials, transport, mut live) = setup();
    let release = credentials.hold_next();

    live.set_conversation(Some("A"));
    while credentials.calls() == 0 {
        tokio::task::yield_now().await;
    }
    live.set_conversation(Some("B"));
    assert!(matches!(next(&mut live).await, Update::Connected));

    // A's attempt finishes late; its outcome must not surface.
    release.notify_one();
    let quiet = tokio::time::timeout(Duration::from_millis(200), live.next_update()).await;
    assert!(quiet.is_err(), "stale outcome produced an update");

    assert_eq!(transport.subscribe_count("conversation:A"), 1);
    assert!(transport.is_cancelled("conversation:A"));
    assert_eq!(live.conversation_id(), Some("B"));
    assert!(live.is_live());
}

#[tokio::test]
async fn completion_callback_runs_once_per_event() {
    let (_credentials, transport, mut live) = setup();
    let completed = Arc::new(Mutex::new(Vec::new()));
    let sink = completed.clone();
    live.on_complete(move |id, event| {
        sink.lock()
            .unwrap()
            .push((id.to_string(), event.opportunities_count));
    });

    live.set_conversation(Some("A"));
    assert!(matches!(next(&mut live).await, Update::Connected));

    transport.publish(
        "conversation:A",
        "complete",
        json!({ "goal_id": "g1", "opportunities_count": 7 }),
    );
    match next(&mut live).await {
        Update::Completed(event) => assert_eq!(event.goal_id.as_deref(), Some("g1")),
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(completed.lock().unwrap().as_slice(), [("A".to_string(), Some(7))]);

    transport.publish("conversation:A", "complete", json!({}));
    assert!(matches!(next(&mut live).await, Update::Completed(_)));
    assert_eq!(completed.lock().unwrap().len(), 2);
    // Completion never renders anything
    assert!(live.messages().is_empty());
}

#[tokio::test]
async fn malformed_events_are_skipped() {
    let (_credentials, transport, mut live) = setup();
    live.set_conversation(Some("A"));
    assert!(matches!(next(&mut live).await, Update::Connected));

    transport.publish("conversation:A", "message", json!({}));
    transport.publish("conversation:A", "message", json!({ "message": { "id": 3 } }));
    transport.publish("conversation:A", "status", json!({ "metadata": {} }));
    transport.publish("conversation:A", "typing", json!({ "user": "x" }));
    transport.publish(
        "conversation:A",
        "message",
        json!({ "message": message_json("m1", "A", 0) }),
    );

    assert!(matches!(next(&mut live).await, Update::Transcript));
    assert_eq!(ids(&live.messages()), ["m1"]);
}

#[tokio::test]
async fn server_close_reports_closed_and_allows_reconnect() {
    let (_credentials, transport, mut live) = setup();
    live.set_conversation(Some("A"));
    assert!(matches!(next(&mut live).await, Update::Connected));

    transport.close("conversation:A");
    assert!(matches!(next(&mut live).await, Update::Closed));
    assert_eq!(live.state(), ConnectionState::Failed);
    assert!(!live.is_live());

    assert!(live.reconnect());
    assert!(matches!(next(&mut live).await, Update::Connected));
    assert_eq!(transport.subscribe_count("conversation:A"), 2);
}

#[tokio::test]
async fn shutdown_releases_channel() {
    let (_credentials, transport, mut live) = setup();
    live.set_conversation(Some("A"));
    assert!(matches!(next(&mut live).await, Update::Connected));

    live.set_conversation(None);
    assert_eq!(live.state(), ConnectionState::Idle);
    assert!(live.conversation_id().is_none());
    assert!(transport.is_cancelled("conversation:A"));
    assert!(live.next_update().await.is_none());
}

#[tokio::test]
async fn drop_releases_channel() {
    let (_credentials, transport, mut live) = setup();
    live.set_conversation(Some("A"));
    assert!(matches!(next(&mut live).await, Update::Connected));

    drop(live);
    assert!(transport.is_cancelled("conversation:A"));
}
