use std::time::Duration;

use super::*;
use peer_transport::loopback::{DeniedMediaProvider, FixedMediaProvider, LoopbackNetwork};
use storage::{LoadedHistory, MemoryStore};
use tokio::time::timeout;

fn session_with(
    network: &LoopbackNetwork,
    media: Arc<dyn MediaProvider>,
    store: Arc<dyn HistoryStore>,
) -> Arc<ChatSession> {
    ChatSession::new(
        Arc::new(network.clone()),
        media,
        store,
        IceConfig::default(),
    )
}

fn chat_session(network: &LoopbackNetwork) -> (Arc<ChatSession>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let session = session_with(
        network,
        Arc::new(FixedMediaProvider::default()),
        store.clone(),
    );
    (session, store)
}

async fn wait_for<F, T>(receiver: &mut broadcast::Receiver<ClientEvent>, mut pick: F) -> T
where
    F: FnMut(ClientEvent) -> Option<T>,
{
    loop {
        let event = timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("event timeout")
            .expect("event stream");
        if let Some(value) = pick(event) {
            return value;
        }
    }
}

/// Connects `a` to `b` and waits until both sides have bound the channel.
async fn connect_pair(
    a: &Arc<ChatSession>,
    a_events: &mut broadcast::Receiver<ClientEvent>,
    b_code: &PeerCode,
    b_events: &mut broadcast::Receiver<ClientEvent>,
) {
    a.connect(b_code.as_str()).await.expect("connect");
    wait_for(a_events, |event| match event {
        ClientEvent::PeerConnected { remote } => Some(remote),
        _ => None,
    })
    .await;
    wait_for(b_events, |event| match event {
        ClientEvent::PeerConnected { remote } => Some(remote),
        _ => None,
    })
    .await;
}

struct FaultyStore;

impl HistoryStore for FaultyStore {
    fn save_history(&self, _records: &[ChatMessage]) -> Result<(), StorageError> {
        Ok(())
    }

    fn load_history(&self) -> LoadedHistory {
        LoadedHistory {
            messages: Vec::new(),
            fault: Some(HistoryFault::Malformed {
                detail: "unexpected token".to_string(),
            }),
        }
    }

    fn save_theme(&self, _theme: Theme) -> Result<(), StorageError> {
        Ok(())
    }

    fn load_theme(&self) -> Theme {
        Theme::Light
    }
}

#[tokio::test]
async fn open_announces_identity_and_replays_history() {
    let network = LoopbackNetwork::new();
    let store = Arc::new(MemoryStore::default());
    let seeded = vec![ChatMessage {
        text: "hi".to_string(),
        direction: MessageDirection::Sent,
        time: "10:00:00".to_string(),
    }];
    store.save_history(&seeded).expect("seed");

    let session = session_with(
        &network,
        Arc::new(FixedMediaProvider::default()),
        store.clone(),
    );
    let mut events = session.subscribe_events();

    let code = session.open().await.expect("open");
    assert_eq!(code.as_str().len(), 6);
    assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));

    let announced = wait_for(&mut events, |event| match event {
        ClientEvent::IdentityReady { code } => Some(code),
        _ => None,
    })
    .await;
    assert_eq!(announced, code);

    let (messages, fault) = wait_for(&mut events, |event| match event {
        ClientEvent::HistoryLoaded { messages, fault } => Some((messages, fault)),
        _ => None,
    })
    .await;
    assert_eq!(messages, seeded);
    assert_eq!(fault, None);
    assert_eq!(session.history().await, seeded);
}

#[tokio::test]
async fn history_fault_is_surfaced_on_open() {
    let network = LoopbackNetwork::new();
    let session = session_with(
        &network,
        Arc::new(FixedMediaProvider::default()),
        Arc::new(FaultyStore),
    );
    let mut events = session.subscribe_events();
    session.open().await.expect("open");

    let (messages, fault) = wait_for(&mut events, |event| match event {
        ClientEvent::HistoryLoaded { messages, fault } => Some((messages, fault)),
        _ => None,
    })
    .await;
    assert!(messages.is_empty());
    assert!(matches!(fault, Some(HistoryFault::Malformed { .. })));
}

#[tokio::test]
async fn connected_peers_exchange_messages_and_persist_them() {
    let network = LoopbackNetwork::new();
    let (a, a_store) = chat_session(&network);
    let (b, b_store) = chat_session(&network);
    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    a.open().await.expect("open a");
    let b_code = b.open().await.expect("open b");
    connect_pair(&a, &mut a_events, &b_code, &mut b_events).await;

    let sent = a.send_message("  hi there  ").await.expect("send");
    assert_eq!(sent.text, "hi there");
    assert_eq!(sent.direction, MessageDirection::Sent);

    let received = wait_for(&mut b_events, |event| match event {
        ClientEvent::MessageAppended(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(received.text, "hi there");
    assert_eq!(received.direction, MessageDirection::Received);
    assert_eq!(received.time, sent.time);

    let reply = b.send_message("hello back").await.expect("reply");
    let echoed = wait_for(&mut a_events, |event| match event {
        ClientEvent::MessageAppended(record)
            if record.direction == MessageDirection::Received =>
        {
            Some(record)
        }
        _ => None,
    })
    .await;
    assert_eq!(echoed.text, reply.text);

    assert_eq!(a_store.load_history().messages.len(), 2);
    assert_eq!(b_store.load_history().messages.len(), 2);
    assert_eq!(
        b_store.load_history().messages[0].direction,
        MessageDirection::Received
    );
}

#[tokio::test]
async fn empty_message_is_rejected_without_record_or_write() {
    let network = LoopbackNetwork::new();
    let (a, a_store) = chat_session(&network);
    let (b, _) = chat_session(&network);
    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    a.open().await.expect("open a");
    let b_code = b.open().await.expect("open b");
    connect_pair(&a, &mut a_events, &b_code, &mut b_events).await;

    let err = a.send_message("   ").await.err().expect("reject");
    assert!(matches!(err, ChatError::EmptyMessage));
    assert!(a_store.load_history().messages.is_empty());
    assert!(a.history().await.is_empty());
}

#[tokio::test]
async fn sending_without_a_connection_is_a_typed_error() {
    let network = LoopbackNetwork::new();
    let (a, a_store) = chat_session(&network);
    a.open().await.expect("open");

    let err = a.send_message("hello?").await.err().expect("reject");
    assert!(matches!(err, ChatError::NotConnected));
    assert!(a_store.load_history().messages.is_empty());
}

#[tokio::test]
async fn connect_validates_the_remote_code() {
    let network = LoopbackNetwork::new();
    let (a, _) = chat_session(&network);
    a.open().await.expect("open");

    let err = a.connect("   ").await.err().expect("reject empty");
    assert!(matches!(err, ChatError::InvalidCode(CodeError::Empty)));

    let err = a.connect("12ab56").await.err().expect("reject malformed");
    assert!(matches!(
        err,
        ChatError::InvalidCode(CodeError::Malformed { .. })
    ));
}

#[tokio::test]
async fn connect_before_open_is_rejected() {
    let network = LoopbackNetwork::new();
    let (a, _) = chat_session(&network);

    let err = a.connect("123456").await.err().expect("reject");
    assert!(matches!(err, ChatError::NotOpen));
}

#[tokio::test]
async fn outbound_connect_establishes_the_media_call() {
    let network = LoopbackNetwork::new();
    // One provider for both sessions so the two stream ids are distinct.
    let provider = Arc::new(FixedMediaProvider::default());
    let a = session_with(&network, provider.clone(), Arc::new(MemoryStore::default()));
    let b = session_with(&network, provider, Arc::new(MemoryStore::default()));
    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    a.open().await.expect("open a");
    let b_code = b.open().await.expect("open b");
    connect_pair(&a, &mut a_events, &b_code, &mut b_events).await;

    // Caller sees the callee's stream, callee auto-answers and sees the
    // caller's.
    let remote_at_a = wait_for(&mut a_events, |event| match event {
        ClientEvent::RemoteStreamReady(stream) => Some(stream),
        _ => None,
    })
    .await;
    let remote_at_b = wait_for(&mut b_events, |event| match event {
        ClientEvent::RemoteStreamReady(stream) => Some(stream),
        _ => None,
    })
    .await;
    assert_ne!(remote_at_a.stream_id, remote_at_b.stream_id);
}

#[tokio::test]
async fn denied_local_media_degrades_to_chat_only() {
    let network = LoopbackNetwork::new();
    let a_store = Arc::new(MemoryStore::default());
    let a = session_with(&network, Arc::new(DeniedMediaProvider), a_store.clone());
    let (b, b_store) = chat_session(&network);
    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    a.open().await.expect("open a");
    let b_code = b.open().await.expect("open b");
    a.connect(b_code.as_str()).await.expect("connect succeeds");

    let failure = wait_for(&mut a_events, |event| match event {
        ClientEvent::MediaFailed(err) => Some(err),
        _ => None,
    })
    .await;
    assert_eq!(failure, MediaError::PermissionDenied);

    // The data channel survives the failed media leg.
    wait_for(&mut b_events, |event| match event {
        ClientEvent::PeerConnected { remote } => Some(remote),
        _ => None,
    })
    .await;
    a.send_message("chat still works").await.expect("send");
    let received = wait_for(&mut b_events, |event| match event {
        ClientEvent::MessageAppended(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(received.text, "chat still works");
    assert_eq!(a_store.load_history().messages.len(), 1);
    assert_eq!(b_store.load_history().messages.len(), 1);
}

#[tokio::test]
async fn denied_callee_media_abandons_the_answer() {
    let network = LoopbackNetwork::new();
    let (a, _) = chat_session(&network);
    let b_store = Arc::new(MemoryStore::default());
    let b = session_with(&network, Arc::new(DeniedMediaProvider), b_store.clone());
    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    a.open().await.expect("open a");
    let b_code = b.open().await.expect("open b");
    connect_pair(&a, &mut a_events, &b_code, &mut b_events).await;

    let failure = wait_for(&mut b_events, |event| match event {
        ClientEvent::MediaFailed(err) => Some(err),
        _ => None,
    })
    .await;
    assert_eq!(failure, MediaError::PermissionDenied);

    // Chat is unaffected by the unanswered call.
    a.send_message("anyone home?").await.expect("send");
    let received = wait_for(&mut b_events, |event| match event {
        ClientEvent::MessageAppended(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(received.text, "anyone home?");
}

#[tokio::test]
async fn theme_toggles_persist_and_round_trip() {
    let network = LoopbackNetwork::new();
    let (session, store) = chat_session(&network);
    let mut events = session.subscribe_events();

    assert_eq!(session.theme().await, Theme::Light);
    let dark = session.toggle_theme().await.expect("toggle");
    assert_eq!(dark, Theme::Dark);
    assert_eq!(store.load_theme(), Theme::Dark);

    let toggled = wait_for(&mut events, |event| match event {
        ClientEvent::ThemeChanged(theme) => Some(theme),
        _ => None,
    })
    .await;
    assert_eq!(toggled, Theme::Dark);

    let light = session.toggle_theme().await.expect("toggle back");
    assert_eq!(light, Theme::Light);
    assert_eq!(store.load_theme(), Theme::Light);
}

#[tokio::test]
async fn closing_a_session_notifies_the_peer() {
    let network = LoopbackNetwork::new();
    let (a, _) = chat_session(&network);
    let (b, _) = chat_session(&network);
    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    a.open().await.expect("open a");
    let b_code = b.open().await.expect("open b");
    connect_pair(&a, &mut a_events, &b_code, &mut b_events).await;

    a.close().await.expect("close");
    let remote = wait_for(&mut b_events, |event| match event {
        ClientEvent::PeerDisconnected { remote } => Some(remote),
        _ => None,
    })
    .await;
    assert_eq!(remote, a.local_code().await.expect("code kept"));
}
