//! Event glue between the external connection library, durable history, and
//! whatever renders the conversation.

use std::sync::Arc;

use peer_transport::{
    CallEvent, DataChannel, DataChannelEvent, EndpointEvent, EndpointOptions, IceConfig,
    IncomingCall, MediaCall, MediaConstraints, MediaProvider, MediaStream, PeerConnector,
    PeerEndpoint,
};
use shared::{
    domain::{ChatMessage, MessageDirection, PeerCode, Theme},
    error::{CodeError, MediaError, TransportError},
    protocol::WireMessage,
};
use storage::{HistoryFault, HistoryStore, StorageError};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

pub mod transcript;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error(transparent)]
    InvalidCode(#[from] CodeError),
    #[error("no active peer connection")]
    NotConnected,
    #[error("session is not open")]
    NotOpen,
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything a consumer can observe about a session, in arrival order.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    IdentityReady {
        code: PeerCode,
    },
    HistoryLoaded {
        messages: Vec<ChatMessage>,
        fault: Option<HistoryFault>,
    },
    PeerConnected {
        remote: PeerCode,
    },
    PeerDisconnected {
        remote: PeerCode,
    },
    MessageAppended(ChatMessage),
    LocalStreamReady(MediaStream),
    RemoteStreamReady(MediaStream),
    MediaFailed(MediaError),
    CallEnded,
    ThemeChanged(Theme),
    Error(String),
}

/// Explicit session context; replaces the ambient globals of a typical
/// browser rendering of this flow.
#[derive(Default)]
struct SessionContext {
    endpoint: Option<Arc<dyn PeerEndpoint>>,
    endpoint_pump: Option<JoinHandle<()>>,
    local_code: Option<PeerCode>,
    channel: Option<ActiveChannel>,
    call: Option<ActiveCall>,
    history: Vec<ChatMessage>,
    theme: Theme,
}

struct ActiveChannel {
    channel: Arc<dyn DataChannel>,
    pump: JoinHandle<()>,
}

struct ActiveCall {
    call: Arc<dyn MediaCall>,
    pump: JoinHandle<()>,
}

pub struct ChatSession {
    connector: Arc<dyn PeerConnector>,
    media: Arc<dyn MediaProvider>,
    store: Arc<dyn HistoryStore>,
    ice: IceConfig,
    inner: Mutex<SessionContext>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatSession {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaProvider>,
        store: Arc<dyn HistoryStore>,
        ice: IceConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let theme = store.load_theme();
        Arc::new(Self {
            connector,
            media,
            store,
            ice,
            inner: Mutex::new(SessionContext {
                theme,
                ..SessionContext::default()
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Opens the local endpoint under a freshly generated code.
    ///
    /// Resolution of the connector's `open` is the identity-ready signal:
    /// the code is announced and persisted history replayed at that point.
    pub async fn open(self: &Arc<Self>) -> Result<PeerCode, ChatError> {
        let code = PeerCode::generate();
        let endpoint = self
            .connector
            .open(EndpointOptions {
                code: code.clone(),
                ice: self.ice.clone(),
            })
            .await?;
        let pump = self.spawn_endpoint_pump(endpoint.subscribe_events());

        let loaded = self.store.load_history();
        if let Some(fault) = &loaded.fault {
            warn!(?fault, "history: recovered to empty log");
        }

        {
            let mut ctx = self.inner.lock().await;
            if let Some(previous) = ctx.endpoint_pump.take() {
                previous.abort();
            }
            ctx.endpoint = Some(endpoint);
            ctx.endpoint_pump = Some(pump);
            ctx.local_code = Some(code.clone());
            ctx.history = loaded.messages.clone();
        }

        info!(code = %code, "session: endpoint ready");
        let _ = self.events.send(ClientEvent::IdentityReady { code: code.clone() });
        let _ = self.events.send(ClientEvent::HistoryLoaded {
            messages: loaded.messages,
            fault: loaded.fault,
        });
        Ok(code)
    }

    pub async fn local_code(&self) -> Option<PeerCode> {
        self.inner.lock().await.local_code.clone()
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.history.clone()
    }

    /// Dials a remote peer. The data channel is required; the media leg is
    /// best-effort and a failure degrades the session to chat-only.
    pub async fn connect(self: &Arc<Self>, remote_input: &str) -> Result<PeerCode, ChatError> {
        let remote = PeerCode::parse(remote_input)?;
        let endpoint = {
            let ctx = self.inner.lock().await;
            ctx.endpoint.clone().ok_or(ChatError::NotOpen)?
        };

        let channel = endpoint.connect_data(&remote).await?;
        self.adopt_channel(channel).await;

        if let Err(err) = self.start_outbound_call(&endpoint, &remote).await {
            warn!(remote = %remote, "media: outbound call failed, continuing chat-only: {err}");
            match err {
                ChatError::Media(media) => {
                    let _ = self.events.send(ClientEvent::MediaFailed(media));
                }
                other => {
                    let _ = self
                        .events
                        .send(ClientEvent::Error(format!("call to {remote} failed: {other}")));
                }
            }
        }
        Ok(remote)
    }

    /// Sends `text` over the active data channel and appends a `Sent` record.
    ///
    /// Empty trimmed text and a missing connection are typed errors; neither
    /// appends a record nor writes storage.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let channel = {
            let ctx = self.inner.lock().await;
            ctx.channel
                .as_ref()
                .map(|active| Arc::clone(&active.channel))
                .ok_or(ChatError::NotConnected)?
        };

        let record = ChatMessage::now(text, MessageDirection::Sent);
        let payload = serde_json::to_vec(&WireMessage::from(&record))?;
        channel.send(payload).await?;
        self.append_and_persist(record.clone()).await;
        Ok(record)
    }

    pub async fn theme(&self) -> Theme {
        self.inner.lock().await.theme
    }

    pub async fn toggle_theme(&self) -> Result<Theme, ChatError> {
        let next = {
            let mut ctx = self.inner.lock().await;
            ctx.theme = ctx.theme.toggle();
            ctx.theme
        };
        self.store.save_theme(next)?;
        let _ = self.events.send(ClientEvent::ThemeChanged(next));
        Ok(next)
    }

    /// Hangs up, closes the endpoint, and stops all event pumps.
    pub async fn close(&self) -> Result<(), ChatError> {
        let (endpoint, endpoint_pump, channel, call) = {
            let mut ctx = self.inner.lock().await;
            (
                ctx.endpoint.take(),
                ctx.endpoint_pump.take(),
                ctx.channel.take(),
                ctx.call.take(),
            )
        };

        if let Some(active) = call {
            let _ = active.call.hang_up().await;
            active.pump.abort();
        }
        if let Some(active) = channel {
            active.pump.abort();
        }
        if let Some(endpoint) = endpoint {
            endpoint.close().await?;
        }
        if let Some(pump) = endpoint_pump {
            pump.abort();
        }
        Ok(())
    }

    fn spawn_endpoint_pump(
        self: &Arc<Self>,
        mut receiver: broadcast::Receiver<EndpointEvent>,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                match event {
                    EndpointEvent::IncomingData(channel) => session.adopt_channel(channel).await,
                    EndpointEvent::IncomingCall(incoming) => {
                        session.answer_incoming_call(incoming).await;
                    }
                    EndpointEvent::Closed => break,
                }
            }
        })
    }

    async fn adopt_channel(self: &Arc<Self>, channel: Arc<dyn DataChannel>) {
        let remote = channel.remote_code();
        let pump = self.spawn_channel_pump(&channel, remote.clone());
        let previous = {
            let mut ctx = self.inner.lock().await;
            ctx.channel.replace(ActiveChannel { channel, pump })
        };
        if let Some(previous) = previous {
            previous.pump.abort();
        }
        info!(remote = %remote, "chat: data channel bound");
        let _ = self.events.send(ClientEvent::PeerConnected { remote });
    }

    fn spawn_channel_pump(
        self: &Arc<Self>,
        channel: &Arc<dyn DataChannel>,
        remote: PeerCode,
    ) -> JoinHandle<()> {
        let mut receiver = channel.subscribe_events();
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                match event {
                    DataChannelEvent::Message(payload) => {
                        match serde_json::from_slice::<WireMessage>(&payload) {
                            Ok(wire) => session.append_and_persist(wire.into_received()).await,
                            Err(err) => {
                                let _ = session.events.send(ClientEvent::Error(format!(
                                    "invalid payload from {remote}: {err}"
                                )));
                            }
                        }
                    }
                    DataChannelEvent::Closed => {
                        let _ = session
                            .events
                            .send(ClientEvent::PeerDisconnected { remote: remote.clone() });
                        break;
                    }
                }
            }
        })
    }

    /// Auto-answers an inbound call. A media acquisition failure abandons
    /// the answer without retry; the failure is surfaced, not swallowed.
    async fn answer_incoming_call(self: &Arc<Self>, incoming: Arc<dyn IncomingCall>) {
        let caller = incoming.caller();
        let stream = match self.media.acquire(MediaConstraints::default()).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(caller = %caller, "media: acquisition failed, call not answered: {err}");
                let _ = self.events.send(ClientEvent::MediaFailed(err));
                return;
            }
        };
        let _ = self.events.send(ClientEvent::LocalStreamReady(stream.clone()));

        match incoming.answer(stream).await {
            Ok(call) => self.adopt_call(call).await,
            Err(err) => {
                warn!(caller = %caller, "call: answer failed: {err}");
                let _ = self.events.send(ClientEvent::Error(format!(
                    "failed to answer call from {caller}: {err}"
                )));
            }
        }
    }

    async fn start_outbound_call(
        self: &Arc<Self>,
        endpoint: &Arc<dyn PeerEndpoint>,
        remote: &PeerCode,
    ) -> Result<(), ChatError> {
        let stream = self.media.acquire(MediaConstraints::default()).await?;
        let _ = self.events.send(ClientEvent::LocalStreamReady(stream.clone()));
        let call = endpoint.call(remote, stream).await?;
        self.adopt_call(call).await;
        Ok(())
    }

    async fn adopt_call(self: &Arc<Self>, call: Arc<dyn MediaCall>) {
        let pump = self.spawn_call_pump(call.subscribe_events());
        let previous = {
            let mut ctx = self.inner.lock().await;
            ctx.call.replace(ActiveCall { call, pump })
        };
        if let Some(previous) = previous {
            previous.pump.abort();
        }
    }

    fn spawn_call_pump(
        self: &Arc<Self>,
        mut receiver: broadcast::Receiver<CallEvent>,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                match event {
                    CallEvent::RemoteStream(stream) => {
                        info!(stream = %stream.stream_id, "call: remote stream attached");
                        let _ = session.events.send(ClientEvent::RemoteStreamReady(stream));
                    }
                    CallEvent::Ended => {
                        let _ = session.events.send(ClientEvent::CallEnded);
                        break;
                    }
                }
            }
        })
    }

    /// Appends one record and rewrites the full serialized log.
    async fn append_and_persist(&self, record: ChatMessage) {
        let snapshot = {
            let mut ctx = self.inner.lock().await;
            ctx.history.push(record.clone());
            ctx.history.clone()
        };
        if let Err(err) = self.store.save_history(&snapshot) {
            error!("history: save failed: {err}");
            let _ = self
                .events
                .send(ClientEvent::Error(format!("failed to persist history: {err}")));
        }
        let _ = self.events.send(ClientEvent::MessageAppended(record));
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
