//! In-process transport used by the demo binary and integration tests.
//!
//! Endpoints registered in the same [`LoopbackNetwork`] are paired by code;
//! payloads cross tokio broadcast channels and "media" is just the stream
//! handle handed to the other side. Nothing here performs signaling or NAT
//! traversal.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use async_trait::async_trait;
use shared::{
    domain::PeerCode,
    error::{MediaError, TransportError},
};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::{
    CallEvent, DataChannel, DataChannelEvent, EndpointEvent, EndpointOptions, IncomingCall,
    MediaCall, MediaConstraints, MediaProvider, MediaStream, PeerConnector, PeerEndpoint,
};

const EVENT_CAPACITY: usize = 64;

type Registry = Arc<Mutex<HashMap<String, broadcast::Sender<EndpointEvent>>>>;

/// Pairs endpoints by code. Clones share the same registry, so any clone can
/// be handed to each session participating in the demo.
#[derive(Default, Clone)]
pub struct LoopbackNetwork {
    registry: Registry,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerConnector for LoopbackNetwork {
    async fn open(
        &self,
        options: EndpointOptions,
    ) -> Result<Arc<dyn PeerEndpoint>, TransportError> {
        let mut registry = self.registry.lock().await;
        if registry.contains_key(options.code.as_str()) {
            return Err(TransportError::Connect {
                code: options.code.to_string(),
                detail: "code already registered".to_string(),
            });
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        registry.insert(options.code.to_string(), events.clone());
        debug!(code = %options.code, "loopback: endpoint registered");
        Ok(Arc::new(LoopbackEndpoint {
            code: options.code,
            registry: Arc::clone(&self.registry),
            events,
        }))
    }
}

struct LoopbackEndpoint {
    code: PeerCode,
    registry: Registry,
    events: broadcast::Sender<EndpointEvent>,
}

impl LoopbackEndpoint {
    async fn peer_events(
        &self,
        remote: &PeerCode,
    ) -> Result<broadcast::Sender<EndpointEvent>, TransportError> {
        self.registry
            .lock()
            .await
            .get(remote.as_str())
            .cloned()
            .ok_or_else(|| TransportError::Connect {
                code: remote.to_string(),
                detail: "unknown peer code".to_string(),
            })
    }
}

#[async_trait]
impl PeerEndpoint for LoopbackEndpoint {
    async fn connect_data(
        &self,
        remote: &PeerCode,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let peer = self.peer_events(remote).await?;
        let (to_remote, _) = broadcast::channel(EVENT_CAPACITY);
        let (to_local, _) = broadcast::channel(EVENT_CAPACITY);
        let local_end = Arc::new(LoopbackDataChannel {
            remote: remote.clone(),
            outbound: to_remote.clone(),
            inbound: to_local.clone(),
        });
        let remote_end = Arc::new(LoopbackDataChannel {
            remote: self.code.clone(),
            outbound: to_local,
            inbound: to_remote,
        });
        peer.send(EndpointEvent::IncomingData(remote_end))
            .map_err(|_| TransportError::Connect {
                code: remote.to_string(),
                detail: "peer is not listening".to_string(),
            })?;
        Ok(local_end)
    }

    async fn call(
        &self,
        remote: &PeerCode,
        local: MediaStream,
    ) -> Result<Arc<dyn MediaCall>, TransportError> {
        let peer = self.peer_events(remote).await?;
        let (caller_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (callee_events, _) = broadcast::channel(EVENT_CAPACITY);
        let incoming = Arc::new(LoopbackIncomingCall {
            caller: self.code.clone(),
            offered_stream: local,
            caller_events: caller_events.clone(),
            callee_events: callee_events.clone(),
        });
        peer.send(EndpointEvent::IncomingCall(incoming))
            .map_err(|_| TransportError::Connect {
                code: remote.to_string(),
                detail: "peer is not listening".to_string(),
            })?;
        Ok(Arc::new(LoopbackCall {
            events: caller_events.clone(),
            counterpart: callee_events,
            pending_remote: StdMutex::new(None),
        }))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EndpointEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.registry.lock().await.remove(self.code.as_str());
        let _ = self.events.send(EndpointEvent::Closed);
        Ok(())
    }
}

struct LoopbackDataChannel {
    remote: PeerCode,
    outbound: broadcast::Sender<DataChannelEvent>,
    inbound: broadcast::Sender<DataChannelEvent>,
}

#[async_trait]
impl DataChannel for LoopbackDataChannel {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        // Fire-and-forget: a payload sent before the peer subscribes is lost.
        let _ = self.outbound.send(DataChannelEvent::Message(payload));
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DataChannelEvent> {
        self.inbound.subscribe()
    }

    fn remote_code(&self) -> PeerCode {
        self.remote.clone()
    }
}

impl Drop for LoopbackDataChannel {
    fn drop(&mut self) {
        let _ = self.outbound.send(DataChannelEvent::Closed);
    }
}

struct LoopbackIncomingCall {
    caller: PeerCode,
    offered_stream: MediaStream,
    caller_events: broadcast::Sender<CallEvent>,
    callee_events: broadcast::Sender<CallEvent>,
}

#[async_trait]
impl IncomingCall for LoopbackIncomingCall {
    fn caller(&self) -> PeerCode {
        self.caller.clone()
    }

    async fn answer(&self, local: MediaStream) -> Result<Arc<dyn MediaCall>, TransportError> {
        // The caller learns the callee's stream right away; the callee's own
        // remote stream is parked until it subscribes to the returned call.
        let _ = self.caller_events.send(CallEvent::RemoteStream(local));
        Ok(Arc::new(LoopbackCall {
            events: self.callee_events.clone(),
            counterpart: self.caller_events.clone(),
            pending_remote: StdMutex::new(Some(self.offered_stream.clone())),
        }))
    }
}

struct LoopbackCall {
    events: broadcast::Sender<CallEvent>,
    counterpart: broadcast::Sender<CallEvent>,
    pending_remote: StdMutex<Option<MediaStream>>,
}

#[async_trait]
impl MediaCall for LoopbackCall {
    fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        let receiver = self.events.subscribe();
        let parked = self
            .pending_remote
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(stream) = parked {
            let _ = self.events.send(CallEvent::RemoteStream(stream));
        }
        receiver
    }

    async fn hang_up(&self) -> Result<(), TransportError> {
        let _ = self.counterpart.send(CallEvent::Ended);
        let _ = self.events.send(CallEvent::Ended);
        Ok(())
    }
}

/// Always grants a synthetic stream matching the requested constraints.
#[derive(Default)]
pub struct FixedMediaProvider {
    counter: AtomicU64,
}

#[async_trait]
impl MediaProvider for FixedMediaProvider {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(MediaStream {
            stream_id: format!("loopback-media-{id}"),
            has_audio: constraints.audio,
            has_video: constraints.video,
        })
    }
}

/// Always refuses, the way a user denying the permission prompt would.
pub struct DeniedMediaProvider;

#[async_trait]
impl MediaProvider for DeniedMediaProvider {
    async fn acquire(&self, _constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        Err(MediaError::PermissionDenied)
    }
}

#[cfg(test)]
#[path = "tests/loopback_tests.rs"]
mod tests;
