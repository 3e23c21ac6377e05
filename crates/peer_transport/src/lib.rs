//! Trait seam over the external peer connection library.
//!
//! Session registration, NAT traversal, signaling, and media negotiation are
//! the library's responsibility; this crate only names the capabilities the
//! chat layer consumes. The [`loopback`] module provides an in-process
//! implementation for demos and tests.

use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::PeerCode,
    error::{MediaError, TransportError},
};
use tokio::sync::broadcast;

pub mod loopback;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    pub code: PeerCode,
    pub ice: IceConfig,
}

/// Opaque handle to a local or remote audio/video stream. The media itself
/// flows inside the connection library; this layer only routes handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub stream_id: String,
    pub has_audio: bool,
    pub has_video: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Events surfaced by an open endpoint. A resolved [`PeerConnector::open`]
/// call is the identity-ready signal; only inbound activity arrives here.
#[derive(Clone)]
pub enum EndpointEvent {
    IncomingData(Arc<dyn DataChannel>),
    IncomingCall(Arc<dyn IncomingCall>),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelEvent {
    Message(Vec<u8>),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    RemoteStream(MediaStream),
    Ended,
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Opens a session advertising `options.code` to the signaling network.
    /// Resolves once the identifier is registered and reachable.
    async fn open(&self, options: EndpointOptions)
        -> Result<Arc<dyn PeerEndpoint>, TransportError>;
}

#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    /// Establishes a data connection to a remote identifier.
    async fn connect_data(&self, remote: &PeerCode)
        -> Result<Arc<dyn DataChannel>, TransportError>;
    /// Places a media call, offering the given local stream.
    async fn call(
        &self,
        remote: &PeerCode,
        local: MediaStream,
    ) -> Result<Arc<dyn MediaCall>, TransportError>;
    fn subscribe_events(&self) -> broadcast::Receiver<EndpointEvent>;
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Fire-and-forget delivery of an arbitrary payload.
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;
    fn subscribe_events(&self) -> broadcast::Receiver<DataChannelEvent>;
    fn remote_code(&self) -> PeerCode;
}

#[async_trait]
pub trait IncomingCall: Send + Sync {
    fn caller(&self) -> PeerCode;
    /// Answers with a local stream, completing media negotiation.
    async fn answer(&self, local: MediaStream) -> Result<Arc<dyn MediaCall>, TransportError>;
}

#[async_trait]
pub trait MediaCall: Send + Sync {
    fn subscribe_events(&self) -> broadcast::Receiver<CallEvent>;
    async fn hang_up(&self) -> Result<(), TransportError>;
}

/// The host-environment capability for acquiring a combined audio/video
/// stream. Failures are typed so callers can surface them.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;
}
