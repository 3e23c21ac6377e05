use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("peer code is empty")]
    Empty,
    #[error("peer code '{input}' is not a 6-digit number")]
    Malformed { input: String },
}

/// Failures of the host-environment media capability (camera/microphone
/// acquisition). Surfaced to callers instead of being logged and dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("media permission denied")]
    PermissionDenied,
    #[error("no capture device available")]
    DeviceUnavailable,
    #[error("media backend failure: {0}")]
    Backend(String),
}

/// Failures reported by the external connection library.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect to peer {code}: {detail}")]
    Connect { code: String, detail: String },
    #[error("data channel closed")]
    ChannelClosed,
    #[error("failed to send payload: {0}")]
    Send(String),
    #[error("transport backend failure: {0}")]
    Backend(String),
}
