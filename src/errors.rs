use serde_json::Value;
use tokio::sync::oneshot;

/// Protocol errors raised while decoding or dispatching packets.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error serializing json packet: {0:?}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid packet type")]
    InvalidPacketType,

    #[error("invalid event name")]
    InvalidEventName,

    #[error("binary frame received without a pending binary packet")]
    UnexpectedBinaryFrame,

    #[error("text frame received while reassembling a binary packet")]
    IncompleteBinaryPacket,
}

/// Error type surfaced by the engine transport.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The transport is closed and cannot accept frames anymore.
    #[error("transport is closed")]
    Closed,

    /// The transport failed to forward a frame.
    #[error("transport failure: {0}")]
    Failure(String),
}

/// Error type raised when sending a packet to a single peer.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("error serializing json packet: {0:?}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Error type raised when broadcasting a packet to multiple peers.
///
/// Per-peer failures do not abort the fan-out; they are collected and
/// returned together.
#[derive(thiserror::Error, Debug)]
pub enum BroadcastError {
    #[error("sending error: {0:?}")]
    Send(Vec<SendError>),

    #[error("error serializing json packet: {0:?}")]
    Serialize(#[from] serde_json::Error),

    #[error("\"{0}\" is a reserved event name")]
    ReservedEvent(&'static str),
}

impl From<Vec<SendError>> for BroadcastError {
    fn from(value: Vec<SendError>) -> Self {
        Self::Send(value)
    }
}

/// Error type for acknowledgement responses.
///
/// There is no timeout at this layer: a pending acknowledgement either
/// resolves with the peer's reply or fails with [`AckError::Recv`] when the
/// socket closes first.
#[derive(thiserror::Error, Debug)]
pub enum AckError {
    #[error("ack response cannot be received: {0}")]
    Recv(#[from] oneshot::error::RecvError),

    #[error("send error: {0}")]
    Send(#[from] SendError),
}

/// Opaque error produced by an [`Adapter`](crate::adapter::Adapter)
/// implementation, mostly relevant for process-external adapters.
#[derive(thiserror::Error, Debug)]
#[error("adapter error: {0}")]
pub struct AdapterError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

/// Rejection returned by a namespace middleware to deny an admission.
///
/// The peer receives `data` when set, `message` otherwise, as the payload of
/// the ERROR packet answering its connection request.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct MiddlewareError {
    pub message: String,
    pub data: Option<Value>,
}

impl MiddlewareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }

    pub(crate) fn payload(&self) -> Value {
        self.data
            .clone()
            .unwrap_or_else(|| Value::String(self.message.clone()))
    }
}

impl From<&str> for MiddlewareError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for MiddlewareError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Error type for the legacy `set(key, value)` configuration surface.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unknown setting \"{0}\"")]
    UnknownSetting(String),

    #[error("invalid value for setting \"{0}\"")]
    InvalidValue(&'static str),
}
