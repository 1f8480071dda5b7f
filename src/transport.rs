//! The engine transport contract consumed by the messaging layer.
//!
//! The engine (handshake, framing, heartbeats, upgrades) lives outside this
//! crate; a [`Client`](crate::client::Client) only relies on the interface
//! below: an id, the request metadata of the accepted connection, frame
//! writes with a compression hint and `data`/`error`/`close` notifications
//! delivered through a bound [`TransportHandler`].
//!
//! [`InMemoryTransport`] is the in-process implementation used by the test
//! suites and by embedders that drive the engine themselves.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::sid::Sid;

/// A single transport frame, either textual or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// The textual content of the frame, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(s) => Some(s),
            Frame::Binary(_) => None,
        }
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Frame::Text(s)
    }
}
impl From<Bytes> for Frame {
    fn from(b: Bytes) -> Self {
        Frame::Binary(b)
    }
}

/// Observable state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Open,
    Closed,
}

/// Per-frame write options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Whether the frame may be compressed on the wire.
    pub compress: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { compress: true }
    }
}

/// Metadata of the request that established the connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub headers: http::HeaderMap,
    pub uri: http::Uri,
    pub remote_addr: Option<SocketAddr>,
    pub secure: bool,
}

/// Listener interface installed on a transport by its owning client.
pub trait TransportHandler: Send + Sync + 'static {
    /// A frame arrived from the peer.
    fn on_data(&self, frame: Frame);
    /// The transport failed.
    fn on_error(&self, err: TransportError);
    /// The peer closed the connection.
    fn on_close(&self);
}

/// A pre-established, long-lived, full-duplex framed channel.
pub trait Transport: Send + Sync + 'static {
    /// The engine-assigned session id of the connection.
    fn id(&self) -> Sid;

    /// Request metadata captured when the connection was accepted.
    fn conn_info(&self) -> &ConnectionInfo;

    fn ready_state(&self) -> ReadyState;

    /// Whether a write would complete without buffering. Used by the
    /// `volatile` emission flag to drop rather than queue.
    fn writable(&self) -> bool;

    /// Send one frame to the peer.
    fn write(&self, frame: Frame, opts: WriteOptions) -> Result<(), TransportError>;

    /// Install the listener receiving `data`/`error`/`close` notifications.
    fn bind(&self, handler: Arc<dyn TransportHandler>);

    /// Remove the currently bound listener.
    fn unbind(&self);

    /// Tear the connection down.
    fn close(&self);
}

/// Loopback transport backed by in-process channels.
///
/// Frames written by the server side drain to the receiver returned by
/// [`InMemoryTransport::new`]; the peer side injects inbound frames with
/// [`recv`](InMemoryTransport::recv) and simulates failures or closure with
/// the matching methods.
pub struct InMemoryTransport {
    id: Sid,
    info: ConnectionInfo,
    open: AtomicBool,
    writable: AtomicBool,
    handler: Mutex<Option<Arc<dyn TransportHandler>>>,
    out: mpsc::UnboundedSender<Frame>,
}

impl InMemoryTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        Self::with_info(ConnectionInfo::default())
    }

    pub fn with_info(info: ConnectionInfo) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            id: Sid::new(),
            info,
            open: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            handler: Mutex::new(None),
            out: tx,
        });
        (transport, rx)
    }

    fn current_handler(&self) -> Option<Arc<dyn TransportHandler>> {
        self.handler.lock().unwrap().clone()
    }

    /// Inject an inbound frame, as if the peer had sent it.
    pub fn recv(&self, frame: Frame) {
        if let Some(handler) = self.current_handler() {
            handler.on_data(frame);
        }
    }

    /// Surface a transport failure to the bound handler.
    pub fn recv_error(&self, err: TransportError) {
        if let Some(handler) = self.current_handler() {
            handler.on_error(err);
        }
    }

    /// Toggle the writability observed by `volatile` emissions.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }
}

impl Transport for InMemoryTransport {
    fn id(&self) -> Sid {
        self.id
    }

    fn conn_info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn ready_state(&self) -> ReadyState {
        if self.open.load(Ordering::SeqCst) {
            ReadyState::Open
        } else {
            ReadyState::Closed
        }
    }

    fn writable(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.writable.load(Ordering::SeqCst)
    }

    fn write(&self, frame: Frame, _opts: WriteOptions) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::Closed);
        }
        self.out
            .send(frame)
            .map_err(|e| TransportError::Failure(e.to_string()))
    }

    fn bind(&self, handler: Arc<dyn TransportHandler>) {
        self.handler.lock().unwrap().replace(handler);
    }

    fn unbind(&self) {
        self.handler.lock().unwrap().take();
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Some(handler) = self.current_handler() {
                handler.on_close();
            }
        }
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("id", &self.id)
            .field("open", &self.open)
            .field("writable", &self.writable)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn write_drains_to_receiver() {
        let (transport, mut rx) = InMemoryTransport::new();
        transport
            .write(Frame::Text("hello".into()), WriteOptions::default())
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Frame::Text("hello".into()));
    }

    #[tokio::test]
    async fn write_fails_once_closed() {
        let (transport, _rx) = InMemoryTransport::new();
        transport.close();
        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert!(matches!(
            transport.write(Frame::Text("x".into()), WriteOptions::default()),
            Err(TransportError::Closed)
        ));
    }
}
