//! Boxed callback types connecting user handlers to the dispatch paths, and
//! the [`AckSender`] handed to handlers of events that request an
//! acknowledgement.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::client::PacketOptions;
use crate::errors::{MiddlewareError, SendError};
use crate::packet::Packet;
use crate::socket::{DisconnectReason, Socket};

pub(crate) type BoxAsync = BoxFuture<'static, ()>;

/// Handler for a named event:
/// `(socket, arguments, binary payloads, ack sender)`.
pub(crate) type MessageCallback =
    Arc<dyn Fn(Arc<Socket>, Value, Vec<Bytes>, AckSender) -> BoxAsync + Send + Sync + 'static>;

/// Handler fired when a socket is admitted to a namespace.
pub(crate) type ConnectCallback = Arc<dyn Fn(Arc<Socket>) -> BoxAsync + Send + Sync + 'static>;

/// Handler fired when a socket leaves its namespace.
pub(crate) type DisconnectCallback =
    Arc<dyn Fn(Arc<Socket>, DisconnectReason) -> BoxAsync + Send + Sync + 'static>;

pub(crate) type MiddlewareFuture = BoxFuture<'static, Result<(), MiddlewareError>>;

/// Admission middleware: runs before a socket is admitted and may reject it.
pub(crate) type MiddlewareCallback =
    Arc<dyn Fn(Arc<Socket>) -> MiddlewareFuture + Send + Sync + 'static>;

/// Sends the acknowledgement response for one received event.
///
/// `send` consumes the sender, so a reply goes out at most once no matter
/// how the handler is written. When the incoming event did not request an
/// acknowledgement, sending is a no-op.
#[derive(Debug)]
pub struct AckSender {
    binary: Vec<Bytes>,
    socket: Arc<Socket>,
    ack_id: Option<i64>,
}

impl AckSender {
    pub(crate) fn new(socket: Arc<Socket>, ack_id: Option<i64>) -> Self {
        Self {
            binary: Vec::new(),
            socket,
            ack_id,
        }
    }

    /// Whether the peer requested an acknowledgement for this event.
    pub fn requested(&self) -> bool {
        self.ack_id.is_some()
    }

    /// Attach binary payloads to the acknowledgement response.
    pub fn bin(mut self, bin: impl IntoIterator<Item = impl Into<Bytes>>) -> Self {
        self.binary = bin.into_iter().map(Into::into).collect();
        self
    }

    /// Send the acknowledgement response to the peer.
    pub fn send(self, data: impl Serialize) -> Result<(), SendError> {
        if let Some(ack_id) = self.ack_id {
            let ns = self.socket.ns_path().to_string();
            let data = serde_json::to_value(&data)?;
            let packet = if self.binary.is_empty() {
                Packet::ack(ns, data, ack_id)
            } else {
                Packet::bin_ack(ns, data, self.binary, ack_id)
            };
            self.socket.send_packet(packet, PacketOptions::default())
        } else {
            Ok(())
        }
    }
}
