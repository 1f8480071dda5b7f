//! A [`Socket`] is the per-peer endpoint within one namespace: it emits
//! events, joins and leaves rooms, receives events and acknowledgements and
//! carries the [`Handshake`] captured at admission.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::ack::{AckReceiver, AckResult};
use crate::adapter::Room;
use crate::client::{Client, PacketOptions};
use crate::errors::{AdapterError, Error, SendError};
use crate::handler::{AckSender, DisconnectCallback, MessageCallback};
use crate::handshake::Handshake;
use crate::ns::Namespace;
use crate::operators::{BroadcastOperators, ConfOperators, RoomParam};
use crate::packet::{Packet, PacketData};
use crate::transport::{Frame, WriteOptions};

/// Event names that never produce a wire packet when emitted on a socket:
/// they only fire locally registered handlers.
pub(crate) const RESERVED_EVENTS: &[&str] =
    &["error", "connect", "disconnect", "newListener", "removeListener"];

/// Identifier of a socket: `<namespace path>#<engine session id>`.
///
/// One client holds at most one socket per namespace, so ids are unique
/// across all live sockets of a server. The id also names the room each
/// socket is automatically joined to on admission.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(Arc<str>);

impl SocketId {
    pub(crate) fn new(ns: &str, sid: crate::sid::Sid) -> Self {
        Self(format!("{ns}#{sid}").into())
    }

    #[cfg(test)]
    pub(crate) fn from_parts(ns: &str, sid: &str) -> Self {
        Self(format!("{ns}#{sid}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// All the possible reasons for a socket to be disconnected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DisconnectReason {
    /// The transport announced its closure.
    TransportClose,
    /// The server forcefully closed the connection.
    ForcedServerClose,
    /// The connection failed with a protocol or transport error.
    ClientError,
    /// The socket was disconnected from the namespace with
    /// [`Socket::disconnect`].
    ServerNSDisconnect,
    /// The peer sent a DISCONNECT packet for this namespace.
    ClientNSDisconnect,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DisconnectReason::*;
        let str: &'static str = match self {
            TransportClose => "transport close",
            ForcedServerClose => "forced server close",
            ClientError => "client error",
            ServerNSDisconnect => "server namespace disconnect",
            ClientNSDisconnect => "client namespace disconnect",
        };
        f.write_str(str)
    }
}

/// A socket: one peer connected to one namespace.
pub struct Socket {
    /// The socket id, `<namespace path>#<engine session id>`.
    pub id: SocketId,
    /// Request metadata captured when the socket was created.
    pub handshake: Handshake,
    pub(crate) ns: Arc<Namespace>,
    pub(crate) client: Arc<Client>,
    connected: AtomicBool,
    disconnected: AtomicBool,
    message_handlers: RwLock<HashMap<Cow<'static, str>, MessageCallback>>,
    disconnect_handler: Mutex<Option<DisconnectCallback>>,
    acks: Mutex<HashMap<i64, oneshot::Sender<AckResult>>>,
    weak_self: Weak<Socket>,
}

impl Socket {
    pub(crate) fn new(ns: Arc<Namespace>, client: Arc<Client>) -> Arc<Self> {
        let id = SocketId::new(&ns.path, client.id);
        let handshake = Handshake::new(client.transport().conn_info());
        Arc::new_cyclic(|weak_self| Self {
            id,
            handshake,
            ns,
            client,
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            message_handlers: RwLock::new(HashMap::new()),
            disconnect_handler: Mutex::new(None),
            acks: Mutex::new(HashMap::new()),
            weak_self: weak_self.clone(),
        })
    }

    /// The owning pointer of this socket.
    pub(crate) fn arc(&self) -> Arc<Socket> {
        self.weak_self
            .upgrade()
            .expect("socket self reference outlives every borrow")
    }

    /// Registers an async handler for the given event.
    ///
    /// The handler receives the socket, the event arguments, the binary
    /// payloads and an [`AckSender`] to answer an acknowledgement request.
    pub fn on<H, Fut>(&self, event: impl Into<Cow<'static, str>>, handler: H)
    where
        H: Fn(Arc<Socket>, Value, Vec<Bytes>, AckSender) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler: MessageCallback =
            Arc::new(move |s, v, b, ack| Box::pin(handler(s, v, b, ack)));
        self.message_handlers
            .write()
            .unwrap()
            .insert(event.into(), handler);
    }

    /// Registers the disconnect handler, fired once with the
    /// [`DisconnectReason`] when the socket leaves the namespace.
    ///
    /// Only one handler is kept; registering again replaces it.
    pub fn on_disconnect<H, Fut>(&self, handler: H)
    where
        H: Fn(Arc<Socket>, DisconnectReason) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler: DisconnectCallback = Arc::new(move |s, r| Box::pin(handler(s, r)));
        self.disconnect_handler.lock().unwrap().replace(handler);
    }

    /// Emits an event to the peer.
    ///
    /// Array-like data is spread as multiple arguments; wrap an array in
    /// another array to send it as the first argument. Emitting a reserved
    /// event name fires the locally registered handler of that name instead
    /// of producing a wire packet.
    pub fn emit(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<(), SendError> {
        ConfOperators::new(self).emit(event, data)
    }

    /// Emits an event and returns a future resolving with the peer's
    /// acknowledgement.
    ///
    /// The pending acknowledgement never times out at this layer; it
    /// resolves with the reply or fails when the socket closes first.
    pub fn emit_with_ack(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<AckReceiver, SendError> {
        ConfOperators::new(self).emit_with_ack(event, data)
    }

    /// Emits a `message` event, the historical default event name.
    pub fn send(&self, data: impl Serialize) -> Result<(), SendError> {
        self.emit("message", data)
    }

    /// Alias of [`send`](Socket::send).
    pub fn write(&self, data: impl Serialize) -> Result<(), SendError> {
        self.send(data)
    }

    // Room actions

    /// Joins the given rooms. Joining a room twice is a no-op.
    pub fn join(&self, rooms: impl RoomParam) -> Result<(), AdapterError> {
        let adapter = self.ns.adapter();
        for room in rooms.into_room_iter() {
            adapter.add(self.id.clone(), room)?;
        }
        Ok(())
    }

    /// Leaves the given rooms. Leaving a room the socket is not in is a
    /// no-op.
    pub fn leave(&self, rooms: impl RoomParam) -> Result<(), AdapterError> {
        let adapter = self.ns.adapter();
        for room in rooms.into_room_iter() {
            adapter.del(self.id.clone(), room)?;
        }
        Ok(())
    }

    /// Leaves every room the socket is in.
    pub fn leave_all(&self) {
        self.ns.adapter().del_all(&self.id);
    }

    /// The rooms the socket is currently in.
    pub fn rooms(&self) -> Vec<Room> {
        self.ns.adapter().socket_rooms(&self.id)
    }

    // Operators

    /// Selects the given rooms as broadcast target for the next emit,
    /// excluding the current socket.
    pub fn to(&self, rooms: impl RoomParam) -> BroadcastOperators {
        BroadcastOperators::from_socket(self).to(rooms)
    }

    /// Alias of [`to`](Socket::to).
    pub fn within(&self, rooms: impl RoomParam) -> BroadcastOperators {
        self.to(rooms)
    }

    /// Broadcasts the next emit to every connected socket of the namespace
    /// except the current one.
    pub fn broadcast(&self) -> BroadcastOperators {
        BroadcastOperators::from_socket(self)
    }

    /// Drops the next emit instead of queueing it when the transport is not
    /// immediately writable.
    pub fn volatile(&self) -> ConfOperators<'_> {
        ConfOperators::new(self).volatile()
    }

    /// Forces plain JSON encoding for the next emit.
    pub fn json(&self) -> ConfOperators<'_> {
        ConfOperators::new(self).json()
    }

    /// Sets whether the frames of the next emit may be compressed.
    pub fn compress(&self, compress: bool) -> ConfOperators<'_> {
        ConfOperators::new(self).compress(compress)
    }

    /// Attaches binary payloads to the next emit.
    pub fn bin(&self, bin: impl IntoIterator<Item = impl Into<Bytes>>) -> ConfOperators<'_> {
        ConfOperators::new(self).bin(bin)
    }

    /// Disconnects the socket from its namespace: sends a DISCONNECT packet
    /// and closes the socket with reason
    /// [`DisconnectReason::ServerNSDisconnect`]. A no-op once the socket is
    /// disconnected.
    pub fn disconnect(&self) {
        if !self.connected() {
            return;
        }
        self.send_packet(Packet::disconnect(self.ns_path()), PacketOptions::default())
            .ok();
        self.onclose(DisconnectReason::ServerNSDisconnect);
    }

    /// Tears down the whole connection: every socket of the client is
    /// disconnected, then the transport is closed.
    pub fn disconnect_connection(&self) {
        self.client.disconnect();
    }

    /// Whether the socket is currently connected to its namespace.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The path of the namespace the socket belongs to.
    pub fn ns_path(&self) -> &str {
        &self.ns.path
    }

    pub(crate) fn transport_writable(&self) -> bool {
        self.client.transport().writable()
    }

    pub(crate) fn send_packet(
        &self,
        packet: Packet,
        opts: PacketOptions,
    ) -> Result<(), SendError> {
        self.client.packet(packet, opts)
    }

    pub(crate) fn send_frames(
        &self,
        frames: &[Frame],
        opts: WriteOptions,
    ) -> Result<(), SendError> {
        self.client.write_frames(frames, opts)
    }

    /// Stamp the packet with the namespace's next ack id, send it and
    /// register the pending reply entry.
    pub(crate) fn send_with_ack(&self, mut packet: Packet, opts: PacketOptions) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        let ack_id = self.ns.next_ack_id();
        packet.inner.set_ack_id(ack_id);
        match self.send_packet(packet, opts) {
            Ok(()) => {
                self.acks.lock().unwrap().insert(ack_id, tx);
            }
            Err(e) => {
                tx.send(Err(e.into())).ok();
            }
        }
        AckReceiver::new(rx)
    }

    /// Fire the locally registered handler for a reserved event name.
    pub(crate) fn dispatch_local(&self, event: &str, data: Value) {
        let handler = self.message_handlers.read().unwrap().get(event).cloned();
        if let Some(handler) = handler {
            let ack = AckSender::new(self.arc(), None);
            tokio::spawn(handler(self.arc(), data, Vec::new(), ack));
        }
    }

    /// Called exactly once by the namespace after middleware success:
    /// registers the socket among the connected set, auto-joins the room
    /// named after its id and answers the connection request.
    pub(crate) fn onconnect(&self) -> Result<(), SendError> {
        self.connected.store(true, Ordering::SeqCst);
        self.ns.add_connected(self.arc());
        self.ns
            .adapter()
            .add(self.id.clone(), Room::from(self.id.to_string()))
            .ok();
        self.send_packet(Packet::connect(self.ns_path()), PacketOptions::default())
    }

    /// Dispatch one decoded packet to this socket.
    pub(crate) fn onpacket(&self, packet: PacketData) -> Result<(), Error> {
        match packet {
            PacketData::Event(e, data, ack) => self.onevent(&e, data, Vec::new(), ack),
            PacketData::BinaryEvent(e, bin, ack) => self.onevent(&e, bin.data, bin.bin, ack),
            PacketData::Ack(data, ack_id) => self.onack(data, Vec::new(), ack_id),
            PacketData::BinaryAck(bin, ack_id) => self.onack(bin.data, bin.bin, ack_id),
            PacketData::Disconnect => {
                self.onclose(DisconnectReason::ClientNSDisconnect);
                Ok(())
            }
            PacketData::Error(data) => {
                self.onerror(data);
                Ok(())
            }
            PacketData::Connect => unreachable!("connect packets are handled by the client"),
        }
    }

    fn onevent(
        &self,
        event: &str,
        data: Value,
        bin: Vec<Bytes>,
        ack_id: Option<i64>,
    ) -> Result<(), Error> {
        let handler = self.message_handlers.read().unwrap().get(event).cloned();
        if let Some(handler) = handler {
            let ack = AckSender::new(self.arc(), ack_id);
            tokio::spawn(handler(self.arc(), data, bin, ack));
        } else {
            tracing::debug!("no handler registered for event \"{}\" on {}", event, self.id);
        }
        Ok(())
    }

    fn onack(&self, data: Value, bin: Vec<Bytes>, ack_id: i64) -> Result<(), Error> {
        if let Some(tx) = self.acks.lock().unwrap().remove(&ack_id) {
            tx.send(Ok((data, bin))).ok();
        } else {
            tracing::debug!("ack id {} does not match any pending entry", ack_id);
        }
        Ok(())
    }

    /// An error scoped to this socket: delivered to the registered `error`
    /// handler or reported to the log sink.
    pub(crate) fn onerror(&self, err: Value) {
        if self.message_handlers.read().unwrap().contains_key("error") {
            self.dispatch_local("error", err);
        } else {
            tracing::error!("unhandled error on socket {}: {}", self.id, err);
        }
    }

    /// Terminal transition out of the namespace. Idempotent.
    pub(crate) fn onclose(&self, reason: DisconnectReason) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing socket {} with reason: {}", self.id, reason);
        self.leave_all();
        self.client.remove(self);
        self.ns.remove_socket(&self.id);
        self.connected.store(false, Ordering::SeqCst);

        // pending acknowledgements are dropped, never invoked
        self.acks.lock().unwrap().clear();

        let handler = self.disconnect_handler.lock().unwrap().take();
        if let Some(handler) = handler {
            tokio::spawn(handler(self.arc(), reason));
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("ns", &self.ns_path())
            .field("connected", &self.connected)
            .finish()
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
