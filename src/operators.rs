//! Chainable operators configuring the next emission.
//!
//! There are two kinds of operators, both consumed by their emit so that
//! rooms and flags can never leak across an emit boundary:
//! * [`ConfOperators`]: configures a message sent directly to one peer.
//! * [`BroadcastOperators`]: selects the sockets a message is broadcast to.

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::ack::AckReceiver;
use crate::adapter::{BroadcastFlags, BroadcastOptions, Room};
use crate::client::PacketOptions;
use crate::errors::{BroadcastError, SendError};
use crate::ns::Namespace;
use crate::packet::Packet;
use crate::socket::{Socket, SocketId};

/// A trait for types that can be used as a room parameter.
///
/// [`String`], [`Vec<String>`], [`&'static str`](str), const arrays and
/// [`SocketId`] are implemented by default.
pub trait RoomParam: 'static {
    /// The type of the iterator returned by `into_room_iter`.
    type IntoIter: Iterator<Item = Room>;

    /// Convert `self` into an iterator of rooms.
    fn into_room_iter(self) -> Self::IntoIter;
}

impl RoomParam for Room {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(self)
    }
}
impl RoomParam for String {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(Cow::Owned(self))
    }
}
impl RoomParam for &'static str {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(Cow::Borrowed(self))
    }
}
impl RoomParam for Vec<String> {
    type IntoIter = std::iter::Map<std::vec::IntoIter<String>, fn(String) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Owned)
    }
}
impl RoomParam for Vec<&'static str> {
    type IntoIter = std::iter::Map<std::vec::IntoIter<&'static str>, fn(&'static str) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Borrowed)
    }
}
impl RoomParam for Vec<Room> {
    type IntoIter = std::vec::IntoIter<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter()
    }
}
impl<const COUNT: usize> RoomParam for [&'static str; COUNT] {
    type IntoIter =
        std::iter::Map<std::array::IntoIter<&'static str, COUNT>, fn(&'static str) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Borrowed)
    }
}
impl<const COUNT: usize> RoomParam for [String; COUNT] {
    type IntoIter = std::iter::Map<std::array::IntoIter<String, COUNT>, fn(String) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Owned)
    }
}
impl RoomParam for SocketId {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(Cow::Owned(self.to_string()))
    }
}

/// Chainable operators configuring a message sent directly to one peer.
pub struct ConfOperators<'a> {
    binary: Vec<Bytes>,
    volatile: bool,
    compress: bool,
    socket: &'a Socket,
}

impl<'a> ConfOperators<'a> {
    pub(crate) fn new(socket: &'a Socket) -> Self {
        Self {
            binary: Vec::new(),
            volatile: false,
            compress: true,
            socket,
        }
    }

    /// Drops the message instead of queueing it when the transport is not
    /// immediately writable.
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Forces plain JSON encoding. A no-op for the default codec.
    pub fn json(self) -> Self {
        self
    }

    /// Sets whether the frames of the message may be compressed.
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Attaches binary payloads to the message.
    pub fn bin(mut self, bin: impl IntoIterator<Item = impl Into<Bytes>>) -> Self {
        self.binary = bin.into_iter().map(Into::into).collect();
        self
    }

    /// Switches to a broadcast targeting the given rooms, excluding the
    /// current socket.
    pub fn to(self, rooms: impl RoomParam) -> BroadcastOperators {
        BroadcastOperators::from(self).to(rooms)
    }

    /// Alias of [`to`](ConfOperators::to).
    pub fn within(self, rooms: impl RoomParam) -> BroadcastOperators {
        self.to(rooms)
    }

    /// Switches to a broadcast targeting every connected socket of the
    /// namespace except the current one.
    pub fn broadcast(self) -> BroadcastOperators {
        BroadcastOperators::from(self)
    }

    /// Emits a message to the peer with the configured options.
    pub fn emit(
        self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<(), SendError> {
        let event = event.into();
        let data = serde_json::to_value(data)?;
        if let Some(reserved) = reserved_name(&event) {
            tracing::debug!("\"{}\" is reserved, dispatching locally", reserved);
            self.socket.dispatch_local(&event, data);
            return Ok(());
        }
        let opts = PacketOptions {
            compress: self.compress,
            volatile: self.volatile,
        };
        let socket = self.socket;
        let packet = self.into_packet(event, data);
        socket.send_packet(packet, opts)
    }

    /// Emits a message and returns a future resolving with the peer's
    /// acknowledgement.
    pub fn emit_with_ack(
        self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<AckReceiver, SendError> {
        let event = event.into();
        let data = serde_json::to_value(data)?;
        if let Some(reserved) = reserved_name(&event) {
            // never resolves with a reply: the sender half is dropped
            tracing::debug!("\"{}\" is reserved, dispatching locally", reserved);
            self.socket.dispatch_local(&event, data);
            let (_, rx) = tokio::sync::oneshot::channel();
            return Ok(AckReceiver::new(rx));
        }
        let opts = PacketOptions {
            compress: self.compress,
            volatile: self.volatile,
        };
        let socket = self.socket;
        let packet = self.into_packet(event, data);
        Ok(socket.send_with_ack(packet, opts))
    }

    /// Emits a `message` event with the configured options.
    pub fn send(self, data: impl Serialize) -> Result<(), SendError> {
        self.emit("message", data)
    }

    /// Alias of [`send`](ConfOperators::send).
    pub fn write(self, data: impl Serialize) -> Result<(), SendError> {
        self.send(data)
    }

    fn into_packet(self, event: Cow<'static, str>, data: Value) -> Packet {
        let ns = self.socket.ns_path().to_string();
        if self.binary.is_empty() {
            Packet::event(ns, event.into_owned(), data)
        } else {
            Packet::bin_event(ns, event.into_owned(), data, self.binary)
        }
    }
}

fn reserved_name(event: &str) -> Option<&'static str> {
    crate::socket::RESERVED_EVENTS
        .iter()
        .find(|e| **e == event)
        .copied()
}

/// Chainable operators selecting the sockets a message is broadcast to.
pub struct BroadcastOperators {
    binary: Vec<Bytes>,
    ns: Arc<Namespace>,
    opts: BroadcastOptions,
}

impl From<ConfOperators<'_>> for BroadcastOperators {
    fn from(conf: ConfOperators<'_>) -> Self {
        let mut ops = BroadcastOperators::from_socket(conf.socket);
        if conf.volatile {
            ops.opts.flags.insert(BroadcastFlags::Volatile);
        }
        ops.opts.compress = conf.compress;
        ops.binary = conf.binary;
        ops
    }
}

impl BroadcastOperators {
    pub(crate) fn new(ns: Arc<Namespace>) -> Self {
        let mut opts = BroadcastOptions::default();
        opts.flags.insert(BroadcastFlags::Broadcast);
        Self {
            binary: Vec::new(),
            ns,
            opts,
        }
    }

    /// The sender is always excluded from its own broadcasts.
    pub(crate) fn from_socket(socket: &Socket) -> Self {
        let mut ops = Self::new(socket.ns.clone());
        ops.opts.except.push(socket.id.clone());
        ops
    }

    /// Adds the given rooms to the broadcast target set, deduplicated.
    pub fn to(mut self, rooms: impl RoomParam) -> Self {
        for room in rooms.into_room_iter() {
            if !self.opts.rooms.contains(&room) {
                self.opts.rooms.push(room);
            }
        }
        self
    }

    /// Alias of [`to`](BroadcastOperators::to).
    pub fn within(self, rooms: impl RoomParam) -> Self {
        self.to(rooms)
    }

    /// Drops the broadcast for sockets whose transport is not immediately
    /// writable.
    pub fn volatile(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Volatile);
        self
    }

    /// Forces plain JSON encoding. A no-op for the default codec.
    pub fn json(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Json);
        self
    }

    /// Sets whether the frames of the broadcast may be compressed.
    pub fn compress(mut self, compress: bool) -> Self {
        self.opts.compress = compress;
        self
    }

    /// Attaches binary payloads to the message.
    pub fn bin(mut self, bin: impl IntoIterator<Item = impl Into<Bytes>>) -> Self {
        self.binary = bin.into_iter().map(Into::into).collect();
        self
    }

    /// Broadcasts a message to every selected socket.
    ///
    /// Acknowledgement callbacks are not supported when broadcasting; this
    /// builder intentionally has no `emit_with_ack`.
    pub fn emit(
        self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<(), BroadcastError> {
        let event = event.into();
        if let Some(reserved) = crate::socket::RESERVED_EVENTS
            .iter()
            .chain(crate::ns::RESERVED_EVENTS.iter())
            .find(|e| **e == event)
            .copied()
        {
            return Err(BroadcastError::ReservedEvent(reserved));
        }
        let data = serde_json::to_value(data)?;
        let ns = self.ns.clone();
        let opts = self.opts.clone();
        let packet = self.into_packet(event, data);
        let result = ns.adapter().broadcast(packet, opts);
        result
    }

    /// Broadcasts a `message` event to every selected socket.
    pub fn send(self, data: impl Serialize) -> Result<(), BroadcastError> {
        self.emit("message", data)
    }

    /// Alias of [`send`](BroadcastOperators::send).
    pub fn write(self, data: impl Serialize) -> Result<(), BroadcastError> {
        self.send(data)
    }

    /// The ids of the sockets currently selected by the accumulated rooms.
    pub fn clients(self) -> Vec<SocketId> {
        self.ns.adapter().clients(self.opts.rooms)
    }

    fn into_packet(self, event: Cow<'static, str>, data: Value) -> Packet {
        let ns = self.ns.path.to_string();
        if self.binary.is_empty() {
            Packet::event(ns, event.into_owned(), data)
        } else {
            Packet::bin_event(ns, event.into_owned(), data, self.binary)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn room_param_conversions() {
        let rooms: Vec<Room> = "room1".into_room_iter().collect();
        assert_eq!(rooms, vec![Room::from("room1")]);

        let rooms: Vec<Room> = ["room1", "room2"].into_room_iter().collect();
        assert_eq!(rooms.len(), 2);

        let rooms: Vec<Room> = vec!["a".to_string()].into_room_iter().collect();
        assert_eq!(rooms, vec![Room::from("a")]);
    }

    #[test]
    fn reserved_tables_cover_lifecycle_names() {
        let reserved = |e: &str| {
            crate::socket::RESERVED_EVENTS.contains(&e) || crate::ns::RESERVED_EVENTS.contains(&e)
        };
        assert!(reserved("connect"));
        assert!(reserved("connection"));
        assert!(reserved("disconnect"));
        assert!(reserved("error"));
        assert!(!reserved("message"));
        assert!(!reserved("chat message"));
    }
}
