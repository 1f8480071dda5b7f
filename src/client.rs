//! A [`Client`] demultiplexes one engine transport into zero-or-more
//! namespace sockets: it owns the decoder, routes decoded packets to the
//! right namespace, buffers connection requests arriving before the default
//! namespace is admitted and orchestrates the fanned close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde_json::Value;

use crate::errors::{SendError, TransportError};
use crate::handler::BoxAsync;
use crate::io::ServerState;
use crate::packet::{Packet, PacketData};
use crate::parser::{Decoder, Encoder};
use crate::sid::Sid;
use crate::socket::{DisconnectReason, Socket, SocketId};
use crate::transport::{Frame, ReadyState, Transport, TransportHandler, WriteOptions};

/// Options applied when writing one packet to the transport.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PacketOptions {
    pub compress: bool,
    /// Drop instead of queueing when the transport is not writable.
    pub volatile: bool,
}

impl Default for PacketOptions {
    fn default() -> Self {
        Self {
            compress: true,
            volatile: false,
        }
    }
}

/// One client per accepted transport.
pub struct Client {
    /// The engine-assigned id of the underlying transport.
    pub id: Sid,
    server: Weak<ServerState>,
    transport: Arc<dyn Transport>,
    decoder: Mutex<Decoder>,
    /// Sockets of this client, indexed by socket id.
    sockets: RwLock<HashMap<SocketId, Arc<Socket>>>,
    /// Sockets of this client, indexed by namespace path.
    namespaces: RwLock<HashMap<String, Arc<Socket>>>,
    /// Namespace paths whose admission is deferred until the default
    /// namespace is connected, in arrival order.
    connect_buffer: Mutex<Vec<String>>,
    weak_self: Weak<Client>,
    destroyed: AtomicBool,
    closed: AtomicBool,
}

impl Client {
    pub(crate) fn new(server: Weak<ServerState>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id: transport.id(),
            server,
            transport,
            decoder: Mutex::new(Decoder::new()),
            sockets: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
            connect_buffer: Mutex::new(Vec::new()),
            weak_self: weak_self.clone(),
            destroyed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The socket of this client on the given namespace, if connected.
    pub fn socket(&self, ns: &str) -> Option<Arc<Socket>> {
        self.namespaces.read().unwrap().get(ns).cloned()
    }

    /// Handles a connection request for a namespace.
    ///
    /// Unknown namespaces are answered with an ERROR packet. Requests for
    /// subsidiary namespaces arriving before the default namespace is
    /// connected are buffered and replayed, in arrival order, once it is.
    pub(crate) fn connect(&self, ns_path: &str) {
        if ns_path != "/" && !self.namespaces.read().unwrap().contains_key("/") {
            tracing::debug!(
                "buffering connect to {} until the default namespace is admitted",
                ns_path
            );
            self.connect_buffer.lock().unwrap().push(ns_path.to_string());
            return;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(this.admit(ns_path.to_string()));
    }

    /// Runs one admission to completion. Boxed so the connect-buffer drain
    /// can replay admissions from within an admission.
    fn admit(self: Arc<Self>, ns_path: String) -> BoxAsync {
        Box::pin(async move {
            let Some(server) = self.server.upgrade() else {
                return;
            };
            let Some(ns) = server.get_ns(&ns_path) else {
                tracing::debug!("invalid namespace requested: {}", ns_path);
                self.packet(Packet::invalid_namespace(ns_path), PacketOptions::default())
                    .ok();
                return;
            };

            let Some(socket) = ns.add(&self).await else {
                return;
            };

            self.sockets
                .write()
                .unwrap()
                .insert(socket.id.clone(), socket.clone());
            self.namespaces
                .write()
                .unwrap()
                .insert(ns_path.clone(), socket.clone());

            if ns_path == "/" {
                let pending = std::mem::take(&mut *self.connect_buffer.lock().unwrap());
                if !pending.is_empty() {
                    let client = self.clone();
                    tokio::spawn(async move {
                        for path in pending {
                            client.clone().admit(path).await;
                        }
                    });
                }
            }

            ns.fire_connect(&socket);
        })
    }

    /// Writes one packet through the encoder.
    ///
    /// Silently dropped when the transport is not open, or when the packet
    /// is volatile and the transport is not writable.
    pub(crate) fn packet(&self, packet: Packet, opts: PacketOptions) -> Result<(), SendError> {
        if self.transport.ready_state() != ReadyState::Open {
            tracing::debug!("dropping packet for {}: transport closed", self.id);
            return Ok(());
        }
        if opts.volatile && !self.transport.writable() {
            tracing::debug!("dropping volatile packet for {}", self.id);
            return Ok(());
        }
        let frames = Encoder::encode(packet)?;
        self.write_frames(
            &frames,
            WriteOptions {
                compress: opts.compress,
            },
        )
    }

    /// Writes pre-encoded frames through, without invoking the encoder.
    pub(crate) fn write_frames(
        &self,
        frames: &[Frame],
        opts: WriteOptions,
    ) -> Result<(), SendError> {
        if self.transport.ready_state() != ReadyState::Open {
            tracing::debug!("dropping frames for {}: transport closed", self.id);
            return Ok(());
        }
        for frame in frames {
            self.transport.write(frame.clone(), opts)?;
        }
        Ok(())
    }

    /// Routes one decoded packet.
    fn ondecoded(&self, packet: Packet) {
        match packet.inner {
            PacketData::Connect => self.connect(&packet.ns),
            inner => {
                let socket = self.namespaces.read().unwrap().get(&packet.ns).cloned();
                match socket {
                    Some(socket) => {
                        if let Err(_e) = socket.onpacket(inner) {
                            tracing::debug!(
                                "error dispatching packet to {}: {}",
                                packet.ns,
                                _e
                            );
                        }
                    }
                    None => {
                        tracing::debug!("dropping packet for unknown namespace {}", packet.ns);
                    }
                }
            }
        }
    }

    /// Disconnects every socket of the client, then closes the transport.
    pub(crate) fn disconnect(&self) {
        let sockets: Vec<Arc<Socket>> = self.sockets.read().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.disconnect();
        }
        self.close();
    }

    /// Drops a departed socket from both indices.
    pub(crate) fn remove(&self, socket: &Socket) {
        self.sockets.write().unwrap().remove(&socket.id);
        self.namespaces.write().unwrap().remove(socket.ns_path());
    }

    /// Force-closes the connection from the server side.
    pub(crate) fn close(&self) {
        if self.transport.ready_state() == ReadyState::Open {
            self.destroy();
            self.transport.close();
            self.onclose(DisconnectReason::ForcedServerClose);
        }
    }

    /// A decoder or transport failure: fanned to every socket's error path,
    /// then the connection is closed.
    fn onerror(&self, err: String) {
        tracing::debug!("client {} error: {}", self.id, err);
        let sockets: Vec<Arc<Socket>> = self.sockets.read().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.onerror(Value::String(err.clone()));
        }
        self.onclose(DisconnectReason::ClientError);
    }

    /// Terminal teardown: fans `onclose` to every socket, clears the
    /// indices and destroys the decoder. Idempotent.
    pub(crate) fn onclose(&self, reason: DisconnectReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing client {} with reason: {}", self.id, reason);
        self.destroy();

        let sockets: Vec<Arc<Socket>> = self.sockets.read().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.onclose(reason);
        }
        self.sockets.write().unwrap().clear();
        self.namespaces.write().unwrap().clear();
        self.connect_buffer.lock().unwrap().clear();
        self.decoder.lock().unwrap().destroy();

        if let Some(server) = self.server.upgrade() {
            server.remove_client(self.id);
        }
    }

    /// Removes the transport listeners. Idempotent.
    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.transport.unbind();
        }
    }
}

impl TransportHandler for Client {
    fn on_data(&self, frame: Frame) {
        let decoded = self.decoder.lock().unwrap().add(frame);
        match decoded {
            Ok(Some(packet)) => self.ondecoded(packet),
            Ok(None) => (),
            Err(err) => {
                tracing::debug!("decoder error on client {}: {}", self.id, err);
                self.onerror(err.to_string());
            }
        }
    }

    fn on_error(&self, err: TransportError) {
        self.onerror(err.to_string());
    }

    fn on_close(&self) {
        self.onclose(DisconnectReason::TransportClose);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("sockets", &self.sockets.read().unwrap().len())
            .field("connect_buffer", &self.connect_buffer.lock().unwrap())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::InMemoryTransport;

    #[tokio::test]
    async fn packet_is_dropped_once_the_transport_closed() {
        let io = crate::Server::new();
        let (transport, mut rx) = InMemoryTransport::new();
        let client = io.on_connection(transport.clone());
        // drain the CONNECT reply of the default namespace
        rx.recv().await.unwrap();

        transport.close();
        client
            .packet(
                Packet::event("/", "late", Value::Null),
                PacketOptions::default(),
            )
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pre_encoded_frames_are_written_in_order() {
        let io = crate::Server::new();
        let (transport, mut rx) = InMemoryTransport::new();
        let client = io.on_connection(transport.clone());
        rx.recv().await.unwrap();

        let frames = vec![
            Frame::Text("2[\"a\"]".to_string()),
            Frame::Binary(bytes::Bytes::from_static(&[1])),
        ];
        client.write_frames(&frames, WriteOptions::default()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), frames[0]);
        assert_eq!(rx.recv().await.unwrap(), frames[1]);
    }
}
