//! A [`Namespace`] is an isolated event-space multiplexed over the shared
//! transports: it owns the sockets admitted under its path, the middleware
//! chain guarding admission and the adapter executing room fan-out.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, Weak};

use bytes::Bytes;
use serde::Serialize;

use crate::adapter::{Adapter, AdapterFactory};
use crate::client::Client;
use crate::errors::{BroadcastError, MiddlewareError};
use crate::handler::{ConnectCallback, MiddlewareCallback};
use crate::operators::{BroadcastOperators, RoomParam};
use crate::packet::Packet;
use crate::socket::{Socket, SocketId};
use crate::transport::ReadyState;

/// Event names that never produce a wire packet when emitted on a
/// namespace; they are lifecycle notifications delivered through the typed
/// registration methods instead.
pub(crate) const RESERVED_EVENTS: &[&str] = &["connect", "connection", "newListener"];

/// A namespace: a named logical channel grouping sockets, with its own
/// middleware chain and adapter.
pub struct Namespace {
    /// The namespace path, always starting with `/`.
    pub path: Cow<'static, str>,
    adapter: RwLock<Box<dyn Adapter>>,
    sockets: RwLock<HashMap<SocketId, Arc<Socket>>>,
    connected: RwLock<HashMap<SocketId, Arc<Socket>>>,
    middlewares: RwLock<Vec<MiddlewareCallback>>,
    connect_handlers: RwLock<Vec<ConnectCallback>>,
    ack_counter: AtomicI64,
    weak_self: Weak<Namespace>,
}

impl Namespace {
    pub(crate) fn new(path: Cow<'static, str>, factory: &AdapterFactory) -> Arc<Self> {
        let ns = Arc::new_cyclic(|weak: &Weak<Namespace>| Self {
            path,
            adapter: RwLock::new(factory(weak.clone())),
            sockets: RwLock::new(HashMap::new()),
            connected: RwLock::new(HashMap::new()),
            middlewares: RwLock::new(Vec::new()),
            connect_handlers: RwLock::new(Vec::new()),
            ack_counter: AtomicI64::new(0),
            weak_self: weak.clone(),
        });
        ns.adapter().init();
        ns
    }

    /// The owning pointer of this namespace.
    pub(crate) fn arc(&self) -> Arc<Namespace> {
        self.weak_self
            .upgrade()
            .expect("namespace self reference outlives every borrow")
    }

    /// Appends a middleware to the admission chain.
    ///
    /// Middlewares run sequentially in registration order for every incoming
    /// connection request; the first rejection aborts the admission and is
    /// sent back to the peer as an ERROR packet.
    pub fn use_middleware<F, Fut>(&self, middleware: F)
    where
        F: Fn(Arc<Socket>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MiddlewareError>> + Send + 'static,
    {
        let middleware: MiddlewareCallback = Arc::new(move |s| Box::pin(middleware(s)));
        self.middlewares.write().unwrap().push(middleware);
    }

    /// Registers a handler fired with every socket admitted to the
    /// namespace, after its CONNECT packet has been written back.
    pub fn on_connection<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Socket>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ConnectCallback = Arc::new(move |s| Box::pin(handler(s)));
        self.connect_handlers.write().unwrap().push(handler);
    }

    /// Broadcasts an event to every connected socket of the namespace.
    ///
    /// Acknowledgement callbacks are not supported at the namespace level,
    /// and reserved namespace events are rejected with
    /// [`BroadcastError::ReservedEvent`].
    pub fn emit(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<(), BroadcastError> {
        BroadcastOperators::new(self.arc()).emit(event, data)
    }

    /// Broadcasts a `message` event to every connected socket.
    pub fn send(&self, data: impl Serialize) -> Result<(), BroadcastError> {
        self.emit("message", data)
    }

    /// Alias of [`send`](Namespace::send).
    pub fn write(&self, data: impl Serialize) -> Result<(), BroadcastError> {
        self.send(data)
    }

    /// Selects the given rooms as broadcast target for the next emit.
    pub fn to(&self, rooms: impl RoomParam) -> BroadcastOperators {
        BroadcastOperators::new(self.arc()).to(rooms)
    }

    /// Alias of [`to`](Namespace::to).
    pub fn within(&self, rooms: impl RoomParam) -> BroadcastOperators {
        self.to(rooms)
    }

    /// Attaches binary payloads to the next broadcast.
    pub fn bin(
        &self,
        bin: impl IntoIterator<Item = impl Into<Bytes>>,
    ) -> BroadcastOperators {
        BroadcastOperators::new(self.arc()).bin(bin)
    }

    /// Drops the next broadcast for sockets whose transport is not
    /// immediately writable.
    pub fn volatile(&self) -> BroadcastOperators {
        BroadcastOperators::new(self.arc()).volatile()
    }

    /// Forces plain JSON encoding for the next broadcast.
    pub fn json(&self) -> BroadcastOperators {
        BroadcastOperators::new(self.arc()).json()
    }

    /// Sets whether the frames of the next broadcast may be compressed.
    pub fn compress(&self, compress: bool) -> BroadcastOperators {
        BroadcastOperators::new(self.arc()).compress(compress)
    }

    /// The ids of every connected socket of the namespace.
    pub fn clients(&self) -> Vec<SocketId> {
        self.adapter().clients(Vec::new())
    }

    /// Every socket admitted to the namespace.
    pub fn sockets(&self) -> Vec<Arc<Socket>> {
        self.sockets.read().unwrap().values().cloned().collect()
    }

    /// Looks up an admitted socket by id.
    pub fn get_socket(&self, id: &SocketId) -> Option<Arc<Socket>> {
        self.sockets.read().unwrap().get(id).cloned()
    }

    /// Admits a client to the namespace.
    ///
    /// Runs the middleware chain strictly in registration order, each step
    /// awaited; the first rejection answers an ERROR packet and discards the
    /// socket. Admission is finalized on the next tick of the scheduler:
    /// the socket is then registered and its `onconnect` runs before any
    /// user-facing notification.
    pub(crate) async fn add(&self, client: &Arc<Client>) -> Option<Arc<Socket>> {
        let socket = Socket::new(self.arc(), client.clone());

        let middlewares = self.middlewares.read().unwrap().clone();
        for middleware in middlewares {
            if let Err(err) = middleware(socket.clone()).await {
                tracing::debug!(
                    "admission to {} rejected by middleware: {}",
                    self.path,
                    err
                );
                socket
                    .send_packet(
                        Packet::error(self.path.to_string(), err.payload()),
                        Default::default(),
                    )
                    .ok();
                return None;
            }
        }

        tokio::task::yield_now().await;

        if client.transport().ready_state() != ReadyState::Open {
            tracing::debug!("transport closed before admission to {}", self.path);
            return None;
        }

        self.sockets
            .write()
            .unwrap()
            .insert(socket.id.clone(), socket.clone());
        if let Err(_e) = socket.onconnect() {
            tracing::debug!("error sending connect packet: {:?}", _e);
        }
        Some(socket)
    }

    /// Fires the connection handlers for a freshly admitted socket.
    pub(crate) fn fire_connect(&self, socket: &Arc<Socket>) {
        let handlers = self.connect_handlers.read().unwrap().clone();
        for handler in handlers {
            tokio::spawn(handler(socket.clone()));
        }
    }

    pub(crate) fn adapter(&self) -> RwLockReadGuard<'_, Box<dyn Adapter>> {
        self.adapter.read().unwrap()
    }

    /// Replaces the adapter with a fresh instance from the factory.
    pub(crate) fn reset_adapter(&self, factory: &AdapterFactory) {
        let fresh = factory(self.weak_self.clone());
        let old = std::mem::replace(&mut *self.adapter.write().unwrap(), fresh);
        old.close();
        self.adapter().init();
    }

    pub(crate) fn add_connected(&self, socket: Arc<Socket>) {
        self.connected
            .write()
            .unwrap()
            .insert(socket.id.clone(), socket);
    }

    pub(crate) fn connected_socket(&self, id: &SocketId) -> Option<Arc<Socket>> {
        self.connected.read().unwrap().get(id).cloned()
    }

    pub(crate) fn connected_sockets(&self) -> Vec<Arc<Socket>> {
        self.connected.read().unwrap().values().cloned().collect()
    }

    pub(crate) fn remove_socket(&self, id: &SocketId) {
        self.sockets.write().unwrap().remove(id);
        self.connected.write().unwrap().remove(id);
    }

    /// Next acknowledgement id of the namespace, monotonically increasing.
    pub(crate) fn next_ack_id(&self) -> i64 {
        self.ack_counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("path", &self.path)
            .field("sockets", &self.sockets.read().unwrap().len())
            .field("connected", &self.connected.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
impl Namespace {
    pub(crate) fn new_dummy() -> Arc<Self> {
        Namespace::new(
            Cow::Borrowed("/"),
            &crate::adapter::LocalAdapter::factory(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn ack_ids_start_at_zero_and_increase() {
        let ns = Namespace::new_dummy();
        assert_eq!(ns.next_ack_id(), 0);
        assert_eq!(ns.next_ack_id(), 1);
        assert_eq!(ns.next_ack_id(), 2);
    }

    #[tokio::test]
    async fn reserved_namespace_events_never_hit_the_wire() {
        let ns = Namespace::new_dummy();
        assert!(matches!(
            ns.emit("connection", serde_json::json!([])),
            Err(BroadcastError::ReservedEvent("connection"))
        ));
        assert!(matches!(
            ns.emit("connect", serde_json::json!([])),
            Err(BroadcastError::ReservedEvent("connect"))
        ));
    }
}
