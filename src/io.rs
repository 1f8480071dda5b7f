//! The [`Server`] entry point: holds the namespace registry, the adapter
//! factory and the connection table, and exposes the default namespace's
//! API at the top level.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde::Serialize;

use crate::adapter::{AdapterFactory, LocalAdapter};
use crate::client::Client;
use crate::config::{ServerConfig, SettingValue};
use crate::errors::{BroadcastError, ConfigError, MiddlewareError};
use crate::handshake::Handshake;
use crate::ns::Namespace;
use crate::operators::{BroadcastOperators, RoomParam};
use crate::sid::Sid;
use crate::socket::{Socket, SocketId};
use crate::transport::Transport;

pub(crate) struct ServerState {
    config: RwLock<ServerConfig>,
    nsps: RwLock<HashMap<String, Arc<Namespace>>>,
    adapter_factory: RwLock<AdapterFactory>,
    clients: RwLock<HashMap<Sid, Arc<Client>>>,
}

impl ServerState {
    pub(crate) fn get_ns(&self, path: &str) -> Option<Arc<Namespace>> {
        self.nsps.read().unwrap().get(path).cloned()
    }

    pub(crate) fn remove_client(&self, id: Sid) {
        self.clients.write().unwrap().remove(&id);
    }
}

/// The server: namespace registry, adapter factory and connection table.
///
/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct Server {
    state: Arc<ServerState>,
}

impl Server {
    /// Creates a server with the default configuration and the in-memory
    /// adapter.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    fn with_parts(config: ServerConfig, adapter_factory: AdapterFactory) -> Self {
        let state = Arc::new(ServerState {
            config: RwLock::new(config),
            nsps: RwLock::new(HashMap::new()),
            adapter_factory: RwLock::new(adapter_factory),
            clients: RwLock::new(HashMap::new()),
        });
        let server = Self { state };
        // the default namespace mediates identity for every connection
        server.of("/");
        server
    }

    /// A snapshot of the current configuration.
    pub fn config(&self) -> ServerConfig {
        self.state.config.read().unwrap().clone()
    }

    /// Looks up a namespace, creating it on first access.
    ///
    /// A leading `/` is inserted when missing.
    pub fn of(&self, path: impl AsRef<str>) -> Arc<Namespace> {
        let path = normalize_path(path.as_ref());
        if let Some(ns) = self.state.get_ns(&path) {
            return ns;
        }
        tracing::debug!("creating namespace {}", path);
        let factory = self.adapter_factory();
        self.state
            .nsps
            .write()
            .unwrap()
            .entry(path.clone())
            .or_insert_with(|| Namespace::new(Cow::Owned(path), &factory))
            .clone()
    }

    /// Looks up a namespace and registers a connection handler on it.
    pub fn ns<F, Fut>(&self, path: impl AsRef<str>, handler: F) -> Arc<Namespace>
    where
        F: Fn(Arc<Socket>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ns = self.of(path);
        ns.on_connection(handler);
        ns
    }

    /// The factory building one adapter per namespace.
    pub fn adapter_factory(&self) -> AdapterFactory {
        self.state.adapter_factory.read().unwrap().clone()
    }

    /// Replaces the adapter factory and re-creates the adapter of every
    /// existing namespace.
    pub fn set_adapter(&self, factory: AdapterFactory) {
        *self.state.adapter_factory.write().unwrap() = factory.clone();
        let nsps: Vec<Arc<Namespace>> =
            self.state.nsps.read().unwrap().values().cloned().collect();
        for ns in nsps {
            ns.reset_adapter(&factory);
        }
    }

    /// Accepts one engine connection: instantiates its [`Client`] and
    /// connects it to the default namespace.
    ///
    /// Must be called within a tokio runtime: admissions run as spawned
    /// tasks.
    pub fn on_connection(&self, transport: Arc<dyn Transport>) -> Arc<Client> {
        tracing::debug!("incoming connection {}", transport.id());
        let client = Client::new(Arc::downgrade(&self.state), transport.clone());
        transport.bind(client.clone());
        self.state
            .clients
            .write()
            .unwrap()
            .insert(client.id, client.clone());
        client.connect("/");
        client
    }

    /// The client owning the given engine session id, if still connected.
    pub fn client(&self, id: Sid) -> Option<Arc<Client>> {
        self.state.clients.read().unwrap().get(&id).cloned()
    }

    /// Force-closes every connection and releases the namespace adapters.
    pub fn close(&self) {
        tracing::debug!("closing server");
        let clients: Vec<Arc<Client>> =
            self.state.clients.read().unwrap().values().cloned().collect();
        for client in clients {
            client.close();
        }
        self.state.clients.write().unwrap().clear();
        for ns in self.state.nsps.read().unwrap().values() {
            ns.adapter().close();
        }
    }

    /// Applies a legacy `set(key, value)` configuration pair.
    ///
    /// Accepted keys: `origins`, `resource` (path alias),
    /// `heartbeat timeout`, `heartbeat interval`, `destroy buffer size` and
    /// `transports`. Authorization is installed with
    /// [`set_authorization`](Server::set_authorization).
    pub fn set(&self, key: &str, value: impl Into<SettingValue>) -> Result<(), ConfigError> {
        self.state.config.write().unwrap().apply(key, value.into())
    }

    /// Installs a handshake-checking middleware on the default namespace.
    pub fn set_authorization<F>(&self, auth: F)
    where
        F: Fn(&Handshake) -> Result<(), MiddlewareError> + Send + Sync + 'static,
    {
        let auth = Arc::new(auth);
        self.of("/").use_middleware(move |socket: Arc<Socket>| {
            let auth = auth.clone();
            async move { auth(&socket.handshake) }
        });
    }

    // The default namespace's API, proxied at the top level.

    /// The default namespace.
    pub fn sockets(&self) -> Arc<Namespace> {
        self.of("/")
    }

    /// Appends a middleware to the default namespace's admission chain.
    pub fn use_middleware<F, Fut>(&self, middleware: F)
    where
        F: Fn(Arc<Socket>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MiddlewareError>> + Send + 'static,
    {
        self.of("/").use_middleware(middleware);
    }

    /// Broadcasts an event to every connected socket of the default
    /// namespace.
    pub fn emit(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<(), BroadcastError> {
        self.of("/").emit(event, data)
    }

    /// Broadcasts a `message` event on the default namespace.
    pub fn send(&self, data: impl Serialize) -> Result<(), BroadcastError> {
        self.of("/").send(data)
    }

    /// Alias of [`send`](Server::send).
    pub fn write(&self, data: impl Serialize) -> Result<(), BroadcastError> {
        self.send(data)
    }

    /// Selects broadcast rooms on the default namespace.
    pub fn to(&self, rooms: impl RoomParam) -> BroadcastOperators {
        self.of("/").to(rooms)
    }

    /// Alias of [`to`](Server::to).
    pub fn within(&self, rooms: impl RoomParam) -> BroadcastOperators {
        self.of("/").within(rooms)
    }

    /// Attaches binary payloads to the next broadcast on the default
    /// namespace.
    pub fn bin(&self, bin: impl IntoIterator<Item = impl Into<Bytes>>) -> BroadcastOperators {
        self.of("/").bin(bin)
    }

    /// The ids of every connected socket of the default namespace.
    pub fn clients(&self) -> Vec<SocketId> {
        self.of("/").clients()
    }

    /// Sets the compression of the next broadcast on the default namespace.
    pub fn compress(&self, compress: bool) -> BroadcastOperators {
        self.of("/").compress(compress)
    }

    /// Marks the next broadcast on the default namespace as volatile.
    pub fn volatile(&self) -> BroadcastOperators {
        self.of("/").volatile()
    }

    /// Forces plain JSON encoding on the next broadcast of the default
    /// namespace.
    pub fn json(&self) -> BroadcastOperators {
        self.of("/").json()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("namespaces", &self.state.nsps.read().unwrap().len())
            .field("clients", &self.state.clients.read().unwrap().len())
            .finish()
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Builder for a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    adapter_factory: AdapterFactory,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            adapter_factory: LocalAdapter::factory(),
        }
    }

    /// The request path the engine transport is attached under.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Allowed origins, forwarded to the HTTP attachment layer.
    pub fn origins(mut self, origins: impl Into<String>) -> Self {
        self.config.origins = origins.into();
        self
    }

    /// The interval at which the engine sends heartbeat probes.
    pub fn ping_interval(mut self, ping_interval: std::time::Duration) -> Self {
        self.config.engine.ping_interval = ping_interval;
        self
    }

    /// The delay the engine waits for a heartbeat answer.
    pub fn ping_timeout(mut self, ping_timeout: std::time::Duration) -> Self {
        self.config.engine.ping_timeout = ping_timeout;
        self
    }

    /// The maximum size of a payload in bytes.
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.config.engine.max_payload = max_payload;
        self
    }

    /// Allowed transport kinds, in upgrade order.
    pub fn transports(mut self, transports: Vec<String>) -> Self {
        self.config.engine.transports = transports;
        self
    }

    /// The adapter factory used by every namespace.
    pub fn adapter(mut self, factory: AdapterFactory) -> Self {
        self.adapter_factory = factory;
        self
    }

    pub fn build(self) -> Server {
        Server::with_parts(self.config, self.adapter_factory)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn of_normalizes_and_lazily_creates() {
        let io = Server::new();
        let ns = io.of("chat");
        assert_eq!(&*ns.path, "/chat");
        assert!(Arc::ptr_eq(&ns, &io.of("/chat")));
    }

    #[tokio::test]
    async fn default_namespace_exists_at_construction() {
        let io = Server::new();
        assert_eq!(&*io.sockets().path, "/");
    }

    #[tokio::test]
    async fn set_adapter_reinitializes_existing_namespaces() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let io = Server::new();
        io.of("/chat");

        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        io.set_adapter(Arc::new(move |ns| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(LocalAdapter::new(ns))
        }));
        // one fresh adapter per existing namespace
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
