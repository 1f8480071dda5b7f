//! Adapters own room membership and execute broadcast.
//!
//! When a socket joins or leaves a room, the adapter updates the membership
//! indices; broadcasting resolves the target sockets and pushes the packet
//! through each client's pre-encoded write path. The default
//! [`LocalAdapter`] keeps the state in memory; process-external
//! implementations (e.g. backed by a pub/sub bus) can be plugged in through
//! the [`AdapterFactory`] at server construction or afterwards.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use itertools::Itertools;

use crate::errors::{AdapterError, BroadcastError};
use crate::ns::Namespace;
use crate::packet::Packet;
use crate::parser::Encoder;
use crate::socket::{Socket, SocketId};
use crate::transport::WriteOptions;

/// A room identifier.
pub type Room = Cow<'static, str>;

/// Flags modifying the behavior of an emission.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BroadcastFlags {
    /// The emission targets every connected socket of the namespace instead
    /// of going to a single peer.
    Broadcast,
    /// Drop the packet for sockets whose transport is not immediately
    /// writable instead of queueing it.
    Volatile,
    /// Force plain JSON encoding. A no-op for the default codec, carried for
    /// compatibility with alternative encoders.
    Json,
}

/// Options applied to a broadcast.
#[derive(Clone, Debug)]
pub struct BroadcastOptions {
    /// Target rooms. Empty means every connected socket of the namespace.
    pub rooms: Vec<Room>,
    /// Socket ids excluded from the target set.
    pub except: Vec<SocketId>,
    /// Emission flags.
    pub flags: HashSet<BroadcastFlags>,
    /// Whether frames may be compressed on the wire.
    pub compress: bool,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            except: Vec::new(),
            flags: HashSet::new(),
            compress: true,
        }
    }
}

/// Maps sockets to rooms and executes broadcast.
///
/// Implementations must be safe for the single-threaded-caller scheduling
/// model; the in-process [`LocalAdapter`] adds interior locking so it can
/// also be driven from several tasks.
pub trait Adapter: Send + Sync + 'static {
    /// Initialize the adapter once attached to its namespace.
    fn init(&self) {}

    /// Release any resource held by the adapter.
    fn close(&self) {}

    /// Add the socket to a room. Adding twice is a no-op.
    fn add(&self, id: SocketId, room: Room) -> Result<(), AdapterError>;

    /// Remove the socket from a room. Removing a non-member is a no-op.
    fn del(&self, id: SocketId, room: Room) -> Result<(), AdapterError>;

    /// Remove the socket from every room.
    fn del_all(&self, id: &SocketId);

    /// Broadcast the packet to the sockets matching `opts`.
    fn broadcast(&self, packet: Packet, opts: BroadcastOptions) -> Result<(), BroadcastError>;

    /// Socket ids member of any of the given rooms; with no rooms, every
    /// connected socket of the namespace.
    fn clients(&self, rooms: Vec<Room>) -> Vec<SocketId>;

    /// Rooms the socket is a member of.
    fn socket_rooms(&self, id: &SocketId) -> Vec<Room>;
}

/// Builds one adapter instance per namespace.
pub type AdapterFactory = Arc<dyn Fn(Weak<Namespace>) -> Box<dyn Adapter> + Send + Sync>;

/// The default in-memory adapter.
#[derive(Debug)]
pub struct LocalAdapter {
    rooms: RwLock<HashMap<Room, HashSet<SocketId>>>,
    sids: RwLock<HashMap<SocketId, HashSet<Room>>>,
    ns: Weak<Namespace>,
}

impl LocalAdapter {
    pub fn new(ns: Weak<Namespace>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            sids: RwLock::new(HashMap::new()),
            ns,
        }
    }

    /// Factory producing a [`LocalAdapter`] per namespace.
    pub fn factory() -> AdapterFactory {
        Arc::new(|ns| Box::new(LocalAdapter::new(ns)))
    }

    /// Resolve the target sockets of a broadcast.
    fn apply_opts(&self, opts: &BroadcastOptions) -> Vec<Arc<Socket>> {
        let Some(ns) = self.ns.upgrade() else {
            return Vec::new();
        };
        let except: HashSet<&SocketId> = opts.except.iter().collect();

        if opts.rooms.is_empty() {
            ns.connected_sockets()
                .into_iter()
                .filter(|socket| !except.contains(&socket.id))
                .collect()
        } else {
            let rooms_map = self.rooms.read().unwrap();
            opts.rooms
                .iter()
                .filter_map(|room| rooms_map.get(room))
                .flatten()
                .unique()
                .filter(|id| !except.contains(id))
                .filter_map(|id| ns.connected_socket(id))
                .collect()
        }
    }
}

impl Adapter for LocalAdapter {
    fn add(&self, id: SocketId, room: Room) -> Result<(), AdapterError> {
        self.rooms
            .write()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .insert(id.clone());
        self.sids.write().unwrap().entry(id).or_default().insert(room);
        Ok(())
    }

    fn del(&self, id: SocketId, room: Room) -> Result<(), AdapterError> {
        if let Some(members) = self.rooms.write().unwrap().get_mut(&room) {
            members.remove(&id);
        }
        if let Some(rooms) = self.sids.write().unwrap().get_mut(&id) {
            rooms.remove(&room);
        }
        Ok(())
    }

    fn del_all(&self, id: &SocketId) {
        if let Some(rooms) = self.sids.write().unwrap().remove(id) {
            let mut rooms_map = self.rooms.write().unwrap();
            for room in rooms {
                if let Some(members) = rooms_map.get_mut(&room) {
                    members.remove(id);
                }
            }
        }
    }

    fn broadcast(&self, packet: Packet, opts: BroadcastOptions) -> Result<(), BroadcastError> {
        let sockets = self.apply_opts(&opts);
        tracing::debug!("broadcasting packet to {} sockets", sockets.len());

        // Encode once; every recipient gets the same frames.
        let frames = Encoder::encode(packet)?;
        let write_opts = WriteOptions {
            compress: opts.compress,
        };
        let volatile = opts.flags.contains(&BroadcastFlags::Volatile);

        let errors: Vec<_> = sockets
            .into_iter()
            .filter(|socket| !volatile || socket.transport_writable())
            .filter_map(|socket| socket.send_frames(&frames, write_opts).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    fn clients(&self, rooms: Vec<Room>) -> Vec<SocketId> {
        if rooms.is_empty() {
            let Some(ns) = self.ns.upgrade() else {
                return Vec::new();
            };
            return ns
                .connected_sockets()
                .into_iter()
                .map(|socket| socket.id.clone())
                .collect();
        }
        let rooms_map = self.rooms.read().unwrap();
        rooms
            .iter()
            .filter_map(|room| rooms_map.get(room))
            .flatten()
            .unique()
            .cloned()
            .collect()
    }

    fn socket_rooms(&self, id: &SocketId) -> Vec<Room> {
        self.sids
            .read()
            .unwrap()
            .get(id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sid(ns: &Arc<Namespace>, n: u8) -> SocketId {
        SocketId::from_parts(&ns.path, &format!("sid{n}"))
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let ns = Namespace::new_dummy();
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        let id = sid(&ns, 1);
        adapter.add(id.clone(), "room1".into()).unwrap();
        adapter.add(id.clone(), "room1".into()).unwrap();
        assert_eq!(adapter.clients(vec!["room1".into()]), vec![id]);
    }

    #[tokio::test]
    async fn del_removes_membership() {
        let ns = Namespace::new_dummy();
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        let id = sid(&ns, 1);
        adapter.add(id.clone(), "room1".into()).unwrap();
        adapter.add(id.clone(), "room2".into()).unwrap();
        adapter.del(id.clone(), "room1".into()).unwrap();
        assert!(adapter.clients(vec!["room1".into()]).is_empty());
        assert_eq!(adapter.socket_rooms(&id), vec![Room::from("room2")]);
    }

    #[tokio::test]
    async fn del_all_clears_every_room() {
        let ns = Namespace::new_dummy();
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        let id = sid(&ns, 1);
        adapter.add(id.clone(), "room1".into()).unwrap();
        adapter.add(id.clone(), "room2".into()).unwrap();
        adapter.del_all(&id);
        assert!(adapter.clients(vec!["room1".into()]).is_empty());
        assert!(adapter.clients(vec!["room2".into()]).is_empty());
        assert!(adapter.socket_rooms(&id).is_empty());
    }

    #[tokio::test]
    async fn clients_unions_rooms_without_duplicates() {
        let ns = Namespace::new_dummy();
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        let a = sid(&ns, 1);
        let b = sid(&ns, 2);
        adapter.add(a.clone(), "room1".into()).unwrap();
        adapter.add(a.clone(), "room2".into()).unwrap();
        adapter.add(b.clone(), "room2".into()).unwrap();
        let clients = adapter.clients(vec!["room1".into(), "room2".into()]);
        assert_eq!(clients.len(), 2);
        assert!(clients.contains(&a));
        assert!(clients.contains(&b));
    }
}
