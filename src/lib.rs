//! Bidirectional, event-oriented messaging layer multiplexing namespaces,
//! rooms and acknowledgements over a pre-established framed engine
//! transport.
//!
//! The engine (handshake, framing, heartbeats) is external; this crate
//! consumes the [`Transport`](transport::Transport) contract and provides:
//! * logical multiplexing of one connection into named namespaces,
//! * room-based fan-out within a namespace through a pluggable
//!   [`Adapter`](adapter::Adapter),
//! * a typed packet protocol with binary attachments,
//! * acknowledgement correlation between events and their replies,
//! * a per-namespace middleware chain guarding admission.
//!
//! ## Example
//!
//! ```no_run
//! use muxio::{Server, transport::InMemoryTransport};
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() {
//!     let io = Server::new();
//!
//!     io.ns("/", |socket| async move {
//!         println!("socket connected with id {}", socket.id);
//!
//!         socket.on("chat message", |socket, data: Value, _bin, _ack| async move {
//!             socket.join("chatters").ok();
//!             socket.to("chatters").emit("chat message", data).ok();
//!         });
//!
//!         socket.on_disconnect(|socket, reason| async move {
//!             println!("socket {} disconnected: {}", socket.id, reason);
//!         });
//!     });
//!
//!     // hand every accepted engine connection to the server
//!     let (transport, _rx) = InMemoryTransport::new();
//!     io.on_connection(transport);
//! }
//! ```

pub mod adapter;
pub mod transport;

pub use ack::{AckReceiver, AckResponse};
pub use client::Client;
pub use config::{EngineOptions, ServerConfig, SettingValue};
pub use errors::{
    AckError, AdapterError, BroadcastError, ConfigError, Error, MiddlewareError, SendError,
    TransportError,
};
pub use handler::AckSender;
pub use handshake::Handshake;
pub use io::{Server, ServerBuilder};
pub use ns::Namespace;
pub use operators::{BroadcastOperators, ConfOperators, RoomParam};
pub use packet::{BinaryPacket, Packet, PacketData};
pub use parser::{Decoder, Encoder};
pub use sid::Sid;
pub use socket::{DisconnectReason, Socket, SocketId};

mod ack;
mod client;
mod config;
mod errors;
mod handler;
mod handshake;
mod io;
mod ns;
mod operators;
mod packet;
mod parser;
mod sid;
mod socket;
