//! Sans-IO core for a key-value store load generator.
//!
//! Nothing in this crate owns a socket or a clock. A driver reads bytes off
//! its sockets and hands them to [`connection::Connection::receive`], fires
//! [`connection::Connection::timeout`] when its one per-connection timer
//! expires, and drains [`connection::Connection::poll_io`] /
//! [`connection::Connection::poll_event`] after every call — the same split
//! `quinn-proto`'s `Endpoint`/`Connection` use between packet I/O and
//! protocol state.

pub mod bytestream;
pub mod connection;
pub mod error;
pub mod event;
pub mod generator;
pub mod operation;
pub mod options;
pub mod protocol;
pub mod session;
pub mod stats;

pub use connection::Connection;
pub use error::Error;
pub use event::{Event, Io, Timer};
pub use operation::{OpType, Operation};
pub use options::{Options, ProtocolKind};
pub use stats::{ConnectionStats, StatsSink};
