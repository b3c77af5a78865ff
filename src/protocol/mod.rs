//! Protocol engines: one receive state machine per wire format.
//!
//! Each engine is a tagged variant behind the [`Protocol`] trait rather than
//! a class hierarchy (§9, "virtual dispatch ... maps cleanly to a tagged sum
//! type"). `Connection` owns exactly one `Box<dyn Protocol>` and one
//! [`crate::bytestream::ByteStream`] per session, created on session start
//! and destroyed on session teardown.

pub mod ascii;
pub mod binary;
pub mod etcd;
pub mod http;
pub mod rocksdb;

use crate::bytestream::ByteStream;
use crate::error::Error;
use crate::operation::Operation;
use crate::options::{Options, ProtocolKind};
use crate::stats::StatsSink;

/// Result of one `handle_response` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not enough bytes buffered yet; state has been preserved for the next
    /// call.
    Pending,
    /// A full response was consumed. `miss` is set when a GET completed
    /// without a value. `new_leader`, when present, is a candidate leader
    /// id parsed from a redirect response — the caller (not the engine)
    /// applies the "only if I am the current leader" guard from spec.md
    /// §4.1 before promoting it.
    Complete {
        miss: bool,
        new_leader: Option<usize>,
    },
}

/// One wire-format engine. Implementations must preserve all partial parse
/// state between calls to `handle_response` — it is always restartable.
pub trait Protocol: std::fmt::Debug {
    /// Write any handshake bytes. Returns `true` if the session is
    /// immediately usable, `false` if a handshake response must be awaited.
    fn setup_connection_w(&mut self, stream: &mut ByteStream) -> bool;

    /// Consume a handshake response. Returns `true` once the handshake is
    /// complete. A no-op returning `true` is valid when no handshake is
    /// required (Open Question (c)).
    fn setup_connection_r(&mut self, stream: &mut ByteStream) -> Result<bool, Error>;

    /// Encode and append a GET request. Returns the number of bytes written.
    fn get_request(&mut self, stream: &mut ByteStream, key: &str) -> usize;

    /// Encode and append a SET request. Returns the number of bytes written.
    /// `value`'s length is always the caller-provided length, never
    /// recomputed via `strlen` (§9).
    fn set_request(&mut self, stream: &mut ByteStream, key: &str, value: &[u8]) -> usize;

    /// Attempt to consume exactly one response for the head-of-queue
    /// operation.
    fn handle_response(
        &mut self,
        stream: &mut ByteStream,
        op: &Operation,
        stats: &mut dyn StatsSink,
    ) -> Result<Outcome, Error>;
}

/// Construct the engine selected by `opts`.
pub fn build(kind: ProtocolKind, opts: &Options) -> Box<dyn Protocol> {
    match kind {
        ProtocolKind::Ascii => Box::new(ascii::AsciiProtocol::new()),
        ProtocolKind::Binary => Box::new(binary::BinaryProtocol::new(opts)),
        ProtocolKind::Http => Box::new(http::HttpProtocol::new()),
        ProtocolKind::Etcd | ProtocolKind::Etcd2 => Box::new(etcd::EtcdProtocol::new(opts)),
        ProtocolKind::RocksDb => Box::new(rocksdb::RocksDbProtocol::new()),
    }
}
