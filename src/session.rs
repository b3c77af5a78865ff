use std::collections::VecDeque;

use crate::bytestream::ByteStream;
use crate::operation::Operation;
use crate::protocol::Protocol;

/// Read-side state of one [`ServerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    InitRead,
    ConnSetup,
    Idle,
    WaitingForGet,
    WaitingForSet,
    Loading,
}

/// Write-side (pacing) state of one [`ServerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    InitWrite,
    WaitingForTime,
    Issuing,
    WaitingForOpq,
}

/// One server replica: a ByteStream, a protocol engine, and the FIFO of
/// in-flight operations issued against it. Created on session start,
/// destroyed on session teardown; both the engine and the stream outlive
/// every `Operation` they process.
#[derive(Debug)]
pub struct ServerSession {
    pub id: usize,
    pub host: String,
    pub port: u16,
    pub stream: ByteStream,
    pub protocol: Box<dyn Protocol>,
    pub op_queue: VecDeque<Operation>,
    pub read_state: ReadState,
    pub write_state: WriteState,
}

impl ServerSession {
    pub fn new(id: usize, host: String, port: u16, protocol: Box<dyn Protocol>) -> Self {
        ServerSession {
            id,
            host,
            port,
            stream: ByteStream::new(),
            protocol,
            op_queue: VecDeque::new(),
            read_state: ReadState::InitRead,
            write_state: WriteState::InitWrite,
        }
    }

    /// `read_state == Idle` iff the queue is empty and no handshake is
    /// pending — checked here rather than inlined everywhere it matters.
    pub fn is_idle(&self) -> bool {
        self.read_state == ReadState::Idle
    }
}
