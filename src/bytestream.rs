use bytes::{Buf, Bytes, BytesMut};

/// A bidirectional, nonblocking octet pipe bound to one server session.
///
/// This is the sans-IO boundary of the crate: nothing in here touches a
/// socket. A driver feeds inbound bytes in via [`ByteStream::feed`] (after
/// reading off the real socket) and pulls outbound bytes out via
/// [`ByteStream::take_outbound`] (to write to the real socket). Protocol
/// engines only ever see this abstraction, never the socket itself.
#[derive(Debug, Default)]
pub struct ByteStream {
    inbound: BytesMut,
    outbound: BytesMut,
    priority: i32,
}

impl ByteStream {
    pub fn new() -> Self {
        ByteStream::default()
    }

    /// Bytes read off the socket by the driver, to be parsed by a protocol
    /// engine.
    pub fn feed(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    /// Append bytes to the outbound buffer. Returns the number of bytes
    /// appended, for transmitted-byte accounting.
    pub fn append(&mut self, data: &[u8]) -> usize {
        self.outbound.extend_from_slice(data);
        data.len()
    }

    /// Pull everything queued for transmission, for the driver to write to
    /// the socket.
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Buffered, unconsumed inbound byte count.
    pub fn len(&self) -> usize {
        self.inbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    /// Consume and return one CRLF-terminated line, without the terminator.
    /// Returns `None` if no full line is buffered yet.
    pub fn readline(&mut self) -> Option<Bytes> {
        let pos = self.search(b"\r\n")?;
        let line = self.inbound.split_to(pos).freeze();
        self.inbound.advance(2);
        Some(line)
    }

    /// Look at the first `n` inbound bytes without consuming them. Returns
    /// `None` if fewer than `n` bytes are buffered.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if self.inbound.len() < n {
            None
        } else {
            Some(&self.inbound[..n])
        }
    }

    /// Drop the first `n` inbound bytes. Panics if fewer than `n` bytes are
    /// buffered — callers must check with `len`/`peek` first.
    pub fn drain(&mut self, n: usize) {
        assert!(self.inbound.len() >= n, "drain past buffered length");
        self.inbound.advance(n);
    }

    /// Byte offset of the first occurrence of `needle` in the inbound
    /// buffer, without consuming anything.
    pub fn search(&self, needle: &[u8]) -> Option<usize> {
        self.inbound
            .windows(needle.len())
            .position(|w| w == needle)
    }

    pub fn set_priority(&mut self, pri: i32) {
        self.priority = pri;
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}
