use super::{Outcome, Protocol};
use crate::bytestream::ByteStream;
use crate::error::Error;
use crate::operation::Operation;
use crate::stats::StatsSink;

/// Length-prefixed line dialect used by the RocksDB-backed fork of the
/// original tool (`examples/original_source/Protocol.cc`'s
/// `ProtocolRocksDB`), carried forward as a fifth wire format per
/// `SPEC_FULL.md` §4.7. Framed on a `"\n\n"` terminator rather than CRLF.
#[derive(Debug, Default)]
pub struct RocksDbProtocol;

impl RocksDbProtocol {
    pub fn new() -> Self {
        RocksDbProtocol
    }
}

impl Protocol for RocksDbProtocol {
    fn setup_connection_w(&mut self, _stream: &mut ByteStream) -> bool {
        true
    }

    fn setup_connection_r(&mut self, _stream: &mut ByteStream) -> Result<bool, Error> {
        Ok(true)
    }

    fn get_request(&mut self, stream: &mut ByteStream, key: &str) -> usize {
        stream.append(format!("3\nget\n{}\n{}\n\n", key.len(), key).as_bytes())
    }

    fn set_request(&mut self, stream: &mut ByteStream, key: &str, value: &[u8]) -> usize {
        stream.append(
            format!(
                "3\nset\n{}\n{}\n{}\n",
                key.len(),
                key,
                value.len()
            )
            .as_bytes(),
        ) + stream.append(value)
            + stream.append(b"\n\n")
    }

    fn handle_response(
        &mut self,
        stream: &mut ByteStream,
        _op: &Operation,
        stats: &mut dyn StatsSink,
    ) -> Result<Outcome, Error> {
        let pos = match stream.search(b"\n\n") {
            Some(p) => p,
            None => return Ok(Outcome::Pending),
        };
        let body = stream.peek(pos).unwrap().to_vec();
        let consumed = pos + 2;
        stream.drain(consumed);
        stats.add_rx_bytes(consumed as u64);

        if body.starts_with(b"9\nnot_found") {
            Ok(Outcome::Complete {
                miss: true,
                new_leader: None,
            })
        } else if body.starts_with(b"2\nok\n1\n1") || body.starts_with(b"2\nok") {
            Ok(Outcome::Complete {
                miss: false,
                new_leader: None,
            })
        } else {
            Err(Error::ProtocolParse {
                session: 0,
                reason: format!(
                    "unknown rocksdb response: {:?}",
                    String::from_utf8_lossy(&body)
                ),
            })
        }
    }
}
