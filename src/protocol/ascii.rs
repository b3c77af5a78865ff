use super::{Outcome, Protocol};
use crate::bytestream::ByteStream;
use crate::error::Error;
use crate::operation::Operation;
use crate::stats::StatsSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    WaitingForGet,
    WaitingForGetData,
    WaitingForEnd,
}

/// ASCII (memcache text protocol) engine.
///
/// Requests: `"get <key>\r\n"`, `"set <key> 0 0 <len>\r\n<value>\r\n"`.
/// A GET completing with only `END` (never having seen a `VALUE` line) is a
/// miss.
#[derive(Debug)]
pub struct AsciiProtocol {
    read_state: ReadState,
    data_length: usize,
}

impl AsciiProtocol {
    pub fn new() -> Self {
        AsciiProtocol {
            read_state: ReadState::WaitingForGet,
            data_length: 0,
        }
    }
}

impl Default for AsciiProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for AsciiProtocol {
    fn setup_connection_w(&mut self, _stream: &mut ByteStream) -> bool {
        true
    }

    fn setup_connection_r(&mut self, _stream: &mut ByteStream) -> Result<bool, Error> {
        Ok(true)
    }

    fn get_request(&mut self, stream: &mut ByteStream, key: &str) -> usize {
        stream.append(format!("get {}\r\n", key).as_bytes())
    }

    fn set_request(&mut self, stream: &mut ByteStream, key: &str, value: &[u8]) -> usize {
        let mut n = stream.append(format!("set {} 0 0 {}\r\n", key, value.len()).as_bytes());
        n += stream.append(value);
        n += stream.append(b"\r\n");
        n
    }

    fn handle_response(
        &mut self,
        stream: &mut ByteStream,
        _op: &Operation,
        stats: &mut dyn StatsSink,
    ) -> Result<Outcome, Error> {
        loop {
            match self.read_state {
                ReadState::WaitingForGet | ReadState::WaitingForEnd => {
                    let line = match stream.readline() {
                        Some(l) => l,
                        None => return Ok(Outcome::Pending),
                    };
                    stats.add_rx_bytes(line.len() as u64 + 2);

                    if &line[..] == b"END" {
                        let miss = self.read_state == ReadState::WaitingForGet;
                        self.read_state = ReadState::WaitingForGet;
                        return Ok(Outcome::Complete {
                            miss,
                            new_leader: None,
                        });
                    } else if &line[..] == b"STORED" {
                        self.read_state = ReadState::WaitingForGet;
                        return Ok(Outcome::Complete {
                            miss: false,
                            new_leader: None,
                        });
                    } else if line.starts_with(b"VALUE") {
                        let text = String::from_utf8_lossy(&line);
                        let len: usize = text
                            .split_whitespace()
                            .nth(3)
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| Error::ProtocolParse {
                                session: 0,
                                reason: format!("malformed VALUE line: {:?}", text),
                            })?;
                        self.data_length = len;
                        self.read_state = ReadState::WaitingForGetData;
                        // fall through to drain the data section
                    } else {
                        return Err(Error::ProtocolParse {
                            session: 0,
                            reason: format!(
                                "unknown line while expecting VALUE | STORED | END: {:?}",
                                String::from_utf8_lossy(&line)
                            ),
                        });
                    }
                }

                ReadState::WaitingForGetData => {
                    if stream.len() < self.data_length + 2 {
                        return Ok(Outcome::Pending);
                    }
                    stream.drain(self.data_length + 2);
                    stats.add_rx_bytes(self.data_length as u64 + 2);
                    self.read_state = ReadState::WaitingForEnd;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpType;
    use crate::stats::ConnectionStats;
    use std::time::Instant;

    fn op(ty: OpType) -> Operation {
        Operation::new(ty, Instant::now())
    }

    #[test]
    fn get_hit() {
        let mut p = AsciiProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"VALUE k 0 3\r\nval\r\nEND\r\n");
        let outcome = p
            .handle_response(&mut stream, &op(OpType::Get), &mut stats)
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Complete {
                miss: false,
                new_leader: None
            }
        );
        assert_eq!(stats.rx_bytes, 23);
    }

    #[test]
    fn get_miss() {
        let mut p = AsciiProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"END\r\n");
        let outcome = p
            .handle_response(&mut stream, &op(OpType::Get), &mut stats)
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Complete {
                miss: true,
                new_leader: None
            }
        );
    }

    #[test]
    fn set_stored() {
        let mut p = AsciiProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"STORED\r\n");
        let outcome = p
            .handle_response(&mut stream, &op(OpType::Set), &mut stats)
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Complete {
                miss: false,
                new_leader: None
            }
        );
    }

    #[test]
    fn unknown_line_is_fatal() {
        let mut p = AsciiProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"BOGUS\r\n");
        assert!(p
            .handle_response(&mut stream, &op(OpType::Get), &mut stats)
            .is_err());
    }

    #[test]
    fn requests_are_byte_exact() {
        let mut p = AsciiProtocol::new();
        let mut stream = ByteStream::new();
        p.get_request(&mut stream, "foo");
        assert_eq!(stream.take_outbound().as_ref(), b"get foo\r\n");
        p.set_request(&mut stream, "foo", b"bar");
        assert_eq!(
            stream.take_outbound().as_ref(),
            b"set foo 0 0 3\r\nbar\r\n".as_ref()
        );
    }

    #[test]
    fn partial_value_line_then_partial_data() {
        let mut p = AsciiProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"VALUE k 0 3\r\n");
        assert_eq!(
            p.handle_response(&mut stream, &op(OpType::Get), &mut stats)
                .unwrap(),
            Outcome::Pending
        );
        stream.feed(b"va");
        assert_eq!(
            p.handle_response(&mut stream, &op(OpType::Get), &mut stats)
                .unwrap(),
            Outcome::Pending
        );
        stream.feed(b"l\r\nEND\r\n");
        assert_eq!(
            p.handle_response(&mut stream, &op(OpType::Get), &mut stats)
                .unwrap(),
            Outcome::Complete {
                miss: false,
                new_leader: None
            }
        );
    }
}
