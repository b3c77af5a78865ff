use super::{Outcome, Protocol};
use crate::bytestream::ByteStream;
use crate::error::Error;
use crate::operation::Operation;
use crate::stats::StatsSink;

#[derive(Debug, Clone)]
enum ReadState {
    Status,
    Headers { content_length: Option<usize> },
    Body { remaining: usize },
}

/// Plain HTTP/1.1 REST protocol engine.
///
/// Requests: `"GET /<key> HTTP/1.1\r\n\r\n"` and a `POST` with a
/// `Content-Length` header and an `application/x-www-form-urlencoded` body.
#[derive(Debug)]
pub struct HttpProtocol {
    read_state: ReadState,
    pending_miss: bool,
}

impl HttpProtocol {
    pub fn new() -> Self {
        HttpProtocol {
            read_state: ReadState::Status,
            pending_miss: false,
        }
    }
}

impl Default for HttpProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for HttpProtocol {
    fn setup_connection_w(&mut self, _stream: &mut ByteStream) -> bool {
        true
    }

    fn setup_connection_r(&mut self, _stream: &mut ByteStream) -> Result<bool, Error> {
        Ok(true)
    }

    fn get_request(&mut self, stream: &mut ByteStream, key: &str) -> usize {
        stream.append(format!("GET /{} HTTP/1.1\r\n\r\n", key).as_bytes())
    }

    fn set_request(&mut self, stream: &mut ByteStream, key: &str, value: &[u8]) -> usize {
        let content_len = value.len() + 6; // "value=" prefix
        let mut n = stream.append(
            format!(
                "POST /{} HTTP/1.1\r\nContent-Length: {}\r\n",
                key, content_len
            )
            .as_bytes(),
        );
        n += stream.append(
            b"Content-Type: application/x-www-form-urlencoded\r\n\r\nvalue=",
        );
        n += stream.append(value);
        n
    }

    fn handle_response(
        &mut self,
        stream: &mut ByteStream,
        _op: &Operation,
        stats: &mut dyn StatsSink,
    ) -> Result<Outcome, Error> {
        loop {
            match &mut self.read_state {
                ReadState::Status => {
                    let line = match stream.readline() {
                        Some(l) => l,
                        None => return Ok(Outcome::Pending),
                    };
                    stats.add_rx_bytes(line.len() as u64 + 2);
                    self.pending_miss = if &line[..] == b"HTTP/1.1 404 Not Found" {
                        true
                    } else if &line[..] == b"HTTP/1.1 200 OK" {
                        false
                    } else {
                        return Err(Error::ProtocolParse {
                            session: 0,
                            reason: format!(
                                "unknown HTTP response: {:?}",
                                String::from_utf8_lossy(&line)
                            ),
                        });
                    };
                    self.read_state = ReadState::Headers {
                        content_length: None,
                    };
                }

                ReadState::Headers { content_length } => {
                    let line = match stream.readline() {
                        Some(l) => l,
                        None => return Ok(Outcome::Pending),
                    };
                    if line.is_empty() {
                        let remaining = content_length.unwrap_or(0);
                        self.read_state = ReadState::Body { remaining };
                        continue;
                    }
                    stats.add_rx_bytes(line.len() as u64 + 2);
                    let text = String::from_utf8_lossy(&line);
                    if let Some(value) = text
                        .split_once(':')
                        .filter(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .map(|(_, v)| v.trim())
                    {
                        *content_length = value.parse().ok();
                    }
                }

                ReadState::Body { remaining } => {
                    let remaining = *remaining;
                    if stream.len() < remaining {
                        return Ok(Outcome::Pending);
                    }
                    stream.drain(remaining);
                    stats.add_rx_bytes(remaining as u64);
                    let miss = self.pending_miss;
                    self.read_state = ReadState::Status;
                    return Ok(Outcome::Complete {
                        miss,
                        new_leader: None,
                    });
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

    fn op() -> Operation {
        Operation::new(OpType::Get, Instant::now())
    }

    #[test]
    fn content_length_framing() {
        let mut p = HttpProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        let outcome = p.handle_response(&mut stream, &op(), &mut stats).unwrap();
        assert_eq!(
            outcome,
            Outcome::Complete {
                miss: false,
                new_leader: None
            }
        );
        assert_eq!(stats.rx_bytes, 41);
    }

    #[test]
    fn content_length_split_across_deliveries() {
        let mut p = HttpProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"HTTP/1.1 200 OK\r\nContent-Le");
        assert_eq!(
            p.handle_response(&mut stream, &op(), &mut stats).unwrap(),
            Outcome::Pending
        );
        stream.feed(b"ngth: 5\r\n\r\nhello");
        assert_eq!(
            p.handle_response(&mut stream, &op(), &mut stats).unwrap(),
            Outcome::Complete {
                miss: false,
                new_leader: None
            }
        );
    }

    #[test]
    fn not_found_is_a_miss() {
        let mut p = HttpProtocol::new();
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        stream.feed(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        let outcome = p.handle_response(&mut stream, &op(), &mut stats).unwrap();
        assert_eq!(
            outcome,
            Outcome::Complete {
                miss: true,
                new_leader: None
            }
        );
    }
}
