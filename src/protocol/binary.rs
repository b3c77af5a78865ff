use byteorder::{BigEndian, ByteOrder};

use super::{Outcome, Protocol};
use crate::bytestream::ByteStream;
use crate::error::Error;
use crate::operation::Operation;
use crate::options::Options;
use crate::stats::StatsSink;

const MAGIC_REQUEST: u8 = 0x80;
const OPCODE_GET: u8 = 0x00;
const OPCODE_SET: u8 = 0x01;
const OPCODE_SASL: u8 = 0x21;
const STATUS_OK: u16 = 0x0000;
const HEADER_LEN: usize = 24;

/// 24-byte fixed header, fields in network byte order.
struct Header {
    opcode: u8,
    key_len: u16,
    extras_len: u8,
    body_len: u32,
    status: u16,
}

impl Header {
    fn parse(buf: &[u8]) -> Self {
        Header {
            opcode: buf[1],
            key_len: BigEndian::read_u16(&buf[2..4]),
            extras_len: buf[4],
            status: BigEndian::read_u16(&buf[6..8]),
            body_len: BigEndian::read_u32(&buf[8..12]),
        }
    }

    fn write(stream: &mut ByteStream, opcode: u8, key_len: u16, extras_len: u8, body_len: u32) {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = MAGIC_REQUEST;
        buf[1] = opcode;
        BigEndian::write_u16(&mut buf[2..4], key_len);
        buf[4] = extras_len;
        BigEndian::write_u32(&mut buf[8..12], body_len);
        stream.append(&buf);
    }
}

/// Binary (memcache fixed-header) protocol engine, with optional SASL PLAIN
/// authentication during connection setup.
#[derive(Debug)]
pub struct BinaryProtocol {
    sasl: bool,
    username: String,
    password: String,
}

impl BinaryProtocol {
    pub fn new(opts: &Options) -> Self {
        BinaryProtocol {
            sasl: opts.sasl,
            username: opts.username.clone(),
            password: opts.password.clone(),
        }
    }
}

impl Protocol for BinaryProtocol {
    fn setup_connection_w(&mut self, stream: &mut ByteStream) -> bool {
        if !self.sasl {
            return true;
        }
        let body_len = 6 + self.username.len() + 1 + self.password.len();
        Header::write(stream, OPCODE_SASL, 5, 0, body_len as u32);
        stream.append(b"PLAIN\0");
        stream.append(self.username.as_bytes());
        stream.append(&[0]);
        stream.append(self.password.as_bytes());
        false
    }

    fn setup_connection_r(&mut self, stream: &mut ByteStream) -> Result<bool, Error> {
        if !self.sasl {
            return Ok(true);
        }
        let header_bytes = match stream.peek(HEADER_LEN) {
            Some(b) => b,
            None => return Ok(false),
        };
        let header = Header::parse(header_bytes);
        let total = HEADER_LEN + header.body_len as usize;
        if stream.len() < total {
            return Ok(false);
        }
        stream.drain(total);
        if header.status == STATUS_OK {
            Ok(true)
        } else {
            Err(Error::Sasl { session: 0 })
        }
    }

    fn get_request(&mut self, stream: &mut ByteStream, key: &str) -> usize {
        let key_len = key.len() as u16;
        Header::write(stream, OPCODE_GET, key_len, 0, key_len as u32);
        stream.append(key.as_bytes());
        HEADER_LEN + key.len()
    }

    fn set_request(&mut self, stream: &mut ByteStream, key: &str, value: &[u8]) -> usize {
        let key_len = key.len() as u16;
        let body_len = key_len as u32 + 8 + value.len() as u32;
        Header::write(stream, OPCODE_SET, key_len, 8, body_len);
        stream.append(&[0u8; 8]); // flags + expiry extras
        stream.append(key.as_bytes());
        stream.append(value);
        HEADER_LEN + body_len as usize
    }

    fn handle_response(
        &mut self,
        stream: &mut ByteStream,
        op: &Operation,
        stats: &mut dyn StatsSink,
    ) -> Result<Outcome, Error> {
        let header_bytes = match stream.peek(HEADER_LEN) {
            Some(b) => b,
            None => return Ok(Outcome::Pending),
        };
        let header = Header::parse(header_bytes);
        let total = HEADER_LEN + header.body_len as usize;
        if stream.len() < total {
            return Ok(Outcome::Pending);
        }

        if header.opcode == OPCODE_SASL && header.status != STATUS_OK {
            return Err(Error::Sasl { session: 0 });
        }

        let miss = header.opcode == OPCODE_GET
            && header.status != STATUS_OK
            && op.ty == crate::operation::OpType::Get;

        stream.drain(total);
        stats.add_rx_bytes(total as u64);

        Ok(Outcome::Complete {
            miss,
            new_leader: None,
        })
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

    fn ok_header(opcode: u8, body_len: u32) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = MAGIC_REQUEST;
        buf[1] = opcode;
        BigEndian::write_u32(&mut buf[8..12], body_len);
        buf
    }

    #[test]
    fn set_request_layout() {
        let mut p = BinaryProtocol::new(&Options::default());
        let mut stream = ByteStream::new();
        let n = p.set_request(&mut stream, "k", b"abcd");
        assert_eq!(n, HEADER_LEN + 1 + 8 + 4);
        let out = stream.take_outbound();
        assert_eq!(out.len(), n);
        let header = Header::parse(&out);
        assert_eq!(header.opcode, OPCODE_SET);
        assert_eq!(header.key_len, 1);
        assert_eq!(header.extras_len, 8);
        assert_eq!(header.body_len, 1 + 8 + 4);
    }

    #[test]
    fn get_response_hit_and_miss() {
        let mut p = BinaryProtocol::new(&Options::default());
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);

        stream.feed(&ok_header(OPCODE_GET, 0));
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

        let mut miss_header = ok_header(OPCODE_GET, 0);
        miss_header[6] = 0x00;
        miss_header[7] = 0x01; // status = 1 (key not found)
        stream.feed(&miss_header);
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
    fn partial_header_is_pending() {
        let mut p = BinaryProtocol::new(&Options::default());
        let mut stream = ByteStream::new();
        let mut stats = ConnectionStats::new(0);
        let header = ok_header(OPCODE_GET, 0);
        stream.feed(&header[..10]);
        assert_eq!(
            p.handle_response(&mut stream, &op(OpType::Get), &mut stats)
                .unwrap(),
            Outcome::Pending
        );
        stream.feed(&header[10..]);
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
