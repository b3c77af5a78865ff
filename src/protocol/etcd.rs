use super::{Outcome, Protocol};
use crate::bytestream::ByteStream;
use crate::error::Error;
use crate::operation::Operation;
use crate::options::Options;
use crate::stats::StatsSink;

#[derive(Debug, Clone, Copy)]
enum ReadState {
    Status,
    LeaderChanged,
    Body,
}

/// etcd (Raft-coordinated) protocol engine, layered on HTTP.
///
/// Tracks leader redirection: a `424`/`422`/`423` status line means the
/// replica we asked is no longer (or never was) the leader; the engine then
/// hunts the response for a leader header and reports the candidate id back
/// to the caller, which applies the "only if I am the current leader" guard
/// (spec.md §4.1) before promoting it.
///
/// Open Question (a): whether to emit the chunked-encoding terminator
/// (`"0\r\n\r\n"`, header `X-Raft-Leader: `) or the legacy dialect
/// (`"}\n"`, header `X-Etcd-Leader: `) is resolved via
/// `Options::etcd_legacy_terminator`.
#[derive(Debug)]
pub struct EtcdProtocol {
    read_state: ReadState,
    linear: bool,
    legacy: bool,
    pending_miss: bool,
    pending_leader_change: bool,
    pending_new_leader: Option<usize>,
}

impl EtcdProtocol {
    pub fn new(opts: &Options) -> Self {
        EtcdProtocol {
            read_state: ReadState::Status,
            linear: opts.linear,
            legacy: opts.etcd_legacy_terminator,
            pending_miss: false,
            pending_leader_change: false,
            pending_new_leader: None,
        }
    }

    fn terminator(&self) -> &'static [u8] {
        if self.legacy {
            b"}\n"
        } else {
            b"0\r\n\r\n"
        }
    }

    fn leader_header(&self) -> &'static [u8] {
        if self.legacy {
            b"X-Etcd-Leader: "
        } else {
            b"X-Raft-Leader: "
        }
    }

    fn consume_body(
        &mut self,
        stream: &mut ByteStream,
        stats: &mut dyn StatsSink,
    ) -> Result<bool, Error> {
        let terminator = self.terminator();
        let pos = match stream.search(terminator) {
            Some(p) => p,
            None => return Ok(false),
        };
        let consumed = pos + terminator.len();
        stream.drain(consumed);
        stats.add_rx_bytes(consumed as u64);
        Ok(true)
    }
}

impl Protocol for EtcdProtocol {
    fn setup_connection_w(&mut self, _stream: &mut ByteStream) -> bool {
        true
    }

    fn setup_connection_r(&mut self, _stream: &mut ByteStream) -> Result<bool, Error> {
        Ok(true)
    }

    fn get_request(&mut self, stream: &mut ByteStream, key: &str) -> usize {
        if self.linear {
            stream.append(format!("GET /v2/keys/test/{}?quorum=true HTTP/1.1\r\n\r\n", key).as_bytes())
        } else {
            stream.append(format!("GET /v2/keys/test/{} HTTP/1.1\r\n\r\n", key).as_bytes())
        }
    }

    fn set_request(&mut self, stream: &mut ByteStream, key: &str, value: &[u8]) -> usize {
        let content_len = value.len() + 6;
        let mut n = stream.append(
            format!(
                "POST /v2/keys/test/{} HTTP/1.1\r\nContent-Length: {}\r\n",
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
            match self.read_state {
                ReadState::Status => {
                    let line = match stream.readline() {
                        Some(l) => l,
                        None => return Ok(Outcome::Pending),
                    };
                    stats.add_rx_bytes(line.len() as u64 + 2);
                    let text = String::from_utf8_lossy(&line);
                    self.pending_miss = false;
                    self.pending_leader_change = false;
                    self.pending_new_leader = None;
                    match &*text {
                        "HTTP/1.1 200 OK" | "HTTP/1.1 201 Created" => {}
                        "HTTP/1.1 404 Not Found" => self.pending_miss = true,
                        "HTTP/1.1 424 status code 424" => {
                            self.pending_miss = true;
                            self.pending_leader_change = true;
                        }
                        "HTTP/1.1 422 status code 422" | "HTTP/1.1 423 status code 423" => {
                            self.pending_leader_change = true;
                        }
                        other => {
                            return Err(Error::ProtocolParse {
                                session: 0,
                                reason: format!("fatal etcd response: {}", other),
                            });
                        }
                    }
                    self.read_state = if self.pending_leader_change {
                        ReadState::LeaderChanged
                    } else {
                        ReadState::Body
                    };
                }

                ReadState::LeaderChanged => {
                    let header = self.leader_header();
                    let pos = match stream.search(header) {
                        Some(p) => p,
                        None => return Ok(Outcome::Pending),
                    };
                    stream.drain(pos + header.len());
                    stats.add_rx_bytes((pos + header.len()) as u64);
                    let line = match stream.readline() {
                        Some(l) => l,
                        None => return Ok(Outcome::Pending),
                    };
                    stats.add_rx_bytes(line.len() as u64 + 2);
                    let new_leader: usize = String::from_utf8_lossy(&line)
                        .trim()
                        .parse()
                        .map_err(|_| Error::ProtocolParse {
                            session: 0,
                            reason: "malformed leader id".into(),
                        })?;
                    self.pending_new_leader = Some(new_leader);
                    self.read_state = ReadState::Body;
                }

                ReadState::Body => {
                    if !self.consume_body(stream, stats)? {
                        return Ok(Outcome::Pending);
                    }
                    let miss = self.pending_miss;
                    let new_leader = self.pending_new_leader.take();
                    self.read_state = ReadState::Status;
                    return Ok(Outcome::Complete { miss, new_leader });
                }
            }
        }
    }
}
