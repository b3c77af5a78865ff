//! The core orchestrator: owns every [`ServerSession`] for one replica set,
//! drives the pacing state machine, and exposes a sans-IO poll API.
//!
//! Mirrors `examples/original_source/Connection.cc`'s `connection_t`, with
//! the event-loop half (`event_callback`, `timer_callback`, libevent
//! registration) replaced by explicit driver calls (`receive`, `timeout`,
//! `session_connected`) and `Io`/`Event` queues the driver drains after each
//! call, the same contract `quinn-proto::endpoint::Endpoint` uses for
//! `poll_transmit`/`poll` (`examples/Terkwood-quinn/quinn-proto/src/endpoint.rs`).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::{Rng, RngCore};
use slog::{debug, Logger};

use crate::error::Error;
use crate::event::{Event, Io};
use crate::generator::{Generator, KeyGenerator};
use crate::operation::{OpType, Operation};
use crate::options::Options;
use crate::protocol;
use crate::session::{ReadState, ServerSession, WriteState};
use crate::stats::StatsSink;

/// Number of sequential-key SETs kept in flight during the loader phase
/// (`examples/original_source/Connection.cc`'s `LOADER_CHUNK`).
const LOADER_CHUNK: u64 = 1024;

/// Post-response cooldown enforced when `options.moderate` is set
/// (`Connection.cc`'s `0.00025` second constant).
const MODERATE_COOLDOWN: Duration = Duration::from_micros(250);

/// Skip-compensation thresholds (`Connection.cc`'s `0.005`/`0.004`).
const SKIP_BEHIND_THRESHOLD: Duration = Duration::from_millis(5);
const SKIP_CATCHUP_TARGET: Duration = Duration::from_millis(4);

/// Size of the pseudo-random value pool SET payloads are sliced from
/// (spec.md §4.4).
const RANDOM_BUFFER_LEN: usize = 1 << 20;

fn to_duration(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

/// Parse a `host[:port]{|host[:port]}*` replica-set string (spec.md §6).
fn parse_hosts(hosts: &str, default_port: u16) -> Result<Vec<(String, u16)>, Error> {
    hosts
        .split('|')
        .map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(Error::InvalidHostString(hosts.to_string()));
            }
            match entry.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() => {
                    let port: u16 = port
                        .parse()
                        .map_err(|_| Error::InvalidHostString(hosts.to_string()))?;
                    Ok((host.to_string(), port))
                }
                _ => Ok((entry.to_string(), default_port)),
            }
        })
        .collect()
}

/// One replica set: every [`ServerSession`] plus the pacing/loader state
/// that spans them. The unit the driver polls.
#[derive(Debug)]
pub struct Connection {
    log: Logger,
    options: Options,
    sessions: Vec<ServerSession>,
    /// 1-based id of the session treated as leader; the only session the
    /// pacing state machine ever issues against (`Connection.cc` always
    /// calls `drive_write_machine(leader)`).
    leader: usize,

    keygen: Box<dyn KeyGenerator>,
    valuesize: Box<dyn Generator>,
    iagen: Box<dyn Generator>,
    stats: Box<dyn StatsSink>,
    random_buffer: Vec<u8>,

    start_time: Option<Instant>,
    next_time: Option<Instant>,
    last_rx: Option<Instant>,
    last_tx: Option<Instant>,
    timer_armed: bool,

    loader_issued: u64,
    loader_completed: u64,

    io_queue: VecDeque<Io>,
    event_queue: VecDeque<Event>,
}

impl Connection {
    /// Build a `Connection` over the replica set named by `hosts`
    /// (spec.md §6's `host[:port]{|host[:port]}*` grammar), with `default_port`
    /// used for entries that omit one. `iagen`'s rate is overridden by
    /// `options.lambda`: if `lambda <= 0` pacing is disabled outright,
    /// matching `Connection.cc`'s constructor, which ignores the supplied
    /// inter-arrival generator entirely in that case.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Logger,
        options: Options,
        hosts: &str,
        default_port: u16,
        keygen: Box<dyn KeyGenerator>,
        valuesize: Box<dyn Generator>,
        mut iagen: Box<dyn Generator>,
        stats: Box<dyn StatsSink>,
    ) -> Result<Connection, Error> {
        let kind = options.validate()?;
        let replicas = parse_hosts(hosts, default_port)?;
        if replicas.is_empty() {
            return Err(Error::InvalidHostString(hosts.to_string()));
        }

        let iagen: Box<dyn Generator> = if options.lambda <= 0.0 {
            Box::new(crate::generator::FixedGenerator(0.0))
        } else {
            iagen.set_lambda(options.lambda);
            iagen
        };

        let sessions = replicas
            .into_iter()
            .enumerate()
            .map(|(i, (host, port))| {
                let id = i + 1;
                ServerSession::new(id, host, port, protocol::build(kind, &options))
            })
            .collect();

        let mut random_buffer = vec![0u8; RANDOM_BUFFER_LEN];
        rand::thread_rng().fill_bytes(&mut random_buffer);

        Ok(Connection {
            log,
            options,
            sessions,
            leader: 1,
            keygen,
            valuesize,
            iagen,
            stats,
            random_buffer,
            start_time: None,
            next_time: None,
            last_rx: None,
            last_tx: None,
            timer_armed: false,
            loader_issued: 0,
            loader_completed: 0,
            io_queue: VecDeque::new(),
            event_queue: VecDeque::new(),
        })
    }

    fn session_index(&self, session_id: usize) -> Result<usize, Error> {
        if session_id >= 1 && session_id <= self.sessions.len() {
            Ok(session_id - 1)
        } else {
            Err(Error::InvalidLeader {
                id: session_id,
                n: self.sessions.len(),
            })
        }
    }

    /// Draw a `len`-byte slice from the pseudo-random value pool at a
    /// random offset (spec.md §4.4: values aren't freshly randomized per
    /// request, just sliced from a precomputed pool).
    fn random_slice(&self, len: usize) -> Vec<u8> {
        let len = len.min(self.random_buffer.len());
        let span = self.random_buffer.len() - len;
        let offset = if span == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=span)
        };
        self.random_buffer[offset..offset + len].to_vec()
    }

    fn arm_timer(&mut self, delay: Duration) {
        if self.timer_armed {
            return;
        }
        self.io_queue.push_back(Io::TimerStart { delay });
        self.timer_armed = true;
    }

    fn drain_outbound(&mut self, idx: usize) {
        let session = &mut self.sessions[idx];
        if session.stream.outbound_len() > 0 {
            let data = session.stream.take_outbound();
            self.io_queue.push_back(Io::Transmit {
                session: session.id,
                data,
            });
        }
    }

    // ---- entry points (spec.md §4.6) ----------------------------------

    /// True once every session has left `InitRead` and the queue is empty
    /// everywhere — the point at which `start()`/`start_loading()` may be
    /// called.
    pub fn is_ready(&self) -> bool {
        self.sessions.iter().all(ServerSession::is_idle)
    }

    pub fn set_priority(&mut self, priority: i32) {
        for session in &mut self.sessions {
            session.stream.set_priority(priority);
        }
    }

    pub fn get_leader(&self) -> usize {
        self.leader
    }

    pub fn set_leader(&mut self, id: usize) -> Result<(), Error> {
        self.session_index(id)?;
        self.leader = id;
        Ok(())
    }

    /// Begin steady-state issuing (spec.md §4.3's pacing machine), on the
    /// current leader session.
    pub fn start(&mut self, now: Instant) {
        self.start_time.get_or_insert(now);
        self.drive_write_machine(now);
    }

    /// Begin the sequential-key warm-up load against the leader session
    /// (spec.md §4.5).
    pub fn start_loading(&mut self, now: Instant) {
        self.start_time.get_or_insert(now);
        for session in &mut self.sessions {
            session.read_state = ReadState::Loading;
        }
        self.loader_issued = 0;
        self.loader_completed = 0;
        let idx = self.leader - 1;
        let window = LOADER_CHUNK.min(self.options.records);
        for _ in 0..window {
            if self.loader_issued >= self.options.records {
                break;
            }
            self.issue_loader_set(idx, now);
            self.loader_issued += 1;
        }
    }

    /// Reset every session to idle and zero the stats sink, preserving its
    /// sampling configuration. Panics if any session still has in-flight
    /// operations — callers must drain those first.
    pub fn reset(&mut self) {
        for session in &mut self.sessions {
            assert!(
                session.op_queue.is_empty(),
                "reset called with operations still in flight on session {}",
                session.id
            );
            session.read_state = ReadState::Idle;
            session.write_state = WriteState::InitWrite;
        }
        self.io_queue.push_back(Io::TimerStop);
        self.timer_armed = false;
        self.next_time = None;
        self.last_rx = None;
        self.last_tx = None;
        self.start_time = None;
        self.stats.reset();
    }

    pub fn check_exit_condition(&self, now: Instant) -> bool {
        if self
            .sessions
            .iter()
            .any(|s| s.read_state == ReadState::InitRead)
        {
            return false;
        }
        if let Some(start) = self.start_time {
            if now.duration_since(start) > Duration::from_secs_f64(self.options.time) {
                return true;
            }
        }
        self.options.loadonly && self.sessions.iter().all(ServerSession::is_idle)
    }

    // ---- driver-facing callbacks ---------------------------------------

    /// A session finished connecting at the transport layer. Runs the
    /// write half of the handshake and, if no response is required, marks
    /// the session ready immediately (`event_callback`'s
    /// `BEV_EVENT_CONNECTED` branch).
    pub fn session_connected(&mut self, session_id: usize, now: Instant) -> Result<(), Error> {
        let _ = now;
        let idx = self.session_index(session_id)?;
        if !self.options.no_nodelay {
            self.io_queue.push_back(Io::SetNodelay {
                session: session_id,
                enable: true,
            });
        }
        self.sessions[idx].read_state = ReadState::ConnSetup;
        let usable = {
            let session = &mut self.sessions[idx];
            session.protocol.setup_connection_w(&mut session.stream)
        };
        self.drain_outbound(idx);
        if usable {
            self.sessions[idx].read_state = ReadState::Idle;
            self.event_queue.push_back(Event::SessionReady {
                session: session_id,
            });
        }
        Ok(())
    }

    /// The transport reported a fatal error on `session_id`. Every error
    /// here is fatal to the whole `Connection` — the driver should tear it
    /// down.
    pub fn session_error(&self, session_id: usize, reason: impl Into<String>) -> Error {
        Error::Connect {
            session: session_id,
            reason: reason.into(),
        }
    }

    /// Feed inbound bytes for `session_id` and run the read state machine
    /// to completion (i.e. until it can make no further progress without
    /// more bytes).
    pub fn receive(&mut self, session_id: usize, data: &[u8], now: Instant) -> Result<(), Error> {
        let idx = self.session_index(session_id)?;
        self.sessions[idx].stream.feed(data);

        loop {
            match self.sessions[idx].read_state {
                ReadState::InitRead => {
                    return Err(Error::ProtocolParse {
                        session: session_id,
                        reason: "received data on a session still awaiting connect".into(),
                    });
                }
                ReadState::Idle => return Ok(()),
                ReadState::ConnSetup => {
                    let usable = {
                        let session = &mut self.sessions[idx];
                        session.protocol.setup_connection_r(&mut session.stream)?
                    };
                    self.drain_outbound(idx);
                    if !usable {
                        return Ok(());
                    }
                    self.sessions[idx].read_state = ReadState::Idle;
                    self.event_queue.push_back(Event::SessionReady {
                        session: session_id,
                    });
                }
                ReadState::WaitingForGet | ReadState::WaitingForSet => {
                    if self.sessions[idx].op_queue.is_empty() {
                        return Ok(());
                    }
                    let outcome = {
                        let session = &mut self.sessions[idx];
                        let op = &session.op_queue[0];
                        session
                            .protocol
                            .handle_response(&mut session.stream, op, &mut *self.stats)?
                    };
                    match outcome {
                        protocol::Outcome::Pending => return Ok(()),
                        protocol::Outcome::Complete { miss, new_leader } => {
                            if miss {
                                self.stats.get_miss();
                            }
                            let mut op = self.sessions[idx]
                                .op_queue
                                .pop_front()
                                .expect("queue checked non-empty above");
                            op.end_time = Some(now);
                            if new_leader.is_some() {
                                op.mark_switched(now);
                            }
                            match op.ty {
                                OpType::Get => self.stats.log_get(&op),
                                OpType::Set => self.stats.log_set(&op),
                            }
                            self.last_rx = Some(now);
                            self.advance_read_state(idx);
                            if let Some(candidate) = new_leader {
                                if session_id == self.leader {
                                    let old = self.leader;
                                    self.set_leader(candidate)?;
                                    debug!(self.log, "leader changed"; "old" => old, "new" => candidate);
                                    self.event_queue.push_back(Event::LeaderChanged {
                                        session: session_id,
                                        old,
                                        new: candidate,
                                    });
                                }
                            }
                            self.event_queue.push_back(Event::OperationCompleted {
                                session: session_id,
                                op,
                            });
                            self.drive_write_machine(now);
                        }
                    }
                }
                ReadState::Loading => {
                    if self.sessions[idx].op_queue.is_empty() {
                        return Ok(());
                    }
                    let outcome = {
                        let session = &mut self.sessions[idx];
                        let op = &session.op_queue[0];
                        session
                            .protocol
                            .handle_response(&mut session.stream, op, &mut *self.stats)?
                    };
                    match outcome {
                        protocol::Outcome::Pending => return Ok(()),
                        protocol::Outcome::Complete { .. } => {
                            self.sessions[idx].op_queue.pop_front();
                            self.loader_completed += 1;
                            if self.loader_completed == self.options.records {
                                for session in &mut self.sessions {
                                    session.read_state = ReadState::Idle;
                                }
                                self.event_queue.push_back(Event::LoadComplete);
                            } else {
                                while self.loader_issued < self.loader_completed + LOADER_CHUNK
                                    && self.loader_issued < self.options.records
                                {
                                    self.issue_loader_set(idx, now);
                                    self.loader_issued += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// The single per-connection timer fired.
    pub fn timeout(&mut self, now: Instant) {
        self.timer_armed = false;
        self.drive_write_machine(now);
    }

    pub fn poll_io(&mut self) -> Option<Io> {
        self.io_queue.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.event_queue.pop_front()
    }

    /// Read-only view of the stats sink, for end-of-run reporting
    /// (spec.md §6: "the core writes; aggregation and reporting are
    /// external").
    pub fn stats(&self) -> &dyn StatsSink {
        self.stats.as_ref()
    }

    // ---- internal: read-state bookkeeping ------------------------------

    /// Recompute `read_state` from the new head of the op queue. A no-op
    /// while loading — the loader drives its own state transitions
    /// (`Connection.cc`'s `pop_op` returning early when `read_state ==
    /// LOADING`).
    fn advance_read_state(&mut self, idx: usize) {
        let session = &mut self.sessions[idx];
        if session.read_state == ReadState::Loading {
            return;
        }
        session.read_state = match session.op_queue.front() {
            Some(op) => match op.ty {
                OpType::Get => ReadState::WaitingForGet,
                OpType::Set => ReadState::WaitingForSet,
            },
            None => ReadState::Idle,
        };
    }

    // ---- internal: issuing ---------------------------------------------

    fn issue_get(&mut self, idx: usize, key: &str, now: Instant) {
        let op = Operation::new(OpType::Get, now);
        let loading = self.sessions[idx].read_state == ReadState::Loading;
        self.sessions[idx].op_queue.push_back(op);
        if self.sessions[idx].read_state == ReadState::Idle {
            self.sessions[idx].read_state = ReadState::WaitingForGet;
        }
        let n = {
            let session = &mut self.sessions[idx];
            session.protocol.get_request(&mut session.stream, key)
        };
        self.drain_outbound(idx);
        if !loading {
            self.stats.add_tx_bytes(n as u64);
        }
    }

    fn issue_set(&mut self, idx: usize, key: &str, value: &[u8], now: Instant) {
        let op = Operation::new(OpType::Set, now);
        let loading = self.sessions[idx].read_state == ReadState::Loading;
        self.sessions[idx].op_queue.push_back(op);
        if self.sessions[idx].read_state == ReadState::Idle {
            self.sessions[idx].read_state = ReadState::WaitingForSet;
        }
        let n = {
            let session = &mut self.sessions[idx];
            session.protocol.set_request(&mut session.stream, key, value)
        };
        self.drain_outbound(idx);
        if !loading {
            self.stats.add_tx_bytes(n as u64);
        }
    }

    /// Issue the next sequential-key SET for the loader.
    fn issue_loader_set(&mut self, idx: usize, now: Instant) {
        let key = self.keygen.generate(self.loader_issued);
        let len = self.valuesize.generate().max(0.0) as usize;
        let value = self.random_slice(len);
        self.issue_set(idx, &key, &value, now);
    }

    /// Issue one steady-state request: SET with probability `update`,
    /// otherwise GET, against a uniformly-chosen key index (spec.md §4.4).
    fn issue_something(&mut self, idx: usize, now: Instant) {
        let mut rng = rand::thread_rng();
        let is_set = rng.gen::<f64>() < self.options.update;
        let index = rng.gen_range(0..self.options.records);
        let key = self.keygen.generate(index);
        if is_set {
            let len = self.valuesize.generate().max(0.0) as usize;
            let value = self.random_slice(len);
            self.issue_set(idx, &key, &value, now);
        } else {
            self.issue_get(idx, &key, now);
        }
    }

    // ---- internal: pacing (spec.md §4.3) -------------------------------

    /// Drive the leader session's write state machine forward as far as it
    /// can go without blocking on a timer or queue depth. Mirrors
    /// `Connection.cc`'s `drive_write_machine`.
    fn drive_write_machine(&mut self, now: Instant) {
        if self.check_exit_condition(now) {
            return;
        }
        let idx = self.leader - 1;
        let depth = self.options.depth;

        loop {
            match self.sessions[idx].write_state {
                WriteState::InitWrite => {
                    let delay = to_duration(self.iagen.generate());
                    self.next_time = Some(now + delay);
                    self.arm_timer(delay);
                    self.sessions[idx].write_state = WriteState::WaitingForTime;
                }
                WriteState::WaitingForTime => {
                    let next_time = self.next_time.expect("set by InitWrite");
                    if now < next_time {
                        self.arm_timer(next_time - now);
                        return;
                    }
                    self.sessions[idx].write_state = WriteState::Issuing;
                }
                WriteState::WaitingForOpq => {
                    if self.sessions[idx].op_queue.len() >= depth {
                        return;
                    }
                    self.sessions[idx].write_state = WriteState::Issuing;
                }
                WriteState::Issuing => {
                    if self.sessions[idx].op_queue.len() >= depth {
                        self.sessions[idx].write_state = WriteState::WaitingForOpq;
                        return;
                    }
                    let next_time = self.next_time.expect("set by InitWrite");
                    if now < next_time {
                        self.sessions[idx].write_state = WriteState::WaitingForTime;
                        continue;
                    }
                    if self.options.moderate {
                        if let Some(last_rx) = self.last_rx {
                            let cooldown = last_rx + MODERATE_COOLDOWN;
                            if now < cooldown {
                                self.sessions[idx].write_state = WriteState::WaitingForTime;
                                self.arm_timer(cooldown - now);
                                return;
                            }
                        }
                    }

                    self.issue_something(idx, now);
                    self.last_tx = Some(now);
                    let depth_now = self.sessions[idx].op_queue.len();
                    self.stats.log_op(depth_now);

                    let mut next_time = next_time + to_duration(self.iagen.generate());
                    if self.options.skip && self.options.lambda > 0.0 {
                        if let Some(behind) = now.checked_duration_since(next_time) {
                            if behind > SKIP_BEHIND_THRESHOLD
                                && self.sessions[idx].op_queue.len() >= depth
                            {
                                while next_time + SKIP_CATCHUP_TARGET < now {
                                    self.stats.skip();
                                    next_time += to_duration(self.iagen.generate());
                                }
                            }
                        }
                    }
                    self.next_time = Some(next_time);
                }
            }
        }
    }
}
