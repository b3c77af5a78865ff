use std::time::Duration;

use bytes::Bytes;

use crate::operation::Operation;

/// I/O actions for the driver to perform immediately. Pulled out of
/// `Connection` via `poll_io`, mirroring `quinn-proto::endpoint::Io`.
#[derive(Debug)]
pub enum Io {
    /// Bytes queued for transmission on `session`; write them to its socket.
    Transmit { session: usize, data: Bytes },
    /// (Re)arm the single per-connection timer to fire after `delay`.
    TimerStart { delay: Duration },
    /// Cancel the per-connection timer.
    TimerStop,
    /// Set (or skip) `TCP_NODELAY` on `session`'s socket, once, right after
    /// connect — the one real socket-option side effect the core asks for.
    SetNodelay { session: usize, enable: bool },
}

/// Application-facing events. Pulled out of `Connection` via `poll_event`.
#[derive(Debug)]
pub enum Event {
    /// `session` finished its handshake and is ready to issue requests.
    SessionReady { session: usize },
    /// An operation completed; its latency has already been logged to the
    /// stats sink by the time this fires.
    OperationCompleted { session: usize, op: Operation },
    /// The leader moved from `old` to `new`, as reported by `session`.
    LeaderChanged {
        session: usize,
        old: usize,
        new: usize,
    },
    /// The warm-up loader finished inserting all `options.records` keys.
    LoadComplete,
}

/// The single timer a `Connection` owns (spec.md §5: "The Connection owns
/// one timer").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Pacing,
}
