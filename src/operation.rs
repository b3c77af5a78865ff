use std::time::Instant;

/// Request type of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Get,
    Set,
}

impl OpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Get => "GET",
            OpType::Set => "SET",
        }
    }
}

/// A single request/response pair in flight on a [`crate::session::ServerSession`].
///
/// Carries the superset shape from Open Question (b): `switch_time`/`switched`
/// are always present, and stay at their default (`None`/`0`) for protocols
/// that never redirect to a new leader.
#[derive(Debug, Clone)]
pub struct Operation {
    pub ty: OpType,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
    pub switch_time: Option<Instant>,
    pub switched: u32,
}

impl Operation {
    pub fn new(ty: OpType, start_time: Instant) -> Self {
        Operation {
            ty,
            start_time,
            end_time: None,
            switch_time: None,
            switched: 0,
        }
    }

    /// Latency of a completed operation. Panics if called before `end_time`
    /// is set — callers only invoke this after `finish_op`.
    pub fn latency(&self) -> std::time::Duration {
        self.end_time
            .expect("latency() called before operation completed")
            .duration_since(self.start_time)
    }

    pub fn mark_switched(&mut self, now: Instant) {
        self.switched += 1;
        self.switch_time = Some(now);
    }
}
