use failure::Fail;

/// Errors raised by the core engine.
///
/// Per the error-handling design, every variant here is fatal: the driver
/// should tear down the `Connection` and terminate the run. Recoverable
/// conditions (short reads, leader redirects, GET misses) never surface as
/// an `Error` — they are handled internally.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "invalid option: {}", _0)]
    InvalidOption(String),
    #[fail(display = "invalid replica-set string: {}", _0)]
    InvalidHostString(String),
    #[fail(display = "leader id {} out of range (1..={})", id, n)]
    InvalidLeader { id: usize, n: usize },
    #[fail(display = "connect failed for session {}: {}", session, reason)]
    Connect { session: usize, reason: String },
    #[fail(display = "protocol parse error on session {}: {}", session, reason)]
    ProtocolParse { session: usize, reason: String },
    #[fail(display = "SASL authentication failed on session {}", session)]
    Sasl { session: usize },
    #[fail(display = "unexpected EOF on session {} before exit condition", session)]
    UnexpectedEof { session: usize },
}
