use crate::error::Error;

/// Wire protocol selected for a [`crate::connection::Connection`].
///
/// `Http` and `RocksDb` are not named as selector flags in the original
/// option set but are required to make the corresponding protocol engines
/// reachable at all (`Http`) or are carried forward from
/// `examples/original_source/` (`RocksDb`) — see `SPEC_FULL.md` §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Ascii,
    Binary,
    Http,
    Etcd,
    Etcd2,
    RocksDb,
}

/// Read-only options snapshot consumed by a `Connection` for its entire
/// lifetime. Validated once, at construction, never re-checked afterward.
#[derive(Debug, Clone)]
pub struct Options {
    /// Target aggregate arrival rate (ops/s). `<= 0.0` disables pacing.
    pub lambda: f64,
    /// Key-space cardinality for the loader and issuer.
    pub records: u64,
    /// Per-session concurrency bound.
    pub depth: usize,
    /// SET probability during steady state, in `[0, 1]`.
    pub update: f64,
    /// Run duration, seconds.
    pub time: f64,
    /// Exit after the loader phase completes.
    pub loadonly: bool,
    /// Skip the loader phase entirely.
    pub noload: bool,

    pub binary: bool,
    pub http: bool,
    pub etcd: bool,
    pub etcd2: bool,
    pub rocksdb: bool,

    pub sasl: bool,
    pub username: String,
    pub password: String,

    /// Linearizable (quorum) reads for etcd.
    pub linear: bool,
    /// Emit the legacy `"}\n"` etcd body terminator instead of the chunked
    /// `"0\r\n\r\n"` marker (Open Question (a)).
    pub etcd_legacy_terminator: bool,

    /// Skip setting TCP_NODELAY on connect.
    pub no_nodelay: bool,
    /// Enable the 250us post-response cooldown.
    pub moderate: bool,
    /// Enable backpressure skip-compensation.
    pub skip: bool,
    /// Presized sample buffer hint.
    pub reserve: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            lambda: 0.0,
            records: 10_000,
            depth: 1,
            update: 0.0,
            time: 10.0,
            loadonly: false,
            noload: false,
            binary: false,
            http: false,
            etcd: false,
            etcd2: false,
            rocksdb: false,
            sasl: false,
            username: String::new(),
            password: String::new(),
            linear: false,
            etcd_legacy_terminator: false,
            no_nodelay: false,
            moderate: false,
            skip: false,
            reserve: 0,
        }
    }
}

impl Options {
    /// Validate the snapshot, resolving the protocol selector.
    ///
    /// `depth <= 0` is rejected here rather than cast to an unsigned
    /// quantity at issue time (§9, "Integer casts ... are a latent bug").
    pub fn validate(&self) -> Result<ProtocolKind, Error> {
        if self.depth == 0 {
            return Err(Error::InvalidOption("depth must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.update) {
            return Err(Error::InvalidOption("update must be in [0, 1]".into()));
        }
        let selectors = [self.binary, self.http, self.etcd, self.etcd2, self.rocksdb];
        if selectors.iter().filter(|&&s| s).count() > 1 {
            return Err(Error::InvalidOption(
                "binary/http/etcd/etcd2/rocksdb are mutually exclusive".into(),
            ));
        }
        Ok(if self.binary {
            ProtocolKind::Binary
        } else if self.http {
            ProtocolKind::Http
        } else if self.etcd2 {
            ProtocolKind::Etcd2
        } else if self.etcd {
            ProtocolKind::Etcd
        } else if self.rocksdb {
            ProtocolKind::RocksDb
        } else {
            ProtocolKind::Ascii
        })
    }
}
