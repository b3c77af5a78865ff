//! Minimal generator interface consumed by `Connection`.
//!
//! Full key/value/inter-arrival distribution parsing is an external
//! collaborator (spec.md §1); the concrete generators here exist so the
//! core is independently testable without pulling in a CLI-facing
//! distribution grammar.

use rand::Rng;

/// Produces `f64` draws — inter-arrival delays (seconds) or value/key sizes.
pub trait Generator: std::fmt::Debug {
    fn generate(&mut self) -> f64;

    /// Rescale an arrival-process generator to a target rate. A no-op for
    /// generators that don't have a rate parameter (key/value size
    /// generators).
    fn set_lambda(&mut self, _lambda: f64) {}
}

/// Maps a key index in `[0, records)` to a deterministic key string.
pub trait KeyGenerator: std::fmt::Debug {
    fn generate(&self, index: u64) -> String;
}

/// Always returns the same value. Used for `lambda <= 0` (pacing disabled)
/// and for fixed key/value sizes.
#[derive(Debug, Clone, Copy)]
pub struct FixedGenerator(pub f64);

impl Generator for FixedGenerator {
    fn generate(&mut self) -> f64 {
        self.0
    }
}

/// Uniform draw over `[lo, hi]`.
#[derive(Debug)]
pub struct UniformGenerator {
    pub lo: f64,
    pub hi: f64,
}

impl Generator for UniformGenerator {
    fn generate(&mut self) -> f64 {
        if self.lo >= self.hi {
            return self.lo;
        }
        rand::thread_rng().gen_range(self.lo..self.hi)
    }
}

/// Exponential inter-arrival generator with rate `lambda` (ops/s), the
/// standard open-loop arrival process for Poisson load.
#[derive(Debug)]
pub struct ExponentialGenerator {
    pub lambda: f64,
}

impl Generator for ExponentialGenerator {
    fn generate(&mut self) -> f64 {
        if self.lambda <= 0.0 {
            return 0.0;
        }
        let u: f64 = rand::thread_rng().gen_range(f64::MIN_POSITIVE..1.0);
        -u.ln() / self.lambda
    }

    fn set_lambda(&mut self, lambda: f64) {
        self.lambda = lambda;
    }
}

/// Zero-padded decimal key generator, matching `util.cc`'s `generate_key`:
/// `snprintf(buf, length + 1, "%0*d", length, n)`.
#[derive(Debug)]
pub struct SequentialKeyGenerator {
    pub key_len: usize,
}

impl KeyGenerator for SequentialKeyGenerator {
    fn generate(&self, index: u64) -> String {
        format!("{:0width$}", index, width = self.key_len)
    }
}
