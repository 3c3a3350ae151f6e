//! Per-run shared state.
//!
//! One `SimContext` is built per simulation run and handed to the scheduler,
//! every mailbox and every connection protocol. Nothing here is static, so
//! independent runs (and tests) never observe each other.

use crate::connection::ConnectionGraph;
use crate::metrics::MetricsCollector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The shared turn counter. Readers never lock; only the scheduler advances it.
#[derive(Debug, Clone, Default)]
pub struct TurnClock(Arc<AtomicU64>);

impl TurnClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[derive(Debug, Clone)]
pub struct SimContext {
    seed: u64,
    pub clock: TurnClock,
    pub graph: Arc<ConnectionGraph>,
    pub metrics: MetricsCollector,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            clock: TurnClock::new(),
            graph: Arc::new(ConnectionGraph::new()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn turn(&self) -> u64 {
        self.clock.current()
    }

    /// Deterministic RNG for one consumer, derived from the master seed.
    pub fn derive_rng(&self, extension: u64) -> ChaCha8Rng {
        let combined = self.seed.wrapping_mul(0x517cc1b727220a95) ^ extension;
        ChaCha8Rng::seed_from_u64(combined)
    }

    /// Same as [`derive_rng`](Self::derive_rng), keyed by a string (usually an agent id).
    pub fn derive_rng_for(&self, key: &str) -> ChaCha8Rng {
        self.derive_rng(fnv1a(key))
    }
}

// Stable across runs and toolchains, unlike DefaultHasher.
fn fnv1a(key: &str) -> u64 {
    key.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}
