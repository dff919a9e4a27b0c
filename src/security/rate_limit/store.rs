//! Pluggable counter store for the distributed strategy.
//!
//! # Responsibilities
//! - Atomic increment-with-expiry, safe across service instances
//! - In-memory implementation for tests and single-node deployments
//!
//! # Design Decisions
//! - The increment is a single store-level operation; callers never
//!   read-modify-write
//! - Store failures surface as errors so the limiter can fall back locally

use std::time::{Duration, Instant};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// The counter store was unreachable or refused the operation.
#[derive(Debug, Error)]
#[error("counter store unavailable: {0}")]
pub struct StoreError(pub String);

/// Atomic increment-with-expiry primitive, keyed like the general strategy.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count. The first increment of a
    /// key arms its expiry; the key disappears once `ttl` elapses.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}

/// Process-local counter store.
pub struct MemoryCounterStore {
    entries: DashMap<String, (u64, Instant)>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Drop expired keys. The limiter's prune task calls this.
    pub fn prune(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| (0, now + ttl));
        let (count, expires) = entry.value_mut();
        if *expires <= now {
            *count = 0;
            *expires = now + ttl;
        }
        *count += 1;
        Ok(*count)
    }
}
