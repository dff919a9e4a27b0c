//! Request admission control.
//!
//! # Data Flow
//! ```text
//! Incoming request (identity, path, method)
//!     → deny list (unconditional reject)
//!     → allow list (bypass accounting)
//!     → rule resolution (longest matching path prefix)
//!     → strategy (general | progressive | adaptive | distributed)
//!     → Allow | Block { retry_after } | Deny
//! ```
//!
//! # Design Decisions
//! - Fixed window counters keyed by (identity, rule, floor(now/window))
//! - Per-key read-modify-write goes through DashMap entries (atomic per key)
//! - Distributed counting falls back to local counters on store failure;
//!   this is the single designed fail-open path in the pipeline

pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use serde::Serialize;

use crate::config::schema::{RateLimitConfig, RateLimitStrategy};
use crate::security::health::ComponentHealth;
use self::store::CounterStore;

/// Most-blocked tables keep this many entries between prunes.
const BLOCK_TABLE_CAP: usize = 64;

/// Entries surfaced per most-blocked table.
const TOP_BLOCKED: usize = 10;

/// A per-path admission rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitRule {
    pub path_prefix: String,
    /// Uppercased method; any method when None.
    pub method: Option<String>,
    pub window_ms: u64,
    pub max_requests: u32,
    pub skip_successful: bool,
    pub skip_failed: bool,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Over the limit; retry after the window resets.
    Block {
        retry_after_ms: u64,
        /// Recorded violation count, reported for the progressive strategy.
        violations: Option<u32>,
    },
    /// Deny-listed identity, rejected before any accounting.
    Deny,
}

#[derive(Debug)]
struct WindowCounter {
    index: u64,
    count: u32,
    window_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct ViolationRecord {
    count: u32,
    last_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BlockStat {
    count: u64,
    last_ms: u64,
}

/// One row of a most-blocked table.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedEntry {
    pub key: String,
    pub count: u64,
}

/// Counters exposed to the orchestrator.
#[derive(Debug, Serialize)]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub active_windows: usize,
    pub tracked_violators: usize,
    pub store_degraded: bool,
    pub top_blocked_identities: Vec<BlockedEntry>,
    pub top_blocked_paths: Vec<BlockedEntry>,
}

/// Per-identity request admission control with four strategies.
pub struct RateLimiter {
    config: ArcSwap<RateLimitConfig>,
    rules: RwLock<Vec<RateLimitRule>>,
    windows: DashMap<String, WindowCounter>,
    violations: DashMap<String, ViolationRecord>,
    allowlist: DashSet<String>,
    denylist: DashSet<String>,
    counter_store: Option<Arc<dyn CounterStore>>,
    load_sample: AtomicU8,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    store_degraded: AtomicBool,
    top_identities: Mutex<HashMap<String, BlockStat>>,
    top_paths: Mutex<HashMap<String, BlockStat>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, None)
    }

    /// Build a limiter whose distributed strategy uses `store`.
    pub fn with_store(config: RateLimitConfig, store: Option<Arc<dyn CounterStore>>) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|r| RateLimitRule {
                path_prefix: r.path_prefix.clone(),
                method: r.method.as_ref().map(|m| m.to_uppercase()),
                window_ms: r.window_ms,
                max_requests: r.max_requests,
                skip_successful: r.skip_successful,
                skip_failed: r.skip_failed,
            })
            .collect();
        let allowlist = config.allowlist.iter().cloned().collect();
        let denylist = config.denylist.iter().cloned().collect();
        Self {
            config: ArcSwap::from_pointee(config),
            rules: RwLock::new(rules),
            windows: DashMap::new(),
            violations: DashMap::new(),
            allowlist,
            denylist,
            counter_store: store,
            load_sample: AtomicU8::new(0),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            store_degraded: AtomicBool::new(false),
            top_identities: Mutex::new(HashMap::new()),
            top_paths: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `identity` may proceed with a request to `path`.
    ///
    /// `now_ms` is milliseconds since the Unix epoch; callers on the request
    /// path pass the current time.
    pub async fn admit(&self, identity: &str, path: &str, method: &str, now_ms: u64) -> Decision {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if self.denylist.contains(identity) {
            tracing::warn!(client = %identity, path = %path, "Deny-listed identity rejected");
            self.record_block(identity, path, now_ms);
            return Decision::Deny;
        }
        if self.allowlist.contains(identity) {
            return Decision::Allow;
        }

        let config = self.config.load();
        let rule = self.resolve_rule(path, method);
        let (window_ms, max_requests) = match &rule {
            Some(r) => (r.window_ms, r.max_requests),
            None => (config.window_ms, config.max_requests),
        };
        let rule_key = rule
            .as_ref()
            .map(|r| r.path_prefix.clone())
            .unwrap_or_else(|| "*".to_string());

        let decision = match config.strategy {
            RateLimitStrategy::General => {
                self.local_admit(identity, &rule_key, window_ms, max_requests, now_ms)
            }
            RateLimitStrategy::Progressive => {
                self.progressive_admit(identity, &rule_key, window_ms, max_requests, now_ms)
            }
            RateLimitStrategy::Adaptive => {
                let load = self.load_sample.load(Ordering::Relaxed);
                let effective = adaptive_max(max_requests, load);
                self.local_admit(identity, &rule_key, window_ms, effective, now_ms)
            }
            RateLimitStrategy::Distributed => {
                self.distributed_admit(identity, &rule_key, window_ms, max_requests, now_ms)
                    .await
            }
        };

        if matches!(decision, Decision::Block { .. }) {
            self.record_block(identity, path, now_ms);
        }
        decision
    }

    /// Undo one count for a finished request. The middleware calls this when
    /// the matched rule skips successful or failed outcomes.
    pub fn forgive(&self, identity: &str, path: &str, method: &str, now_ms: u64) {
        let config = self.config.load();
        let rule = self.resolve_rule(path, method);
        let (window_ms, rule_key) = match &rule {
            Some(r) => (r.window_ms, r.path_prefix.clone()),
            None => (config.window_ms, "*".to_string()),
        };
        let key = counter_key(identity, &rule_key);
        if let Some(mut entry) = self.windows.get_mut(&key) {
            if entry.index == now_ms / window_ms {
                entry.count = entry.count.saturating_sub(1);
            }
        }
    }

    /// The matched rule for a request, if any override applies.
    pub fn resolve_rule(&self, path: &str, method: &str) -> Option<RateLimitRule> {
        let method = method.to_uppercase();
        let rules = self.rules.read().expect("rate limit rules lock poisoned");
        rules
            .iter()
            .filter(|r| path.starts_with(&r.path_prefix))
            .filter(|r| r.method.as_deref().map(|m| m == method).unwrap_or(true))
            .max_by_key(|r| r.path_prefix.len())
            .cloned()
    }

    fn local_admit(
        &self,
        identity: &str,
        rule_key: &str,
        window_ms: u64,
        max_requests: u32,
        now_ms: u64,
    ) -> Decision {
        let index = now_ms / window_ms;
        let key = counter_key(identity, rule_key);
        let mut entry = self.windows.entry(key).or_insert(WindowCounter {
            index,
            count: 0,
            window_ms,
        });
        if entry.index != index || entry.window_ms != window_ms {
            entry.index = index;
            entry.count = 0;
            entry.window_ms = window_ms;
        }
        entry.count += 1;
        if entry.count > max_requests {
            Decision::Block {
                retry_after_ms: (index + 1) * window_ms - now_ms,
                violations: None,
            }
        } else {
            Decision::Allow
        }
    }

    fn progressive_admit(
        &self,
        identity: &str,
        rule_key: &str,
        window_ms: u64,
        max_requests: u32,
        now_ms: u64,
    ) -> Decision {
        let reset_ms = self.config.load().violation_reset_secs * 1000;
        // Read the record and drop its map guard before any removal; holding
        // it across a remove would deadlock the shard.
        let recorded = self
            .violations
            .get(identity)
            .map(|record| (record.count, record.last_ms));
        let violations = match recorded {
            Some((count, last_ms)) if now_ms.saturating_sub(last_ms) < reset_ms => count,
            Some(_) => {
                self.violations.remove(identity);
                0
            }
            None => 0,
        };

        let (effective_max, effective_window) = progressive_limits(max_requests, window_ms, violations);
        match self.local_admit(identity, rule_key, effective_window, effective_max, now_ms) {
            Decision::Allow => Decision::Allow,
            Decision::Block { retry_after_ms, .. } => {
                let mut record = self.violations.entry(identity.to_string()).or_insert(
                    ViolationRecord {
                        count: 0,
                        last_ms: now_ms,
                    },
                );
                record.count += 1;
                record.last_ms = now_ms;
                Decision::Block {
                    retry_after_ms,
                    violations: Some(record.count),
                }
            }
            deny => deny,
        }
    }

    async fn distributed_admit(
        &self,
        identity: &str,
        rule_key: &str,
        window_ms: u64,
        max_requests: u32,
        now_ms: u64,
    ) -> Decision {
        let Some(store) = &self.counter_store else {
            return self.local_admit(identity, rule_key, window_ms, max_requests, now_ms);
        };

        let index = now_ms / window_ms;
        let key = format!("{}|{}", counter_key(identity, rule_key), index);
        match store
            .increment_with_expiry(&key, Duration::from_millis(window_ms))
            .await
        {
            Ok(count) => {
                self.store_degraded.store(false, Ordering::Relaxed);
                if count > max_requests as u64 {
                    Decision::Block {
                        retry_after_ms: (index + 1) * window_ms - now_ms,
                        violations: None,
                    }
                } else {
                    Decision::Allow
                }
            }
            Err(e) => {
                self.store_degraded.store(true, Ordering::Relaxed);
                tracing::warn!(error = %e, "Counter store unreachable, serving from local counters");
                self.local_admit(identity, rule_key, window_ms, max_requests, now_ms)
            }
        }
    }

    fn record_block(&self, identity: &str, path: &str, now_ms: u64) {
        self.blocked_requests.fetch_add(1, Ordering::Relaxed);
        crate::observability::metrics::record_rate_limited();
        for (table, key) in [
            (&self.top_identities, identity),
            (&self.top_paths, path),
        ] {
            let mut table = table.lock().expect("block table mutex poisoned");
            let stat = table.entry(key.to_string()).or_default();
            stat.count += 1;
            stat.last_ms = now_ms;
        }
    }

    /// Feed the adaptive strategy a server-load sample (0-100).
    pub fn record_load(&self, load: u8) {
        self.load_sample.store(load.min(100), Ordering::Relaxed);
    }

    // Rule registry -------------------------------------------------------

    /// Insert or replace the rule for `(path_prefix, method)`.
    pub fn upsert_rule(&self, rule: RateLimitRule) {
        let mut rules = self.rules.write().expect("rate limit rules lock poisoned");
        if let Some(existing) = rules
            .iter_mut()
            .find(|r| r.path_prefix == rule.path_prefix && r.method == rule.method)
        {
            *existing = rule;
        } else {
            rules.push(rule);
        }
    }

    pub fn remove_rule(&self, path_prefix: &str, method: Option<&str>) -> bool {
        let method = method.map(|m| m.to_uppercase());
        let mut rules = self.rules.write().expect("rate limit rules lock poisoned");
        let before = rules.len();
        rules.retain(|r| !(r.path_prefix == path_prefix && r.method == method));
        rules.len() != before
    }

    pub fn rules(&self) -> Vec<RateLimitRule> {
        self.rules.read().expect("rate limit rules lock poisoned").clone()
    }

    // Allow / deny lists --------------------------------------------------

    pub fn allow_identity(&self, identity: &str) {
        self.denylist.remove(identity);
        self.allowlist.insert(identity.to_string());
    }

    pub fn deny_identity(&self, identity: &str) {
        self.allowlist.remove(identity);
        self.denylist.insert(identity.to_string());
    }

    pub fn clear_identity(&self, identity: &str) {
        self.allowlist.remove(identity);
        self.denylist.remove(identity);
    }

    pub fn lists(&self) -> (Vec<String>, Vec<String>) {
        let allow = self.allowlist.iter().map(|e| e.key().clone()).collect();
        let deny = self.denylist.iter().map(|e| e.key().clone()).collect();
        (allow, deny)
    }

    // Maintenance ---------------------------------------------------------

    /// Drop expired window counters, stale violation records, and trim the
    /// most-blocked tables. Runs from the background prune task.
    pub fn prune(&self, now_ms: u64) {
        self.windows
            .retain(|_, counter| counter.index >= now_ms / counter.window_ms);

        let reset_ms = self.config.load().violation_reset_secs * 1000;
        self.violations
            .retain(|_, record| now_ms.saturating_sub(record.last_ms) < reset_ms);

        for table in [&self.top_identities, &self.top_paths] {
            let mut table = table.lock().expect("block table mutex poisoned");
            if table.len() > BLOCK_TABLE_CAP {
                let mut entries: Vec<(String, BlockStat)> =
                    table.drain().collect();
                entries.sort_by(|a, b| {
                    b.1.count
                        .cmp(&a.1.count)
                        .then(b.1.last_ms.cmp(&a.1.last_ms))
                });
                entries.truncate(BLOCK_TABLE_CAP);
                table.extend(entries);
            }
        }
    }

    /// Replace runtime-tunable knobs from a new configuration.
    pub fn apply_config(&self, config: &RateLimitConfig) {
        self.allowlist.clear();
        for id in &config.allowlist {
            self.allowlist.insert(id.clone());
        }
        self.denylist.clear();
        for id in &config.denylist {
            self.denylist.insert(id.clone());
        }
        let mut rules = self.rules.write().expect("rate limit rules lock poisoned");
        *rules = config
            .rules
            .iter()
            .map(|r| RateLimitRule {
                path_prefix: r.path_prefix.clone(),
                method: r.method.as_ref().map(|m| m.to_uppercase()),
                window_ms: r.window_ms,
                max_requests: r.max_requests,
                skip_successful: r.skip_successful,
                skip_failed: r.skip_failed,
            })
            .collect();
        drop(rules);
        self.config.store(Arc::new(config.clone()));
    }

    pub fn metrics(&self) -> RateLimitMetrics {
        RateLimitMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            active_windows: self.windows.len(),
            tracked_violators: self.violations.len(),
            store_degraded: self.store_degraded.load(Ordering::Relaxed),
            top_blocked_identities: top_entries(&self.top_identities),
            top_blocked_paths: top_entries(&self.top_paths),
        }
    }

    pub fn health(&self) -> ComponentHealth {
        if self.store_degraded.load(Ordering::Relaxed) {
            return ComponentHealth::Warning;
        }
        ComponentHealth::Healthy
    }

    pub fn reset_metrics(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.blocked_requests.store(0, Ordering::Relaxed);
        self.top_identities
            .lock()
            .expect("block table mutex poisoned")
            .clear();
        self.top_paths
            .lock()
            .expect("block table mutex poisoned")
            .clear();
    }
}

fn counter_key(identity: &str, rule_key: &str) -> String {
    format!("{identity}|{rule_key}")
}

/// Progressive limits: repeated violators get a fraction of the base limit
/// over a stretched window.
fn progressive_limits(max_requests: u32, window_ms: u64, violations: u32) -> (u32, u64) {
    if violations > 3 {
        (max_requests / 10, window_ms * 4)
    } else if violations > 1 {
        (max_requests / 2, window_ms * 2)
    } else {
        (max_requests, window_ms)
    }
}

/// Adaptive limits: shed load as the server gets busier.
fn adaptive_max(max_requests: u32, load: u8) -> u32 {
    let factor = if load > 80 {
        0.3
    } else if load > 60 {
        0.5
    } else if load > 40 {
        0.7
    } else {
        return max_requests;
    };
    (max_requests as f64 * factor).floor() as u32
}


fn top_entries(table: &Mutex<HashMap<String, BlockStat>>) -> Vec<BlockedEntry> {
    let table = table.lock().expect("block table mutex poisoned");
    let mut entries: Vec<(&String, &BlockStat)> = table.iter().collect();
    entries.sort_by(|a, b| {
        b.1.count
            .cmp(&a.1.count)
            .then(b.1.last_ms.cmp(&a.1.last_ms))
    });
    entries
        .into_iter()
        .take(TOP_BLOCKED)
        .map(|(key, stat)| BlockedEntry {
            key: key.clone(),
            count: stat.count,
        })
        .collect()
}
