//! CSRF token lifecycle.
//!
//! # Responsibilities
//! - Issue per-session anti-forgery tokens
//! - Validate tokens supplied with mutating requests
//! - Sweep expired records independent of request traffic
//!
//! # Design Decisions
//! - Stored-token (synchronizer) strategy only; at most one active token
//!   per session, issuing supersedes the previous token immediately
//! - Token comparison is constant-time
//! - Expired records are deleted on the validation path that finds them

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;

use crate::config::schema::CsrfConfig;
use crate::security::health::ComponentHealth;

#[derive(Debug, Clone)]
struct TokenRecord {
    token: String,
    expires_at: DateTime<Utc>,
    #[allow(dead_code)]
    user_id: Option<String>,
}

/// Counters exposed to the orchestrator.
#[derive(Debug, Serialize)]
pub struct CsrfMetrics {
    pub issued_tokens: u64,
    pub validated_tokens: u64,
    pub invalid_tokens: u64,
    pub swept_tokens: u64,
    pub active_sessions: usize,
}

/// Issues and validates anti-forgery tokens per session.
pub struct CsrfGuard {
    config: ArcSwap<CsrfConfig>,
    tokens: DashMap<String, TokenRecord>,
    issued: AtomicU64,
    validated: AtomicU64,
    invalid: AtomicU64,
    swept: AtomicU64,
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            tokens: DashMap::new(),
            issued: AtomicU64::new(0),
            validated: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Issue a fresh token for `session_id`, superseding any prior token.
    pub fn issue(&self, session_id: &str, user_id: Option<&str>) -> String {
        self.issue_at(session_id, user_id, Utc::now())
    }

    pub fn issue_at(&self, session_id: &str, user_id: Option<&str>, now: DateTime<Utc>) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let max_age = self.config.load().max_age_secs as i64;
        self.tokens.insert(
            session_id.to_string(),
            TokenRecord {
                token: token.clone(),
                expires_at: now + Duration::seconds(max_age),
                user_id: user_id.map(str::to_string),
            },
        );
        self.issued.fetch_add(1, Ordering::Relaxed);
        token
    }

    /// Check `provided` against the stored token for `session_id`.
    pub fn validate(&self, session_id: &str, provided: &str) -> bool {
        self.validate_at(session_id, provided, Utc::now())
    }

    pub fn validate_at(&self, session_id: &str, provided: &str, now: DateTime<Utc>) -> bool {
        let expired = match self.tokens.get(session_id) {
            None => {
                self.invalid.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            Some(record) => {
                if now > record.expires_at {
                    true
                } else if constant_time_eq(&record.token, provided) {
                    self.validated.fetch_add(1, Ordering::Relaxed);
                    return true;
                } else {
                    self.invalid.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
        };
        // Expired record: delete it, then fail the validation.
        if expired {
            self.tokens.remove(session_id);
        }
        self.invalid.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Remove every expired record. Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, record| record.expires_at >= now);
        let removed = before.saturating_sub(self.tokens.len());
        if removed > 0 {
            self.swept.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "Swept expired CSRF tokens");
        }
        removed
    }

    /// True when `path` is exempt from validation.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.config
            .load()
            .excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn config(&self) -> Arc<CsrfConfig> {
        self.config.load_full()
    }

    pub fn apply_config(&self, config: &CsrfConfig) {
        self.config.store(Arc::new(config.clone()));
    }

    pub fn metrics(&self) -> CsrfMetrics {
        CsrfMetrics {
            issued_tokens: self.issued.load(Ordering::Relaxed),
            validated_tokens: self.validated.load(Ordering::Relaxed),
            invalid_tokens: self.invalid.load(Ordering::Relaxed),
            swept_tokens: self.swept.load(Ordering::Relaxed),
            active_sessions: self.tokens.len(),
        }
    }

    pub fn health(&self) -> ComponentHealth {
        let validated = self.validated.load(Ordering::Relaxed);
        let invalid = self.invalid.load(Ordering::Relaxed);
        if validated + invalid >= 20 && invalid > validated {
            ComponentHealth::Warning
        } else {
            ComponentHealth::Healthy
        }
    }

    pub fn reset_metrics(&self) {
        self.issued.store(0, Ordering::Relaxed);
        self.validated.store(0, Ordering::Relaxed);
        self.invalid.store(0, Ordering::Relaxed);
        self.swept.store(0, Ordering::Relaxed);
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> CsrfGuard {
        CsrfGuard::new(CsrfConfig::default())
    }

    #[test]
    fn issue_then_validate_round_trip() {
        let g = guard();
        let token = g.issue("session-A", None);
        assert!(g.validate("session-A", &token));
        assert!(!g.validate("session-A", "wrong-token"));
        assert_eq!(g.metrics().invalid_tokens, 1);
    }

    #[test]
    fn second_issue_supersedes_first() {
        let g = guard();
        let first = g.issue("session-A", Some("user-1"));
        let second = g.issue("session-A", Some("user-1"));
        assert!(!g.validate("session-A", &first));
        assert!(g.validate("session-A", &second));
        assert_eq!(g.metrics().active_sessions, 1);
    }

    #[test]
    fn expired_token_fails_and_is_removed() {
        let g = guard();
        let now = Utc::now();
        let token = g.issue_at("session-B", None, now);

        let later = now + Duration::seconds(3601);
        assert!(!g.validate_at("session-B", &token, later));
        assert_eq!(g.metrics().active_sessions, 0);

        // A second attempt hits the missing-record path.
        assert!(!g.validate_at("session-B", &token, later));
        assert_eq!(g.metrics().invalid_tokens, 2);
    }

    #[test]
    fn unknown_session_fails() {
        let g = guard();
        assert!(!g.validate("never-seen", "anything"));
    }

    #[test]
    fn sweep_removes_only_expired_records() {
        let g = guard();
        let now = Utc::now();
        g.issue_at("old", None, now - Duration::seconds(7200));
        g.issue_at("fresh", None, now);

        assert_eq!(g.sweep(now), 1);
        assert_eq!(g.metrics().active_sessions, 1);
        assert_eq!(g.metrics().swept_tokens, 1);
        assert!(g.validate_at("fresh", &g.issue_at("fresh", None, now), now));
    }

    #[test]
    fn excluded_paths_match_by_prefix() {
        let g = guard();
        assert!(g.is_excluded("/auth/login"));
        assert!(g.is_excluded("/webhooks/github"));
        assert!(!g.is_excluded("/api/entries"));
    }

    #[test]
    fn tokens_are_unique_per_issue() {
        let g = guard();
        let a = g.issue("s1", None);
        let b = g.issue("s2", None);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
