//! Security event log.
//!
//! # Responsibilities
//! - Define the audit event shape shared by all guards
//! - Keep a bounded in-memory log of recent events
//! - Answer filtered queries for the admin API and reports
//!
//! # Design Decisions
//! - Fixed capacity ring buffer (1,000), FIFO eviction when full
//! - Append-only: events are never mutated after logging
//! - Query results are newest-first snapshots, never live references

use std::collections::VecDeque;
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of events retained before FIFO eviction.
pub const EVENT_CAPACITY: usize = 1_000;

/// Classification of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RateLimit,
    FileThreat,
    CsrfAttack,
    XssAttempt,
    SqlInjection,
    ValidationFailure,
    CspViolation,
}

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What the pipeline did with the offending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Blocked,
    Allowed,
    Quarantined,
    Sanitized,
}

/// A single audit record produced by a guard decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub severity: Severity,
    /// Offending identity (IP or session id).
    pub source: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Free-form detail (threat names, field errors).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, severity: Severity, source: impl Into<String>, action: Action) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            severity,
            source: source.into(),
            action,
            endpoint: None,
            user_agent: None,
            detail: None,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Filter for event queries. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub severity: Option<Severity>,
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &event.source != source {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Bounded ring buffer of recent security events.
pub struct EventLog {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an event, evicting the oldest when at capacity.
    pub fn push(&self, event: SecurityEvent) {
        let mut events = self.events.lock().expect("event log mutex poisoned");
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Events matching the filter, newest first.
    pub fn query(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        let events = self.events.lock().expect("event log mutex poisoned");
        let limit = filter.limit.unwrap_or(usize::MAX);
        events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// All retained events, oldest first.
    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        let events = self.events.lock().expect("event log mutex poisoned");
        events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().expect("event log mutex poisoned").clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, severity: Severity, source: &str) -> SecurityEvent {
        SecurityEvent::new(kind, severity, source, Action::Blocked)
    }

    #[test]
    fn eviction_is_fifo_at_capacity() {
        let log = EventLog::with_capacity(3);
        for i in 0..4 {
            log.push(event(EventKind::RateLimit, Severity::Low, &format!("ip-{i}")));
        }
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].source, "ip-1");
        assert_eq!(snapshot[2].source, "ip-3");
    }

    #[test]
    fn query_filters_and_orders_newest_first() {
        let log = EventLog::new();
        log.push(event(EventKind::RateLimit, Severity::Low, "a"));
        log.push(event(EventKind::SqlInjection, Severity::High, "b"));
        log.push(event(EventKind::SqlInjection, Severity::High, "c"));

        let hits = log.query(&EventFilter {
            kind: Some(EventKind::SqlInjection),
            ..Default::default()
        });
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "c");

        let capped = log.query(&EventFilter {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].source, "c");
    }

    #[test]
    fn severity_ordering_supports_threshold_checks() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
    }
}
