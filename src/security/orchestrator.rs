//! Security orchestrator.
//!
//! # Data Flow
//! ```text
//! Guard decisions
//!     → log_event (ring buffer, events.rs)
//!     → alert thresholds over a rolling hour
//!     → broadcast to subscribers (SSE stream, logs)
//!
//! Admin queries
//!     → metrics()  (merged guard counters, rates derived on read)
//!     → health()   (worst-of-components roll-up)
//!     → report()   (severity counts, top threats, recommendations)
//! ```
//!
//! # Design Decisions
//! - Guards stay independent; only the orchestrator sees all of them
//! - Alerts fan out on a broadcast channel; dropping a receiver
//!   unsubscribes without affecting other listeners
//! - Same-named alerts are muted for a cooldown to avoid storms

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::schema::{AlertConfig, GatewayConfig};
use crate::security::csrf::{CsrfGuard, CsrfMetrics};
use crate::security::events::{Action, EventFilter, EventKind, EventLog, SecurityEvent, Severity};
use crate::security::health::ComponentHealth;
use crate::security::rate_limit::{RateLimitMetrics, RateLimiter};
use crate::security::upload::{UploadMetrics, UploadScanner};
use crate::security::validation::{ValidationEngine, ValidationMetrics};

/// Seconds a named alert stays muted after firing.
const ALERT_COOLDOWN_SECS: i64 = 300;

/// A breached alert threshold, fanned out to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub name: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Merged counters from all guards. Rates are derived on read.
#[derive(Debug, Serialize)]
pub struct SecurityMetrics {
    pub rate_limit: RateLimitMetrics,
    pub csrf: CsrfMetrics,
    pub uploads: UploadMetrics,
    pub validation: ValidationMetrics,
    pub block_rate: f64,
    pub threat_rate: f64,
    pub events_retained: usize,
}

/// Per-component and overall health.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub overall: ComponentHealth,
    pub rate_limit: ComponentHealth,
    pub csrf: ComponentHealth,
    pub uploads: ComponentHealth,
    pub validation: ComponentHealth,
    pub recent_critical_events: usize,
}

/// Reporting window for `report()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub fn duration(self) -> Duration {
        match self {
            Timeframe::Hour => Duration::hours(1),
            Timeframe::Day => Duration::days(1),
            Timeframe::Week => Duration::weeks(1),
            Timeframe::Month => Duration::days(30),
        }
    }
}

/// Counts per severity over a report window.
#[derive(Debug, Default, Serialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

/// One ranked threat type in a report.
#[derive(Debug, Serialize)]
pub struct ThreatRank {
    pub kind: EventKind,
    pub count: usize,
}

/// Aggregate report over a timeframe.
#[derive(Debug, Serialize)]
pub struct SecurityReport {
    pub timeframe: Timeframe,
    pub generated_at: DateTime<Utc>,
    pub since: DateTime<Utc>,
    pub total_events: usize,
    pub severity: SeverityCounts,
    pub top_threats: Vec<ThreatRank>,
    pub metrics: SecurityMetrics,
    pub recommendations: Vec<String>,
}

/// Composes the four guards, the event log, and alerting.
pub struct SecurityOrchestrator {
    pub rate_limiter: Arc<RateLimiter>,
    pub csrf: Arc<CsrfGuard>,
    pub uploads: Arc<UploadScanner>,
    pub validation: Arc<ValidationEngine>,
    events: EventLog,
    alert_config: arc_swap::ArcSwap<AlertConfig>,
    alert_tx: broadcast::Sender<SecurityAlert>,
    event_tx: broadcast::Sender<SecurityEvent>,
    muted_until: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SecurityOrchestrator {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        csrf: Arc<CsrfGuard>,
        uploads: Arc<UploadScanner>,
        validation: Arc<ValidationEngine>,
        alert_config: AlertConfig,
    ) -> Self {
        let (alert_tx, _) = broadcast::channel(64);
        let (event_tx, _) = broadcast::channel(256);
        Self {
            rate_limiter,
            csrf,
            uploads,
            validation,
            events: EventLog::new(),
            alert_config: arc_swap::ArcSwap::from_pointee(alert_config),
            alert_tx,
            event_tx,
            muted_until: Mutex::new(HashMap::new()),
        }
    }

    /// Build the orchestrator and its guards from a configuration. The
    /// distributed strategy gets the in-memory counter store; a shared
    /// store plugs in through `RateLimiter::with_store`.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let store = match config.rate_limit.strategy {
            crate::config::RateLimitStrategy::Distributed => Some(Arc::new(
                crate::security::rate_limit::store::MemoryCounterStore::new(),
            )
                as Arc<dyn crate::security::rate_limit::store::CounterStore>),
            _ => None,
        };
        Self::new(
            Arc::new(RateLimiter::with_store(config.rate_limit.clone(), store)),
            Arc::new(CsrfGuard::new(config.csrf.clone())),
            Arc::new(UploadScanner::new(config.upload.clone())),
            Arc::new(ValidationEngine::new()),
            config.alerts.clone(),
        )
    }

    /// Record a guard decision and evaluate alert thresholds.
    pub fn log_event(&self, event: SecurityEvent) {
        tracing::debug!(
            kind = ?event.kind,
            severity = ?event.severity,
            source = %event.source,
            action = ?event.action,
            "Security event"
        );
        crate::observability::metrics::record_security_event(event.kind, event.severity);
        let _ = self.event_tx.send(event.clone());
        self.events.push(event);
        self.evaluate_alerts(Utc::now());
    }

    /// Subscribe to the live event feed. Dropping the receiver unsubscribes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SecurityEvent> {
        self.event_tx.subscribe()
    }

    fn evaluate_alerts(&self, now: DateTime<Utc>) {
        let config = self.alert_config.load();
        let hour_ago = now - Duration::hours(1);
        let recent = self.events.query(&EventFilter {
            since: Some(hour_ago),
            ..Default::default()
        });

        let suspicious: HashSet<&str> = recent
            .iter()
            .filter(|e| e.severity >= Severity::High)
            .map(|e| e.source.as_str())
            .collect();
        if suspicious.len() >= config.suspicious_sources {
            self.fire(
                "suspicious_sources",
                format!(
                    "{} distinct sources produced high-severity events in the last hour",
                    suspicious.len()
                ),
                now,
            );
        }

        let blocked = recent.iter().filter(|e| e.action == Action::Blocked).count();
        if blocked >= config.blocked_requests {
            self.fire(
                "blocked_requests",
                format!("{blocked} requests blocked in the last hour"),
                now,
            );
        }

        let file_threats = recent
            .iter()
            .filter(|e| e.kind == EventKind::FileThreat)
            .count();
        if file_threats >= config.threat_files {
            self.fire(
                "threat_files",
                format!("{file_threats} file threats detected in the last hour"),
                now,
            );
        }

        let csp = recent
            .iter()
            .filter(|e| e.kind == EventKind::CspViolation)
            .count();
        if csp >= config.csp_violations {
            self.fire(
                "csp_violations",
                format!("{csp} CSP violations reported in the last hour"),
                now,
            );
        }
    }

    fn fire(&self, name: &str, message: String, now: DateTime<Utc>) {
        {
            let mut muted = self.muted_until.lock().expect("alert mute mutex poisoned");
            match muted.get(name) {
                Some(until) if *until > now => return,
                _ => {
                    muted.insert(
                        name.to_string(),
                        now + Duration::seconds(ALERT_COOLDOWN_SECS),
                    );
                }
            }
        }
        tracing::warn!(alert = name, %message, "Security alert raised");
        let _ = self.alert_tx.send(SecurityAlert {
            name: name.to_string(),
            message,
            triggered_at: now,
        });
    }

    /// Subscribe to alerts. Dropping the receiver unsubscribes.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<SecurityAlert> {
        self.alert_tx.subscribe()
    }

    pub fn events(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        self.events.query(filter)
    }

    pub fn metrics(&self) -> SecurityMetrics {
        let rate_limit = self.rate_limiter.metrics();
        let uploads = self.uploads.metrics();
        let block_rate = if rate_limit.total_requests > 0 {
            rate_limit.blocked_requests as f64 / rate_limit.total_requests as f64
        } else {
            0.0
        };
        let threat_rate = if uploads.scanned_files > 0 {
            uploads.threats_found as f64 / uploads.scanned_files as f64
        } else {
            0.0
        };
        SecurityMetrics {
            rate_limit,
            csrf: self.csrf.metrics(),
            uploads,
            validation: self.validation.metrics(),
            block_rate,
            threat_rate,
            events_retained: self.events.len(),
        }
    }

    pub fn health(&self) -> HealthReport {
        let rate_limit = self.rate_limiter.health();
        let csrf = self.csrf.health();
        let uploads = self.uploads.health();
        let validation = self.validation.health();
        let overall = rate_limit
            .worst(csrf)
            .worst(uploads)
            .worst(validation);

        let hour_ago = Utc::now() - Duration::hours(1);
        let recent_critical_events = self
            .events
            .query(&EventFilter {
                severity: Some(Severity::Critical),
                since: Some(hour_ago),
                ..Default::default()
            })
            .len();

        HealthReport {
            overall,
            rate_limit,
            csrf,
            uploads,
            validation,
            recent_critical_events,
        }
    }

    pub fn report(&self, timeframe: Timeframe) -> SecurityReport {
        let now = Utc::now();
        let since = now - timeframe.duration();
        let window = self.events.query(&EventFilter {
            since: Some(since),
            ..Default::default()
        });

        let mut severity = SeverityCounts::default();
        let mut by_kind: HashMap<EventKind, usize> = HashMap::new();
        for event in &window {
            match event.severity {
                Severity::Low => severity.low += 1,
                Severity::Medium => severity.medium += 1,
                Severity::High => severity.high += 1,
                Severity::Critical => severity.critical += 1,
            }
            *by_kind.entry(event.kind).or_default() += 1;
        }

        let mut top_threats: Vec<ThreatRank> = by_kind
            .into_iter()
            .map(|(kind, count)| ThreatRank { kind, count })
            .collect();
        top_threats.sort_by(|a, b| b.count.cmp(&a.count));
        top_threats.truncate(10);

        let metrics = self.metrics();
        let recommendations = self.recommendations(&metrics, &severity);

        SecurityReport {
            timeframe,
            generated_at: now,
            since,
            total_events: window.len(),
            severity,
            top_threats,
            metrics,
            recommendations,
        }
    }

    fn recommendations(&self, metrics: &SecurityMetrics, severity: &SeverityCounts) -> Vec<String> {
        let mut out = Vec::new();
        if metrics.rate_limit.blocked_requests > 100 {
            out.push(
                "Blocked-request count is high; consider progressive rate limiting or upstream DDoS protection".to_string(),
            );
        }
        if metrics.uploads.threats_found > 0 {
            out.push(
                "File threats were detected; review the quarantine area and tighten the upload allow-lists".to_string(),
            );
        }
        if metrics.validation.xss_detected + metrics.validation.sql_injections_detected > 10 {
            out.push(
                "Repeated injection attempts observed; audit client input sources and consider deny-listing offenders".to_string(),
            );
        }
        if metrics.rate_limit.store_degraded {
            out.push(
                "Distributed counter store is unreachable; rate limits are enforced per instance only".to_string(),
            );
        }
        if severity.critical > 0 {
            out.push(
                "Critical events occurred in this window; inspect the event log for their sources".to_string(),
            );
        }
        if out.is_empty() {
            out.push("No anomalies detected in this window".to_string());
        }
        out
    }

    /// Clear the event buffer and every guard's counters.
    pub fn reset(&self) {
        self.events.clear();
        self.rate_limiter.reset_metrics();
        self.csrf.reset_metrics();
        self.uploads.reset_metrics();
        self.validation.reset_metrics();
        self.muted_until
            .lock()
            .expect("alert mute mutex poisoned")
            .clear();
        tracing::info!("Security metrics and event log reset");
    }

    /// Apply a new configuration to every guard.
    pub fn apply_config(&self, config: &GatewayConfig) {
        self.rate_limiter.apply_config(&config.rate_limit);
        self.csrf.apply_config(&config.csrf);
        self.uploads.apply_config(&config.upload);
        self.alert_config.store(Arc::new(config.alerts.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{CsrfConfig, RateLimitConfig, UploadConfig};

    fn orchestrator(alerts: AlertConfig) -> SecurityOrchestrator {
        // Directories are never written by these tests; they are only
        // created lazily on first persistence.
        let base = std::env::temp_dir().join(format!("watchgate-test-{}", uuid::Uuid::new_v4()));
        let upload = UploadConfig {
            upload_dir: base.join("u").to_string_lossy().into_owned(),
            quarantine_dir: base.join("q").to_string_lossy().into_owned(),
            ..Default::default()
        };
        SecurityOrchestrator::new(
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            Arc::new(CsrfGuard::new(CsrfConfig::default())),
            Arc::new(UploadScanner::new(upload)),
            Arc::new(ValidationEngine::new()),
            alerts,
        )
    }

    fn blocked_event(kind: EventKind, severity: Severity, source: &str) -> SecurityEvent {
        SecurityEvent::new(kind, severity, source, Action::Blocked)
    }

    #[tokio::test]
    async fn threshold_breach_fires_alert_once() {
        let orch = orchestrator(AlertConfig {
            threat_files: 2,
            ..Default::default()
        });
        let mut alerts = orch.subscribe_alerts();

        orch.log_event(blocked_event(EventKind::FileThreat, Severity::High, "a"));
        orch.log_event(blocked_event(EventKind::FileThreat, Severity::High, "b"));
        let alert = alerts.try_recv().unwrap();
        assert_eq!(alert.name, "threat_files");

        // A third event inside the cooldown stays silent.
        orch.log_event(blocked_event(EventKind::FileThreat, Severity::High, "c"));
        assert!(alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn suspicious_sources_counts_distinct_identities() {
        let orch = orchestrator(AlertConfig {
            suspicious_sources: 2,
            blocked_requests: 1_000,
            threat_files: 1_000,
            csp_violations: 1_000,
        });
        let mut alerts = orch.subscribe_alerts();

        // Two events from one source are not two suspicious sources.
        orch.log_event(blocked_event(EventKind::SqlInjection, Severity::High, "x"));
        orch.log_event(blocked_event(EventKind::SqlInjection, Severity::High, "x"));
        assert!(alerts.try_recv().is_err());

        orch.log_event(blocked_event(EventKind::SqlInjection, Severity::Critical, "y"));
        assert_eq!(alerts.try_recv().unwrap().name, "suspicious_sources");
    }

    #[tokio::test]
    async fn live_feed_receives_every_logged_event() {
        let orch = orchestrator(AlertConfig::default());
        let mut feed = orch.subscribe_events();
        orch.log_event(blocked_event(EventKind::XssAttempt, Severity::High, "a"));
        orch.log_event(blocked_event(EventKind::RateLimit, Severity::Low, "b"));
        assert_eq!(feed.try_recv().unwrap().source, "a");
        assert_eq!(feed.try_recv().unwrap().source, "b");
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_break_others() {
        let orch = orchestrator(AlertConfig {
            threat_files: 1,
            ..Default::default()
        });
        let dropped = orch.subscribe_alerts();
        let mut kept = orch.subscribe_alerts();
        drop(dropped);

        orch.log_event(blocked_event(EventKind::FileThreat, Severity::High, "a"));
        assert_eq!(kept.try_recv().unwrap().name, "threat_files");
    }

    #[tokio::test]
    async fn health_rolls_up_worst_component() {
        let orch = orchestrator(AlertConfig::default());
        assert_eq!(orch.health().overall, ComponentHealth::Healthy);
    }

    #[tokio::test]
    async fn report_counts_and_ranks() {
        let orch = orchestrator(AlertConfig {
            blocked_requests: 1_000,
            suspicious_sources: 1_000,
            threat_files: 1_000,
            csp_violations: 1_000,
        });
        orch.log_event(blocked_event(EventKind::RateLimit, Severity::Low, "a"));
        orch.log_event(blocked_event(EventKind::RateLimit, Severity::Low, "b"));
        orch.log_event(blocked_event(EventKind::XssAttempt, Severity::High, "c"));

        let report = orch.report(Timeframe::Hour);
        assert_eq!(report.total_events, 3);
        assert_eq!(report.severity.low, 2);
        assert_eq!(report.severity.high, 1);
        assert_eq!(report.top_threats[0].kind, EventKind::RateLimit);
        assert_eq!(report.top_threats[0].count, 2);
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_events_and_counters() {
        let orch = orchestrator(AlertConfig::default());
        orch.log_event(blocked_event(EventKind::RateLimit, Severity::Low, "a"));
        assert_eq!(orch.metrics().events_retained, 1);

        orch.reset();
        assert_eq!(orch.metrics().events_retained, 0);
        assert_eq!(orch.metrics().csrf.invalid_tokens, 0);
    }
}
