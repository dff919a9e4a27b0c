//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the security gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, timeouts, body cap).
    pub listener: ListenerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// CSRF protection configuration.
    pub csrf: CsrfConfig,

    /// Upload scanning configuration.
    pub upload: UploadConfig,

    /// Input validation configuration.
    pub validation: ValidationConfig,

    /// Alert threshold configuration.
    pub alerts: AlertConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Rate limiting strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Fixed window per identity.
    General,
    /// Limits tighten after repeated violations.
    Progressive,
    /// Limits scale down with server load.
    Adaptive,
    /// Counting delegated to an external atomic store.
    Distributed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Active strategy.
    pub strategy: RateLimitStrategy,

    /// Base window duration in milliseconds.
    pub window_ms: u64,

    /// Base maximum requests per window per identity.
    pub max_requests: u32,

    /// Seconds without a violation before an identity's record resets.
    pub violation_reset_secs: u64,

    /// Interval between counter prune passes, in seconds.
    pub prune_interval_secs: u64,

    /// Identities that bypass window accounting entirely.
    pub allowlist: Vec<String>,

    /// Identities rejected unconditionally.
    pub denylist: Vec<String>,

    /// Per-path rule overrides.
    pub rules: Vec<RateLimitRuleConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::General,
            window_ms: 60_000,
            max_requests: 100,
            violation_reset_secs: 3600,
            prune_interval_secs: 60,
            allowlist: Vec::new(),
            denylist: Vec::new(),
            rules: Vec::new(),
        }
    }
}

/// A per-path rate limit rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitRuleConfig {
    /// Path prefix the rule applies to.
    pub path_prefix: String,

    /// HTTP method to match; any method if unset.
    pub method: Option<String>,

    /// Window duration in milliseconds.
    pub window_ms: u64,

    /// Maximum requests per window.
    pub max_requests: u32,

    /// Do not count requests that end in success.
    #[serde(default)]
    pub skip_successful: bool,

    /// Do not count requests that end in failure.
    #[serde(default)]
    pub skip_failed: bool,
}

/// CSRF protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Enable CSRF validation.
    pub enabled: bool,

    /// Token lifetime in seconds.
    pub max_age_secs: u64,

    /// Interval between expired-token sweeps, in seconds.
    pub sweep_interval_secs: u64,

    /// Header carrying the token.
    pub header_name: String,

    /// Header carrying the session identity.
    pub session_header: String,

    /// Cookie carrying the session identity (fallback to the header).
    pub session_cookie: String,

    /// Paths exempt from validation (login, webhooks, token issuance).
    pub excluded_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_secs: 3600,
            sweep_interval_secs: 300,
            header_name: "X-CSRF-Token".to_string(),
            session_header: "X-Session-Id".to_string(),
            session_cookie: "session_id".to_string(),
            excluded_paths: vec![
                "/csrf/token".to_string(),
                "/auth/login".to_string(),
                "/auth/register".to_string(),
                "/webhooks".to_string(),
            ],
        }
    }
}

/// Upload scanning configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Enable upload scanning.
    pub enabled: bool,

    /// Maximum accepted file size in bytes.
    pub max_file_size: usize,

    /// Accepted MIME types.
    pub allowed_mime_types: Vec<String>,

    /// Accepted filename extensions (lowercase, no dot).
    pub allowed_extensions: Vec<String>,

    /// Directory for safely persisted uploads.
    pub upload_dir: String,

    /// Directory for quarantined files.
    pub quarantine_dir: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size: 10 * 1024 * 1024,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
                "application/pdf".to_string(),
                "text/plain".to_string(),
            ],
            allowed_extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "gif".to_string(),
                "webp".to_string(),
                "pdf".to_string(),
                "txt".to_string(),
            ],
            upload_dir: "data/uploads".to_string(),
            quarantine_dir: "data/quarantine".to_string(),
        }
    }
}

/// Input validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Enable body/query validation.
    pub enabled: bool,

    /// Path prefixes whose mutating requests are validated.
    pub protected_paths: Vec<String>,

    /// Field rules applied to protected requests.
    pub rules: Vec<FieldRuleConfig>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protected_paths: vec!["/api".to_string()],
            rules: Vec::new(),
        }
    }
}

/// A declarative field validation rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldRuleConfig {
    /// Field name in the request body or query.
    pub field: String,

    /// Expected type: string, number, email, url, boolean, date, array, object.
    pub kind: String,

    /// Reject the request when the field is absent.
    #[serde(default)]
    pub required: bool,

    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,

    /// Regex the value must match.
    pub pattern: Option<String>,

    /// Closed set of accepted values.
    pub one_of: Option<Vec<String>>,

    /// Apply sanitization to this field (default true).
    #[serde(default = "default_true")]
    pub sanitize: bool,

    /// Permit allow-listed HTML tags instead of escaping everything.
    #[serde(default)]
    pub allow_html: bool,
}

fn default_true() -> bool {
    true
}

/// Alert threshold configuration. Thresholds apply over a rolling hour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Distinct high/critical-severity sources before alerting.
    pub suspicious_sources: usize,

    /// Blocked actions before alerting.
    pub blocked_requests: usize,

    /// File threat events before alerting.
    pub threat_files: usize,

    /// CSP violation events before alerting.
    pub csp_violations: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            suspicious_sources: 5,
            blocked_requests: 100,
            threat_files: 3,
            csp_violations: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
