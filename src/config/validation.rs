//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits > 0)
//! - Reject malformed field rules before they reach the engines
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::GatewayConfig;

const FIELD_KINDS: &[&str] = &[
    "string", "number", "email", "url", "boolean", "date", "array", "object",
];

/// A single semantic configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending option.
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate a loaded configuration. Collects every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(err("listener.bind_address", "not a valid socket address"));
    }

    if config.rate_limit.window_ms == 0 {
        errors.push(err("rate_limit.window_ms", "must be greater than zero"));
    }
    if config.rate_limit.max_requests == 0 {
        errors.push(err("rate_limit.max_requests", "must be greater than zero"));
    }
    for (i, rule) in config.rate_limit.rules.iter().enumerate() {
        if rule.window_ms == 0 || rule.max_requests == 0 {
            errors.push(err(
                &format!("rate_limit.rules[{i}]"),
                "window_ms and max_requests must be greater than zero",
            ));
        }
        if rule.path_prefix.is_empty() {
            errors.push(err(
                &format!("rate_limit.rules[{i}].path_prefix"),
                "must not be empty",
            ));
        }
    }

    if config.csrf.max_age_secs == 0 {
        errors.push(err("csrf.max_age_secs", "must be greater than zero"));
    }

    if config.upload.max_file_size == 0 {
        errors.push(err("upload.max_file_size", "must be greater than zero"));
    }
    if config.upload.upload_dir == config.upload.quarantine_dir {
        errors.push(err(
            "upload.quarantine_dir",
            "must differ from upload_dir",
        ));
    }

    for (i, rule) in config.validation.rules.iter().enumerate() {
        if !FIELD_KINDS.contains(&rule.kind.as_str()) {
            errors.push(err(
                &format!("validation.rules[{i}].kind"),
                format!("unknown field kind '{}'", rule.kind),
            ));
        }
        if let Some(pattern) = &rule.pattern {
            if regex::Regex::new(pattern).is_err() {
                errors.push(err(
                    &format!("validation.rules[{i}].pattern"),
                    "not a valid regex",
                ));
            }
        }
        if let (Some(lo), Some(hi)) = (rule.min_len, rule.max_len) {
            if lo > hi {
                errors.push(err(
                    &format!("validation.rules[{i}]"),
                    "min_len exceeds max_len",
                ));
            }
        }
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(err("admin.api_key", "must not be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{FieldRuleConfig, RateLimitRuleConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn zero_window_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limit.window_ms = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "rate_limit.window_ms"));
    }

    #[test]
    fn bad_rule_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.rate_limit.rules.push(RateLimitRuleConfig {
            path_prefix: String::new(),
            method: None,
            window_ms: 0,
            max_requests: 0,
            skip_successful: false,
            skip_failed: false,
        });
        config.validation.rules.push(FieldRuleConfig {
            field: "age".into(),
            kind: "integer".into(),
            required: false,
            min_len: None,
            max_len: None,
            min: None,
            max: None,
            pattern: Some("(unclosed".into()),
            one_of: None,
            sanitize: true,
            allow_html: false,
        });
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 4);
    }
}
