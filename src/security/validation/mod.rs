//! Input validation and sanitization engine.
//!
//! # Data Flow
//! ```text
//! Request body / query map
//!     → validate (rules.rs constraints + patterns.rs screening)
//!     → Vec<FieldError> (empty = accepted)
//!     → sanitize (trim, escape, normalize)
//!     → rewritten map forwarded to the handler
//! ```
//!
//! # Design Decisions
//! - Injection screening runs on every string value, independent of rules
//! - Sanitization is idempotent: a sanitized value passes through unchanged
//! - The engine never mutates caller data in place; it returns a new map

pub mod patterns;
pub mod rules;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::security::health::ComponentHealth;
use self::patterns::{matches, sql_patterns, xss_patterns, Pattern};
use self::rules::{FieldError, FieldKind, ValidationRule};

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$";

/// HTML tags preserved when a field opts into `allow_html`.
const ALLOWED_TAGS: &[&str] = &[
    "b", "i", "em", "strong", "u", "p", "br", "ul", "ol", "li", "a", "code", "pre", "blockquote",
];

/// Counters exposed to the orchestrator.
#[derive(Debug, Default, Serialize)]
pub struct ValidationMetrics {
    pub validated_requests: u64,
    pub failed_validations: u64,
    pub xss_detected: u64,
    pub sql_injections_detected: u64,
    pub sanitized_fields: u64,
}

/// Per-field outcome statistics for reporting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FieldStats {
    pub total: u64,
    pub failures: u64,
}

/// Rule-driven field validation plus sanitization and injection screening.
pub struct ValidationEngine {
    xss: Vec<Pattern>,
    sql: Vec<Pattern>,
    email: regex::Regex,
    field_stats: DashMap<String, FieldStats>,
    validated_requests: AtomicU64,
    failed_validations: AtomicU64,
    xss_detected: AtomicU64,
    sql_injections_detected: AtomicU64,
    sanitized_fields: AtomicU64,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self {
            xss: xss_patterns(),
            sql: sql_patterns(),
            email: regex::Regex::new(EMAIL_PATTERN).expect("invalid email pattern"),
            field_stats: DashMap::new(),
            validated_requests: AtomicU64::new(0),
            failed_validations: AtomicU64::new(0),
            xss_detected: AtomicU64::new(0),
            sql_injections_detected: AtomicU64::new(0),
            sanitized_fields: AtomicU64::new(0),
        }
    }

    /// Validate a data map against rules. An empty result means accepted.
    ///
    /// Injection screening covers every string value in the map, including
    /// fields no rule names; a hit is an error even when all rules pass.
    pub fn validate(&self, data: &Map<String, Value>, rules: &[ValidationRule]) -> Vec<FieldError> {
        self.validated_requests.fetch_add(1, Ordering::Relaxed);
        let mut errors = Vec::new();

        for rule in rules {
            let field_errors = match data.get(&rule.field) {
                None | Some(Value::Null) => {
                    if rule.required {
                        vec![FieldError::new(&rule.field, "is required")]
                    } else {
                        Vec::new()
                    }
                }
                Some(value) => self.check_value(value, rule),
            };

            let mut stats = self.field_stats.entry(rule.field.clone()).or_default();
            stats.total += 1;
            if !field_errors.is_empty() {
                stats.failures += 1;
            }
            errors.extend(field_errors);
        }

        self.screen_strings("", &Value::Object(data.clone()), &mut errors);

        if !errors.is_empty() {
            self.failed_validations.fetch_add(1, Ordering::Relaxed);
        }
        errors
    }

    /// Ad-hoc check of one value against one rule.
    pub fn validate_single(&self, value: &Value, rule: &ValidationRule) -> Vec<FieldError> {
        let mut errors = if value.is_null() {
            if rule.required {
                vec![FieldError::new(&rule.field, "is required")]
            } else {
                Vec::new()
            }
        } else {
            self.check_value(value, rule)
        };
        self.screen_strings(&rule.field, value, &mut errors);
        errors
    }

    fn check_value(&self, value: &Value, rule: &ValidationRule) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let field = rule.field.as_str();

        if !self.type_matches(value, rule.kind) {
            errors.push(FieldError::new(
                field,
                format!("expected {}", rule.kind.name()),
            ));
            return errors;
        }

        if let Some(s) = value.as_str() {
            if let Some(min) = rule.min_len {
                if s.chars().count() < min {
                    errors.push(FieldError::new(field, format!("shorter than {min} characters")));
                }
            }
            if let Some(max) = rule.max_len {
                if s.chars().count() > max {
                    errors.push(FieldError::new(field, format!("longer than {max} characters")));
                }
            }
            if let Some(pattern) = &rule.pattern {
                if !pattern.is_match(s) {
                    errors.push(FieldError::new(field, "does not match expected format"));
                }
            }
            if let Some(one_of) = &rule.one_of {
                if !one_of.iter().any(|v| v == s) {
                    errors.push(FieldError::new(field, "is not an accepted value"));
                }
            }
        }

        if let Some(n) = numeric_value(value) {
            if let Some(min) = rule.min {
                if n < min {
                    errors.push(FieldError::new(field, format!("below minimum {min}")));
                }
            }
            if let Some(max) = rule.max {
                if n > max {
                    errors.push(FieldError::new(field, format!("above maximum {max}")));
                }
            }
        }

        if let Some(custom) = &rule.custom {
            if let Err(message) = custom(value) {
                errors.push(FieldError::new(field, message));
            }
        }

        errors
    }

    fn type_matches(&self, value: &Value, kind: FieldKind) -> bool {
        match kind {
            FieldKind::String => value.is_string(),
            FieldKind::Number => numeric_value(value).is_some(),
            FieldKind::Email => value
                .as_str()
                .map(|s| self.email.is_match(s.trim()))
                .unwrap_or(false),
            FieldKind::Url => value
                .as_str()
                .and_then(|s| url::Url::parse(s.trim()).ok())
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false),
            FieldKind::Boolean => match value {
                Value::Bool(_) => true,
                Value::String(s) => matches!(s.as_str(), "true" | "false"),
                _ => false,
            },
            FieldKind::Date => value
                .as_str()
                .map(|s| {
                    chrono::DateTime::parse_from_rfc3339(s).is_ok()
                        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                })
                .unwrap_or(false),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }

    /// Recursively screen string values for injection patterns.
    fn screen_strings(&self, path: &str, value: &Value, errors: &mut Vec<FieldError>) {
        match value {
            Value::String(s) => {
                let field = if path.is_empty() { "value" } else { path };
                let xss_hits = matches(&self.xss, s);
                if !xss_hits.is_empty() {
                    self.xss_detected.fetch_add(1, Ordering::Relaxed);
                    errors.push(FieldError::new(
                        field,
                        format!("potential XSS content ({})", xss_hits.join(", ")),
                    ));
                }
                let sql_hits = matches(&self.sql, s);
                if !sql_hits.is_empty() {
                    self.sql_injections_detected.fetch_add(1, Ordering::Relaxed);
                    errors.push(FieldError::new(
                        field,
                        format!("potential SQL injection ({})", sql_hits.join(", ")),
                    ));
                }
            }
            Value::Object(map) => {
                for (key, nested) in map {
                    let nested_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    self.screen_strings(&nested_path, nested, errors);
                }
            }
            Value::Array(items) => {
                for (i, nested) in items.iter().enumerate() {
                    self.screen_strings(&format!("{path}[{i}]"), nested, errors);
                }
            }
            _ => {}
        }
    }

    /// Sanitize a data map. Fields whose rule sets `sanitize = false` pass
    /// through untouched; fields without a rule get the default treatment.
    pub fn sanitize(&self, data: Map<String, Value>, rules: &[ValidationRule]) -> Map<String, Value> {
        let by_field: HashMap<&str, &ValidationRule> =
            rules.iter().map(|r| (r.field.as_str(), r)).collect();

        data.into_iter()
            .map(|(key, value)| {
                let rule = by_field.get(key.as_str()).copied();
                let sanitized = match rule {
                    Some(r) if !r.sanitize => value,
                    _ => self.sanitize_value(value, rule),
                };
                (key, sanitized)
            })
            .collect()
    }

    fn sanitize_value(&self, value: Value, rule: Option<&ValidationRule>) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_string(&s, rule)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.sanitize_value(v, rule))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.sanitize_value(v, None)))
                    .collect(),
            ),
            other => other,
        }
    }

    fn sanitize_string(&self, raw: &str, rule: Option<&ValidationRule>) -> String {
        self.sanitized_fields.fetch_add(1, Ordering::Relaxed);
        let trimmed = raw.trim();

        match rule.map(|r| r.kind) {
            Some(FieldKind::Email) => return trimmed.to_lowercase(),
            Some(FieldKind::Url) => return sanitize_url(trimmed),
            _ => {}
        }

        let html_done = if rule.map(|r| r.allow_html).unwrap_or(false) {
            filter_html(trimmed)
        } else {
            escape_html(trimmed)
        };
        escape_sql(&html_done)
    }

    pub fn metrics(&self) -> ValidationMetrics {
        ValidationMetrics {
            validated_requests: self.validated_requests.load(Ordering::Relaxed),
            failed_validations: self.failed_validations.load(Ordering::Relaxed),
            xss_detected: self.xss_detected.load(Ordering::Relaxed),
            sql_injections_detected: self.sql_injections_detected.load(Ordering::Relaxed),
            sanitized_fields: self.sanitized_fields.load(Ordering::Relaxed),
        }
    }

    /// Fields ranked by failure count, most error-prone first.
    pub fn field_stats(&self) -> Vec<(String, FieldStats)> {
        let mut stats: Vec<(String, FieldStats)> = self
            .field_stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        stats.sort_by(|a, b| b.1.failures.cmp(&a.1.failures));
        stats
    }

    pub fn health(&self) -> ComponentHealth {
        let validated = self.validated_requests.load(Ordering::Relaxed);
        let failed = self.failed_validations.load(Ordering::Relaxed);
        if validated >= 20 && failed * 2 > validated {
            ComponentHealth::Warning
        } else {
            ComponentHealth::Healthy
        }
    }

    pub fn reset_metrics(&self) {
        self.validated_requests.store(0, Ordering::Relaxed);
        self.failed_validations.store(0, Ordering::Relaxed);
        self.xss_detected.store(0, Ordering::Relaxed);
        self.sql_injections_detected.store(0, Ordering::Relaxed);
        self.sanitized_fields.store(0, Ordering::Relaxed);
        self.field_stats.clear();
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Keep only http/https URLs; everything else sanitizes to empty.
fn sanitize_url(s: &str) -> String {
    match url::Url::parse(s) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => s.to_string(),
        _ => String::new(),
    }
}

const ENTITIES: &[&str] = &["amp;", "lt;", "gt;", "quot;", "#x27;"];

/// HTML-entity escape. Already-escaped entities are left alone so the
/// transform is idempotent.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.char_indices() {
        match c {
            '&' => {
                let rest = &s[i + 1..];
                if ENTITIES.iter().any(|e| rest.starts_with(e)) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Double unpaired single quotes. Quotes that are already doubled are kept
/// as-is, so sanitizing twice changes nothing.
fn escape_sql(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
            }
            out.push_str("''");
        } else {
            out.push(c);
        }
    }
    out
}

/// Strip all markup except the tag allow-list. Attributes are dropped,
/// except `href` on anchors when it is an http/https URL.
fn filter_html(s: &str) -> String {
    let tag_re = regex::Regex::new(r"(?s)<[^>]*>").expect("invalid tag pattern");
    let name_re = regex::Regex::new(r"^<\s*(/?)\s*([a-zA-Z0-9]+)").expect("invalid name pattern");
    let href_re = regex::Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("invalid href pattern");

    tag_re
        .replace_all(s, |caps: &regex::Captures| {
            let tag = &caps[0];
            let Some(name_caps) = name_re.captures(tag) else {
                return String::new();
            };
            let closing = !name_caps[1].is_empty();
            let name = name_caps[2].to_lowercase();
            if !ALLOWED_TAGS.contains(&name.as_str()) {
                return String::new();
            }
            if closing {
                return format!("</{name}>");
            }
            if name == "a" {
                if let Some(href) = href_re.captures(tag) {
                    let target = sanitize_url(&href[1]);
                    if !target.is_empty() {
                        return format!(r#"<a href="{target}">"#);
                    }
                }
                return "<a>".to_string();
            }
            format!("<{name}>")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> ValidationEngine {
        ValidationEngine::new()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn required_and_type_checks() {
        let rules = vec![
            ValidationRule::new("name", FieldKind::String).required().length(2, 10),
            ValidationRule::new("age", FieldKind::Number).range(0.0, 130.0),
        ];
        let errors = engine().validate(&object(json!({"age": 200})), &rules);
        assert!(errors.iter().any(|e| e.field == "name"));
        assert!(errors.iter().any(|e| e.field == "age"));

        let ok = engine().validate(&object(json!({"name": "Ada", "age": 36})), &rules);
        assert!(ok.is_empty());
    }

    #[test]
    fn email_url_boolean_date_coercions() {
        let e = engine();
        let cases = [
            (ValidationRule::new("a", FieldKind::Email), json!("User@Example.com"), true),
            (ValidationRule::new("a", FieldKind::Email), json!("not-an-email"), false),
            (ValidationRule::new("a", FieldKind::Url), json!("https://example.com/x"), true),
            (ValidationRule::new("a", FieldKind::Url), json!("ftp://example.com"), false),
            (ValidationRule::new("a", FieldKind::Boolean), json!("true"), true),
            (ValidationRule::new("a", FieldKind::Boolean), json!("yes"), false),
            (ValidationRule::new("a", FieldKind::Date), json!("2024-05-01"), true),
            (ValidationRule::new("a", FieldKind::Date), json!("05/01/2024"), false),
        ];
        for (rule, value, expect_ok) in cases {
            let errors = e.validate_single(&value, &rule);
            assert_eq!(errors.is_empty(), expect_ok, "value {value:?}");
        }
    }

    #[test]
    fn injection_screening_runs_without_rules() {
        let e = engine();
        let errors = e.validate(&object(json!({"comment": "admin' OR '1'='1'"})), &[]);
        assert!(!errors.is_empty());
        assert_eq!(e.metrics().sql_injections_detected, 1);

        let errors = e.validate(&object(json!({"bio": "<script>alert(1)</script>"})), &[]);
        assert!(!errors.is_empty());
        assert_eq!(e.metrics().xss_detected, 1);
    }

    #[test]
    fn nested_strings_are_screened() {
        let e = engine();
        let data = object(json!({"profile": {"links": ["javascript:alert(1)"]}}));
        let errors = e.validate(&data, &[]);
        assert!(errors.iter().any(|err| err.field.contains("links")));
    }

    #[test]
    fn custom_predicate_message_is_reported() {
        let rule = ValidationRule::new("mood", FieldKind::String).custom(std::sync::Arc::new(
            |v: &Value| {
                if v.as_str() == Some("rage") {
                    Err("mood not supported".to_string())
                } else {
                    Ok(())
                }
            },
        ));
        let errors = engine().validate_single(&json!("rage"), &rule);
        assert_eq!(errors[0].message, "mood not supported");
    }

    #[test]
    fn sanitize_escapes_sql_quotes() {
        let e = engine();
        let out = e.sanitize(object(json!({"user": "admin' OR '1'='1'"})), &[]);
        let user = out["user"].as_str().unwrap();
        // No single quote may remain unpaired.
        let mut chars = user.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                assert_eq!(chars.next(), Some('\''), "unescaped quote in {user}");
            }
        }
    }

    #[test]
    fn sanitize_escapes_html_by_default() {
        let e = engine();
        let out = e.sanitize(object(json!({"bio": "<script>alert(1)</script>"})), &[]);
        let bio = out["bio"].as_str().unwrap();
        assert!(!bio.contains('<'));
        assert!(bio.contains("&lt;script&gt;"));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let e = engine();
        let once = e.sanitize(object(json!({"bio": "a < b & \"c\""})), &[]);
        let twice = e.sanitize(once.clone(), &[]);
        assert_eq!(once, twice);
    }

    #[test]
    fn allow_html_keeps_safe_tags_only() {
        let rule = ValidationRule::new("post", FieldKind::String).allow_html();
        let e = engine();
        let out = e.sanitize(
            object(json!({"post": "<b>hi</b><script>alert(1)</script><a href=\"https://x.dev\">x</a>"})),
            &[rule],
        );
        let post = out["post"].as_str().unwrap();
        assert!(post.contains("<b>hi</b>"));
        assert!(!post.contains("script"));
        assert!(post.contains(r#"<a href="https://x.dev">"#));
    }

    #[test]
    fn url_fields_reduce_to_http_schemes() {
        let rule = ValidationRule::new("site", FieldKind::Url);
        let e = engine();
        let out = e.sanitize(object(json!({"site": "javascript:alert(1)"})), std::slice::from_ref(&rule));
        assert_eq!(out["site"], json!(""));
        let out = e.sanitize(object(json!({"site": "https://ok.example"})), &[rule]);
        assert_eq!(out["site"], json!("https://ok.example"));
    }

    #[test]
    fn exempt_fields_pass_through() {
        let rule = ValidationRule::new("raw", FieldKind::String).no_sanitize();
        let e = engine();
        let out = e.sanitize(object(json!({"raw": "  <keep me>  "})), &[rule]);
        assert_eq!(out["raw"], json!("  <keep me>  "));
    }

    #[test]
    fn field_stats_rank_failures() {
        let e = engine();
        let rules = vec![ValidationRule::new("email", FieldKind::Email).required()];
        e.validate(&object(json!({"email": "bad"})), &rules);
        e.validate(&object(json!({"email": "also-bad"})), &rules);
        e.validate(&object(json!({"email": "fine@example.com"})), &rules);
        let stats = e.field_stats();
        assert_eq!(stats[0].0, "email");
        assert_eq!(stats[0].1.total, 3);
        assert_eq!(stats[0].1.failures, 2);
    }
}
