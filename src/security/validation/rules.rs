//! Field rule definitions.
//!
//! # Responsibilities
//! - Declarative per-field constraints (type, length, range, pattern, enum)
//! - Conversion from the config schema into compiled rules
//! - The field error shape returned to callers

use std::sync::Arc;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::schema::FieldRuleConfig;

/// Expected type of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Email,
    Url,
    Boolean,
    Date,
    Array,
    Object,
}

impl FieldKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "email" => Some(Self::Email),
            "url" => Some(Self::Url),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Email => "email",
            Self::Url => "url",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Custom predicate: `Ok(())` passes, `Err(message)` is reported verbatim.
pub type CustomCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A compiled validation rule for one field.
#[derive(Clone)]
pub struct ValidationRule {
    pub field: String,
    pub kind: FieldKind,
    pub required: bool,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<Regex>,
    pub one_of: Option<Vec<String>>,
    pub custom: Option<CustomCheck>,
    pub sanitize: bool,
    pub allow_html: bool,
}

impl std::fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRule")
            .field("field", &self.field)
            .field("kind", &self.kind.name())
            .field("required", &self.required)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl ValidationRule {
    /// A plain optional string rule with sanitization on.
    pub fn new(field: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            field: field.into(),
            kind,
            required: false,
            min_len: None,
            max_len: None,
            min: None,
            max: None,
            pattern: None,
            one_of: None,
            custom: None,
            sanitize: true,
            allow_html: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_len = Some(min);
        self.max_len = Some(max);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, regex: Regex) -> Self {
        self.pattern = Some(regex);
        self
    }

    pub fn one_of(mut self, values: Vec<String>) -> Self {
        self.one_of = Some(values);
        self
    }

    pub fn custom(mut self, check: CustomCheck) -> Self {
        self.custom = Some(check);
        self
    }

    pub fn allow_html(mut self) -> Self {
        self.allow_html = true;
        self
    }

    pub fn no_sanitize(mut self) -> Self {
        self.sanitize = false;
        self
    }

    /// Compile a config rule. Returns None for unknown kinds or bad patterns;
    /// config validation reports those before this point.
    pub fn from_config(config: &FieldRuleConfig) -> Option<Self> {
        let kind = FieldKind::parse(&config.kind)?;
        let pattern = match &config.pattern {
            Some(p) => Some(Regex::new(p).ok()?),
            None => None,
        };
        Some(Self {
            field: config.field.clone(),
            kind,
            required: config.required,
            min_len: config.min_len,
            max_len: config.max_len,
            min: config.min,
            max: config.max,
            pattern,
            one_of: config.one_of.clone(),
            custom: None,
            sanitize: config.sanitize,
            allow_html: config.allow_html,
        })
    }
}

/// A single validation failure reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
