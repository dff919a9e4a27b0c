//! Injection pattern catalogs.
//!
//! # Responsibilities
//! - Compiled XSS and SQL-injection pattern categories
//! - Screening of string values independent of field rules
//!
//! # Design Decisions
//! - Patterns compiled once per engine instance, shared read-only
//! - Each hit reports its category name, not the regex text
//! - Heuristics favor recall; matches are flagged, never auto-rewritten here

use regex::Regex;

/// A named detection category.
pub struct Pattern {
    pub name: &'static str,
    pub regex: Regex,
}

fn pattern(name: &'static str, source: &str) -> Pattern {
    Pattern {
        name,
        // Sources are literals reviewed below; a failure here is a programming error.
        regex: Regex::new(source).expect("invalid built-in pattern"),
    }
}

/// Cross-site scripting pattern categories.
pub fn xss_patterns() -> Vec<Pattern> {
    vec![
        pattern("script_tag", r"(?is)<\s*script[^>]*>|<\s*/\s*script\s*>"),
        pattern("iframe_tag", r"(?is)<\s*iframe[^>]*>"),
        pattern("script_uri", r"(?i)(javascript|vbscript)\s*:"),
        pattern("event_handler", r"(?i)\bon[a-z]+\s*="),
        pattern("style_expression", r"(?i)expression\s*\("),
    ]
}

/// SQL injection pattern categories.
pub fn sql_patterns() -> Vec<Pattern> {
    vec![
        pattern(
            "sql_keyword",
            r"(?i)\b(select|insert|update|delete|drop|truncate|alter|create|exec|execute|union)\b",
        ),
        pattern(
            "tautology",
            r#"(?i)\b(or|and)\b\s*['"]?[\w]+['"]?\s*=\s*['"]?[\w]+"#,
        ),
        pattern("comment_truncation", r"(--|#|/\*)"),
        pattern(
            "stacked_statement",
            r"(?i);\s*(select|insert|update|delete|drop|alter|create)\b",
        ),
    ]
}

/// Names of categories matching `value`, in catalog order.
pub fn matches<'a>(patterns: &'a [Pattern], value: &str) -> Vec<&'a str> {
    patterns
        .iter()
        .filter(|p| p.regex.is_match(value))
        .map(|p| p.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_sql_tautology_is_caught() {
        let patterns = sql_patterns();
        let hits = matches(&patterns, "admin' OR '1'='1'");
        assert!(hits.contains(&"tautology"));
    }

    #[test]
    fn script_tag_is_caught() {
        let patterns = xss_patterns();
        let hits = matches(&patterns, "<script>alert(1)</script>");
        assert!(hits.contains(&"script_tag"));
    }

    #[test]
    fn event_handler_attribute_is_caught() {
        let patterns = xss_patterns();
        assert!(!matches(&patterns, r#"<img src=x onerror=alert(1)>"#).is_empty());
    }

    #[test]
    fn plain_text_passes_both_catalogs() {
        assert!(matches(&xss_patterns(), "a quiet afternoon walk").is_empty());
        assert!(matches(&sql_patterns(), "a quiet afternoon walk").is_empty());
    }
}
