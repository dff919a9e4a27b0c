//! Byte-signature and heuristic catalogs for upload scanning.
//!
//! # Responsibilities
//! - Named hex signatures matched against the buffer's hex encoding
//! - Heuristic text patterns for script, markup, and shell payloads
//! - Runtime add/remove of signatures (the pluggable matching seam)
//!
//! # Design Decisions
//! - The built-in dictionary is illustrative, not an antivirus database;
//!   deployments extend it through the admin surface
//! - Matching is substring search over lowercase hex, so signatures hit
//!   anywhere in the file, not only at offset zero

use dashmap::DashMap;
use regex::Regex;

/// Executable and test-file signatures shipped by default.
fn builtin_signatures() -> Vec<(&'static str, &'static str)> {
    vec![
        // MZ header (Windows PE).
        ("dos_executable", "4d5a"),
        // \x7fELF.
        ("elf_executable", "7f454c46"),
        // Mach-O 32/64-bit.
        ("macho_executable", "feedface"),
        ("macho_executable_64", "feedfacf"),
        // "#!/bin" shebang.
        ("shell_shebang", "23212f62696e"),
        // "<?php".
        ("php_tag", "3c3f706870"),
        // "EICAR-STANDARD-ANTIVIRUS" from the standard AV test file.
        (
            "eicar_test",
            "45494341522d5354414e444152442d414e54495649525553",
        ),
    ]
}

/// Mutable dictionary of named hex signatures.
pub struct SignatureSet {
    signatures: DashMap<String, String>,
}

impl SignatureSet {
    pub fn new() -> Self {
        let signatures = DashMap::new();
        for (name, hex) in builtin_signatures() {
            signatures.insert(name.to_string(), hex.to_string());
        }
        Self { signatures }
    }

    /// Register a signature. The hex string is lowercased; returns false
    /// when it is not valid hex.
    pub fn add(&self, name: &str, hex_signature: &str) -> bool {
        let normalized = hex_signature.to_lowercase();
        if normalized.is_empty() || hex::decode(&normalized).is_err() {
            return false;
        }
        self.signatures.insert(name.to_string(), normalized);
        true
    }

    pub fn remove(&self, name: &str) -> bool {
        self.signatures.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.signatures.iter().map(|e| e.key().clone()).collect()
    }

    /// Names of signatures found in `hex_content` (lowercase hex).
    pub fn matches(&self, hex_content: &str) -> Vec<String> {
        let mut hits: Vec<String> = self
            .signatures
            .iter()
            .filter(|entry| hex_content.contains(entry.value().as_str()))
            .map(|entry| entry.key().clone())
            .collect();
        hits.sort();
        hits
    }
}

impl Default for SignatureSet {
    fn default() -> Self {
        Self::new()
    }
}

/// A named heuristic over the decoded file content.
pub struct Heuristic {
    pub name: &'static str,
    pub regex: Regex,
}

fn heuristic(name: &'static str, source: &str) -> Heuristic {
    Heuristic {
        name,
        regex: Regex::new(source).expect("invalid built-in heuristic"),
    }
}

/// Script, markup, and shell patterns scanned in the lossy-UTF-8 decoding.
pub fn content_heuristics() -> Vec<Heuristic> {
    vec![
        heuristic("script_markup", r"(?i)<\s*script|<\s*iframe|javascript\s*:"),
        heuristic("event_handler", r"(?i)\bon[a-z]+\s*=\s*['\x22]"),
        heuristic(
            "shell_command",
            r#"(?i)\b(rm\s+-rf|chmod\s+\+x|wget\s+http|curl\s+[^|]*\|\s*(sh|bash)|nc\s+-e|/bin/(sh|bash)\b|powershell|cmd\.exe)"#,
        ),
        heuristic("sql_dump", r"(?i)\b(drop\s+table|union\s+select)\b"),
    ]
}

/// Magic-byte prefixes of embedded executables, checked on the raw buffer.
pub fn executable_magic(bytes: &[u8]) -> Option<&'static str> {
    const MAGICS: &[(&[u8], &'static str)] = &[
        (b"MZ", "dos_executable"),
        (&[0x7f, 0x45, 0x4c, 0x46], "elf_executable"),
        (&[0xfe, 0xed, 0xfa, 0xce], "macho_executable"),
        (&[0xfe, 0xed, 0xfa, 0xcf], "macho_executable_64"),
        (&[0xca, 0xfe, 0xba, 0xbe], "java_class"),
    ];
    MAGICS
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_pe_header_matches() {
        let set = SignatureSet::new();
        let hex_content = hex::encode(b"MZ\x90\x00rest of file");
        assert!(set.matches(&hex_content).contains(&"dos_executable".to_string()));
    }

    #[test]
    fn add_and_remove_signature() {
        let set = SignatureSet::new();
        assert!(set.add("custom_marker", "DEADBEEF"));
        assert!(set
            .matches(&hex::encode([0x00, 0xde, 0xad, 0xbe, 0xef]))
            .contains(&"custom_marker".to_string()));
        assert!(set.remove("custom_marker"));
        assert!(!set.remove("custom_marker"));
    }

    #[test]
    fn invalid_hex_is_rejected() {
        let set = SignatureSet::new();
        assert!(!set.add("bad", "zzzz"));
        assert!(!set.add("empty", ""));
    }

    #[test]
    fn shell_heuristics_hit_command_payloads() {
        let heuristics = content_heuristics();
        let text = "#!/bin/sh\nrm -rf / --no-preserve-root";
        assert!(heuristics.iter().any(|h| h.regex.is_match(text)));
    }

    #[test]
    fn executable_magic_checks_prefix_only() {
        assert_eq!(executable_magic(b"MZ\x90"), Some("dos_executable"));
        assert_eq!(executable_magic(b"plain text MZ"), None);
    }
}
