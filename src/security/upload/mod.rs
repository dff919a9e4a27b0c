//! Upload threat scanning.
//!
//! # Data Flow
//! ```text
//! Uploaded buffer (bytes, declared name, declared MIME)
//!     → size / MIME / extension checks
//!     → signature dictionary over hex encoding (signatures.rs)
//!     → content heuristics over lossy UTF-8 decoding
//!     → type-specific checks (images, PDF/documents)
//!     → ScanResult { safe, threats, details }
//!     → safe: save()   unsafe: quarantine()
//! ```
//!
//! # Design Decisions
//! - Every check runs to completion so the threat list is exhaustive
//! - Scanner faults fail closed: the caller treats them as unsafe
//! - Scan is synchronous to the response; persistence is async I/O

pub mod quarantine;
pub mod signatures;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::schema::UploadConfig;
use crate::security::health::ComponentHealth;
use self::quarantine::{sanitize_file_name, QuarantineEntry, QuarantineStore};
use self::signatures::{content_heuristics, executable_magic, Heuristic, SignatureSet};

/// Smallest buffer a real raster image plausibly occupies.
const MIN_PLAUSIBLE_IMAGE_BYTES: usize = 100;

/// Per-check outcomes recorded alongside the threat list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanDetails {
    pub signature_matches: Vec<String>,
    pub pattern_matches: Vec<String>,
    pub size_ok: bool,
    pub mime_allowed: bool,
    pub extension_allowed: bool,
}

/// Immutable outcome of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub file_name: String,
    pub size: usize,
    pub mime: String,
    pub sha256: String,
    pub safe: bool,
    pub threats: Vec<String>,
    pub details: ScanDetails,
}

/// Counters exposed to the orchestrator.
#[derive(Debug, Serialize)]
pub struct UploadMetrics {
    pub scanned_files: u64,
    pub threats_found: u64,
    pub quarantined_files: u64,
    pub saved_files: u64,
    pub avg_scan_ms: f64,
}

/// Scans uploaded buffers and manages the quarantine area.
pub struct UploadScanner {
    config: ArcSwap<UploadConfig>,
    signatures: SignatureSet,
    heuristics: Vec<Heuristic>,
    quarantine: QuarantineStore,
    scanned_files: AtomicU64,
    threats_found: AtomicU64,
    quarantined_files: AtomicU64,
    saved_files: AtomicU64,
    /// (running average ms, sample count)
    scan_time: Mutex<(f64, u64)>,
    io_degraded: AtomicBool,
}

impl UploadScanner {
    pub fn new(config: UploadConfig) -> Self {
        let quarantine = QuarantineStore::new(&config.quarantine_dir);
        Self {
            config: ArcSwap::from_pointee(config),
            signatures: SignatureSet::new(),
            heuristics: content_heuristics(),
            quarantine,
            scanned_files: AtomicU64::new(0),
            threats_found: AtomicU64::new(0),
            quarantined_files: AtomicU64::new(0),
            saved_files: AtomicU64::new(0),
            scan_time: Mutex::new((0.0, 0)),
            io_degraded: AtomicBool::new(false),
        }
    }

    /// Scan a buffer. Runs every check and returns the full threat list.
    pub fn scan(&self, bytes: &[u8], declared_name: &str, declared_mime: &str) -> ScanResult {
        let started = Instant::now();
        let config = self.config.load();
        let mut threats = Vec::new();
        let mut details = ScanDetails::default();

        // 1. Size.
        details.size_ok = bytes.len() <= config.max_file_size;
        if !details.size_ok {
            threats.push(format!(
                "file exceeds maximum size ({} > {} bytes)",
                bytes.len(),
                config.max_file_size
            ));
        }

        // 2. Declared MIME type.
        details.mime_allowed = config
            .allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(declared_mime));
        if !details.mime_allowed {
            threats.push(format!("MIME type '{declared_mime}' is not permitted"));
        }

        // 3. Declared extension.
        let extension = declared_name
            .rsplit('.')
            .next()
            .filter(|ext| *ext != declared_name)
            .map(str::to_lowercase);
        details.extension_allowed = match &extension {
            Some(ext) => config.allowed_extensions.iter().any(|e| e == ext),
            None => false,
        };
        if !details.extension_allowed {
            threats.push(format!(
                "file extension '{}' is not permitted",
                extension.as_deref().unwrap_or("")
            ));
        }

        // 4. Signature dictionary over the hex encoding.
        let hex_content = hex::encode(bytes);
        details.signature_matches = self.signatures.matches(&hex_content);
        for name in &details.signature_matches {
            threats.push(format!("matched signature: {name}"));
        }

        // 5. Content heuristics over the decoded text.
        let text = String::from_utf8_lossy(bytes);
        for heuristic in &self.heuristics {
            if heuristic.regex.is_match(&text) {
                details.pattern_matches.push(heuristic.name.to_string());
                threats.push(format!("suspicious content pattern: {}", heuristic.name));
            }
        }
        if let Some(magic) = executable_magic(bytes) {
            if !details.signature_matches.iter().any(|s| s == magic) {
                threats.push(format!("embedded executable header: {magic}"));
            }
        }

        // 6. Type-specific checks.
        if declared_mime.starts_with("image/") {
            check_image(bytes, &text, &mut threats);
        } else if is_document_mime(declared_mime) {
            check_document(&text, &mut threats);
        }

        let result = ScanResult {
            file_name: declared_name.to_string(),
            size: bytes.len(),
            mime: declared_mime.to_string(),
            sha256: hex::encode(Sha256::digest(bytes)),
            safe: threats.is_empty(),
            threats,
            details,
        };

        self.scanned_files.fetch_add(1, Ordering::Relaxed);
        if !result.safe {
            self.threats_found.fetch_add(1, Ordering::Relaxed);
            crate::observability::metrics::record_upload_threat();
        }
        self.record_scan_time(started.elapsed().as_secs_f64() * 1000.0);

        tracing::debug!(
            file = %result.file_name,
            size = result.size,
            safe = result.safe,
            threats = result.threats.len(),
            "Upload scanned"
        );
        result
    }

    /// The generic verdict used when the scan machinery itself failed.
    /// Uploads fail closed, never open, on scanner malfunction.
    pub fn scan_error_result(declared_name: &str, declared_mime: &str, size: usize) -> ScanResult {
        ScanResult {
            file_name: declared_name.to_string(),
            size,
            mime: declared_mime.to_string(),
            sha256: String::new(),
            safe: false,
            threats: vec!["scan error".to_string()],
            details: ScanDetails::default(),
        }
    }

    fn record_scan_time(&self, elapsed_ms: f64) {
        let mut scan_time = self.scan_time.lock().expect("scan time mutex poisoned");
        let (avg, n) = *scan_time;
        let n = n + 1;
        *scan_time = ((avg * (n - 1) as f64 + elapsed_ms) / n as f64, n);
    }

    /// Persist an unsafe upload into the quarantine area.
    pub async fn quarantine(
        &self,
        bytes: &[u8],
        scan: &ScanResult,
    ) -> std::io::Result<QuarantineEntry> {
        match self.quarantine.store(bytes, scan).await {
            Ok(entry) => {
                self.io_degraded.store(false, Ordering::Relaxed);
                self.quarantined_files.fetch_add(1, Ordering::Relaxed);
                Ok(entry)
            }
            Err(e) => {
                self.io_degraded.store(true, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Persist a safe upload under a collision-resistant generated name.
    /// Returns the stored path. Only called for `safe` results.
    pub async fn save(&self, bytes: &[u8], scan: &ScanResult) -> std::io::Result<PathBuf> {
        let config = self.config.load();
        let dir = PathBuf::from(&config.upload_dir);
        tokio::fs::create_dir_all(&dir).await?;

        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(&scan.file_name));
        let path = dir.join(&stored_name);
        let result = async {
            tokio::fs::write(&path, bytes).await?;
            let sidecar = serde_json::to_vec_pretty(scan).map_err(std::io::Error::other)?;
            tokio::fs::write(dir.join(format!("{stored_name}.json")), sidecar).await
        }
        .await;

        match result {
            Ok(()) => {
                self.io_degraded.store(false, Ordering::Relaxed);
                self.saved_files.fetch_add(1, Ordering::Relaxed);
                Ok(path)
            }
            Err(e) => {
                self.io_degraded.store(true, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn quarantine_store(&self) -> &QuarantineStore {
        &self.quarantine
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.load().upload_dir)
    }

    pub fn apply_config(&self, config: &UploadConfig) {
        self.config.store(Arc::new(config.clone()));
    }

    pub fn metrics(&self) -> UploadMetrics {
        let (avg, _) = *self.scan_time.lock().expect("scan time mutex poisoned");
        UploadMetrics {
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            threats_found: self.threats_found.load(Ordering::Relaxed),
            quarantined_files: self.quarantined_files.load(Ordering::Relaxed),
            saved_files: self.saved_files.load(Ordering::Relaxed),
            avg_scan_ms: avg,
        }
    }

    pub fn health(&self) -> ComponentHealth {
        if self.io_degraded.load(Ordering::Relaxed) {
            // Blob storage failing means unsafe files cannot be preserved
            // for review and safe files cannot be persisted at all.
            ComponentHealth::Unhealthy
        } else {
            ComponentHealth::Healthy
        }
    }

    pub fn reset_metrics(&self) {
        self.scanned_files.store(0, Ordering::Relaxed);
        self.threats_found.store(0, Ordering::Relaxed);
        self.quarantined_files.store(0, Ordering::Relaxed);
        self.saved_files.store(0, Ordering::Relaxed);
        *self.scan_time.lock().expect("scan time mutex poisoned") = (0.0, 0);
    }
}

fn check_image(bytes: &[u8], text: &str, threats: &mut Vec<String>) {
    if bytes.len() < MIN_PLAUSIBLE_IMAGE_BYTES {
        threats.push("implausibly small image file".to_string());
    }
    let lowered = text.to_lowercase();
    if lowered.contains("<script") || lowered.contains("<?php") {
        threats.push("script content embedded in image".to_string());
    }
}

fn is_document_mime(mime: &str) -> bool {
    mime == "application/pdf"
        || mime.starts_with("application/msword")
        || mime.starts_with("application/vnd.openxmlformats-officedocument")
        || mime.starts_with("application/vnd.ms-")
}

fn check_document(text: &str, threats: &mut Vec<String>) {
    const DIRECTIVES: &[(&str, &str)] = &[
        ("/javascript", "embedded document scripting"),
        ("/js", "embedded document scripting"),
        ("/openaction", "automatic document action"),
        ("/aa", "automatic document action"),
        ("/launch", "document launch directive"),
        ("vbaproject", "document macro payload"),
        ("autoopen", "document macro payload"),
    ];
    let lowered = text.to_lowercase();
    let mut seen = Vec::new();
    for (marker, description) in DIRECTIVES {
        if lowered.contains(marker) && !seen.contains(description) {
            seen.push(description);
            threats.push(format!("{description} ({marker})"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> (UploadScanner, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = UploadConfig {
            upload_dir: dir.path().join("uploads").to_string_lossy().into_owned(),
            quarantine_dir: dir.path().join("quarantine").to_string_lossy().into_owned(),
            ..Default::default()
        };
        (UploadScanner::new(config), dir)
    }

    fn plain_text() -> Vec<u8> {
        b"Dear diary, today was a calm and pleasant day.".to_vec()
    }

    #[test]
    fn clean_text_file_is_safe() {
        let (s, _dir) = scanner();
        let result = s.scan(&plain_text(), "note.txt", "text/plain");
        assert!(result.safe, "threats: {:?}", result.threats);
        assert!(result.details.size_ok);
        assert!(result.details.mime_allowed);
        assert!(result.details.extension_allowed);
        assert_eq!(result.sha256.len(), 64);
    }

    #[test]
    fn pe_header_is_always_unsafe() {
        let (s, _dir) = scanner();
        let mut bytes = b"MZ".to_vec();
        bytes.extend_from_slice(&plain_text());
        let result = s.scan(&bytes, "note.txt", "text/plain");
        assert!(!result.safe);
        assert!(result
            .threats
            .iter()
            .any(|t| t.contains("dos_executable")));
    }

    #[test]
    fn oversized_buffer_is_unsafe_regardless_of_content() {
        let dir = tempfile::tempdir().unwrap();
        let config = UploadConfig {
            max_file_size: 16,
            upload_dir: dir.path().join("u").to_string_lossy().into_owned(),
            quarantine_dir: dir.path().join("q").to_string_lossy().into_owned(),
            ..Default::default()
        };
        let s = UploadScanner::new(config);
        let result = s.scan(&[b'a'; 32], "note.txt", "text/plain");
        assert!(!result.safe);
        assert!(!result.details.size_ok);
    }

    #[test]
    fn all_checks_run_to_completion() {
        let (s, _dir) = scanner();
        // Wrong MIME, wrong extension, a signature hit, and a heuristic hit
        // must all be present at once.
        let mut bytes = b"MZ".to_vec();
        bytes.extend_from_slice(b"<script>alert(1)</script>");
        let result = s.scan(&bytes, "payload.exe", "application/x-msdownload");
        assert!(!result.safe);
        assert!(result.threats.len() >= 4, "threats: {:?}", result.threats);
        assert!(!result.details.mime_allowed);
        assert!(!result.details.extension_allowed);
        assert!(!result.details.signature_matches.is_empty());
        assert!(!result.details.pattern_matches.is_empty());
    }

    #[test]
    fn eicar_marker_is_detected() {
        let (s, _dir) = scanner();
        let bytes = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";
        let result = s.scan(bytes, "eicar.txt", "text/plain");
        assert!(!result.safe);
        assert!(result.threats.iter().any(|t| t.contains("eicar_test")));
    }

    #[test]
    fn tiny_image_is_flagged() {
        let (s, _dir) = scanner();
        let result = s.scan(&[0xff, 0xd8, 0xff], "photo.jpg", "image/jpeg");
        assert!(result
            .threats
            .iter()
            .any(|t| t.contains("implausibly small")));
    }

    #[test]
    fn pdf_action_directives_are_flagged() {
        let (s, _dir) = scanner();
        let mut bytes = vec![0u8; 200];
        bytes.extend_from_slice(b"%PDF-1.7 /OpenAction << /JavaScript (app.alert(1)) >>");
        let result = s.scan(&bytes, "report.pdf", "application/pdf");
        assert!(!result.safe);
        assert!(result
            .threats
            .iter()
            .any(|t| t.contains("automatic document action")));
        assert!(result
            .threats
            .iter()
            .any(|t| t.contains("embedded document scripting")));
    }

    #[test]
    fn scan_time_average_updates() {
        let (s, _dir) = scanner();
        s.scan(&plain_text(), "a.txt", "text/plain");
        s.scan(&plain_text(), "b.txt", "text/plain");
        let metrics = s.metrics();
        assert_eq!(metrics.scanned_files, 2);
        assert!(metrics.avg_scan_ms >= 0.0);
    }

    #[tokio::test]
    async fn quarantine_persists_and_counts() {
        let (s, _dir) = scanner();
        let bytes = b"MZ fake executable";
        let result = s.scan(bytes, "bad.txt", "text/plain");
        assert!(!result.safe);

        let before = s.metrics().quarantined_files;
        let entry = s.quarantine(bytes, &result).await.unwrap();
        assert_eq!(s.metrics().quarantined_files, before + 1);

        let listed = s.quarantine_store().list().await.unwrap();
        assert!(listed.iter().any(|e| e.id == entry.id));
    }

    #[tokio::test]
    async fn save_writes_blob_and_sidecar() {
        let (s, _dir) = scanner();
        let bytes = plain_text();
        let result = s.scan(&bytes, "note.txt", "text/plain");
        assert!(result.safe);

        let path = s.save(&bytes, &result).await.unwrap();
        assert!(path.exists());
        let sidecar = path.with_file_name(format!(
            "{}.json",
            path.file_name().unwrap().to_string_lossy()
        ));
        assert!(sidecar.exists());
        assert_eq!(s.metrics().saved_files, 1);
    }
}
