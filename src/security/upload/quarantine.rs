//! Quarantine persistence.
//!
//! # Responsibilities
//! - Persist unsafe uploads with a metadata sidecar for forensics
//! - List, release, and delete quarantined entries
//!
//! # Design Decisions
//! - Entries are never deleted automatically; only explicit release or
//!   delete retires them
//! - Sidecar shares the blob's base name with a `.json` suffix, so the
//!   pair stays associated under plain file tooling

use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ScanResult;

/// Sidecar metadata persisted next to the quarantined bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub id: String,
    pub original_name: String,
    pub quarantined_at: DateTime<Utc>,
    pub scan: ScanResult,
}

/// Filesystem-backed quarantine area.
pub struct QuarantineStore {
    dir: PathBuf,
}

impl QuarantineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn sidecar_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persist `bytes` and its scan result. Returns the stored entry.
    pub async fn store(&self, bytes: &[u8], scan: &ScanResult) -> std::io::Result<QuarantineEntry> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let entry = QuarantineEntry {
            id: Uuid::new_v4().to_string(),
            original_name: scan.file_name.clone(),
            quarantined_at: Utc::now(),
            scan: scan.clone(),
        };

        tokio::fs::write(self.blob_path(&entry.id), bytes).await?;
        let sidecar = serde_json::to_vec_pretty(&entry).map_err(std::io::Error::other)?;
        tokio::fs::write(self.sidecar_path(&entry.id), sidecar).await?;

        tracing::warn!(
            id = %entry.id,
            file = %entry.original_name,
            threats = entry.scan.threats.len(),
            "File quarantined"
        );
        Ok(entry)
    }

    /// All quarantined entries, read from sidecars, newest first.
    pub async fn list(&self) -> std::io::Result<Vec<QuarantineEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<QuarantineEntry>(&raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable quarantine sidecar")
                }
            }
        }
        entries.sort_by(|a, b| b.quarantined_at.cmp(&a.quarantined_at));
        Ok(entries)
    }

    pub async fn get(&self, id: &str) -> std::io::Result<Option<QuarantineEntry>> {
        match tokio::fs::read(self.sidecar_path(id)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Move a quarantined blob into `dest_dir` under its original name and
    /// drop the sidecar. Administrator-only path.
    pub async fn release(&self, id: &str, dest_dir: &Path) -> std::io::Result<Option<PathBuf>> {
        let Some(entry) = self.get(id).await? else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(dest_dir).await?;

        // Keep the generated id in the name so a hostile original name
        // cannot collide with existing files.
        let file_name = format!("{}-{}", entry.id, sanitize_file_name(&entry.original_name));
        let dest = dest_dir.join(file_name);
        tokio::fs::rename(self.blob_path(id), &dest).await?;
        tokio::fs::remove_file(self.sidecar_path(id)).await?;

        tracing::info!(id = %id, dest = %dest.display(), "Quarantined file released");
        Ok(Some(dest))
    }

    /// Delete blob and sidecar. Returns false when the entry is unknown.
    pub async fn delete(&self, id: &str) -> std::io::Result<bool> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }
        tokio::fs::remove_file(self.blob_path(id)).await?;
        tokio::fs::remove_file(self.sidecar_path(id)).await?;
        tracing::info!(id = %id, "Quarantined file deleted");
        Ok(true)
    }
}

/// Strip path separators and control characters from a client-supplied name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::upload::ScanDetails;

    fn scan_result(name: &str) -> ScanResult {
        ScanResult {
            file_name: name.to_string(),
            size: 4,
            mime: "text/plain".to_string(),
            sha256: "0".repeat(64),
            safe: false,
            threats: vec!["matched signature: eicar_test".to_string()],
            details: ScanDetails::default(),
        }
    }

    #[tokio::test]
    async fn store_creates_blob_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = QuarantineStore::new(dir.path());
        let entry = store.store(b"evil", &scan_result("evil.txt")).await.unwrap();

        assert!(dir.path().join(&entry.id).exists());
        assert!(dir.path().join(format!("{}.json", entry.id)).exists());

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original_name, "evil.txt");
        assert!(!listed[0].scan.safe);
    }

    #[tokio::test]
    async fn release_moves_blob_out() {
        let dir = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let store = QuarantineStore::new(dir.path());
        let entry = store.store(b"evil", &scan_result("../../etc/passwd")).await.unwrap();

        let released = store.release(&entry.id, dest.path()).await.unwrap().unwrap();
        assert!(released.exists());
        assert!(!released.to_string_lossy().contains(".."));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = QuarantineStore::new(dir.path());
        let entry = store.store(b"evil", &scan_result("evil.bin")).await.unwrap();

        assert!(store.delete(&entry.id).await.unwrap());
        assert!(!store.delete(&entry.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn file_names_are_neutralized() {
        assert_eq!(sanitize_file_name("../../x.sh"), ".._.._x.sh");
        assert_eq!(sanitize_file_name(""), "unnamed");
    }
}
