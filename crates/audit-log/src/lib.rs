//! Append-only JSONL audit log with a SHA-256 hash chain.
//!
//! Each line is `{entry_hash, prev_hash, ...entry fields}` where
//! `entry_hash = SHA-256(prev_hash_hex_or_empty || canonical_json(entry))`.
//! Canonical JSON is the serde serialisation of [`AuditEntry`] (fixed field
//! order), so verification can rebuild each hash from the stored fields and
//! report tampering at the first mismatch.
//!
//! Concurrency: the logger serialises writers with a mutex held only during
//! the compute-hash -> append-line -> update-prev-hash critical section. No
//! solver or LLM work ever happens under that lock.

#![deny(unsafe_code)]

use mandate_core::digest::sha256_chain;
use mandate_core::report::{ComplianceAction, PostGenReport};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors emitted by the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
    /// Chain verification failed at the given zero-based line.
    #[error("hash chain broken at line {line}: {reason}")]
    Tampered { line: usize, reason: String },
    #[error("lock poisoned")]
    Poisoned,
}

/// One audit record, hashed and chained on write. Never modified after
/// append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: String,
    pub timestamp: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default)]
    pub retrieved_policy_ids: Vec<String>,
    #[serde(default)]
    pub scaffold_hash: String,
    #[serde(default)]
    pub llm_response_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgen_report: Option<PostGenReport>,
    #[serde(default)]
    pub compliance_score: f64,
    pub final_action: ComplianceAction,
    #[serde(default)]
    pub owners_notified: Vec<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Serialize)]
struct ChainedRecord<'a> {
    entry_hash: &'a str,
    prev_hash: Option<&'a str>,
    #[serde(flatten)]
    entry: &'a AuditEntry,
}

#[derive(Deserialize)]
struct StoredRecord {
    entry_hash: String,
    prev_hash: Option<String>,
    #[serde(flatten)]
    entry: AuditEntry,
}

/// Hash-chained JSONL audit logger. Cheap to share behind a reference;
/// thread-safe.
#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    prev_hash: Mutex<Option<String>>,
}

impl AuditLogger {
    /// Open (or create) the log at `path`. An existing log is scanned for
    /// its last entry hash so the chain continues across restarts.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let prev_hash = if path.exists() {
            last_entry_hash(&path)?
        } else {
            OpenOptions::new().create(true).append(true).open(&path)?;
            None
        };
        Ok(Self { path, prev_hash: Mutex::new(prev_hash) })
    }

    /// Append one entry; returns its hash. The critical section covers only
    /// hashing and the file append.
    pub fn log(&self, entry: &AuditEntry) -> Result<String, AuditError> {
        let canonical = serde_json::to_string(entry)?;
        let mut guard = self.prev_hash.lock().map_err(|_| AuditError::Poisoned)?;
        let entry_hash = sha256_chain(guard.as_deref(), canonical.as_bytes());
        let record = ChainedRecord {
            entry_hash: &entry_hash,
            prev_hash: guard.as_deref(),
            entry,
        };
        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        *guard = Some(entry_hash.clone());
        Ok(entry_hash)
    }

    /// Path the logger writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk the whole file, rebuild each hash, and report the first
    /// mismatch. Returns the number of verified entries.
    pub fn verify_integrity(&self) -> Result<usize, AuditError> {
        verify_file(&self.path)
    }
}

fn last_entry_hash(path: &Path) -> Result<Option<String>, AuditError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut last = None;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: StoredRecord = serde_json::from_str(&line)?;
        last = Some(record.entry_hash);
    }
    Ok(last)
}

/// Verify the hash chain of an audit file. Returns the entry count, or
/// [`AuditError::Tampered`] at the first broken link.
pub fn verify_file<P: AsRef<Path>>(path: P) -> Result<usize, AuditError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut prev: Option<String> = None;
    let mut count = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: StoredRecord = serde_json::from_str(&line).map_err(|e| {
            AuditError::Tampered { line: line_no, reason: format!("unparseable: {}", e) }
        })?;
        if record.prev_hash != prev {
            return Err(AuditError::Tampered {
                line: line_no,
                reason: "prev_hash does not match preceding entry".to_string(),
            });
        }
        let canonical = serde_json::to_string(&record.entry)?;
        let computed = sha256_chain(prev.as_deref(), canonical.as_bytes());
        if computed != record.entry_hash {
            return Err(AuditError::Tampered {
                line: line_no,
                reason: "entry_hash mismatch".to_string(),
            });
        }
        prev = Some(record.entry_hash);
        count += 1;
    }
    Ok(count)
}
