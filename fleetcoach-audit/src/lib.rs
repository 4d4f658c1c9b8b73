//! Append-only, hash-chained JSONL log of escalation decisions.
//!
//! Each record stores the SHA-256 of its predecessor, so edits or deletions
//! anywhere in the file break [`verify_log`]. Driver text is stored only as a
//! digest.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fleetcoach_types::{ActionCategory, SessionId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("chain broken at line {line}: {reason}")]
    Broken { line: usize, reason: &'static str },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// Raised by the safety net from risk flags.
    Forced,
    /// Proposed by the narrative service.
    Upstream,
}

impl EscalationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationKind::Forced => "forced",
            EscalationKind::Upstream => "upstream",
        }
    }
}

/// What the orchestrator hands over; the log assigns ids and hashes.
#[derive(Clone, Debug)]
pub struct Escalation<'a> {
    pub session_id: SessionId,
    pub kind: EscalationKind,
    pub category: ActionCategory,
    pub rationale: &'a str,
    pub flags: Vec<&'static str>,
    pub driver_text: &'a str,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub kind: EscalationKind,
    pub category: ActionCategory,
    pub rationale: String,
    #[serde(default)]
    pub flags: Vec<String>,
    pub driver_text_hash: String,
    pub prev_hash: Option<String>,
    pub chain_hash: String,
}

pub fn digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn hash_record(r: &AuditRecord) -> String {
    let mut h = Sha256::new();
    h.update(r.record_id.to_string());
    h.update(r.recorded_at.to_rfc3339());
    h.update(r.session_id.to_string());
    h.update(r.kind.as_str());
    h.update(r.category.as_str());
    h.update(&r.rationale);
    for flag in &r.flags {
        h.update(flag);
    }
    h.update(&r.driver_text_hash);
    if let Some(prev) = &r.prev_hash {
        h.update(prev);
    }
    format!("{:x}", h.finalize())
}

pub struct AuditLog {
    path: PathBuf,
    last_hash: Mutex<Option<String>>,
}

impl AuditLog {
    /// Opens (or prepares to create) the log and picks up the chain head.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let last_hash = read_records(&path)?.pop().map(|r| r.chain_hash);
        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &self,
        entry: Escalation<'_>,
        at: DateTime<Utc>,
    ) -> Result<AuditRecord, AuditError> {
        let mut last = self
            .last_hash
            .lock()
            .map_err(|_| AuditError::Io("audit lock poisoned".into()))?;
        let mut record = AuditRecord {
            record_id: Uuid::new_v4(),
            recorded_at: at,
            session_id: entry.session_id,
            kind: entry.kind,
            category: entry.category,
            rationale: entry.rationale.to_string(),
            flags: entry.flags.iter().map(|f| f.to_string()).collect(),
            driver_text_hash: digest(entry.driver_text),
            prev_hash: last.clone(),
            chain_hash: String::new(),
        };
        record.chain_hash = hash_record(&record);

        let line = serde_json::to_string(&record).map_err(|e| AuditError::Parse {
            line: 0,
            reason: e.to_string(),
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| AuditError::Io(e.to_string()))?;
        *last = Some(record.chain_hash.clone());
        Ok(record)
    }
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| AuditError::Io(e.to_string()))?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AuditError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| AuditError::Parse {
            line: i + 1,
            reason: e.to_string(),
        })?;
        out.push(record);
    }
    Ok(out)
}

/// Last `n` records, oldest first. A missing log is empty.
pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<AuditRecord>, AuditError> {
    let mut records = read_records(path.as_ref())?;
    let skip = records.len().saturating_sub(n);
    Ok(records.split_off(skip))
}

/// Re-derives every link of the chain; returns the number of records.
pub fn verify_log(path: impl AsRef<Path>) -> Result<usize, AuditError> {
    let records = read_records(path.as_ref())?;
    let mut prev: Option<&str> = None;
    for (i, record) in records.iter().enumerate() {
        if record.prev_hash.as_deref() != prev {
            return Err(AuditError::Broken {
                line: i + 1,
                reason: "previous hash mismatch",
            });
        }
        if record.chain_hash != hash_record(record) {
            return Err(AuditError::Broken {
                line: i + 1,
                reason: "record hash invalid",
            });
        }
        prev = Some(&record.chain_hash);
    }
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    fn forced(session_id: SessionId, text: &str) -> Escalation<'_> {
        Escalation {
            session_id,
            kind: EscalationKind::Forced,
            category: ActionCategory::SafetyConcern,
            rationale: "Escalated automatically. Risk flags triggered: impairment.",
            flags: vec!["impairment"],
            driver_text: text,
        }
    }

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, min, 0).unwrap()
    }

    #[test]
    fn chain_verifies_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let session = Uuid::new_v4();

        let log = AuditLog::open(&path).unwrap();
        let first = log.append(forced(session, "I had two beers"), at(0)).unwrap();
        assert_eq!(first.prev_hash, None);
        assert_eq!(first.driver_text_hash, digest("I had two beers"));

        let log = AuditLog::open(&path).unwrap();
        let second = log
            .append(
                Escalation {
                    kind: EscalationKind::Upstream,
                    category: ActionCategory::RouteChange,
                    flags: Vec::new(),
                    ..forced(session, "that merge is dangerous")
                },
                at(5),
            )
            .unwrap();
        assert_eq!(second.prev_hash.as_deref(), Some(first.chain_hash.as_str()));
        assert_eq!(verify_log(&path).unwrap(), 2);
    }

    #[test]
    fn driver_text_never_lands_in_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        AuditLog::open(&path)
            .unwrap()
            .append(forced(Uuid::new_v4(), "I had two beers"), at(0))
            .unwrap();
        assert!(!fs::read_to_string(&path).unwrap().contains("beers"));
    }

    #[test]
    fn tampering_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();
        for m in 0..3 {
            log.append(forced(Uuid::new_v4(), "text"), at(m)).unwrap();
        }
        let body = fs::read_to_string(&path).unwrap();
        fs::write(&path, body.replacen("impairment.", "nothing.", 1)).unwrap();
        match verify_log(&path) {
            Err(AuditError::Broken { line: 1, .. }) => {}
            other => panic!("expected broken chain, got {other:?}"),
        }
    }

    #[test]
    fn dropped_record_breaks_the_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();
        for m in 0..3 {
            log.append(forced(Uuid::new_v4(), "text"), at(m)).unwrap();
        }
        let body = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = body.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, kept.join("\n")).unwrap();
        assert!(matches!(
            verify_log(&path),
            Err(AuditError::Broken { line: 2, reason: "previous hash mismatch" })
        ));
    }

    #[test]
    fn tail_returns_newest_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        assert!(tail(&path, 5).unwrap().is_empty());
        let log = AuditLog::open(&path).unwrap();
        for m in 0..4 {
            log.append(forced(Uuid::new_v4(), "text"), at(m)).unwrap();
        }
        let last = tail(&path, 2).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].recorded_at, at(2));
        assert_eq!(last[1].recorded_at, at(3));
        assert_eq!(tail(&path, 10).unwrap().len(), 4);
    }
}
