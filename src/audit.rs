//! Execution audit log
//!
//! Records every gate decision and execution outcome. Entries are kept in a bounded
//! in-memory buffer and optionally appended to a JSON-lines file.

use crate::error::Result;
use crate::validator::ValidationVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Authorized,
    /// Destructive statement let through by `allow_destructive`
    AuthorizedDestructive,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub entry_id: Uuid,
    pub request_id: Option<Uuid>,
    pub statement: String,
    pub is_valid: bool,
    pub is_destructive: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub allow_destructive: bool,
    pub decision: AuditDecision,
    pub row_count: Option<u64>,
    pub execution_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl AuditEntry {
    /// Entry for a gate decision on `verdict`
    pub fn for_decision(
        verdict: &ValidationVerdict,
        allow_destructive: bool,
        decision: AuditDecision,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            entry_id: Uuid::new_v4(),
            request_id: None,
            statement: verdict.statement().to_string(),
            is_valid: verdict.is_valid(),
            is_destructive: verdict.is_destructive(),
            errors: verdict.errors().to_vec(),
            warnings: verdict.warnings().to_vec(),
            allow_destructive,
            decision,
            row_count: None,
            execution_time_ms: None,
            error: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<Uuid>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_outcome(mut self, row_count: u64, execution_time_ms: u64) -> Self {
        self.row_count = Some(row_count);
        self.execution_time_ms = Some(execution_time_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Shared, bounded audit trail
#[derive(Clone)]
pub struct AuditLog {
    log_file: Option<PathBuf>,
    entries: Arc<Mutex<VecDeque<AuditEntry>>>,
    max_in_memory: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(None, 1000)
    }
}

impl AuditLog {
    pub fn new(log_file: Option<PathBuf>, max_in_memory: usize) -> Self {
        Self {
            log_file,
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_in_memory: max_in_memory.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keep `entry` in memory and mirror it to the log file when one is configured.
    /// A failed file write is logged and never surfaces to the caller.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.append_to_file(&entry) {
            warn!(entry_id = %entry.entry_id, "Failed to write audit log: {}", e);
        }

        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.max_in_memory {
            entries.pop_front();
        }
    }

    fn append_to_file(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(path) = &self.log_file {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", serde_json::to_string(entry)?)?;
        }
        Ok(())
    }

    /// Most recent entries, newest last
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::SafetyValidator;

    #[test]
    fn test_in_memory_log_is_bounded() {
        let log = AuditLog::new(None, 2);
        let verdict = SafetyValidator::new().validate("SELECT 1", None);
        for _ in 0..3 {
            log.record(AuditEntry::for_decision(&verdict, false, AuditDecision::Authorized));
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.recent(10).len(), 2);
        assert_eq!(log.recent(1).len(), 1);
    }

    #[test]
    fn test_entry_captures_verdict() {
        let verdict = SafetyValidator::new().validate("DROP TABLE users", None);
        let entry = AuditEntry::for_decision(&verdict, true, AuditDecision::Rejected)
            .with_error("rejected");
        assert_eq!(entry.statement, "DROP TABLE users");
        assert!(!entry.is_valid);
        assert!(entry.is_destructive);
        assert_eq!(entry.error.as_deref(), Some("rejected"));
    }

    #[test]
    fn test_file_mirror_writes_json_lines() {
        let path = std::env::temp_dir().join(format!("sqlbuddy-audit-{}.jsonl", Uuid::new_v4()));
        let log = AuditLog::new(Some(path.clone()), 10);
        let verdict = SafetyValidator::new().validate("SELECT 1", None);
        log.record(
            AuditEntry::for_decision(&verdict, false, AuditDecision::Authorized).with_outcome(1, 3),
        );
        log.record(AuditEntry::for_decision(&verdict, false, AuditDecision::Authorized));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.row_count, Some(1));
        assert_eq!(first.decision, AuditDecision::Authorized);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unwritable_file_keeps_entry_in_memory() {
        let path = std::env::temp_dir()
            .join(format!("sqlbuddy-missing-{}", Uuid::new_v4()))
            .join("audit.jsonl");
        let log = AuditLog::new(Some(path.clone()), 10);
        let verdict = SafetyValidator::new().validate("SELECT 1", None);
        log.record(AuditEntry::for_decision(&verdict, false, AuditDecision::Authorized));

        assert_eq!(log.len(), 1);
        assert!(!path.exists());
    }
}
