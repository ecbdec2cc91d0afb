//! Risk audit log - Append-only JSONL storage
//!
//! Separate from the transaction journal. Each line is one `RiskEvent`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{RiskError, RiskResult};
use crate::event::RiskEvent;

/// Append-only JSONL log of risk decisions
pub struct RiskLedger {
    path: PathBuf,
    file: Option<File>,
}

impl RiskLedger {
    /// Open (or create) the log at the given path
    pub fn new(path: impl AsRef<Path>) -> RiskResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Create an in-memory log (for testing)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            file: None,
        }
    }

    /// Append an event to the log
    pub fn append(&mut self, event: &RiskEvent) -> RiskResult<()> {
        let json = serde_json::to_string(event)?;
        if let Some(ref mut file) = self.file {
            writeln!(file, "{}", json)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Read all events from the log
    pub fn read_all(&self) -> RiskResult<Vec<RiskEvent>> {
        if self.file.is_none() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut events = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line).map_err(|e| RiskError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            })?;
            events.push(event);
        }

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_in_memory(&self) -> bool {
        self.file.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinledger_core::AccountId;
    use tempfile::tempdir;

    #[test]
    fn test_in_memory_ledger() {
        let mut ledger = RiskLedger::in_memory();
        let event = RiskEvent::frozen(AccountId::new("alice").unwrap(), None, "admin");
        ledger.append(&event).unwrap();
        assert!(ledger.is_in_memory());
        assert!(ledger.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_file_ledger_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("risk.jsonl");
        let alice = AccountId::new("alice").unwrap();

        {
            let mut ledger = RiskLedger::new(&path).unwrap();
            ledger
                .append(&RiskEvent::score_raised(alice.clone(), "click_rate", 40))
                .unwrap();
            ledger
                .append(&RiskEvent::frozen(alice.clone(), Some("chargeback".into()), "admin"))
                .unwrap();
        }

        let ledger = RiskLedger::new(&path).unwrap();
        let events = ledger.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], RiskEvent::Frozen { ref reason, .. } if reason.as_deref() == Some("chargeback")));
    }

    #[test]
    fn test_corrupt_line_reports_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("risk.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();

        let ledger = RiskLedger::new(&path).unwrap();
        assert!(matches!(ledger.read_all(), Err(RiskError::Corrupt { line: 2, .. })));
    }
}
