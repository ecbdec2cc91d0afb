//! JSONL journal reader - sequential reader for audit

use crate::error::EventError;
use coinledger_ledger::{TransactionRecord, TransactionStatus};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Sequential journal reader
pub struct EventReader {
    files: Vec<PathBuf>,
}

impl EventReader {
    /// Create a new reader from a directory
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self, EventError> {
        let path = path.as_ref();
        let mut files = Vec::new();

        if path.exists() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let file_path = entry.path();
                if file_path.extension().map_or(false, |ext| ext == "jsonl") {
                    files.push(file_path);
                }
            }
        }

        // File names are dates, so lexical order is chronological
        files.sort();

        Ok(Self { files })
    }

    /// Read all records from all files in order
    pub fn read_all(&self) -> Result<Vec<TransactionRecord>, EventError> {
        let mut records = Vec::new();

        for file_path in &self.files {
            let file = File::open(file_path)?;
            let reader = BufReader::new(file);

            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: TransactionRecord =
                    serde_json::from_str(&line).map_err(|e| EventError::InvalidLine {
                        file: file_path.display().to_string(),
                        line: index + 1,
                        reason: e.to_string(),
                    })?;
                records.push(record);
            }
        }

        Ok(records)
    }

    /// The most recent `n` records, oldest first
    pub fn tail(&self, n: usize) -> Result<Vec<TransactionRecord>, EventError> {
        let mut records = self.read_all()?;
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }

    /// Count records by status: (committed, rejected)
    pub fn status_counts(&self) -> Result<(usize, usize), EventError> {
        let records = self.read_all()?;
        let committed = records
            .iter()
            .filter(|r| r.status == TransactionStatus::Committed)
            .count();
        let rejected = records
            .iter()
            .filter(|r| r.status == TransactionStatus::Rejected)
            .count();
        Ok((committed, rejected))
    }

    /// Count total records across all files
    pub fn count(&self) -> Result<usize, EventError> {
        let mut count = 0;

        for file_path in &self.files {
            let file = File::open(file_path)?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    count += 1;
                }
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStore;
    use chrono::Utc;
    use coinledger_core::Coins;
    use coinledger_ledger::{TransactionId, TransactionKind};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(id: &str, status: TransactionStatus) -> TransactionRecord {
        TransactionRecord {
            transaction_id: TransactionId::parse(id).unwrap(),
            kind: TransactionKind::Fee,
            status,
            source: None,
            destination: None,
            amount: Coins::from(500),
            fee_amount: Coins::from(500),
            reason: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let reader = EventReader::from_directory(temp_dir.path().join("nope")).unwrap();
        assert_eq!(reader.count().unwrap(), 0);
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_read_back_in_order() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut store = EventStore::new(temp_dir.path()).unwrap();
            store.append(&record("t1", TransactionStatus::Committed)).unwrap();
            store.append(&record("t2", TransactionStatus::Rejected)).unwrap();
            store.append(&record("t3", TransactionStatus::Committed)).unwrap();
        }

        let reader = EventReader::from_directory(temp_dir.path()).unwrap();
        let all = reader.read_all().unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);

        assert_eq!(reader.status_counts().unwrap(), (2, 1));
        let tail = reader.tail(2).unwrap();
        assert_eq!(tail[0].transaction_id.as_str(), "t2");
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn test_corrupt_line_reports_position() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("2025-01-01.jsonl"), "{not json}\n").unwrap();

        let reader = EventReader::from_directory(temp_dir.path()).unwrap();
        match reader.read_all() {
            Err(EventError::InvalidLine { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected InvalidLine, got {other:?}"),
        }
    }
}
