//! JSONL journal - append-only writer

use crate::error::EventError;
use chrono::Utc;
use coinledger_ledger::TransactionRecord;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Append-only JSONL journal of transaction records, one file per UTC day
pub struct EventStore {
    base_path: PathBuf,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
}

impl EventStore {
    /// Create a new journal at the given directory
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, EventError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            current_file: None,
            current_date: None,
        })
    }

    /// Append a record to the journal
    pub fn append(&mut self, record: &TransactionRecord) -> Result<(), EventError> {
        let date = record.created_at.format("%Y-%m-%d").to_string();

        // Rotate file if date changed
        if self.current_date.as_ref() != Some(&date) {
            self.rotate_file(&date)?;
        }

        if let Some(ref mut writer) = self.current_file {
            let json = serde_json::to_string(record)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }

        debug!(
            transaction_id = %record.transaction_id,
            status = %record.status,
            "journal append"
        );
        Ok(())
    }

    fn rotate_file(&mut self, date: &str) -> Result<(), EventError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }

        let file_path = self.base_path.join(format!("{}.jsonl", date));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        self.current_file = Some(BufWriter::new(file));
        self.current_date = Some(date.to_string());

        Ok(())
    }

    /// Get the path to today's file
    pub fn today_file_path(&self) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        self.base_path.join(format!("{}.jsonl", date))
    }

    /// Journal directory
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Flush and close the current file
    pub fn close(&mut self) -> Result<(), EventError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }
        self.current_file = None;
        self.current_date = None;
        Ok(())
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use coinledger_core::Coins;
    use coinledger_ledger::{TransactionId, TransactionKind, TransactionStatus};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(id: &str, day: u32) -> TransactionRecord {
        TransactionRecord {
            transaction_id: TransactionId::parse(id).unwrap(),
            kind: TransactionKind::Reward,
            status: TransactionStatus::Committed,
            source: None,
            destination: None,
            amount: Coins::from(1),
            fee_amount: Coins::ZERO,
            reason: None,
            metadata: BTreeMap::new(),
            created_at: Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_rotates_per_day() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = EventStore::new(temp_dir.path()).unwrap();

        store.append(&record("a", 1)).unwrap();
        store.append(&record("b", 1)).unwrap();
        store.append(&record("c", 2)).unwrap();
        store.close().unwrap();

        let day1 = std::fs::read_to_string(temp_dir.path().join("2025-03-01.jsonl")).unwrap();
        let day2 = std::fs::read_to_string(temp_dir.path().join("2025-03-02.jsonl")).unwrap();
        assert_eq!(day1.lines().count(), 2);
        assert_eq!(day2.lines().count(), 1);
    }
}
