//! CSV Persistence Module
//!
//! Append-only journal of cycle outcomes, one row per cycle, in
//! `<data_dir>/cycles.csv`

use anyhow::{Context, Result};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::consensus::{CycleReport, Submission};
use crate::error::OracleError;

const JOURNAL_FILE: &str = "cycles.csv";

/// Cycle outcome record for CSV storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub timestamp: i64,
    pub cycle: u64,
    /// `ok`, or the error kind that ended the cycle
    pub status: String,
    pub price: Option<Decimal>,
    pub leader: Option<String>,
    pub sequence: Option<u32>,
    pub signers: Option<usize>,
    /// `submitted`, `failed` or `not_leader`
    pub submission: Option<String>,
    pub engine_result: Option<String>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl CycleRecord {
    pub fn completed(report: &CycleReport) -> Self {
        let (submission, engine_result, tx_hash, error) = match &report.submission {
            Submission::Submitted(result) => (
                "submitted",
                Some(result.engine_result.clone()),
                result.tx_hash.clone(),
                None,
            ),
            Submission::Failed { error } => ("failed", None, None, Some(error.clone())),
            Submission::NotLeader => ("not_leader", None, None, None),
        };

        Self {
            timestamp: Utc::now().timestamp(),
            cycle: report.cycle,
            status: "ok".to_string(),
            price: Some(report.cohort.price),
            leader: Some(report.leader.leader.to_string()),
            sequence: Some(report.payload.sequence),
            signers: Some(report.bundle.shares.len()),
            submission: Some(submission.to_string()),
            engine_result,
            tx_hash,
            error,
        }
    }

    pub fn aborted(cycle: u64, err: &OracleError) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            cycle,
            status: err.kind().to_string(),
            price: None,
            leader: None,
            sequence: None,
            signers: None,
            submission: None,
            engine_result: None,
            tx_hash: None,
            error: Some(err.to_string()),
        }
    }
}

pub struct CycleJournal {
    path: PathBuf,
    writer: RwLock<csv::Writer<fs::File>>,
}

impl CycleJournal {
    /// Open (or create) the journal under `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        let path = data_dir.join(JOURNAL_FILE);
        let writer = Self::create_writer(&path)?;
        Ok(Self {
            path,
            writer: RwLock::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open CSV file")?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    pub async fn record(&self, record: &CycleRecord) -> Result<()> {
        let mut writer = self.writer.write().await;
        writer
            .serialize(record)
            .context("Failed to write cycle record")?;
        writer.flush().context("Failed to flush cycle journal")?;
        Ok(())
    }

    /// Most recent `limit` rows, oldest first
    pub fn load_recent(&self, limit: usize) -> Result<Vec<CycleRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).context("Failed to open cycle journal")?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: CycleRecord = result.context("Failed to deserialize cycle record")?;
            records.push(record);
        }
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio_test::assert_ok;

    fn scratch_dir() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("cohort-journal-{}-{}", std::process::id(), nanos))
    }

    #[tokio::test]
    async fn journal_appends_across_reopen_with_single_header() {
        let dir = scratch_dir();

        let journal = CycleJournal::new(&dir).unwrap();
        assert_ok!(
            journal
                .record(&CycleRecord::aborted(7, &OracleError::DataUnavailable))
                .await
        );
        drop(journal);

        let journal = CycleJournal::new(&dir).unwrap();
        let err = OracleError::InsufficientParticipants {
            round: "cycle-8/proposal".to_string(),
            received: 2,
            expected: 3,
        };
        assert_ok!(journal.record(&CycleRecord::aborted(8, &err)).await);

        let rows = journal.load_recent(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cycle, 7);
        assert_eq!(rows[0].status, "data_unavailable");
        assert_eq!(rows[1].status, "insufficient_participants");

        let raw = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(raw.matches("timestamp").count(), 1);

        assert_eq!(journal.load_recent(1).unwrap()[0].cycle, 8);
        let _ = fs::remove_dir_all(&dir);
    }
}
