//! Operational sinks for failed jobs.

use super::job::FailureRecord;
use std::sync::{Arc, Mutex};

/// Receives a record for every job that ends in `FAILED`.
pub trait FailureSink: Send + Sync {
    /// Record one failed job.
    fn report(&self, record: &FailureRecord);
}

/// Writes failure records to the log at error level, as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl FailureSink for LogSink {
    fn report(&self, record: &FailureRecord) {
        match serde_json::to_string(record) {
            Ok(json) => log::error!("Signing job failed: {}", json),
            Err(_) => log::error!(
                "Signing job {} failed at {}: {}",
                record.document_key,
                record.stage,
                record.message
            ),
        }
    }
}

/// Collects failure records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<FailureRecord>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records reported so far.
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl FailureSink for MemorySink {
    fn report(&self, record: &FailureRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}
