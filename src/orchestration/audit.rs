//! # Audit Log Writer
//!
//! Fire-and-forget persistence of process log entries. Audit rows are
//! diagnostics: a failure to write one is traced and swallowed so it can
//! never change orchestration control flow.

use std::sync::Arc;
use tracing::error;

use crate::models::{
    AnalyticsChunk, BallotItemChunk, BatchProcess, NewProcessLogEntry, ProcessKind,
};
use crate::store::ProcessStore;

/// Identification fields carried on every audit row
#[derive(Debug, Clone, Default)]
pub struct LogScope {
    pub batch_process_id: i64,
    pub ballot_item_chunk_id: Option<i64>,
    pub analytics_chunk_id: Option<i64>,
    pub batch_set_id: Option<i64>,
    pub kind_of_process: Option<ProcessKind>,
    pub google_civic_election_id: Option<i64>,
    pub state_code: Option<String>,
    pub analytics_date_as_integer: Option<i32>,
}

impl LogScope {
    pub fn for_process(process: &BatchProcess) -> Self {
        Self {
            batch_process_id: process.id,
            kind_of_process: Some(process.kind_of_process),
            google_civic_election_id: process.google_civic_election_id,
            state_code: process.state_code.clone(),
            analytics_date_as_integer: process.analytics_date_as_integer,
            ..Self::default()
        }
    }

    pub fn with_ballot_chunk(mut self, chunk: &BallotItemChunk) -> Self {
        self.ballot_item_chunk_id = Some(chunk.id);
        if self.batch_set_id.is_none() {
            self.batch_set_id = chunk.batch_set_id;
        }
        self
    }

    pub fn with_analytics_chunk(mut self, chunk: &AnalyticsChunk) -> Self {
        self.analytics_chunk_id = Some(chunk.id);
        self
    }

    pub fn with_batch_set(mut self, batch_set_id: i64) -> Self {
        self.batch_set_id = Some(batch_set_id);
        self
    }
}

/// Audit entry writer shared by all processors
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn ProcessStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn ProcessStore>) -> Self {
        Self { store }
    }

    /// Write a routine audit entry
    pub async fn write(&self, scope: &LogScope, status: &str) {
        self.write_entry(scope, status, false).await;
    }

    /// Write an entry flagged for operator attention
    pub async fn write_critical(&self, scope: &LogScope, status: &str) {
        self.write_entry(scope, status, true).await;
    }

    async fn write_entry(&self, scope: &LogScope, status: &str, critical_failure: bool) {
        let entry = NewProcessLogEntry {
            batch_process_id: scope.batch_process_id,
            ballot_item_chunk_id: scope.ballot_item_chunk_id,
            analytics_chunk_id: scope.analytics_chunk_id,
            batch_set_id: scope.batch_set_id,
            kind_of_process: scope.kind_of_process,
            google_civic_election_id: scope.google_civic_election_id,
            state_code: scope.state_code.clone(),
            analytics_date_as_integer: scope.analytics_date_as_integer,
            critical_failure,
            status: status.to_string(),
        };

        if let Err(e) = self.store.create_log_entry(entry).await {
            error!(
                batch_process_id = scope.batch_process_id,
                critical_failure = critical_failure,
                status = %status,
                "Failed to write process log entry: {}",
                e
            );
        }
    }
}
