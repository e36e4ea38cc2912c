//! Failure-injecting wrapper over the in-memory store.
//!
//! Delegates every operation to an [`InMemoryProcessStore`] unless the
//! operation name has been marked failing, in which case it returns a
//! query error without touching state. Used to drive the persistence
//! failure paths that the happy-path fixtures never reach.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use civic_batch_core::models::{
    AnalyticsChunk, BallotItemChunk, BatchProcess, BatchRowDescription, NewBatchProcess,
    NewProcessLogEntry, ProcessLogEntry, RowDescriptionFilter,
};
use civic_batch_core::store::{
    InMemoryProcessStore, ProcessListFilter, ProcessStore, StoreError, StoreResult,
};

#[allow(dead_code)]
pub struct FlakyStore {
    inner: Arc<InMemoryProcessStore>,
    failing: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: Arc<InMemoryProcessStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make the named operation fail until healed
    pub fn fail(&self, operation: &str) {
        self.failing.lock().insert(operation.to_string());
    }

    pub fn heal(&self, operation: &str) {
        self.failing.lock().remove(operation);
    }

    fn gate(&self, operation: &str) -> StoreResult<()> {
        if self.failing.lock().contains(operation) {
            Err(StoreError::database_query(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProcessStore for FlakyStore {
    async fn create_batch_process(
        &self,
        new_process: NewBatchProcess,
    ) -> StoreResult<BatchProcess> {
        self.gate("create_batch_process")?;
        self.inner.create_batch_process(new_process).await
    }

    async fn update_batch_process(&self, process: &BatchProcess) -> StoreResult<()> {
        self.gate("update_batch_process")?;
        self.inner.update_batch_process(process).await
    }

    async fn batch_process_list(
        &self,
        filter: ProcessListFilter,
    ) -> StoreResult<Vec<BatchProcess>> {
        self.gate("batch_process_list")?;
        self.inner.batch_process_list(filter).await
    }

    async fn count_active_batch_processes(&self) -> StoreResult<i64> {
        self.gate("count_active_batch_processes")?;
        self.inner.count_active_batch_processes().await
    }

    async fn count_checked_out_batch_processes(&self) -> StoreResult<i64> {
        self.gate("count_checked_out_batch_processes")?;
        self.inner.count_checked_out_batch_processes().await
    }

    async fn analytics_process_is_running(&self) -> StoreResult<bool> {
        self.gate("analytics_process_is_running")?;
        self.inner.analytics_process_is_running().await
    }

    async fn ballot_item_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<BallotItemChunk>> {
        self.gate("ballot_item_chunk_not_completed")?;
        self.inner.ballot_item_chunk_not_completed(batch_process_id).await
    }

    async fn create_ballot_item_chunk(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<BallotItemChunk> {
        self.gate("create_ballot_item_chunk")?;
        self.inner.create_ballot_item_chunk(batch_process_id).await
    }

    async fn update_ballot_item_chunk(&self, chunk: &BallotItemChunk) -> StoreResult<()> {
        self.gate("update_ballot_item_chunk")?;
        self.inner.update_ballot_item_chunk(chunk).await
    }

    async fn analytics_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<AnalyticsChunk>> {
        self.gate("analytics_chunk_not_completed")?;
        self.inner.analytics_chunk_not_completed(batch_process_id).await
    }

    async fn create_analytics_chunk(
        &self,
        batch_process_id: i64,
        analytics_date_as_integer: Option<i32>,
    ) -> StoreResult<AnalyticsChunk> {
        self.gate("create_analytics_chunk")?;
        self.inner
            .create_analytics_chunk(batch_process_id, analytics_date_as_integer)
            .await
    }

    async fn update_analytics_chunk(&self, chunk: &AnalyticsChunk) -> StoreResult<()> {
        self.gate("update_analytics_chunk")?;
        self.inner.update_analytics_chunk(chunk).await
    }

    async fn batch_set_row_descriptions(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<Vec<BatchRowDescription>> {
        self.gate("batch_set_row_descriptions")?;
        self.inner.batch_set_row_descriptions(batch_set_id, filter).await
    }

    async fn count_rows_in_batch_set(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<i64> {
        self.gate("count_rows_in_batch_set")?;
        self.inner.count_rows_in_batch_set(batch_set_id, filter).await
    }

    async fn update_row_description(&self, row: &BatchRowDescription) -> StoreResult<()> {
        self.gate("update_row_description")?;
        self.inner.update_row_description(row).await
    }

    async fn create_log_entry(&self, entry: NewProcessLogEntry) -> StoreResult<ProcessLogEntry> {
        self.gate("create_log_entry")?;
        self.inner.create_log_entry(entry).await
    }
}
