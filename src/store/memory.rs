//! # In-Memory Process Store
//!
//! Mutex-guarded [`ProcessStore`] used by the test suite and by embedders
//! that want the orchestration behavior without durability. Semantics
//! mirror the Postgres implementation: scheduling filters exclude paused
//! processes, "not completed" chunk lookups return the newest match, and
//! updates of missing records fail with `RecordNotFound`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::models::{
    AnalyticsChunk, BallotItemChunk, BatchProcess, BatchRowDescription, NewBatchProcess,
    NewProcessLogEntry, ProcessLogEntry, RowDescriptionFilter,
};

use super::{ProcessListFilter, ProcessStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    batch_processes: Vec<BatchProcess>,
    ballot_item_chunks: Vec<BallotItemChunk>,
    analytics_chunks: Vec<AnalyticsChunk>,
    row_descriptions: Vec<BatchRowDescription>,
    log_entries: Vec<ProcessLogEntry>,
    next_process_id: i64,
    next_ballot_chunk_id: i64,
    next_analytics_chunk_id: i64,
    next_row_id: i64,
    next_log_id: i64,
}

/// Non-durable process store
pub struct InMemoryProcessStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryProcessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose creation timestamps come from the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    /// Seed one row description into a batch set
    pub fn add_row_description(
        &self,
        batch_set_id: i64,
        batch_header_id: i64,
        kind_of_batch: &str,
    ) -> BatchRowDescription {
        let mut state = self.state.lock();
        state.next_row_id += 1;
        let row = BatchRowDescription {
            id: state.next_row_id,
            batch_header_id,
            batch_set_id,
            kind_of_batch: kind_of_batch.to_string(),
            analyzed: false,
            created: false,
        };
        state.row_descriptions.push(row.clone());
        row
    }

    /// Seed `count` row descriptions into a batch set
    pub fn seed_batch_set(&self, batch_set_id: i64, count: usize, kind_of_batch: &str) {
        for offset in 0..count {
            self.add_row_description(batch_set_id, 1000 + offset as i64, kind_of_batch);
        }
    }

    // Snapshot accessors for assertions

    pub fn get_batch_process(&self, id: i64) -> Option<BatchProcess> {
        self.state
            .lock()
            .batch_processes
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn all_batch_processes(&self) -> Vec<BatchProcess> {
        self.state.lock().batch_processes.clone()
    }

    pub fn ballot_item_chunks_for(&self, batch_process_id: i64) -> Vec<BallotItemChunk> {
        self.state
            .lock()
            .ballot_item_chunks
            .iter()
            .filter(|c| c.batch_process_id == batch_process_id)
            .cloned()
            .collect()
    }

    pub fn analytics_chunks_for(&self, batch_process_id: i64) -> Vec<AnalyticsChunk> {
        self.state
            .lock()
            .analytics_chunks
            .iter()
            .filter(|c| c.batch_process_id == batch_process_id)
            .cloned()
            .collect()
    }

    pub fn row_descriptions_in_set(&self, batch_set_id: i64) -> Vec<BatchRowDescription> {
        self.state
            .lock()
            .row_descriptions
            .iter()
            .filter(|r| r.batch_set_id == batch_set_id)
            .cloned()
            .collect()
    }

    pub fn log_entries(&self) -> Vec<ProcessLogEntry> {
        self.state.lock().log_entries.clone()
    }

    /// Log entries flagged as critical failures
    pub fn critical_log_entries(&self) -> Vec<ProcessLogEntry> {
        self.state
            .lock()
            .log_entries
            .iter()
            .filter(|e| e.critical_failure)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn create_batch_process(
        &self,
        new_process: NewBatchProcess,
    ) -> StoreResult<BatchProcess> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.next_process_id += 1;
        let process = BatchProcess {
            id: state.next_process_id,
            kind_of_process: new_process.kind_of_process,
            google_civic_election_id: new_process.google_civic_election_id,
            state_code: new_process.state_code,
            voter_id: new_process.voter_id,
            analytics_date_as_integer: new_process.analytics_date_as_integer,
            date_added_to_queue: now,
            date_started: None,
            date_checked_out: None,
            date_completed: None,
            batch_process_paused: false,
            completion_summary: None,
        };
        state.batch_processes.push(process.clone());
        Ok(process)
    }

    async fn update_batch_process(&self, process: &BatchProcess) -> StoreResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .batch_processes
            .iter_mut()
            .find(|p| p.id == process.id)
            .ok_or_else(|| StoreError::record_not_found("batch_process", process.id))?;
        *slot = process.clone();
        Ok(())
    }

    async fn batch_process_list(
        &self,
        filter: ProcessListFilter,
    ) -> StoreResult<Vec<BatchProcess>> {
        let state = self.state.lock();
        let mut matched: Vec<BatchProcess> = state
            .batch_processes
            .iter()
            .filter(|p| match filter {
                ProcessListFilter::Active => p.is_active() && !p.batch_process_paused,
                ProcessListFilter::Queued => p.is_queued() && !p.batch_process_paused,
            })
            .cloned()
            .collect();
        matched.sort_by_key(|p| p.id);
        Ok(matched)
    }

    async fn count_active_batch_processes(&self) -> StoreResult<i64> {
        let state = self.state.lock();
        Ok(state
            .batch_processes
            .iter()
            .filter(|p| p.is_active() && !p.batch_process_paused)
            .count() as i64)
    }

    async fn count_checked_out_batch_processes(&self) -> StoreResult<i64> {
        let state = self.state.lock();
        Ok(state
            .batch_processes
            .iter()
            .filter(|p| p.is_active() && p.is_checked_out())
            .count() as i64)
    }

    async fn analytics_process_is_running(&self) -> StoreResult<bool> {
        let state = self.state.lock();
        Ok(state.batch_processes.iter().any(|p| {
            p.is_active() && !p.batch_process_paused && p.kind_of_process.is_analytics_kind()
        }))
    }

    async fn ballot_item_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<BallotItemChunk>> {
        let state = self.state.lock();
        Ok(state
            .ballot_item_chunks
            .iter()
            .filter(|c| {
                c.batch_process_id == batch_process_id && c.create_date_completed.is_none()
            })
            .max_by_key(|c| c.id)
            .cloned())
    }

    async fn create_ballot_item_chunk(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<BallotItemChunk> {
        let mut state = self.state.lock();
        state.next_ballot_chunk_id += 1;
        let chunk = BallotItemChunk {
            id: state.next_ballot_chunk_id,
            batch_process_id,
            batch_set_id: None,
            retrieve_date_started: None,
            retrieve_date_completed: None,
            retrieve_row_count: 0,
            retrieve_timed_out: false,
            analyze_date_started: None,
            analyze_date_completed: None,
            analyze_row_count: 0,
            analyze_timed_out: false,
            create_date_started: None,
            create_date_completed: None,
            create_row_count: 0,
            create_timed_out: false,
        };
        state.ballot_item_chunks.push(chunk.clone());
        Ok(chunk)
    }

    async fn update_ballot_item_chunk(&self, chunk: &BallotItemChunk) -> StoreResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .ballot_item_chunks
            .iter_mut()
            .find(|c| c.id == chunk.id)
            .ok_or_else(|| StoreError::record_not_found("ballot_item_chunk", chunk.id))?;
        *slot = chunk.clone();
        Ok(())
    }

    async fn analytics_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<AnalyticsChunk>> {
        let state = self.state.lock();
        Ok(state
            .analytics_chunks
            .iter()
            .filter(|c| c.batch_process_id == batch_process_id && c.date_completed.is_none())
            .max_by_key(|c| c.id)
            .cloned())
    }

    async fn create_analytics_chunk(
        &self,
        batch_process_id: i64,
        analytics_date_as_integer: Option<i32>,
    ) -> StoreResult<AnalyticsChunk> {
        let mut state = self.state.lock();
        state.next_analytics_chunk_id += 1;
        let chunk = AnalyticsChunk {
            id: state.next_analytics_chunk_id,
            batch_process_id,
            analytics_date_as_integer,
            date_started: None,
            date_completed: None,
            number_of_rows_being_reviewed: 0,
            number_of_rows_successfully_reviewed: 0,
            timed_out: false,
        };
        state.analytics_chunks.push(chunk.clone());
        Ok(chunk)
    }

    async fn update_analytics_chunk(&self, chunk: &AnalyticsChunk) -> StoreResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .analytics_chunks
            .iter_mut()
            .find(|c| c.id == chunk.id)
            .ok_or_else(|| StoreError::record_not_found("analytics_chunk", chunk.id))?;
        *slot = chunk.clone();
        Ok(())
    }

    async fn batch_set_row_descriptions(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<Vec<BatchRowDescription>> {
        let state = self.state.lock();
        let mut matched: Vec<BatchRowDescription> = state
            .row_descriptions
            .iter()
            .filter(|r| r.batch_set_id == batch_set_id && filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.id);
        Ok(matched)
    }

    async fn count_rows_in_batch_set(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<i64> {
        let state = self.state.lock();
        Ok(state
            .row_descriptions
            .iter()
            .filter(|r| r.batch_set_id == batch_set_id && filter.matches(r))
            .count() as i64)
    }

    async fn update_row_description(&self, row: &BatchRowDescription) -> StoreResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .row_descriptions
            .iter_mut()
            .find(|r| r.id == row.id)
            .ok_or_else(|| StoreError::record_not_found("batch_row_description", row.id))?;
        *slot = row.clone();
        Ok(())
    }

    async fn create_log_entry(&self, entry: NewProcessLogEntry) -> StoreResult<ProcessLogEntry> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.next_log_id += 1;
        let log_entry = ProcessLogEntry {
            id: state.next_log_id,
            batch_process_id: entry.batch_process_id,
            ballot_item_chunk_id: entry.ballot_item_chunk_id,
            analytics_chunk_id: entry.analytics_chunk_id,
            batch_set_id: entry.batch_set_id,
            kind_of_process: entry.kind_of_process,
            google_civic_election_id: entry.google_civic_election_id,
            state_code: entry.state_code,
            analytics_date_as_integer: entry.analytics_date_as_integer,
            critical_failure: entry.critical_failure,
            status: entry.status,
            date_added: now,
        };
        state.log_entries.push(log_entry.clone());
        Ok(log_entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessKind;

    #[tokio::test]
    async fn test_scheduling_filters_exclude_paused() {
        let store = InMemoryProcessStore::new();
        let mut active = store
            .create_batch_process(NewBatchProcess::new(
                ProcessKind::RetrieveBallotItemsFromPollingLocations,
            ))
            .await
            .unwrap();
        active.date_started = Some(chrono::Utc::now());
        store.update_batch_process(&active).await.unwrap();

        let mut paused = store
            .create_batch_process(NewBatchProcess::new(
                ProcessKind::RefreshBallotItemsFromVoters,
            ))
            .await
            .unwrap();
        paused.date_started = Some(chrono::Utc::now());
        paused.batch_process_paused = true;
        store.update_batch_process(&paused).await.unwrap();

        let listed = store
            .batch_process_list(ProcessListFilter::Active)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);
        assert_eq!(store.count_active_batch_processes().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_completed_chunk_returns_newest() {
        let store = InMemoryProcessStore::new();
        let process = store
            .create_batch_process(NewBatchProcess::new(
                ProcessKind::RetrieveBallotItemsFromPollingLocations,
            ))
            .await
            .unwrap();

        let mut first = store.create_ballot_item_chunk(process.id).await.unwrap();
        let second = store.create_ballot_item_chunk(process.id).await.unwrap();

        let found = store
            .ballot_item_chunk_not_completed(process.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);

        // Completing the newest chunk exposes the older open one.
        let mut done = second.clone();
        done.create_date_completed = Some(chrono::Utc::now());
        store.update_ballot_item_chunk(&done).await.unwrap();
        first.retrieve_row_count = 3;
        store.update_ballot_item_chunk(&first).await.unwrap();

        let found = store
            .ballot_item_chunk_not_completed(process.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(found.retrieve_row_count, 3);
    }

    #[tokio::test]
    async fn test_analytics_running_detection() {
        let store = InMemoryProcessStore::new();
        assert!(!store.analytics_process_is_running().await.unwrap());

        let mut analytics = store
            .create_batch_process(NewBatchProcess::new(
                ProcessKind::AugmentAnalyticsActionWithElectionId,
            ))
            .await
            .unwrap();
        assert!(!store.analytics_process_is_running().await.unwrap());

        analytics.date_started = Some(chrono::Utc::now());
        store.update_batch_process(&analytics).await.unwrap();
        assert!(store.analytics_process_is_running().await.unwrap());
    }

    #[tokio::test]
    async fn test_row_description_filters() {
        let store = InMemoryProcessStore::new();
        store.seed_batch_set(42, 5, "CANDIDATE");

        let mut rows = store
            .batch_set_row_descriptions(42, RowDescriptionFilter::All)
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);

        rows[0].analyzed = true;
        rows[1].analyzed = true;
        store.update_row_description(&rows[0]).await.unwrap();
        store.update_row_description(&rows[1]).await.unwrap();

        assert_eq!(
            store
                .count_rows_in_batch_set(42, RowDescriptionFilter::Analyzed)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .count_rows_in_batch_set(42, RowDescriptionFilter::Unanalyzed)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            store
                .count_rows_in_batch_set(42, RowDescriptionFilter::Created)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let store = InMemoryProcessStore::new();
        let orphan = BatchProcess {
            id: 404,
            kind_of_process: ProcessKind::RetrieveBallotItemsFromPollingLocations,
            google_civic_election_id: None,
            state_code: None,
            voter_id: None,
            analytics_date_as_integer: None,
            date_added_to_queue: chrono::Utc::now(),
            date_started: None,
            date_checked_out: None,
            date_completed: None,
            batch_process_paused: false,
            completion_summary: None,
        };
        let err = store.update_batch_process(&orphan).await.unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound { .. }));
    }
}
