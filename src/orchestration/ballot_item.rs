//! # Ballot Item Processor
//!
//! Advances the three ballot retrieval kinds through their chunk phases.
//! Each scheduler invocation moves a process by at most one step: start a
//! phase, report a phase still inside its budget, or recover a phase that
//! ran past it. The chunk's timestamps are the only state machine; this
//! module decides what the next stamp is and which collaborator to call
//! before writing it.
//!
//! ## Recovery
//!
//! A phase whose started stamp outlives its budget is force-completed
//! with the best row count the store can still provide and the phase's
//! `*_timed_out` flag set. Nothing is ever rolled back past a completed
//! phase; recovery only extends the record.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::PhaseTimeouts;
use crate::executors::{BallotItemRetriever, RetrieveScope};
use crate::models::{
    BallotItemChunk, BallotItemKind, BatchProcess, ChunkPhase, ChunkStep, RowDescriptionFilter,
};
use crate::pipeline::{BatchSetMode, BatchSetPipeline};
use crate::store::ProcessStore;

use super::audit::{AuditLog, LogScope};
use super::finalizer::{FinalizeChunk, ProcessFinalizer};
use super::status::{AdvanceOutcome, StatusEvent, StatusLog};

/// Drives one ballot item process through its chunk phases
pub struct BallotItemProcessor {
    store: Arc<dyn ProcessStore>,
    retriever: Arc<dyn BallotItemRetriever>,
    pipeline: BatchSetPipeline,
    finalizer: ProcessFinalizer,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    timeouts: PhaseTimeouts,
}

impl BallotItemProcessor {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        retriever: Arc<dyn BallotItemRetriever>,
        pipeline: BatchSetPipeline,
        finalizer: ProcessFinalizer,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
        timeouts: PhaseTimeouts,
    ) -> Self {
        Self {
            store,
            retriever,
            pipeline,
            finalizer,
            audit,
            clock,
            timeouts,
        }
    }

    /// Advance the process by one step of its current chunk
    #[instrument(skip(self, process), fields(batch_process_id = process.id, kind = %process.kind_of_process))]
    pub async fn process_one(
        &self,
        process: &mut BatchProcess,
        kind: BallotItemKind,
    ) -> AdvanceOutcome {
        let mut status = StatusLog::new();
        let scope = LogScope::for_process(process);

        if process.date_checked_out.is_none() {
            process.date_checked_out = Some(self.clock.now());
            if let Err(e) = self.store.update_batch_process(process).await {
                let event = StatusEvent::CheckoutNotSaved {
                    batch_process_id: process.id,
                };
                self.audit
                    .write_critical(&scope, &format!("{event} {e}"))
                    .await;
                status.push(event);
                return AdvanceOutcome::new(false, status);
            }
        }

        let mut chunk = match self.store.ballot_item_chunk_not_completed(process.id).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => match self.store.create_ballot_item_chunk(process.id).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    return self.store_failure(scope, status, "create_ballot_item_chunk", e).await;
                }
            },
            Err(e) => {
                return self
                    .store_failure(scope, status, "ballot_item_chunk_not_completed", e)
                    .await;
            }
        };
        let scope = scope.with_ballot_chunk(&chunk);

        let step = chunk.next_step();
        debug!(chunk_id = chunk.id, step = ?step, "advancing ballot item chunk");
        let success = match step {
            ChunkStep::StartRetrieve => {
                self.start_retrieve(process, &mut chunk, kind, &scope, &mut status)
                    .await
            }
            ChunkStep::AwaitRetrieve => {
                self.await_retrieve(process, &mut chunk, kind, &scope, &mut status)
                    .await
            }
            ChunkStep::StartAnalyze => {
                self.start_analyze(process, &mut chunk, kind, &scope, &mut status)
                    .await
            }
            ChunkStep::AwaitAnalyze => {
                self.await_analyze(process, &mut chunk, &scope, &mut status)
                    .await
            }
            ChunkStep::StartCreate => {
                self.start_create(process, &mut chunk, &scope, &mut status)
                    .await
            }
            ChunkStep::AwaitCreate => {
                self.await_create(process, &mut chunk, &scope, &mut status)
                    .await
            }
            ChunkStep::Done => self.finalize(process, &mut chunk, &mut status).await,
        };

        AdvanceOutcome::new(success, status)
    }

    async fn start_retrieve(
        &self,
        process: &mut BatchProcess,
        chunk: &mut BallotItemChunk,
        kind: BallotItemKind,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        chunk.retrieve_date_started = Some(self.clock.now());
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let started = StatusEvent::PhaseStarted {
            phase: ChunkPhase::Retrieve,
        };
        self.audit.write(scope, started.code()).await;
        status.push(started);

        // Refreshes only touch records untouched since the process began;
        // the initial retrieval takes everything.
        let retrieve_scope = RetrieveScope::from_process(process);
        let watermark = process.date_started;
        let outcome = match kind {
            BallotItemKind::RetrieveFromPollingLocations => {
                self.retriever
                    .retrieve_ballots_for_polling_locations(&retrieve_scope, false, None)
                    .await
            }
            BallotItemKind::RefreshFromPollingLocations => {
                self.retriever
                    .retrieve_ballots_for_polling_locations(&retrieve_scope, true, watermark)
                    .await
            }
            BallotItemKind::RefreshFromVoters => {
                self.retriever
                    .refresh_ballots_for_voters(&retrieve_scope, watermark)
                    .await
            }
        };
        if !outcome.status.is_empty() {
            status.push(StatusEvent::ExecutorStatus {
                status: outcome.status.clone(),
            });
        }

        if outcome.success {
            if outcome.batch_set_id > 0 {
                chunk.batch_set_id = Some(outcome.batch_set_id);
                chunk.retrieve_row_count = outcome.retrieve_row_count;
                chunk.retrieve_date_completed = Some(self.clock.now());
                if !self.save_chunk(chunk, scope, status).await {
                    return false;
                }
                let completed = StatusEvent::PhaseCompleted {
                    phase: ChunkPhase::Retrieve,
                    row_count: outcome.retrieve_row_count,
                };
                self.audit.write(scope, &completed.to_string()).await;
                status.push(completed);

                if outcome.retrieve_row_count == 0 {
                    // Nothing came back; the process has no further work.
                    let empty = StatusEvent::EmptyRetrieval;
                    self.audit.write(scope, empty.code()).await;
                    status.push(empty);
                    return self.finalize(process, chunk, status).await;
                }
                true
            } else {
                // Success without a batch set: retrieval never opened one,
                // so there is nothing to analyze or create.
                let event = StatusEvent::NoBatchSetId;
                self.audit.write(scope, event.code()).await;
                status.push(event);
                self.finalize(process, chunk, status).await
            }
        } else {
            let failed = StatusEvent::RetrieveFailed {
                message: outcome.status,
            };
            if outcome.batch_set_id > 0 {
                // Partial failure with a set opened: keep the started
                // stamp and let the budget watchdog close it out.
                chunk.batch_set_id = Some(outcome.batch_set_id);
                let _ = self.save_chunk(chunk, scope, status).await;
            } else {
                // Clean failure: clear the stamp so the next invocation
                // retries from scratch.
                chunk.retrieve_date_started = None;
                let _ = self.save_chunk(chunk, scope, status).await;
            }
            self.audit.write_critical(scope, &failed.to_string()).await;
            status.push(failed);
            false
        }
    }

    async fn await_retrieve(
        &self,
        process: &mut BatchProcess,
        chunk: &mut BallotItemChunk,
        kind: BallotItemKind,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        if self.within_budget(chunk.retrieve_date_started, self.timeouts.retrieve()) {
            status.push(StatusEvent::PhaseWaiting {
                phase: ChunkPhase::Retrieve,
            });
            return true;
        }
        warn!(
            chunk_id = chunk.id,
            "retrieve phase ran past its budget, forcing completion"
        );

        let mut row_count = chunk.retrieve_row_count;
        if row_count == 0 {
            if let Some(batch_set_id) = chunk.batch_set_id {
                row_count = self
                    .count_rows(batch_set_id, RowDescriptionFilter::All, status)
                    .await;
            }
        }

        if row_count == 0 && kind.is_refresh() {
            // A refresh that produced nothing has nothing left to do.
            let event = StatusEvent::PhaseTimedOut {
                phase: ChunkPhase::Retrieve,
            };
            self.audit.write(scope, event.code()).await;
            status.push(event);
            chunk.retrieve_timed_out = true;
            return self.finalize(process, chunk, status).await;
        }

        chunk.retrieve_row_count = row_count;
        chunk.retrieve_date_completed = Some(self.clock.now());
        chunk.retrieve_timed_out = true;
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let event = StatusEvent::PhaseTimedOut {
            phase: ChunkPhase::Retrieve,
        };
        self.audit.write(scope, event.code()).await;
        status.push(event);
        true
    }

    async fn start_analyze(
        &self,
        process: &mut BatchProcess,
        chunk: &mut BallotItemChunk,
        kind: BallotItemKind,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        let Some(batch_set_id) = chunk.batch_set_id else {
            // Retrieval closed without opening a set (timeout recovery with
            // nothing counted); there is nothing to analyze.
            let event = StatusEvent::NoBatchSetId;
            self.audit.write(scope, event.code()).await;
            status.push(event);
            return self.finalize(process, chunk, status).await;
        };

        if chunk.retrieve_row_count == 0 {
            chunk.retrieve_row_count = self
                .count_rows(batch_set_id, RowDescriptionFilter::All, status)
                .await;
        }

        chunk.analyze_date_started = Some(self.clock.now());
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let started = StatusEvent::PhaseStarted {
            phase: ChunkPhase::Analyze,
        };
        self.audit.write(scope, started.code()).await;
        status.push(started);

        let pipe = self.pipeline.run(batch_set_id, BatchSetMode::AnalyzeAll).await;
        let rows_analyzed = pipe.rows_analyzed;
        let pipe_success = pipe.success;
        status.merge(pipe.status);
        if !pipe_success {
            // Leave the started stamp for the watchdog.
            self.audit
                .write_critical(scope, "ANALYZE_PASS_FAILED")
                .await;
            return false;
        }

        if rows_analyzed == 0 && kind == BallotItemKind::RefreshFromVoters {
            // No voter ballots needed refreshing; the process is done.
            chunk.analyze_row_count = 0;
            status.push(StatusEvent::PhaseCompleted {
                phase: ChunkPhase::Analyze,
                row_count: 0,
            });
            return self.finalize(process, chunk, status).await;
        }

        chunk.analyze_row_count = rows_analyzed;
        chunk.analyze_date_completed = Some(self.clock.now());
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let completed = StatusEvent::PhaseCompleted {
            phase: ChunkPhase::Analyze,
            row_count: rows_analyzed,
        };
        self.audit.write(scope, &completed.to_string()).await;
        status.push(completed);
        true
    }

    async fn await_analyze(
        &self,
        _process: &mut BatchProcess,
        chunk: &mut BallotItemChunk,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        if self.within_budget(chunk.analyze_date_started, self.timeouts.analyze()) {
            status.push(StatusEvent::PhaseWaiting {
                phase: ChunkPhase::Analyze,
            });
            return true;
        }
        warn!(
            chunk_id = chunk.id,
            "analyze phase ran past its budget, forcing completion"
        );

        if let Some(batch_set_id) = chunk.batch_set_id {
            // The chunk is checked out, so one last synchronous pass can
            // finish the stragglers without the budget re-firing mid-run.
            let unanalyzed = self
                .count_rows(batch_set_id, RowDescriptionFilter::Unanalyzed, status)
                .await;
            if unanalyzed > 0 {
                let pipe = self.pipeline.run(batch_set_id, BatchSetMode::AnalyzeAll).await;
                status.merge(pipe.status);
            }
            chunk.analyze_row_count = self
                .count_rows(batch_set_id, RowDescriptionFilter::Analyzed, status)
                .await;
        }

        chunk.analyze_date_completed = Some(self.clock.now());
        chunk.analyze_timed_out = true;
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let event = StatusEvent::PhaseTimedOut {
            phase: ChunkPhase::Analyze,
        };
        self.audit.write(scope, event.code()).await;
        status.push(event);
        true
    }

    async fn start_create(
        &self,
        process: &mut BatchProcess,
        chunk: &mut BallotItemChunk,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        let Some(batch_set_id) = chunk.batch_set_id else {
            let event = StatusEvent::NoBatchSetId;
            self.audit.write(scope, event.code()).await;
            status.push(event);
            return self.finalize(process, chunk, status).await;
        };

        chunk.create_date_started = Some(self.clock.now());
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let started = StatusEvent::PhaseStarted {
            phase: ChunkPhase::Create,
        };
        self.audit.write(scope, started.code()).await;
        status.push(started);

        let pipe = self.pipeline.run(batch_set_id, BatchSetMode::CreateAll).await;
        let rows_created = pipe.rows_created;
        let pipe_success = pipe.success;
        status.merge(pipe.status);
        if !pipe_success {
            self.audit.write_critical(scope, "CREATE_PASS_FAILED").await;
            return false;
        }

        chunk.create_row_count = rows_created;
        chunk.create_date_completed = Some(self.clock.now());
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let completed = StatusEvent::PhaseCompleted {
            phase: ChunkPhase::Create,
            row_count: rows_created,
        };
        self.audit.write(scope, &completed.to_string()).await;
        status.push(completed);
        info!(
            chunk_id = chunk.id,
            rows_created, "create phase finished, completing process"
        );

        // Create is the terminal phase; the process finishes with it.
        self.finalize(process, chunk, status).await
    }

    async fn await_create(
        &self,
        _process: &mut BatchProcess,
        chunk: &mut BallotItemChunk,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        if self.within_budget(chunk.create_date_started, self.timeouts.create()) {
            status.push(StatusEvent::PhaseWaiting {
                phase: ChunkPhase::Create,
            });
            return true;
        }
        warn!(
            chunk_id = chunk.id,
            "create phase ran past its budget, forcing completion"
        );

        if chunk.create_row_count == 0 {
            if let Some(batch_set_id) = chunk.batch_set_id {
                chunk.create_row_count = self
                    .count_rows(batch_set_id, RowDescriptionFilter::Created, status)
                    .await;
            }
        }
        chunk.create_date_completed = Some(self.clock.now());
        chunk.create_timed_out = true;
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let event = StatusEvent::PhaseTimedOut {
            phase: ChunkPhase::Create,
        };
        self.audit.write(scope, event.code()).await;
        status.push(event);
        // The next invocation lands on Done and stamps the process.
        true
    }

    async fn finalize(
        &self,
        process: &mut BatchProcess,
        chunk: &mut BallotItemChunk,
        status: &mut StatusLog,
    ) -> bool {
        let outcome = self
            .finalizer
            .mark_complete(process, FinalizeChunk::BallotItem(chunk))
            .await;
        status.merge(outcome.status);
        outcome.success
    }

    fn within_budget(&self, started: Option<DateTime<Utc>>, budget: Duration) -> bool {
        match started {
            Some(started) => self.clock.now() - started < budget,
            // A missing stamp cannot wait; recovery handles it.
            None => false,
        }
    }

    async fn count_rows(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
        status: &mut StatusLog,
    ) -> i64 {
        match self
            .store
            .count_rows_in_batch_set(batch_set_id, filter)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                status.push(StatusEvent::StoreFailure {
                    operation: "count_rows_in_batch_set".to_string(),
                    message: e.to_string(),
                });
                0
            }
        }
    }

    async fn save_chunk(
        &self,
        chunk: &BallotItemChunk,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        match self.store.update_ballot_item_chunk(chunk).await {
            Ok(()) => true,
            Err(e) => {
                let event = StatusEvent::StoreFailure {
                    operation: "update_ballot_item_chunk".to_string(),
                    message: e.to_string(),
                };
                self.audit.write_critical(scope, &event.to_string()).await;
                status.push(event);
                false
            }
        }
    }

    async fn store_failure(
        &self,
        scope: LogScope,
        mut status: StatusLog,
        operation: &str,
        error: crate::store::StoreError,
    ) -> AdvanceOutcome {
        let event = StatusEvent::StoreFailure {
            operation: operation.to_string(),
            message: error.to_string(),
        };
        self.audit.write_critical(&scope, &event.to_string()).await;
        status.push(event);
        AdvanceOutcome::new(false, status)
    }
}
