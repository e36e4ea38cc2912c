//! # Analytics Processor
//!
//! Advances the analytics process kinds. Chunked kinds work one analytics
//! chunk per invocation with a self-healing recovery rule: a chunk left
//! started by an earlier invocation is force-completed (recording how many
//! rows it actually got through) before any new work begins. The
//! sitewide-daily kind is single-shot and only completes when both the
//! calculation and the save succeed, so a failed day is retried on the
//! next invocation.
//!
//! Unlike the ballot item path, analytics manages its own checkout
//! lifecycle: every exit releases `date_checked_out` except the paths the
//! record is deliberately left on for an operator to notice.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::executors::AnalyticsExecutor;
use crate::models::{AnalyticsChunk, BatchProcess, ChunkedAnalyticsKind};
use crate::store::ProcessStore;

use super::audit::{AuditLog, LogScope};
use super::finalizer::{FinalizeChunk, ProcessFinalizer};
use super::status::{AdvanceOutcome, StatusEvent, StatusLog};

/// Drives the chunked and sitewide-daily analytics kinds
pub struct AnalyticsProcessor {
    store: Arc<dyn ProcessStore>,
    executor: Arc<dyn AnalyticsExecutor>,
    finalizer: ProcessFinalizer,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl AnalyticsProcessor {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        executor: Arc<dyn AnalyticsExecutor>,
        finalizer: ProcessFinalizer,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            executor,
            finalizer,
            audit,
            clock,
        }
    }

    /// Advance one chunked analytics process by one chunk
    #[instrument(skip(self, process), fields(batch_process_id = process.id, kind = %process.kind_of_process))]
    pub async fn process_chunked(
        &self,
        process: &mut BatchProcess,
        kind: ChunkedAnalyticsKind,
    ) -> AdvanceOutcome {
        let mut status = StatusLog::new();
        let scope = LogScope::for_process(process);

        if !self.checkout(process, &scope, &mut status).await {
            return AdvanceOutcome::new(false, status);
        }

        let mut chunk = match self.store.analytics_chunk_not_completed(process.id).await {
            Ok(Some(chunk)) if chunk.is_stale() => {
                // Left behind by an earlier invocation; close it out and
                // let the work resume on a fresh chunk next time.
                let success = self
                    .force_complete_stale(process, chunk, &scope, &mut status)
                    .await;
                let released = self.release_checkout(process, &scope, &mut status).await;
                return AdvanceOutcome::new(success && released, status);
            }
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                match self
                    .store
                    .create_analytics_chunk(process.id, process.analytics_date_as_integer)
                    .await
                {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        self.push_store_failure(&scope, &mut status, "create_analytics_chunk", &e)
                            .await;
                        let _ = self.release_checkout(process, &scope, &mut status).await;
                        return AdvanceOutcome::new(false, status);
                    }
                }
            }
            Err(e) => {
                self.push_store_failure(&scope, &mut status, "analytics_chunk_not_completed", &e)
                    .await;
                let _ = self.release_checkout(process, &scope, &mut status).await;
                return AdvanceOutcome::new(false, status);
            }
        };
        let scope = scope.with_analytics_chunk(&chunk);

        chunk.date_started = Some(self.clock.now());
        if !self.save_chunk(&chunk, &scope, &mut status).await {
            let _ = self.release_checkout(process, &scope, &mut status).await;
            return AdvanceOutcome::new(false, status);
        }

        let success = match kind {
            ChunkedAnalyticsKind::AugmentWithElectionId => {
                let outcome = self.executor.augment_with_election_id(process, &chunk).await;
                self.record_chunk_outcome(&mut chunk, outcome, &scope, &mut status)
                    .await
            }
            ChunkedAnalyticsKind::AugmentWithFirstVisit => {
                let outcome = self.executor.augment_with_first_visit(process, &chunk).await;
                self.record_chunk_outcome(&mut chunk, outcome, &scope, &mut status)
                    .await
            }
            ChunkedAnalyticsKind::SitewideVoterMetrics => {
                let outcome = self.executor.sitewide_voter_metrics(process, &chunk).await;
                self.record_chunk_outcome(&mut chunk, outcome, &scope, &mut status)
                    .await
            }
            ChunkedAnalyticsKind::SitewideElectionMetrics
            | ChunkedAnalyticsKind::OrganizationDailyMetrics
            | ChunkedAnalyticsKind::OrganizationElectionMetrics => {
                // No calculation behind these kinds yet; close them out so
                // the next-step policy moves on.
                let outcome = self
                    .finalizer
                    .mark_complete(process, FinalizeChunk::Analytics(&mut chunk))
                    .await;
                status.merge(outcome.status);
                outcome.success
            }
        };

        let released = self.release_checkout(process, &scope, &mut status).await;
        AdvanceOutcome::new(success && released, status)
    }

    /// Run the sitewide daily rollup for the process's date
    #[instrument(skip(self, process), fields(batch_process_id = process.id))]
    pub async fn process_sitewide_daily(&self, process: &mut BatchProcess) -> AdvanceOutcome {
        let mut status = StatusLog::new();
        let scope = LogScope::for_process(process);

        // The daily rollup restarts from scratch each time it is picked
        // up, so the started stamp moves with the checkout.
        let now = self.clock.now();
        process.date_checked_out = Some(now);
        process.date_started = Some(now);
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

        let Some(date_as_integer) = process.analytics_date_as_integer else {
            let event = StatusEvent::DailyMetricsNotSaved {
                message: "analytics_date_as_integer missing".to_string(),
            };
            self.audit.write_critical(&scope, &event.to_string()).await;
            status.push(event);
            let _ = self.release_checkout(process, &scope, &mut status).await;
            return AdvanceOutcome::new(false, status);
        };

        let calculated = self
            .executor
            .calculate_sitewide_daily_metrics(date_as_integer)
            .await;
        if !calculated.success {
            let event = StatusEvent::DailyMetricsNotSaved {
                message: calculated.status,
            };
            self.audit.write_critical(&scope, &event.to_string()).await;
            status.push(event);
            let _ = self.release_checkout(process, &scope, &mut status).await;
            return AdvanceOutcome::new(false, status);
        }

        let saved = self
            .executor
            .save_sitewide_daily_metrics(&calculated.sitewide_daily_metrics_values)
            .await;
        if !saved.success {
            // Stays active; the next invocation retries the whole day.
            process.completion_summary = Some("Sitewide daily metrics NOT saved".to_string());
            process.date_checked_out = None;
            if let Err(e) = self.store.update_batch_process(process).await {
                self.push_store_failure(&scope, &mut status, "update_batch_process", &e)
                    .await;
            }
            let event = StatusEvent::DailyMetricsNotSaved {
                message: saved.status,
            };
            self.audit.write_critical(&scope, &event.to_string()).await;
            status.push(event);
            return AdvanceOutcome::new(false, status);
        }

        process.completion_summary = Some("Sitewide daily metrics SAVED".to_string());
        process.date_completed = Some(self.clock.now());
        process.date_checked_out = None;
        if let Err(e) = self.store.update_batch_process(process).await {
            self.push_store_failure(&scope, &mut status, "update_batch_process", &e)
                .await;
            return AdvanceOutcome::new(false, status);
        }
        let event = StatusEvent::DailyMetricsSaved;
        self.audit.write(&scope, event.code()).await;
        status.push(event);
        info!(date_as_integer, "sitewide daily metrics saved");

        // Move the processing-status record past this date so the
        // next-step policy stops offering it.
        let finished = self.executor.mark_daily_metrics_finished(date_as_integer).await;
        if !finished.success {
            warn!(
                date_as_integer,
                status = %finished.status,
                "daily metrics finished flag not recorded"
            );
            self.audit
                .write_critical(&scope, &format!("DAILY_METRICS_FLAG_NOT_SAVED {}", finished.status))
                .await;
            status.push(StatusEvent::ExecutorStatus {
                status: finished.status,
            });
        }

        AdvanceOutcome::new(true, status)
    }

    async fn force_complete_stale(
        &self,
        process: &BatchProcess,
        mut chunk: AnalyticsChunk,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        warn!(
            chunk_id = chunk.id,
            batch_process_id = process.id,
            "stale analytics chunk found, force completing"
        );
        let scope = scope.clone().with_analytics_chunk(&chunk);

        let reviewed = self.executor.rows_reviewed_count(process.id, chunk.id).await;
        if reviewed.success {
            chunk.number_of_rows_successfully_reviewed = reviewed.count;
        } else if !reviewed.status.is_empty() {
            status.push(StatusEvent::ExecutorStatus {
                status: reviewed.status,
            });
        }
        chunk.timed_out = true;
        chunk.date_completed = Some(self.clock.now());
        if !self.save_chunk(&chunk, &scope, status).await {
            return false;
        }

        let timed_out = StatusEvent::AnalyticsChunkTimedOut;
        self.audit.write(&scope, timed_out.code()).await;
        status.push(timed_out);
        status.push(StatusEvent::AnalyticsRowsReviewed {
            count: chunk.number_of_rows_successfully_reviewed,
        });
        true
    }

    async fn record_chunk_outcome(
        &self,
        chunk: &mut AnalyticsChunk,
        outcome: crate::executors::AnalyticsChunkOutcome,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        if !outcome.status.is_empty() {
            status.push(StatusEvent::ExecutorStatus {
                status: outcome.status.clone(),
            });
        }
        if !outcome.success {
            // Chunk stays started; the next invocation's stale recovery
            // closes it with whatever count the executor can report.
            self.audit
                .write_critical(scope, &format!("ANALYTICS_CHUNK_FAILED {}", outcome.status))
                .await;
            return false;
        }

        chunk.number_of_rows_successfully_reviewed = outcome.analytics_updated_count;
        chunk.date_completed = Some(self.clock.now());
        if !self.save_chunk(chunk, scope, status).await {
            return false;
        }
        let event = StatusEvent::AnalyticsRowsReviewed {
            count: outcome.analytics_updated_count,
        };
        self.audit.write(scope, &event.to_string()).await;
        status.push(event);
        true
    }

    async fn checkout(
        &self,
        process: &mut BatchProcess,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        if process.date_checked_out.is_some() {
            return true;
        }
        process.date_checked_out = Some(self.clock.now());
        match self.store.update_batch_process(process).await {
            Ok(()) => true,
            Err(e) => {
                let event = StatusEvent::CheckoutNotSaved {
                    batch_process_id: process.id,
                };
                self.audit
                    .write_critical(scope, &format!("{event} {e}"))
                    .await;
                status.push(event);
                false
            }
        }
    }

    async fn release_checkout(
        &self,
        process: &mut BatchProcess,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        if process.date_checked_out.is_none() {
            return true;
        }
        process.date_checked_out = None;
        match self.store.update_batch_process(process).await {
            Ok(()) => true,
            Err(e) => {
                let event = StatusEvent::CheckoutNotCleared {
                    batch_process_id: process.id,
                };
                self.audit
                    .write_critical(scope, &format!("{event} {e}"))
                    .await;
                status.push(event);
                false
            }
        }
    }

    async fn save_chunk(
        &self,
        chunk: &AnalyticsChunk,
        scope: &LogScope,
        status: &mut StatusLog,
    ) -> bool {
        match self.store.update_analytics_chunk(chunk).await {
            Ok(()) => true,
            Err(e) => {
                self.push_store_failure(scope, status, "update_analytics_chunk", &e)
                    .await;
                false
            }
        }
    }

    async fn push_store_failure(
        &self,
        scope: &LogScope,
        status: &mut StatusLog,
        operation: &str,
        error: &crate::store::StoreError,
    ) {
        let event = StatusEvent::StoreFailure {
            operation: operation.to_string(),
            message: error.to_string(),
        };
        self.audit.write_critical(scope, &event.to_string()).await;
        status.push(event);
    }
}
