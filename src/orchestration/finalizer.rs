//! # Process Finalizer
//!
//! Idempotent completion stamping for batch processes and their chunks.
//! Every unset lifecycle timestamp is filled with the current instant;
//! timestamps that are already set are never overwritten, so calling this
//! any number of times converges on the same record. The process row is
//! only stamped after its chunk saved, keeping "process completed" implying
//! "chunk closed".
//!
//! Checkout is deliberately not touched here; clearing it belongs to the
//! scheduler and the per-kind handlers.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::models::{AnalyticsChunk, BallotItemChunk, BatchProcess};
use crate::store::ProcessStore;

use super::audit::{AuditLog, LogScope};
use super::status::{StatusEvent, StatusLog};

/// Chunk to close out together with the process
pub enum FinalizeChunk<'a> {
    None,
    BallotItem(&'a mut BallotItemChunk),
    Analytics(&'a mut AnalyticsChunk),
}

/// Result of a finalization attempt
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub success: bool,
    pub status: StatusLog,
}

/// Stamps processes and chunks complete
#[derive(Clone)]
pub struct ProcessFinalizer {
    store: Arc<dyn ProcessStore>,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl ProcessFinalizer {
    pub fn new(store: Arc<dyn ProcessStore>, audit: AuditLog, clock: Arc<dyn Clock>) -> Self {
        Self { store, audit, clock }
    }

    /// Fill every unset lifecycle timestamp on the chunk and the process
    #[instrument(skip_all, fields(batch_process_id = process.id))]
    pub async fn mark_complete(
        &self,
        process: &mut BatchProcess,
        chunk: FinalizeChunk<'_>,
    ) -> FinalizeOutcome {
        let now = self.clock.now();
        let mut status = StatusLog::new();

        let chunk_scope = match &chunk {
            FinalizeChunk::BallotItem(c) => LogScope::for_process(process).with_ballot_chunk(c),
            FinalizeChunk::Analytics(c) => LogScope::for_process(process).with_analytics_chunk(c),
            FinalizeChunk::None => LogScope::for_process(process),
        };

        match chunk {
            FinalizeChunk::BallotItem(chunk) => {
                let mut changed = false;
                for slot in [
                    &mut chunk.retrieve_date_started,
                    &mut chunk.retrieve_date_completed,
                    &mut chunk.analyze_date_started,
                    &mut chunk.analyze_date_completed,
                    &mut chunk.create_date_started,
                    &mut chunk.create_date_completed,
                ] {
                    if slot.is_none() {
                        *slot = Some(now);
                        changed = true;
                    }
                }
                if changed {
                    if let Err(e) = self.store.update_ballot_item_chunk(chunk).await {
                        let event = StatusEvent::StoreFailure {
                            operation: "update_ballot_item_chunk".to_string(),
                            message: e.to_string(),
                        };
                        self.audit
                            .write_critical(&chunk_scope, &event.to_string())
                            .await;
                        status.push(event);
                        return FinalizeOutcome {
                            success: false,
                            status,
                        };
                    }
                }
            }
            FinalizeChunk::Analytics(chunk) => {
                let mut changed = false;
                if chunk.date_started.is_none() {
                    chunk.date_started = Some(now);
                    changed = true;
                }
                if chunk.date_completed.is_none() {
                    chunk.date_completed = Some(now);
                    changed = true;
                }
                if changed {
                    if let Err(e) = self.store.update_analytics_chunk(chunk).await {
                        let event = StatusEvent::StoreFailure {
                            operation: "update_analytics_chunk".to_string(),
                            message: e.to_string(),
                        };
                        self.audit
                            .write_critical(&chunk_scope, &event.to_string())
                            .await;
                        status.push(event);
                        return FinalizeOutcome {
                            success: false,
                            status,
                        };
                    }
                }
            }
            FinalizeChunk::None => {}
        }

        let mut process_changed = false;
        if process.date_started.is_none() {
            process.date_started = Some(now);
            process_changed = true;
        }
        if process.date_completed.is_none() {
            process.date_completed = Some(now);
            process_changed = true;
        }

        if process_changed {
            if let Err(e) = self.store.update_batch_process(process).await {
                let event = StatusEvent::StoreFailure {
                    operation: "update_batch_process".to_string(),
                    message: e.to_string(),
                };
                self.audit
                    .write_critical(&chunk_scope, &event.to_string())
                    .await;
                status.push(event);
                return FinalizeOutcome {
                    success: false,
                    status,
                };
            }
            let event = StatusEvent::ProcessMarkedComplete;
            self.audit.write(&chunk_scope, event.code()).await;
            status.push(event);
        } else {
            debug!("process already completed, nothing to stamp");
        }

        FinalizeOutcome {
            success: true,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{NewBatchProcess, ProcessKind};
    use crate::store::InMemoryProcessStore;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn harness() -> (Arc<InMemoryProcessStore>, ProcessFinalizer, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let store = Arc::new(InMemoryProcessStore::with_clock(Arc::new(clock.clone())));
        let audit = AuditLog::new(store.clone());
        let finalizer = ProcessFinalizer::new(store.clone(), audit, Arc::new(clock.clone()));
        (store, finalizer, clock)
    }

    #[tokio::test]
    async fn test_stamps_all_unset_timestamps() {
        let (store, finalizer, clock) = harness();
        let mut process = store
            .create_batch_process(NewBatchProcess::new(
                ProcessKind::RetrieveBallotItemsFromPollingLocations,
            ))
            .await
            .unwrap();
        let mut chunk = store.create_ballot_item_chunk(process.id).await.unwrap();
        chunk.retrieve_date_started = Some(clock.now());
        chunk.retrieve_date_completed = Some(clock.now());
        store.update_ballot_item_chunk(&chunk).await.unwrap();
        let retrieve_completed = chunk.retrieve_date_completed;

        let outcome = finalizer
            .mark_complete(&mut process, FinalizeChunk::BallotItem(&mut chunk))
            .await;
        assert!(outcome.success);
        assert!(outcome.status.has("BATCH_PROCESS_MARKED_COMPLETE"));

        assert!(process.date_started.is_some());
        assert!(process.date_completed.is_some());
        assert!(chunk.analyze_date_started.is_some());
        assert!(chunk.analyze_date_completed.is_some());
        assert!(chunk.create_date_started.is_some());
        assert!(chunk.create_date_completed.is_some());
        // Pre-set stamps survive untouched.
        assert_eq!(chunk.retrieve_date_completed, retrieve_completed);

        let stored = store.get_batch_process(process.id).unwrap();
        assert_eq!(stored.date_completed, process.date_completed);
    }

    #[tokio::test]
    async fn test_second_call_is_a_no_op() {
        let (store, finalizer, clock) = harness();
        let mut process = store
            .create_batch_process(NewBatchProcess::new(
                ProcessKind::CalculateSitewideVoterMetrics,
            ))
            .await
            .unwrap();
        let mut chunk = store
            .create_analytics_chunk(process.id, None)
            .await
            .unwrap();

        let first = finalizer
            .mark_complete(&mut process, FinalizeChunk::Analytics(&mut chunk))
            .await;
        assert!(first.success);
        let stamped_completed = process.date_completed;
        let audit_count = store.log_entries().len();

        clock.advance(chrono::Duration::minutes(10));
        let second = finalizer
            .mark_complete(&mut process, FinalizeChunk::Analytics(&mut chunk))
            .await;
        assert!(second.success);
        assert!(!second.status.has("BATCH_PROCESS_MARKED_COMPLETE"));
        assert_eq!(process.date_completed, stamped_completed);
        assert_eq!(store.log_entries().len(), audit_count);
    }

    #[tokio::test]
    async fn test_checkout_left_alone() {
        let (store, finalizer, clock) = harness();
        let mut process = store
            .create_batch_process(NewBatchProcess::new(
                ProcessKind::RefreshBallotItemsFromVoters,
            ))
            .await
            .unwrap();
        process.date_checked_out = Some(clock.now());
        store.update_batch_process(&process).await.unwrap();

        finalizer
            .mark_complete(&mut process, FinalizeChunk::None)
            .await;
        assert!(process.date_checked_out.is_some());
    }

    proptest! {
        /// Any subset of pre-set chunk timestamps converges to fully
        /// stamped, and a repeat run changes nothing.
        #[test]
        fn prop_finalize_idempotent(preset_mask in 0u8..64) {
            tokio_test::block_on(async move {
                let (store, finalizer, clock) = harness();
                let mut process = store
                    .create_batch_process(NewBatchProcess::new(
                        ProcessKind::RetrieveBallotItemsFromPollingLocations,
                    ))
                    .await
                    .unwrap();
                let mut chunk = store.create_ballot_item_chunk(process.id).await.unwrap();

                let preset = clock.now() - chrono::Duration::hours(1);
                let slots: [&mut Option<chrono::DateTime<Utc>>; 6] = [
                    &mut chunk.retrieve_date_started,
                    &mut chunk.retrieve_date_completed,
                    &mut chunk.analyze_date_started,
                    &mut chunk.analyze_date_completed,
                    &mut chunk.create_date_started,
                    &mut chunk.create_date_completed,
                ];
                for (bit, slot) in slots.into_iter().enumerate() {
                    if preset_mask & (1 << bit) != 0 {
                        *slot = Some(preset);
                    }
                }
                store.update_ballot_item_chunk(&chunk).await.unwrap();

                let first = finalizer
                    .mark_complete(&mut process, FinalizeChunk::BallotItem(&mut chunk))
                    .await;
                prop_assert!(first.success);
                prop_assert!(chunk.is_completed());
                prop_assert!(process.date_completed.is_some());

                let snapshot_chunk = chunk.clone();
                let snapshot_process = process.clone();

                clock.advance(chrono::Duration::minutes(5));
                let second = finalizer
                    .mark_complete(&mut process, FinalizeChunk::BallotItem(&mut chunk))
                    .await;
                prop_assert!(second.success);
                prop_assert_eq!(&chunk, &snapshot_chunk);
                prop_assert_eq!(&process, &snapshot_process);
                Ok(())
            })?;
        }
    }
}
