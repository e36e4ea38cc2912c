//! # Handle Search Processor
//!
//! Single-shot bulk search for candidate social handles. The process is
//! created queued by the scheduler when a backlog exists and both starts
//! and completes inside one invocation. A failed search leaves the record
//! checked out on purpose: the stall is the operator's signal to look at
//! the search backend before more of these are scheduled.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::clock::Clock;
use crate::executors::HandleSearchExecutor;
use crate::models::BatchProcess;
use crate::store::ProcessStore;

use super::audit::{AuditLog, LogScope};
use super::status::{AdvanceOutcome, StatusEvent, StatusLog};

/// Runs one bulk candidate handle search per process
pub struct HandleSearchProcessor {
    store: Arc<dyn ProcessStore>,
    executor: Arc<dyn HandleSearchExecutor>,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl HandleSearchProcessor {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        executor: Arc<dyn HandleSearchExecutor>,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            executor,
            audit,
            clock,
        }
    }

    #[instrument(skip(self, process), fields(batch_process_id = process.id))]
    pub async fn process_one(&self, process: &mut BatchProcess) -> AdvanceOutcome {
        let mut status = StatusLog::new();
        let scope = LogScope::for_process(process);

        let now = self.clock.now();
        process.date_started = Some(now);
        process.date_checked_out = Some(now);
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

        let outcome = self.executor.search_for_handles_in_bulk().await;
        if outcome.success {
            process.completion_summary = Some(format!(
                "Candidates Analyzed: {} out of {}",
                outcome.candidates_analyzed, outcome.candidates_to_analyze
            ));
            process.date_completed = Some(self.clock.now());
            process.date_checked_out = None;
            if let Err(e) = self.store.update_batch_process(process).await {
                let event = StatusEvent::StoreFailure {
                    operation: "update_batch_process".to_string(),
                    message: e.to_string(),
                };
                self.audit.write_critical(&scope, &event.to_string()).await;
                status.push(event);
                return AdvanceOutcome::new(false, status);
            }
            let event = StatusEvent::HandleSearchCompleted {
                analyzed: outcome.candidates_analyzed,
                to_analyze: outcome.candidates_to_analyze,
            };
            self.audit.write(&scope, &event.to_string()).await;
            status.push(event);
            info!(
                analyzed = outcome.candidates_analyzed,
                to_analyze = outcome.candidates_to_analyze,
                "bulk handle search finished"
            );
            AdvanceOutcome::new(true, status)
        } else {
            // Deliberately left checked out.
            self.audit
                .write_critical(&scope, &format!("HANDLE_SEARCH_FAILED {}", outcome.status))
                .await;
            status.push(StatusEvent::ExecutorStatus {
                status: outcome.status,
            });
            AdvanceOutcome::new(false, status)
        }
    }
}
