//! # Batch Process Scheduler
//!
//! The entry point of the orchestration core. One
//! [`advance_pipeline`](BatchProcessScheduler::advance_pipeline) call
//! performs exactly one scheduling step: report the system counts, pick at
//! most one process to advance, activate or synthesize a job when the
//! queue has room, and dispatch to the kind's processor. Repeated
//! invocations from an external trigger are what make long jobs progress;
//! a single call never blocks on more than one collaborator round trip.
//! Admin actions enqueue ballot work through the `schedule_*` helpers;
//! the rows they insert wait for a later invocation to activate them.
//!
//! ## Admission control
//!
//! The configured cap on simultaneously active processes (default 3) is
//! the system's only load shedding. Nothing is ever activated while the
//! cap is reached, and within one invocation at most one process moves,
//! which keeps progress fair across many queued jobs.

use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::executors::{AnalyticsNextStepOutcome, StageExecutors};
use crate::models::{BatchProcess, NewBatchProcess, ProcessKind, ProcessRoute};
use crate::pipeline::BatchSetPipeline;
use crate::store::{ProcessListFilter, ProcessStore, StoreError};

use super::analytics::AnalyticsProcessor;
use super::audit::{AuditLog, LogScope};
use super::ballot_item::BallotItemProcessor;
use super::finalizer::ProcessFinalizer;
use super::handle_search::HandleSearchProcessor;
use super::status::{SchedulerOutcome, StatusEvent, StatusLog};

/// Cooperative single-step scheduler over the batch process store
pub struct BatchProcessScheduler {
    store: Arc<dyn ProcessStore>,
    executors: StageExecutors,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    scheduler_id: Uuid,
    ballot: BallotItemProcessor,
    analytics: AnalyticsProcessor,
    handle_search: HandleSearchProcessor,
}

impl BatchProcessScheduler {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        executors: StageExecutors,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let audit = AuditLog::new(store.clone());
        let finalizer = ProcessFinalizer::new(store.clone(), audit.clone(), clock.clone());
        let pipeline = BatchSetPipeline::new(
            store.clone(),
            executors.transformer.clone(),
            config.status_detail_limit,
        );
        let ballot = BallotItemProcessor::new(
            store.clone(),
            executors.retriever.clone(),
            pipeline,
            finalizer.clone(),
            audit.clone(),
            clock.clone(),
            config.phase_timeouts,
        );
        let analytics = AnalyticsProcessor::new(
            store.clone(),
            executors.analytics.clone(),
            finalizer,
            audit.clone(),
            clock.clone(),
        );
        let handle_search = HandleSearchProcessor::new(
            store.clone(),
            executors.handle_search.clone(),
            audit.clone(),
            clock.clone(),
        );
        Self {
            store,
            executors,
            audit,
            clock,
            config,
            scheduler_id: Uuid::new_v4(),
            ballot,
            analytics,
            handle_search,
        }
    }

    /// Perform one scheduling step
    #[instrument(skip(self), fields(scheduler_id = %self.scheduler_id))]
    pub async fn advance_pipeline(&self) -> SchedulerOutcome {
        let mut status = StatusLog::new();

        if !self.config.system_on {
            info!("batch process system is turned off");
            status.push(StatusEvent::SystemOff);
            return SchedulerOutcome::new(true, status);
        }

        let total_active = match self.store.count_active_batch_processes().await {
            Ok(count) => count,
            Err(e) => {
                return self
                    .system_failure(status, "count_active_batch_processes", e)
                    .await;
            }
        };
        let total_checked_out = match self.store.count_checked_out_batch_processes().await {
            Ok(count) => count,
            Err(e) => {
                return self
                    .system_failure(status, "count_checked_out_batch_processes", e)
                    .await;
            }
        };
        status.push(StatusEvent::ActiveProcessCount(total_active));
        status.push(StatusEvent::CheckedOutProcessCount(total_checked_out));

        let active = match self.store.batch_process_list(ProcessListFilter::Active).await {
            Ok(list) => list,
            Err(e) => return self.system_failure(status, "batch_process_list", e).await,
        };
        let mut selected = active.into_iter().next();
        status.push(StatusEvent::ProcessesSelected(usize::from(
            selected.is_some(),
        )));

        let mut activated = 0usize;
        if selected.is_none() && total_active < i64::from(self.config.max_active_processes) {
            match self.activate_queued(&mut status).await {
                Ok(Some(process)) => {
                    activated = 1;
                    selected = Some(process);
                }
                Ok(None) => {
                    if let Some(process) = self.synthesize_job(&mut status).await {
                        activated = 1;
                        selected = Some(process);
                    }
                }
                Err(e) => return self.system_failure(status, "batch_process_list", e).await,
            }
        }
        status.push(StatusEvent::ProcessesActivated(activated));

        let Some(mut process) = selected else {
            debug!("nothing to advance this invocation");
            return SchedulerOutcome::new(true, status);
        };

        info!(
            batch_process_id = process.id,
            kind = %process.kind_of_process,
            "advancing batch process"
        );
        let outcome = match process.kind_of_process.route() {
            ProcessRoute::BallotItems(kind) => {
                let mut outcome = self.ballot.process_one(&mut process, kind).await;
                // Ballot kinds suspend between invocations, so the
                // checkout marker never outlives the call.
                self.clear_checkout(&mut process, &mut outcome.status).await;
                outcome
            }
            ProcessRoute::ChunkedAnalytics(kind) => {
                self.analytics.process_chunked(&mut process, kind).await
            }
            ProcessRoute::SitewideDailyMetrics => {
                self.analytics.process_sitewide_daily(&mut process).await
            }
            ProcessRoute::HandleSearch => self.handle_search.process_one(&mut process).await,
        };
        status.merge(outcome.status);
        SchedulerOutcome::new(outcome.success, status)
    }

    /// Queue a full ballot item retrieve for one election
    pub async fn schedule_retrieve_ballot_items(
        &self,
        google_civic_election_id: i64,
        state_code: &str,
    ) -> SchedulerOutcome {
        let new = NewBatchProcess::new(ProcessKind::RetrieveBallotItemsFromPollingLocations)
            .with_election(google_civic_election_id, state_code);
        self.schedule_admin_job(new).await
    }

    /// Queue a refresh of ballot items already retrieved for one election
    pub async fn schedule_refresh_ballot_items(
        &self,
        google_civic_election_id: i64,
        state_code: &str,
    ) -> SchedulerOutcome {
        let new = NewBatchProcess::new(ProcessKind::RefreshBallotItemsFromPollingLocations)
            .with_election(google_civic_election_id, state_code);
        self.schedule_admin_job(new).await
    }

    /// Queue a refresh of ballots voters retrieved at their own addresses
    pub async fn schedule_refresh_voter_ballot_items(
        &self,
        google_civic_election_id: i64,
        state_code: &str,
        voter_id: i64,
    ) -> SchedulerOutcome {
        let new = NewBatchProcess::new(ProcessKind::RefreshBallotItemsFromVoters)
            .with_election(google_civic_election_id, state_code)
            .with_voter(voter_id);
        self.schedule_admin_job(new).await
    }

    /// Insert one queued process on behalf of an admin action
    async fn schedule_admin_job(&self, new: NewBatchProcess) -> SchedulerOutcome {
        let mut status = StatusLog::new();
        let kind = new.kind_of_process;
        let scope = LogScope {
            kind_of_process: Some(kind),
            google_civic_election_id: new.google_civic_election_id,
            state_code: new.state_code.clone(),
            ..LogScope::default()
        };
        match self.store.create_batch_process(new).await {
            Ok(process) => {
                info!(
                    batch_process_id = process.id,
                    kind = %kind,
                    "scheduled batch process"
                );
                let event = StatusEvent::ScheduledProcess { kind };
                self.audit
                    .write(&LogScope::for_process(&process), event.code())
                    .await;
                status.push(event);
                SchedulerOutcome::new(true, status)
            }
            Err(e) => {
                let event = StatusEvent::ScheduleFailed {
                    kind,
                    message: e.to_string(),
                };
                self.audit.write_critical(&scope, &event.to_string()).await;
                status.push(event);
                SchedulerOutcome::new(false, status)
            }
        }
    }

    /// Start the first queued process whose activation stamp persists
    async fn activate_queued(
        &self,
        status: &mut StatusLog,
    ) -> Result<Option<BatchProcess>, StoreError> {
        let queued = self
            .store
            .batch_process_list(ProcessListFilter::Queued)
            .await?;
        for mut process in queued {
            process.date_started = Some(self.clock.now());
            match self.store.update_batch_process(&process).await {
                Ok(()) => {
                    debug!(batch_process_id = process.id, "activated queued process");
                    return Ok(Some(process));
                }
                Err(e) => {
                    // Try the next queued row; this one stays queued.
                    let event = StatusEvent::DateStartedNotSaved {
                        batch_process_id: process.id,
                    };
                    self.audit
                        .write_critical(&LogScope::for_process(&process), &format!("{event} {e}"))
                        .await;
                    status.push(event);
                }
            }
        }
        Ok(None)
    }

    /// Create at most one new job from the policy collaborators
    async fn synthesize_job(&self, status: &mut StatusLog) -> Option<BatchProcess> {
        // Handle-search backlog takes priority over analytics.
        let backlog = self.executors.handle_search.candidates_needing_search().await;
        if backlog > 0 {
            let kind = ProcessKind::SearchTwitterForCandidateTwitterHandle;
            match self.store.create_batch_process(NewBatchProcess::new(kind)).await {
                Ok(process) => {
                    info!(batch_process_id = process.id, backlog, "scheduled handle search");
                    let event = StatusEvent::ScheduledProcess { kind };
                    self.audit
                        .write(&LogScope::for_process(&process), event.code())
                        .await;
                    status.push(event);
                    // Left queued on purpose; its processor stamps
                    // date_started when the search actually starts.
                    return Some(process);
                }
                Err(e) => {
                    let event = StatusEvent::ScheduleFailed {
                        kind,
                        message: e.to_string(),
                    };
                    self.audit
                        .write_critical(&LogScope::default(), &event.to_string())
                        .await;
                    status.push(event);
                }
            }
        }

        // One analytics job at a time; the chunked kinds share tables.
        match self.store.analytics_process_is_running().await {
            Ok(true) => {
                debug!("analytics process already running, not scheduling another");
                return None;
            }
            Ok(false) => {}
            Err(e) => {
                let event = StatusEvent::StoreFailure {
                    operation: "analytics_process_is_running".to_string(),
                    message: e.to_string(),
                };
                self.audit
                    .write_critical(&LogScope::default(), &event.to_string())
                    .await;
                status.push(event);
                return None;
            }
        }

        let next = self.executors.analytics.processing_next_step().await;
        if !next.success {
            if !next.status.is_empty() {
                status.push(StatusEvent::ExecutorStatus {
                    status: next.status,
                });
            }
            return None;
        }
        if !next.analytics_processing_status_found {
            return None;
        }
        let kind = next_analytics_kind(&next)?;

        let mut new = NewBatchProcess::new(kind);
        if let Some(date_as_integer) = next.analytics_date_as_integer {
            new = new.with_analytics_date(date_as_integer);
        }
        let mut process = match self.store.create_batch_process(new).await {
            Ok(process) => process,
            Err(e) => {
                let event = StatusEvent::ScheduleFailed {
                    kind,
                    message: e.to_string(),
                };
                self.audit
                    .write_critical(&LogScope::default(), &event.to_string())
                    .await;
                status.push(event);
                return None;
            }
        };
        let event = StatusEvent::ScheduledProcess { kind };
        self.audit
            .write(&LogScope::for_process(&process), event.code())
            .await;
        status.push(event);
        info!(batch_process_id = process.id, kind = %kind, "scheduled analytics process");

        process.date_started = Some(self.clock.now());
        if let Err(e) = self.store.update_batch_process(&process).await {
            // Stays queued; a later invocation activates it.
            let event = StatusEvent::DateStartedNotSaved {
                batch_process_id: process.id,
            };
            self.audit
                .write_critical(&LogScope::for_process(&process), &format!("{event} {e}"))
                .await;
            status.push(event);
            return None;
        }
        Some(process)
    }

    async fn clear_checkout(&self, process: &mut BatchProcess, status: &mut StatusLog) {
        if process.date_checked_out.is_none() {
            return;
        }
        process.date_checked_out = None;
        if let Err(e) = self.store.update_batch_process(process).await {
            let event = StatusEvent::CheckoutNotCleared {
                batch_process_id: process.id,
            };
            self.audit
                .write_critical(&LogScope::for_process(process), &format!("{event} {e}"))
                .await;
            status.push(event);
        }
    }

    async fn system_failure(
        &self,
        mut status: StatusLog,
        operation: &str,
        error: StoreError,
    ) -> SchedulerOutcome {
        let event = StatusEvent::StoreFailure {
            operation: operation.to_string(),
            message: error.to_string(),
        };
        self.audit
            .write_critical(&LogScope::default(), &event.to_string())
            .await;
        status.push(event);
        SchedulerOutcome::new(false, status)
    }
}

/// First due phase wins, in the fixed analytics priority order
fn next_analytics_kind(next: &AnalyticsNextStepOutcome) -> Option<ProcessKind> {
    if next.augment_analytics_action_with_election_id {
        Some(ProcessKind::AugmentAnalyticsActionWithElectionId)
    } else if next.augment_analytics_action_with_first_visit {
        Some(ProcessKind::AugmentAnalyticsActionWithFirstVisit)
    } else if next.calculate_sitewide_voter_metrics {
        Some(ProcessKind::CalculateSitewideVoterMetrics)
    } else if next.calculate_sitewide_daily_metrics {
        Some(ProcessKind::CalculateSitewideDailyMetrics)
    } else if next.calculate_sitewide_election_metrics {
        Some(ProcessKind::CalculateSitewideElectionMetrics)
    } else if next.calculate_organization_daily_metrics {
        Some(ProcessKind::CalculateOrganizationDailyMetrics)
    } else if next.calculate_organization_election_metrics {
        Some(ProcessKind::CalculateOrganizationElectionMetrics)
    } else {
        None
    }
}
