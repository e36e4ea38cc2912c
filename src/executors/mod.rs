//! # Stage Executors
//!
//! Collaborator seams for the work a batch process actually performs:
//! retrieving ballots, running analytics calculations, searching for
//! candidate handles, and transforming batch set rows. The orchestration
//! core owns lifecycle timestamps and persistence; executors own the
//! domain work and report outcomes.
//!
//! Executor methods never return `Err`. Partial and total failures are
//! carried in the outcome's `success`/`status` fields so the caller can
//! fold them into lifecycle decisions and audit entries, the same way a
//! failed retrieval leaves the phase open for the timeout watchdog rather
//! than aborting the scheduler invocation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{AnalyticsChunk, BatchProcess, BatchRowDescription};

/// Election scope handed to retrievals, copied from the owning process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveScope {
    pub google_civic_election_id: Option<i64>,
    pub state_code: Option<String>,
    pub voter_id: Option<i64>,
}

impl RetrieveScope {
    pub fn from_process(process: &BatchProcess) -> Self {
        Self {
            google_civic_election_id: process.google_civic_election_id,
            state_code: process.state_code.clone(),
            voter_id: process.voter_id,
        }
    }
}

/// Outcome of a ballot retrieval or refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotRetrieveOutcome {
    pub success: bool,
    pub status: String,
    /// Identifier of the batch set the retrieval produced; zero when the
    /// retrieval never got far enough to open one
    pub batch_set_id: i64,
    pub retrieve_row_count: i64,
}

/// Outcome of one chunked analytics pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsChunkOutcome {
    pub success: bool,
    pub status: String,
    pub analytics_updated_count: i64,
}

/// Outcome of a sitewide daily metrics calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetricsOutcome {
    pub success: bool,
    pub status: String,
    /// Calculated metric values, opaque to the orchestration core
    pub sitewide_daily_metrics_values: serde_json::Value,
}

/// Outcome of an operation that only succeeds or fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleOutcome {
    pub success: bool,
    pub status: String,
}

/// Outcome of a row count lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountOutcome {
    pub success: bool,
    pub status: String,
    pub count: i64,
}

/// Which analytics phase the processing-status record says is due next
///
/// At most one flag is honored per scheduler invocation, in the priority
/// order the fields are declared in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsNextStepOutcome {
    pub success: bool,
    pub status: String,
    pub analytics_processing_status_found: bool,
    pub analytics_date_as_integer: Option<i32>,
    pub augment_analytics_action_with_election_id: bool,
    pub augment_analytics_action_with_first_visit: bool,
    pub calculate_sitewide_voter_metrics: bool,
    pub calculate_sitewide_daily_metrics: bool,
    pub calculate_sitewide_election_metrics: bool,
    pub calculate_organization_daily_metrics: bool,
    pub calculate_organization_election_metrics: bool,
}

/// Outcome of a bulk candidate handle search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleSearchOutcome {
    pub success: bool,
    pub status: String,
    pub candidates_analyzed: i64,
    pub candidates_to_analyze: i64,
}

/// Outcome of deriving row actions from one row description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowActionOutcome {
    pub success: bool,
    pub status: String,
    pub actions_created: i64,
}

/// Outcome of importing row actions for one row description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowImportOutcome {
    pub success: bool,
    pub status: String,
    pub rows_changed: i64,
}

/// Import direction for analyzed row actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    Create,
    Delete,
}

/// Per-invocation cache of lookup records threaded through row analysis.
///
/// Lives for exactly one batch set pass; there is deliberately no shared
/// or global cache, so stale lookups cannot leak across invocations.
#[derive(Debug, Default)]
pub struct LookupCache {
    elections: HashMap<i64, serde_json::Value>,
    offices: HashMap<String, serde_json::Value>,
    measures: HashMap<String, serde_json::Value>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn election(&self, google_civic_election_id: i64) -> Option<&serde_json::Value> {
        self.elections.get(&google_civic_election_id)
    }

    pub fn cache_election(&mut self, google_civic_election_id: i64, record: serde_json::Value) {
        self.elections.insert(google_civic_election_id, record);
    }

    pub fn office(&self, we_vote_id: &str) -> Option<&serde_json::Value> {
        self.offices.get(we_vote_id)
    }

    pub fn cache_office(&mut self, we_vote_id: &str, record: serde_json::Value) {
        self.offices.insert(we_vote_id.to_string(), record);
    }

    pub fn measure(&self, we_vote_id: &str) -> Option<&serde_json::Value> {
        self.measures.get(we_vote_id)
    }

    pub fn cache_measure(&mut self, we_vote_id: &str, record: serde_json::Value) {
        self.measures.insert(we_vote_id.to_string(), record);
    }

    pub fn len(&self) -> usize {
        self.elections.len() + self.offices.len() + self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ballot retrieval operations
#[async_trait]
pub trait BallotItemRetriever: Send + Sync {
    /// Retrieve or refresh ballots for the polling locations in scope.
    /// `date_last_updated_should_not_exceed` limits refreshes to records
    /// untouched since the watermark; the initial retrieval passes `None`.
    async fn retrieve_ballots_for_polling_locations(
        &self,
        scope: &RetrieveScope,
        refresh_ballot_returned: bool,
        date_last_updated_should_not_exceed: Option<DateTime<Utc>>,
    ) -> BallotRetrieveOutcome;

    /// Refresh ballots previously returned to individual voters
    async fn refresh_ballots_for_voters(
        &self,
        scope: &RetrieveScope,
        date_last_updated_should_not_exceed: Option<DateTime<Utc>>,
    ) -> BallotRetrieveOutcome;
}

/// Analytics calculation operations
#[async_trait]
pub trait AnalyticsExecutor: Send + Sync {
    async fn augment_with_election_id(
        &self,
        process: &BatchProcess,
        chunk: &AnalyticsChunk,
    ) -> AnalyticsChunkOutcome;

    async fn augment_with_first_visit(
        &self,
        process: &BatchProcess,
        chunk: &AnalyticsChunk,
    ) -> AnalyticsChunkOutcome;

    async fn sitewide_voter_metrics(
        &self,
        process: &BatchProcess,
        chunk: &AnalyticsChunk,
    ) -> AnalyticsChunkOutcome;

    async fn calculate_sitewide_daily_metrics(
        &self,
        analytics_date_as_integer: i32,
    ) -> DailyMetricsOutcome;

    async fn save_sitewide_daily_metrics(&self, values: &serde_json::Value) -> SimpleOutcome;

    /// Advance the analytics-processing-status record past this date so
    /// the next-step policy stops offering it
    async fn mark_daily_metrics_finished(&self, analytics_date_as_integer: i32) -> SimpleOutcome;

    /// Consult the analytics-processing-status record for the next phase due
    async fn processing_next_step(&self) -> AnalyticsNextStepOutcome;

    /// Rows a stale chunk actually got through, used when force-completing
    async fn rows_reviewed_count(&self, batch_process_id: i64, chunk_id: i64) -> CountOutcome;
}

/// Candidate social handle search operations
#[async_trait]
pub trait HandleSearchExecutor: Send + Sync {
    /// Size of the backlog of candidates still needing a handle search
    async fn candidates_needing_search(&self) -> i64;

    async fn search_for_handles_in_bulk(&self) -> HandleSearchOutcome;
}

/// Batch set row transformation operations
#[async_trait]
pub trait RowTransformer: Send + Sync {
    /// Analyze one row description into row actions, reusing cached
    /// lookups where possible
    async fn derive_row_actions(
        &self,
        row: &BatchRowDescription,
        cache: &mut LookupCache,
    ) -> RowActionOutcome;

    /// Import (or delete) the previously derived row actions
    async fn import_row_actions(
        &self,
        row: &BatchRowDescription,
        mode: ImportMode,
    ) -> RowImportOutcome;
}

/// The full set of collaborators a scheduler needs
#[derive(Clone)]
pub struct StageExecutors {
    pub retriever: Arc<dyn BallotItemRetriever>,
    pub analytics: Arc<dyn AnalyticsExecutor>,
    pub handle_search: Arc<dyn HandleSearchExecutor>,
    pub transformer: Arc<dyn RowTransformer>,
}
