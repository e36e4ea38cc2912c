//! Scripted stage executors shared by the integration suite.
//!
//! One struct implements every executor seam. Outcomes are injected up
//! front and every call is recorded, so tests can both steer a scenario
//! and assert which collaborators the scheduler actually consulted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use civic_batch_core::executors::{
    AnalyticsChunkOutcome, AnalyticsExecutor, AnalyticsNextStepOutcome, BallotItemRetriever,
    BallotRetrieveOutcome, CountOutcome, DailyMetricsOutcome, HandleSearchExecutor,
    HandleSearchOutcome, ImportMode, LookupCache, RetrieveScope, RowActionOutcome,
    RowImportOutcome, RowTransformer, SimpleOutcome, StageExecutors,
};
use civic_batch_core::models::{AnalyticsChunk, BatchProcess, BatchRowDescription};

/// Bundle one scripted collaborator into the shape the scheduler wants
pub fn stage_executors(executors: &Arc<ScriptedExecutors>) -> StageExecutors {
    StageExecutors {
        retriever: executors.clone(),
        analytics: executors.clone(),
        handle_search: executors.clone(),
        transformer: executors.clone(),
    }
}

/// Every executor seam in one scripted collaborator.
///
/// Defaults are deliberately inert: retrievals succeed empty, no analytics
/// phase is due, the handle search backlog is zero, and every row
/// transformation succeeds. Tests override only what the scenario needs.
pub struct ScriptedExecutors {
    calls: Mutex<Vec<String>>,
    retrieve_outcome: Mutex<BallotRetrieveOutcome>,
    chunk_outcome: Mutex<AnalyticsChunkOutcome>,
    next_step: Mutex<AnalyticsNextStepOutcome>,
    daily_calculate: Mutex<DailyMetricsOutcome>,
    daily_save: Mutex<SimpleOutcome>,
    reviewed_count: Mutex<CountOutcome>,
    backlog: Mutex<i64>,
    handle_outcome: Mutex<HandleSearchOutcome>,
    failing_rows: Mutex<Vec<i64>>,
}

#[allow(dead_code)]
impl ScriptedExecutors {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            retrieve_outcome: Mutex::new(BallotRetrieveOutcome {
                success: true,
                status: String::new(),
                batch_set_id: 0,
                retrieve_row_count: 0,
            }),
            chunk_outcome: Mutex::new(AnalyticsChunkOutcome {
                success: true,
                status: String::new(),
                analytics_updated_count: 0,
            }),
            next_step: Mutex::new(AnalyticsNextStepOutcome {
                success: true,
                ..Default::default()
            }),
            daily_calculate: Mutex::new(DailyMetricsOutcome {
                success: true,
                status: String::new(),
                sitewide_daily_metrics_values: serde_json::json!({"visitors": 1200}),
            }),
            daily_save: Mutex::new(SimpleOutcome {
                success: true,
                status: String::new(),
            }),
            reviewed_count: Mutex::new(CountOutcome {
                success: true,
                status: String::new(),
                count: 0,
            }),
            backlog: Mutex::new(0),
            handle_outcome: Mutex::new(HandleSearchOutcome {
                success: true,
                status: String::new(),
                candidates_analyzed: 0,
                candidates_to_analyze: 0,
            }),
            failing_rows: Mutex::new(Vec::new()),
        })
    }

    pub fn set_retrieval(&self, success: bool, batch_set_id: i64, retrieve_row_count: i64) {
        *self.retrieve_outcome.lock() = BallotRetrieveOutcome {
            success,
            status: if success {
                String::new()
            } else {
                "external api unreachable".to_string()
            },
            batch_set_id,
            retrieve_row_count,
        };
    }

    pub fn set_chunk_outcome(&self, success: bool, analytics_updated_count: i64) {
        *self.chunk_outcome.lock() = AnalyticsChunkOutcome {
            success,
            status: if success {
                String::new()
            } else {
                "analytics pass failed".to_string()
            },
            analytics_updated_count,
        };
    }

    pub fn set_next_step(&self, next: AnalyticsNextStepOutcome) {
        *self.next_step.lock() = next;
    }

    pub fn set_daily_save_success(&self, success: bool) {
        *self.daily_save.lock() = SimpleOutcome {
            success,
            status: if success {
                String::new()
            } else {
                "daily metrics table rejected the row".to_string()
            },
        };
    }

    pub fn set_reviewed_count(&self, count: i64) {
        *self.reviewed_count.lock() = CountOutcome {
            success: true,
            status: String::new(),
            count,
        };
    }

    pub fn set_backlog(&self, backlog: i64) {
        *self.backlog.lock() = backlog;
    }

    pub fn set_handle_outcome(&self, success: bool, analyzed: i64, to_analyze: i64) {
        *self.handle_outcome.lock() = HandleSearchOutcome {
            success,
            status: if success {
                String::new()
            } else {
                "twitter rate limited".to_string()
            },
            candidates_analyzed: analyzed,
            candidates_to_analyze: to_analyze,
        };
    }

    /// Make `derive_row_actions` and `import_row_actions` fail for these rows
    pub fn fail_rows(&self, rows: Vec<i64>) {
        *self.failing_rows.lock() = rows;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl BallotItemRetriever for ScriptedExecutors {
    async fn retrieve_ballots_for_polling_locations(
        &self,
        _scope: &RetrieveScope,
        refresh_ballot_returned: bool,
        date_last_updated_should_not_exceed: Option<DateTime<Utc>>,
    ) -> BallotRetrieveOutcome {
        self.record(format!(
            "retrieve_polling refresh={} watermark={}",
            refresh_ballot_returned,
            date_last_updated_should_not_exceed.is_some()
        ));
        self.retrieve_outcome.lock().clone()
    }

    async fn refresh_ballots_for_voters(
        &self,
        _scope: &RetrieveScope,
        _date_last_updated_should_not_exceed: Option<DateTime<Utc>>,
    ) -> BallotRetrieveOutcome {
        self.record("refresh_voters");
        self.retrieve_outcome.lock().clone()
    }
}

#[async_trait]
impl AnalyticsExecutor for ScriptedExecutors {
    async fn augment_with_election_id(
        &self,
        _process: &BatchProcess,
        _chunk: &AnalyticsChunk,
    ) -> AnalyticsChunkOutcome {
        self.record("augment_election_id");
        self.chunk_outcome.lock().clone()
    }

    async fn augment_with_first_visit(
        &self,
        _process: &BatchProcess,
        _chunk: &AnalyticsChunk,
    ) -> AnalyticsChunkOutcome {
        self.record("augment_first_visit");
        self.chunk_outcome.lock().clone()
    }

    async fn sitewide_voter_metrics(
        &self,
        _process: &BatchProcess,
        _chunk: &AnalyticsChunk,
    ) -> AnalyticsChunkOutcome {
        self.record("sitewide_voter_metrics");
        self.chunk_outcome.lock().clone()
    }

    async fn calculate_sitewide_daily_metrics(
        &self,
        analytics_date_as_integer: i32,
    ) -> DailyMetricsOutcome {
        self.record(format!("calculate_daily {analytics_date_as_integer}"));
        self.daily_calculate.lock().clone()
    }

    async fn save_sitewide_daily_metrics(&self, _values: &serde_json::Value) -> SimpleOutcome {
        self.record("save_daily");
        self.daily_save.lock().clone()
    }

    async fn mark_daily_metrics_finished(&self, analytics_date_as_integer: i32) -> SimpleOutcome {
        self.record(format!("mark_finished {analytics_date_as_integer}"));
        SimpleOutcome {
            success: true,
            status: String::new(),
        }
    }

    async fn processing_next_step(&self) -> AnalyticsNextStepOutcome {
        self.record("next_step");
        self.next_step.lock().clone()
    }

    async fn rows_reviewed_count(&self, batch_process_id: i64, chunk_id: i64) -> CountOutcome {
        self.record(format!("rows_reviewed_count {batch_process_id} {chunk_id}"));
        self.reviewed_count.lock().clone()
    }
}

#[async_trait]
impl HandleSearchExecutor for ScriptedExecutors {
    async fn candidates_needing_search(&self) -> i64 {
        self.record("candidates_needing_search");
        *self.backlog.lock()
    }

    async fn search_for_handles_in_bulk(&self) -> HandleSearchOutcome {
        self.record("search_for_handles_in_bulk");
        self.handle_outcome.lock().clone()
    }
}

#[async_trait]
impl RowTransformer for ScriptedExecutors {
    async fn derive_row_actions(
        &self,
        row: &BatchRowDescription,
        _cache: &mut LookupCache,
    ) -> RowActionOutcome {
        self.record(format!("derive row={}", row.id));
        if self.failing_rows.lock().contains(&row.id) {
            RowActionOutcome {
                success: false,
                status: "could not match office".to_string(),
                actions_created: 0,
            }
        } else {
            RowActionOutcome {
                success: true,
                status: String::new(),
                actions_created: 1,
            }
        }
    }

    async fn import_row_actions(
        &self,
        row: &BatchRowDescription,
        mode: ImportMode,
    ) -> RowImportOutcome {
        self.record(format!("import row={} mode={:?}", row.id, mode));
        if self.failing_rows.lock().contains(&row.id) {
            RowImportOutcome {
                success: false,
                status: "constraint violation".to_string(),
                rows_changed: 0,
            }
        } else {
            RowImportOutcome {
                success: true,
                status: String::new(),
                rows_changed: 1,
            }
        }
    }
}
