//! # Batch Set Pipeline
//!
//! Row-by-row transformation of a batch set. Analyze mode derives row
//! actions for every description that has not been analyzed yet, create
//! and delete modes import (or remove) the derived actions for analyzed
//! descriptions. One `LookupCache` lives for exactly one `run` call so
//! repeated election and office lookups within a set stay cheap without
//! leaking state across invocations.
//!
//! A failing row never aborts the batch. Its error detail is appended to
//! the outcome status only while the accumulated detail stays under the
//! configured bound, after that failures are only counted.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::executors::{ImportMode, LookupCache, RowTransformer};
use crate::models::RowDescriptionFilter;
use crate::orchestration::status::{StatusEvent, StatusLog};
use crate::store::ProcessStore;

/// What a pipeline run should do to the batch set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSetMode {
    AnalyzeAll,
    CreateAll,
    DeleteAll,
}

/// Counts and status for one pipeline run
#[derive(Debug, Clone)]
pub struct BatchSetOutcome {
    pub success: bool,
    pub status: StatusLog,
    pub rows_analyzed: i64,
    pub rows_created: i64,
    pub rows_deleted: i64,
}

impl BatchSetOutcome {
    fn empty() -> Self {
        Self {
            success: true,
            status: StatusLog::new(),
            rows_analyzed: 0,
            rows_created: 0,
            rows_deleted: 0,
        }
    }
}

/// Applies one transformation mode to every eligible row of a batch set
pub struct BatchSetPipeline {
    store: Arc<dyn ProcessStore>,
    transformer: Arc<dyn RowTransformer>,
    detail_limit: usize,
}

impl BatchSetPipeline {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        transformer: Arc<dyn RowTransformer>,
        detail_limit: usize,
    ) -> Self {
        Self {
            store,
            transformer,
            detail_limit,
        }
    }

    #[instrument(skip(self), fields(batch_set_id = batch_set_id, mode = ?mode))]
    pub async fn run(&self, batch_set_id: i64, mode: BatchSetMode) -> BatchSetOutcome {
        let mut outcome = BatchSetOutcome::empty();

        if batch_set_id <= 0 {
            outcome.success = false;
            outcome.status.push(StatusEvent::BatchSetIdRequired);
            return outcome;
        }

        let filter = match mode {
            BatchSetMode::AnalyzeAll => RowDescriptionFilter::Unanalyzed,
            BatchSetMode::CreateAll | BatchSetMode::DeleteAll => RowDescriptionFilter::Analyzed,
        };
        let rows = match self
            .store
            .batch_set_row_descriptions(batch_set_id, filter)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                outcome.success = false;
                outcome.status.push(StatusEvent::StoreFailure {
                    operation: "batch_set_row_descriptions".to_string(),
                    message: e.to_string(),
                });
                return outcome;
            }
        };
        debug!(row_count = rows.len(), "processing batch set rows");

        let mut detail_bytes = 0usize;
        let mut record_failure = |status: &mut StatusLog, row_id: i64, detail: &str| {
            if detail_bytes < self.detail_limit {
                let text = format!("row {row_id}: {detail}");
                detail_bytes += text.len();
                status.push(StatusEvent::ExecutorStatus { status: text });
            }
        };

        match mode {
            BatchSetMode::AnalyzeAll => {
                let mut cache = LookupCache::new();
                for mut row in rows {
                    let result = self.transformer.derive_row_actions(&row, &mut cache).await;
                    if !result.success {
                        warn!(row_id = row.id, status = %result.status, "row analyze failed");
                        record_failure(&mut outcome.status, row.id, &result.status);
                        continue;
                    }
                    row.analyzed = true;
                    match self.store.update_row_description(&row).await {
                        Ok(()) => outcome.rows_analyzed += 1,
                        Err(e) => {
                            warn!(row_id = row.id, error = %e, "analyzed flag not saved");
                            record_failure(&mut outcome.status, row.id, &e.to_string());
                        }
                    }
                }
                outcome.status.push(StatusEvent::RowsAnalyzed {
                    count: outcome.rows_analyzed,
                });
            }
            BatchSetMode::CreateAll => {
                for mut row in rows {
                    if row.created {
                        continue;
                    }
                    let result = self
                        .transformer
                        .import_row_actions(&row, ImportMode::Create)
                        .await;
                    if !result.success {
                        warn!(row_id = row.id, status = %result.status, "row create failed");
                        record_failure(&mut outcome.status, row.id, &result.status);
                        continue;
                    }
                    row.created = true;
                    match self.store.update_row_description(&row).await {
                        Ok(()) => outcome.rows_created += 1,
                        Err(e) => {
                            warn!(row_id = row.id, error = %e, "created flag not saved");
                            record_failure(&mut outcome.status, row.id, &e.to_string());
                        }
                    }
                }
                outcome.status.push(StatusEvent::RowsCreated {
                    count: outcome.rows_created,
                });
            }
            BatchSetMode::DeleteAll => {
                for row in rows {
                    let result = self
                        .transformer
                        .import_row_actions(&row, ImportMode::Delete)
                        .await;
                    if result.success {
                        outcome.rows_deleted += 1;
                    } else {
                        warn!(row_id = row.id, status = %result.status, "row delete failed");
                        record_failure(&mut outcome.status, row.id, &result.status);
                    }
                }
                outcome.status.push(StatusEvent::RowsDeleted {
                    count: outcome.rows_deleted,
                });
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{RowActionOutcome, RowImportOutcome};
    use crate::models::BatchRowDescription;
    use crate::store::InMemoryProcessStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Transformer that fails the row ids it is told to and records
    /// every call it sees.
    struct ScriptedTransformer {
        fail_rows: Vec<i64>,
        derive_calls: Mutex<Vec<i64>>,
        import_calls: Mutex<Vec<(i64, ImportMode)>>,
        cache_sizes: Mutex<Vec<usize>>,
    }

    impl ScriptedTransformer {
        fn new(fail_rows: Vec<i64>) -> Self {
            Self {
                fail_rows,
                derive_calls: Mutex::new(Vec::new()),
                import_calls: Mutex::new(Vec::new()),
                cache_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RowTransformer for ScriptedTransformer {
        async fn derive_row_actions(
            &self,
            row: &BatchRowDescription,
            cache: &mut LookupCache,
        ) -> RowActionOutcome {
            self.derive_calls.lock().push(row.id);
            cache.cache_election(row.id, serde_json::json!({"id": row.id}));
            self.cache_sizes.lock().push(cache.len());
            if self.fail_rows.contains(&row.id) {
                RowActionOutcome {
                    success: false,
                    status: "CREATE_BATCH_ROW_ACTIONS_FAILED".to_string(),
                    actions_created: 0,
                }
            } else {
                RowActionOutcome {
                    success: true,
                    status: String::new(),
                    actions_created: 4,
                }
            }
        }

        async fn import_row_actions(
            &self,
            row: &BatchRowDescription,
            mode: ImportMode,
        ) -> RowImportOutcome {
            self.import_calls.lock().push((row.id, mode));
            if self.fail_rows.contains(&row.id) {
                RowImportOutcome {
                    success: false,
                    status: "IMPORT_FAILED".to_string(),
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

    fn seeded_store(row_count: usize) -> Arc<InMemoryProcessStore> {
        let store = Arc::new(InMemoryProcessStore::new());
        store.seed_batch_set(42, row_count, "CANDIDATE");
        store
    }

    #[tokio::test]
    async fn test_analyze_marks_rows_and_counts() {
        let store = seeded_store(5);
        let transformer = Arc::new(ScriptedTransformer::new(vec![]));
        let pipeline = BatchSetPipeline::new(store.clone(), transformer.clone(), 1024);

        let outcome = pipeline.run(42, BatchSetMode::AnalyzeAll).await;
        assert!(outcome.success);
        assert_eq!(outcome.rows_analyzed, 5);
        assert!(outcome.status.has("BATCH_ROWS_ANALYZED"));

        let analyzed = store
            .row_descriptions_in_set(42)
            .into_iter()
            .filter(|r| r.analyzed)
            .count();
        assert_eq!(analyzed, 5);
        // All five rows went through one shared cache.
        assert_eq!(transformer.cache_sizes.lock().last().copied(), Some(5));
    }

    #[tokio::test]
    async fn test_failing_row_does_not_abort_the_batch() {
        let store = seeded_store(4);
        let rows = store.row_descriptions_in_set(42);
        let failing = rows[1].id;
        let transformer = Arc::new(ScriptedTransformer::new(vec![failing]));
        let pipeline = BatchSetPipeline::new(store.clone(), transformer.clone(), 1024);

        let outcome = pipeline.run(42, BatchSetMode::AnalyzeAll).await;
        assert!(outcome.success);
        assert_eq!(outcome.rows_analyzed, 3);
        assert_eq!(transformer.derive_calls.lock().len(), 4);
        assert!(outcome.summary_contains("CREATE_BATCH_ROW_ACTIONS_FAILED"));

        let stored = store.row_descriptions_in_set(42);
        let failed_row = stored.iter().find(|r| r.id == failing).unwrap();
        assert!(!failed_row.analyzed);
    }

    #[tokio::test]
    async fn test_error_detail_is_bounded() {
        let store = seeded_store(30);
        let all_ids: Vec<i64> = store
            .row_descriptions_in_set(42)
            .iter()
            .map(|r| r.id)
            .collect();
        let transformer = Arc::new(ScriptedTransformer::new(all_ids));
        // Tiny bound: only the first failure detail fits.
        let pipeline = BatchSetPipeline::new(store.clone(), transformer, 16);

        let outcome = pipeline.run(42, BatchSetMode::AnalyzeAll).await;
        assert_eq!(outcome.rows_analyzed, 0);
        let detail_events = outcome
            .status
            .iter()
            .filter(|e| e.code() == "EXECUTOR_STATUS")
            .count();
        assert_eq!(detail_events, 1);
    }

    #[tokio::test]
    async fn test_create_skips_unanalyzed_and_already_created() {
        let store = seeded_store(3);
        let mut rows = store.row_descriptions_in_set(42);
        // Row 0 stays raw, row 1 is analyzed, row 2 was created earlier.
        rows[1].analyzed = true;
        rows[2].analyzed = true;
        rows[2].created = true;
        for row in &rows {
            store.update_row_description(row).await.unwrap();
        }
        let transformer = Arc::new(ScriptedTransformer::new(vec![]));
        let pipeline = BatchSetPipeline::new(store.clone(), transformer.clone(), 1024);

        let outcome = pipeline.run(42, BatchSetMode::CreateAll).await;
        assert!(outcome.success);
        assert_eq!(outcome.rows_created, 1);
        let calls = transformer.import_calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (rows[1].id, ImportMode::Create));
    }

    #[tokio::test]
    async fn test_zero_batch_set_id_fails_fast() {
        let store = seeded_store(1);
        let transformer = Arc::new(ScriptedTransformer::new(vec![]));
        let pipeline = BatchSetPipeline::new(store, transformer.clone(), 1024);

        let outcome = pipeline.run(0, BatchSetMode::AnalyzeAll).await;
        assert!(!outcome.success);
        assert!(outcome.status.has("BATCH_SET_ID_REQUIRED"));
        assert!(transformer.derive_calls.lock().is_empty());
    }

    impl BatchSetOutcome {
        fn summary_contains(&self, needle: &str) -> bool {
            self.status.summary().contains(needle)
        }
    }
}
