//! # Postgres Process Store
//!
//! Durable [`ProcessStore`] implementation over sqlx. Queries are
//! runtime-bound (`sqlx::query_as::<_, Row>`) so the crate builds without
//! a live database; the kind token is parsed at the row boundary, which is
//! where an unrecognized `kind_of_process` surfaces.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use civic_batch_core::store::PgProcessStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgProcessStore::connect("postgresql://localhost/civic_batch").await?;
//! store.ensure_schema().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, error, warn};

use crate::models::{
    AnalyticsChunk, BallotItemChunk, BatchProcess, BatchRowDescription, NewBatchProcess,
    NewProcessLogEntry, ProcessKind, ProcessLogEntry, RowDescriptionFilter, ALL_PROCESS_KINDS,
};

use super::{ProcessListFilter, ProcessStore, StoreError, StoreResult};

/// Columns returned for every batch process query
const BATCH_PROCESS_COLUMNS: &str = "id, kind_of_process, google_civic_election_id, state_code, \
     voter_id, analytics_date_as_integer, date_added_to_queue, date_started, date_checked_out, \
     date_completed, batch_process_paused, completion_summary";

/// Raw batch process row before the kind token is parsed
#[derive(Debug, Clone, FromRow)]
struct BatchProcessRow {
    id: i64,
    kind_of_process: String,
    google_civic_election_id: Option<i64>,
    state_code: Option<String>,
    voter_id: Option<i64>,
    analytics_date_as_integer: Option<i32>,
    date_added_to_queue: DateTime<Utc>,
    date_started: Option<DateTime<Utc>>,
    date_checked_out: Option<DateTime<Utc>>,
    date_completed: Option<DateTime<Utc>>,
    batch_process_paused: bool,
    completion_summary: Option<String>,
}

impl TryFrom<BatchProcessRow> for BatchProcess {
    type Error = StoreError;

    fn try_from(row: BatchProcessRow) -> Result<Self, Self::Error> {
        let kind_of_process =
            row.kind_of_process
                .parse::<ProcessKind>()
                .map_err(|_| StoreError::UnrecognizedKind {
                    batch_process_id: row.id,
                    token: row.kind_of_process.clone(),
                })?;

        Ok(BatchProcess {
            id: row.id,
            kind_of_process,
            google_civic_election_id: row.google_civic_election_id,
            state_code: row.state_code,
            voter_id: row.voter_id,
            analytics_date_as_integer: row.analytics_date_as_integer,
            date_added_to_queue: row.date_added_to_queue,
            date_started: row.date_started,
            date_checked_out: row.date_checked_out,
            date_completed: row.date_completed,
            batch_process_paused: row.batch_process_paused,
            completion_summary: row.completion_summary,
        })
    }
}

/// Raw audit row; a bad kind token in diagnostics data is tolerated
#[derive(Debug, Clone, FromRow)]
struct LogEntryRow {
    id: i64,
    batch_process_id: i64,
    ballot_item_chunk_id: Option<i64>,
    analytics_chunk_id: Option<i64>,
    batch_set_id: Option<i64>,
    kind_of_process: Option<String>,
    google_civic_election_id: Option<i64>,
    state_code: Option<String>,
    analytics_date_as_integer: Option<i32>,
    critical_failure: bool,
    status: String,
    date_added: DateTime<Utc>,
}

impl From<LogEntryRow> for ProcessLogEntry {
    fn from(row: LogEntryRow) -> Self {
        ProcessLogEntry {
            id: row.id,
            batch_process_id: row.batch_process_id,
            ballot_item_chunk_id: row.ballot_item_chunk_id,
            analytics_chunk_id: row.analytics_chunk_id,
            batch_set_id: row.batch_set_id,
            kind_of_process: row.kind_of_process.and_then(|t| t.parse().ok()),
            google_civic_election_id: row.google_civic_election_id,
            state_code: row.state_code,
            analytics_date_as_integer: row.analytics_date_as_integer,
            critical_failure: row.critical_failure,
            status: row.status,
            date_added: row.date_added,
        }
    }
}

/// Schema bootstrap, run in order; every statement is idempotent
const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS batch_processes (
        id BIGSERIAL PRIMARY KEY,
        kind_of_process VARCHAR(64) NOT NULL,
        google_civic_election_id BIGINT,
        state_code VARCHAR(2),
        voter_id BIGINT,
        analytics_date_as_integer INTEGER,
        date_added_to_queue TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        date_started TIMESTAMPTZ,
        date_checked_out TIMESTAMPTZ,
        date_completed TIMESTAMPTZ,
        batch_process_paused BOOLEAN NOT NULL DEFAULT false,
        completion_summary TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ballot_item_chunks (
        id BIGSERIAL PRIMARY KEY,
        batch_process_id BIGINT NOT NULL REFERENCES batch_processes(id),
        batch_set_id BIGINT,
        retrieve_date_started TIMESTAMPTZ,
        retrieve_date_completed TIMESTAMPTZ,
        retrieve_row_count BIGINT NOT NULL DEFAULT 0,
        retrieve_timed_out BOOLEAN NOT NULL DEFAULT false,
        analyze_date_started TIMESTAMPTZ,
        analyze_date_completed TIMESTAMPTZ,
        analyze_row_count BIGINT NOT NULL DEFAULT 0,
        analyze_timed_out BOOLEAN NOT NULL DEFAULT false,
        create_date_started TIMESTAMPTZ,
        create_date_completed TIMESTAMPTZ,
        create_row_count BIGINT NOT NULL DEFAULT 0,
        create_timed_out BOOLEAN NOT NULL DEFAULT false
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ballot_item_chunks_process
         ON ballot_item_chunks (batch_process_id)",
    r#"
    CREATE TABLE IF NOT EXISTS analytics_chunks (
        id BIGSERIAL PRIMARY KEY,
        batch_process_id BIGINT NOT NULL REFERENCES batch_processes(id),
        analytics_date_as_integer INTEGER,
        date_started TIMESTAMPTZ,
        date_completed TIMESTAMPTZ,
        number_of_rows_being_reviewed BIGINT NOT NULL DEFAULT 0,
        number_of_rows_successfully_reviewed BIGINT NOT NULL DEFAULT 0,
        timed_out BOOLEAN NOT NULL DEFAULT false
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_analytics_chunks_process
         ON analytics_chunks (batch_process_id)",
    r#"
    CREATE TABLE IF NOT EXISTS batch_row_descriptions (
        id BIGSERIAL PRIMARY KEY,
        batch_header_id BIGINT NOT NULL,
        batch_set_id BIGINT NOT NULL,
        kind_of_batch VARCHAR(32) NOT NULL,
        analyzed BOOLEAN NOT NULL DEFAULT false,
        created BOOLEAN NOT NULL DEFAULT false
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_batch_row_descriptions_set
         ON batch_row_descriptions (batch_set_id)",
    r#"
    CREATE TABLE IF NOT EXISTS process_log_entries (
        id BIGSERIAL PRIMARY KEY,
        batch_process_id BIGINT NOT NULL,
        ballot_item_chunk_id BIGINT,
        analytics_chunk_id BIGINT,
        batch_set_id BIGINT,
        kind_of_process VARCHAR(64),
        google_civic_election_id BIGINT,
        state_code VARCHAR(2),
        analytics_date_as_integer INTEGER,
        critical_failure BOOLEAN NOT NULL DEFAULT false,
        status TEXT NOT NULL,
        date_added TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Postgres-backed process store
pub struct PgProcessStore {
    pool: PgPool,
}

impl PgProcessStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a dedicated pool
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to database: {}", e);
                StoreError::database_connection(e.to_string())
            })?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist yet
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Schema bootstrap failed: {}", e);
                    StoreError::database_query("ensure_schema", e.to_string())
                })?;
        }
        debug!("batch process schema ready");
        Ok(())
    }

    /// Convert raw rows, skipping any whose kind token does not parse.
    /// Skipped rows stay in the table for manual investigation.
    fn rows_into_processes(rows: Vec<BatchProcessRow>) -> Vec<BatchProcess> {
        let mut processes = Vec::with_capacity(rows.len());
        for row in rows {
            match BatchProcess::try_from(row) {
                Ok(process) => processes.push(process),
                Err(StoreError::UnrecognizedKind {
                    batch_process_id,
                    token,
                }) => {
                    warn!(
                        batch_process_id = batch_process_id,
                        token = %token,
                        "KIND_OF_PROCESS_NOT_RECOGNIZED, skipping row"
                    );
                }
                Err(_) => {}
            }
        }
        processes
    }

    fn analytics_kind_tokens() -> Vec<String> {
        ALL_PROCESS_KINDS
            .iter()
            .filter(|kind| kind.is_analytics_kind())
            .map(|kind| kind.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl ProcessStore for PgProcessStore {
    async fn create_batch_process(
        &self,
        new_process: NewBatchProcess,
    ) -> StoreResult<BatchProcess> {
        let query = format!(
            r#"
            INSERT INTO batch_processes (
                kind_of_process, google_civic_election_id, state_code,
                voter_id, analytics_date_as_integer
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {BATCH_PROCESS_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, BatchProcessRow>(&query)
            .bind(new_process.kind_of_process.as_str())
            .bind(new_process.google_civic_election_id)
            .bind(&new_process.state_code)
            .bind(new_process.voter_id)
            .bind(new_process.analytics_date_as_integer)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create batch process: {}", e);
                StoreError::database_query("create_batch_process", e.to_string())
            })?;

        BatchProcess::try_from(row)
    }

    async fn update_batch_process(&self, process: &BatchProcess) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE batch_processes
            SET kind_of_process = $2, google_civic_election_id = $3, state_code = $4,
                voter_id = $5, analytics_date_as_integer = $6, date_started = $7,
                date_checked_out = $8, date_completed = $9, batch_process_paused = $10,
                completion_summary = $11
            WHERE id = $1
            "#,
        )
        .bind(process.id)
        .bind(process.kind_of_process.as_str())
        .bind(process.google_civic_election_id)
        .bind(&process.state_code)
        .bind(process.voter_id)
        .bind(process.analytics_date_as_integer)
        .bind(process.date_started)
        .bind(process.date_checked_out)
        .bind(process.date_completed)
        .bind(process.batch_process_paused)
        .bind(&process.completion_summary)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                batch_process_id = process.id,
                "Failed to update batch process: {}", e
            );
            StoreError::database_query("update_batch_process", e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::record_not_found("batch_process", process.id));
        }
        Ok(())
    }

    async fn batch_process_list(
        &self,
        filter: ProcessListFilter,
    ) -> StoreResult<Vec<BatchProcess>> {
        let condition = match filter {
            ProcessListFilter::Active => {
                "date_started IS NOT NULL AND date_completed IS NULL \
                 AND batch_process_paused = false"
            }
            ProcessListFilter::Queued => {
                "date_started IS NULL AND date_completed IS NULL \
                 AND batch_process_paused = false"
            }
        };
        let query = format!(
            "SELECT {BATCH_PROCESS_COLUMNS} FROM batch_processes WHERE {condition} ORDER BY id"
        );

        let rows = sqlx::query_as::<_, BatchProcessRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to list batch processes: {}", e);
                StoreError::database_query("batch_process_list", e.to_string())
            })?;

        Ok(Self::rows_into_processes(rows))
    }

    async fn count_active_batch_processes(&self) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM batch_processes
             WHERE date_started IS NOT NULL AND date_completed IS NULL
               AND batch_process_paused = false",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count active batch processes: {}", e);
            StoreError::database_query("count_active_batch_processes", e.to_string())
        })?;
        Ok(row.0)
    }

    async fn count_checked_out_batch_processes(&self) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM batch_processes
             WHERE date_started IS NOT NULL AND date_checked_out IS NOT NULL
               AND date_completed IS NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count checked out batch processes: {}", e);
            StoreError::database_query("count_checked_out_batch_processes", e.to_string())
        })?;
        Ok(row.0)
    }

    async fn analytics_process_is_running(&self) -> StoreResult<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                 SELECT 1 FROM batch_processes
                 WHERE kind_of_process = ANY($1)
                   AND date_started IS NOT NULL AND date_completed IS NULL
                   AND batch_process_paused = false
             )",
        )
        .bind(Self::analytics_kind_tokens())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to check for running analytics process: {}", e);
            StoreError::database_query("analytics_process_is_running", e.to_string())
        })?;
        Ok(row.0)
    }

    async fn ballot_item_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<BallotItemChunk>> {
        sqlx::query_as::<_, BallotItemChunk>(
            "SELECT * FROM ballot_item_chunks
             WHERE batch_process_id = $1 AND create_date_completed IS NULL
             ORDER BY id DESC LIMIT 1",
        )
        .bind(batch_process_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(
                batch_process_id = batch_process_id,
                "Failed to fetch ballot item chunk: {}", e
            );
            StoreError::database_query("ballot_item_chunk_not_completed", e.to_string())
        })
    }

    async fn create_ballot_item_chunk(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<BallotItemChunk> {
        sqlx::query_as::<_, BallotItemChunk>(
            "INSERT INTO ballot_item_chunks (batch_process_id) VALUES ($1) RETURNING *",
        )
        .bind(batch_process_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(
                batch_process_id = batch_process_id,
                "Failed to create ballot item chunk: {}", e
            );
            StoreError::database_query("create_ballot_item_chunk", e.to_string())
        })
    }

    async fn update_ballot_item_chunk(&self, chunk: &BallotItemChunk) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ballot_item_chunks
            SET batch_set_id = $2,
                retrieve_date_started = $3, retrieve_date_completed = $4,
                retrieve_row_count = $5, retrieve_timed_out = $6,
                analyze_date_started = $7, analyze_date_completed = $8,
                analyze_row_count = $9, analyze_timed_out = $10,
                create_date_started = $11, create_date_completed = $12,
                create_row_count = $13, create_timed_out = $14
            WHERE id = $1
            "#,
        )
        .bind(chunk.id)
        .bind(chunk.batch_set_id)
        .bind(chunk.retrieve_date_started)
        .bind(chunk.retrieve_date_completed)
        .bind(chunk.retrieve_row_count)
        .bind(chunk.retrieve_timed_out)
        .bind(chunk.analyze_date_started)
        .bind(chunk.analyze_date_completed)
        .bind(chunk.analyze_row_count)
        .bind(chunk.analyze_timed_out)
        .bind(chunk.create_date_started)
        .bind(chunk.create_date_completed)
        .bind(chunk.create_row_count)
        .bind(chunk.create_timed_out)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(chunk_id = chunk.id, "Failed to update ballot item chunk: {}", e);
            StoreError::database_query("update_ballot_item_chunk", e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::record_not_found("ballot_item_chunk", chunk.id));
        }
        Ok(())
    }

    async fn analytics_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<AnalyticsChunk>> {
        sqlx::query_as::<_, AnalyticsChunk>(
            "SELECT * FROM analytics_chunks
             WHERE batch_process_id = $1 AND date_completed IS NULL
             ORDER BY id DESC LIMIT 1",
        )
        .bind(batch_process_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(
                batch_process_id = batch_process_id,
                "Failed to fetch analytics chunk: {}", e
            );
            StoreError::database_query("analytics_chunk_not_completed", e.to_string())
        })
    }

    async fn create_analytics_chunk(
        &self,
        batch_process_id: i64,
        analytics_date_as_integer: Option<i32>,
    ) -> StoreResult<AnalyticsChunk> {
        sqlx::query_as::<_, AnalyticsChunk>(
            "INSERT INTO analytics_chunks (batch_process_id, analytics_date_as_integer)
             VALUES ($1, $2) RETURNING *",
        )
        .bind(batch_process_id)
        .bind(analytics_date_as_integer)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(
                batch_process_id = batch_process_id,
                "Failed to create analytics chunk: {}", e
            );
            StoreError::database_query("create_analytics_chunk", e.to_string())
        })
    }

    async fn update_analytics_chunk(&self, chunk: &AnalyticsChunk) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE analytics_chunks
            SET analytics_date_as_integer = $2, date_started = $3, date_completed = $4,
                number_of_rows_being_reviewed = $5, number_of_rows_successfully_reviewed = $6,
                timed_out = $7
            WHERE id = $1
            "#,
        )
        .bind(chunk.id)
        .bind(chunk.analytics_date_as_integer)
        .bind(chunk.date_started)
        .bind(chunk.date_completed)
        .bind(chunk.number_of_rows_being_reviewed)
        .bind(chunk.number_of_rows_successfully_reviewed)
        .bind(chunk.timed_out)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(chunk_id = chunk.id, "Failed to update analytics chunk: {}", e);
            StoreError::database_query("update_analytics_chunk", e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::record_not_found("analytics_chunk", chunk.id));
        }
        Ok(())
    }

    async fn batch_set_row_descriptions(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<Vec<BatchRowDescription>> {
        let query = format!(
            "SELECT * FROM batch_row_descriptions
             WHERE batch_set_id = $1{} ORDER BY id",
            filter_condition(filter)
        );

        sqlx::query_as::<_, BatchRowDescription>(&query)
            .bind(batch_set_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    batch_set_id = batch_set_id,
                    "Failed to list batch set rows: {}", e
                );
                StoreError::database_query("batch_set_row_descriptions", e.to_string())
            })
    }

    async fn count_rows_in_batch_set(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<i64> {
        let query = format!(
            "SELECT COUNT(*) FROM batch_row_descriptions WHERE batch_set_id = $1{}",
            filter_condition(filter)
        );

        let row: (i64,) = sqlx::query_as(&query)
            .bind(batch_set_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(
                    batch_set_id = batch_set_id,
                    "Failed to count batch set rows: {}", e
                );
                StoreError::database_query("count_rows_in_batch_set", e.to_string())
            })?;
        Ok(row.0)
    }

    async fn update_row_description(&self, row: &BatchRowDescription) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE batch_row_descriptions SET analyzed = $2, created = $3 WHERE id = $1")
                .bind(row.id)
                .bind(row.analyzed)
                .bind(row.created)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!(row_id = row.id, "Failed to update row description: {}", e);
                    StoreError::database_query("update_row_description", e.to_string())
                })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::record_not_found("batch_row_description", row.id));
        }
        Ok(())
    }

    async fn create_log_entry(&self, entry: NewProcessLogEntry) -> StoreResult<ProcessLogEntry> {
        let row = sqlx::query_as::<_, LogEntryRow>(
            r#"
            INSERT INTO process_log_entries (
                batch_process_id, ballot_item_chunk_id, analytics_chunk_id, batch_set_id,
                kind_of_process, google_civic_election_id, state_code,
                analytics_date_as_integer, critical_failure, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(entry.batch_process_id)
        .bind(entry.ballot_item_chunk_id)
        .bind(entry.analytics_chunk_id)
        .bind(entry.batch_set_id)
        .bind(entry.kind_of_process.map(|k| k.as_str()))
        .bind(entry.google_civic_election_id)
        .bind(&entry.state_code)
        .bind(entry.analytics_date_as_integer)
        .bind(entry.critical_failure)
        .bind(&entry.status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(
                batch_process_id = entry.batch_process_id,
                "Failed to create log entry: {}", e
            );
            StoreError::database_query("create_log_entry", e.to_string())
        })?;

        Ok(row.into())
    }
}

fn filter_condition(filter: RowDescriptionFilter) -> &'static str {
    match filter {
        RowDescriptionFilter::All => "",
        RowDescriptionFilter::Unanalyzed => " AND analyzed = false",
        RowDescriptionFilter::Analyzed => " AND analyzed = true",
        RowDescriptionFilter::Created => " AND created = true",
    }
}
