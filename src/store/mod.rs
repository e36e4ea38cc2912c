//! # Process Store
//!
//! Persistence seam for batch processes, their chunks, batch set row
//! descriptions, and the audit log. Orchestration components only talk to
//! the [`ProcessStore`] trait; [`PgProcessStore`] is the durable Postgres
//! implementation and [`InMemoryProcessStore`] backs tests and embedders
//! that do not need durability.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    AnalyticsChunk, BallotItemChunk, BatchProcess, BatchRowDescription, NewBatchProcess,
    NewProcessLogEntry, ProcessLogEntry, RowDescriptionFilter,
};

pub use memory::InMemoryProcessStore;
pub use postgres::PgProcessStore;

/// Store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Record not found: {record} {id}")]
    RecordNotFound { record: &'static str, id: i64 },

    #[error("Unrecognized kind of process on batch process {batch_process_id}: {token}")]
    UnrecognizedKind { batch_process_id: i64, token: String },
}

impl StoreError {
    /// Create a database connection error
    pub fn database_connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnection {
            message: message.into(),
        }
    }

    /// Create a database query error
    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn record_not_found(record: &'static str, id: i64) -> Self {
        Self::RecordNotFound { record, id }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::database_query("query", "No rows found"),
            sqlx::Error::Database(db_err) => {
                StoreError::database_query("database", db_err.to_string())
            }
            sqlx::Error::PoolTimedOut => {
                StoreError::database_connection("Database pool timed out")
            }
            sqlx::Error::PoolClosed => StoreError::database_connection("Database pool is closed"),
            sqlx::Error::Configuration(config_err) => {
                StoreError::database_connection(config_err.to_string())
            }
            _ => StoreError::database_connection(err.to_string()),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Scheduling filter over batch processes
///
/// Both filters exclude paused processes; a paused process keeps its
/// lifecycle position but is invisible to scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessListFilter {
    /// Started, not completed
    Active,
    /// Not started, not completed
    Queued,
}

/// Persistence operations required by the orchestration layer
#[async_trait]
pub trait ProcessStore: Send + Sync {
    // Batch processes

    async fn create_batch_process(
        &self,
        new_process: NewBatchProcess,
    ) -> StoreResult<BatchProcess>;

    /// Persist every mutable field of the process row
    async fn update_batch_process(&self, process: &BatchProcess) -> StoreResult<()>;

    /// Processes matching the filter, earliest first
    async fn batch_process_list(
        &self,
        filter: ProcessListFilter,
    ) -> StoreResult<Vec<BatchProcess>>;

    async fn count_active_batch_processes(&self) -> StoreResult<i64>;

    async fn count_checked_out_batch_processes(&self) -> StoreResult<i64>;

    /// True when any active process carries an analytics kind
    async fn analytics_process_is_running(&self) -> StoreResult<bool>;

    // Ballot item chunks

    /// Newest chunk of the process whose create phase has not completed
    async fn ballot_item_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<BallotItemChunk>>;

    async fn create_ballot_item_chunk(&self, batch_process_id: i64)
        -> StoreResult<BallotItemChunk>;

    async fn update_ballot_item_chunk(&self, chunk: &BallotItemChunk) -> StoreResult<()>;

    // Analytics chunks

    /// Newest chunk of the process without a completion stamp
    async fn analytics_chunk_not_completed(
        &self,
        batch_process_id: i64,
    ) -> StoreResult<Option<AnalyticsChunk>>;

    async fn create_analytics_chunk(
        &self,
        batch_process_id: i64,
        analytics_date_as_integer: Option<i32>,
    ) -> StoreResult<AnalyticsChunk>;

    async fn update_analytics_chunk(&self, chunk: &AnalyticsChunk) -> StoreResult<()>;

    // Batch set row descriptions

    async fn batch_set_row_descriptions(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<Vec<BatchRowDescription>>;

    async fn count_rows_in_batch_set(
        &self,
        batch_set_id: i64,
        filter: RowDescriptionFilter,
    ) -> StoreResult<i64>;

    async fn update_row_description(&self, row: &BatchRowDescription) -> StoreResult<()>;

    // Audit log

    async fn create_log_entry(&self, entry: NewProcessLogEntry) -> StoreResult<ProcessLogEntry>;
}
