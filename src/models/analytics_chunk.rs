//! # Analytics Chunk Model
//!
//! One slice of chunked analytics work. Unlike ballot item chunks there is
//! a single started/completed pair: an analytics chunk either finishes in
//! the invocation that started it or is force-completed by the next one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One analytics chunk record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AnalyticsChunk {
    pub id: i64,
    pub batch_process_id: i64,
    /// Day this chunk operates on (YYYYMMDD), copied from the process
    pub analytics_date_as_integer: Option<i32>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    pub number_of_rows_being_reviewed: i64,
    pub number_of_rows_successfully_reviewed: i64,
    pub timed_out: bool,
}

impl AnalyticsChunk {
    pub fn is_completed(&self) -> bool {
        self.date_completed.is_some()
    }

    /// Started by an earlier invocation and never finished
    pub fn is_stale(&self) -> bool {
        self.date_started.is_some() && self.date_completed.is_none()
    }
}
