//! # Process Log Entry Model
//!
//! Append-only audit rows written as batch processes move through their
//! lifecycles. Operators grep these by status token; a `critical_failure`
//! entry is the primary alerting signal for stuck pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kind::ProcessKind;

/// One persisted audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessLogEntry {
    pub id: i64,
    pub batch_process_id: i64,
    pub ballot_item_chunk_id: Option<i64>,
    pub analytics_chunk_id: Option<i64>,
    pub batch_set_id: Option<i64>,
    pub kind_of_process: Option<ProcessKind>,
    pub google_civic_election_id: Option<i64>,
    pub state_code: Option<String>,
    pub analytics_date_as_integer: Option<i32>,
    pub critical_failure: bool,
    pub status: String,
    pub date_added: DateTime<Utc>,
}

/// Audit row creation payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProcessLogEntry {
    pub batch_process_id: i64,
    pub ballot_item_chunk_id: Option<i64>,
    pub analytics_chunk_id: Option<i64>,
    pub batch_set_id: Option<i64>,
    pub kind_of_process: Option<ProcessKind>,
    pub google_civic_election_id: Option<i64>,
    pub state_code: Option<String>,
    pub analytics_date_as_integer: Option<i32>,
    pub critical_failure: bool,
    pub status: String,
}
