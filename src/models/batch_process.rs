//! # Batch Process Model
//!
//! The primary scheduling unit. A batch process is one long-running job
//! (ballot retrieval, analytics calculation, handle search) whose position
//! in its lifecycle is carried entirely by nullable timestamps.
//!
//! ## Lifecycle
//!
//! - **Queued**: `date_started` unset, `date_completed` unset
//! - **Active**: `date_started` set, `date_completed` unset
//! - **Completed**: `date_completed` set
//!
//! `date_checked_out` is an advisory marker that a scheduler invocation is
//! currently working the process; it is informational, not a lease.
//!
//! ## Database Schema
//!
//! Maps to the `batch_processes` table:
//! - `id`: Primary key (BIGSERIAL)
//! - `kind_of_process`: Wire token (VARCHAR, parsed into [`ProcessKind`])
//! - `google_civic_election_id` / `state_code` / `voter_id`: Scope
//! - `analytics_date_as_integer`: Day an analytics kind operates on (YYYYMMDD)
//! - Lifecycle timestamps as above, plus `date_added_to_queue`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kind::ProcessKind;

/// One batch process record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProcess {
    pub id: i64,
    pub kind_of_process: ProcessKind,
    pub google_civic_election_id: Option<i64>,
    pub state_code: Option<String>,
    pub voter_id: Option<i64>,
    pub analytics_date_as_integer: Option<i32>,
    pub date_added_to_queue: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_checked_out: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    /// Operator hold: a paused process is skipped by scheduling queries
    /// but keeps its lifecycle position
    pub batch_process_paused: bool,
    pub completion_summary: Option<String>,
}

impl BatchProcess {
    /// Started but not yet completed
    pub fn is_active(&self) -> bool {
        self.date_started.is_some() && self.date_completed.is_none()
    }

    /// Waiting for a scheduler invocation to start it
    pub fn is_queued(&self) -> bool {
        self.date_started.is_none() && self.date_completed.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.date_completed.is_some()
    }

    pub fn is_checked_out(&self) -> bool {
        self.date_checked_out.is_some()
    }
}

/// Batch process creation payload (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatchProcess {
    pub kind_of_process: ProcessKind,
    pub google_civic_election_id: Option<i64>,
    pub state_code: Option<String>,
    pub voter_id: Option<i64>,
    pub analytics_date_as_integer: Option<i32>,
}

impl NewBatchProcess {
    pub fn new(kind_of_process: ProcessKind) -> Self {
        Self {
            kind_of_process,
            google_civic_election_id: None,
            state_code: None,
            voter_id: None,
            analytics_date_as_integer: None,
        }
    }

    pub fn with_election(mut self, google_civic_election_id: i64, state_code: &str) -> Self {
        self.google_civic_election_id = Some(google_civic_election_id);
        self.state_code = Some(state_code.to_string());
        self
    }

    pub fn with_voter(mut self, voter_id: i64) -> Self {
        self.voter_id = Some(voter_id);
        self
    }

    pub fn with_analytics_date(mut self, analytics_date_as_integer: i32) -> Self {
        self.analytics_date_as_integer = Some(analytics_date_as_integer);
        self
    }
}
