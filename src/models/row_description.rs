//! # Batch Row Description Model
//!
//! One raw sub-batch inside a batch set, as produced by a retrieval. The
//! batch set pipeline walks these in two passes: analyze derives row
//! actions and flips `analyzed`; create imports the actions and flips
//! `created`. The flags are also what timeout recovery counts when a
//! phase has to be force-completed.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row description inside a batch set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BatchRowDescription {
    pub id: i64,
    /// Handle the row transformer uses to find the raw rows
    pub batch_header_id: i64,
    pub batch_set_id: i64,
    /// Free-form tag describing what the raw rows hold (candidates,
    /// measures, polling locations, ...)
    pub kind_of_batch: String,
    pub analyzed: bool,
    pub created: bool,
}

/// Flag filter for batch set queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDescriptionFilter {
    All,
    Unanalyzed,
    Analyzed,
    Created,
}

impl RowDescriptionFilter {
    pub fn matches(&self, row: &BatchRowDescription) -> bool {
        match self {
            RowDescriptionFilter::All => true,
            RowDescriptionFilter::Unanalyzed => !row.analyzed,
            RowDescriptionFilter::Analyzed => row.analyzed,
            RowDescriptionFilter::Created => row.created,
        }
    }
}
