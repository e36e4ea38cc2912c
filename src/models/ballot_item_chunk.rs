//! # Ballot Item Chunk Model
//!
//! One unit of ballot item work inside a batch process, advanced through
//! three ordered phases: retrieve raw ballots, analyze them into row
//! actions, create the resulting records. Each phase is a
//! started/completed timestamp pair plus a row count and a timed-out
//! flag.
//!
//! The chunk's position in the machine is derived, never stored:
//! [`BallotItemChunk::next_step`] reads the six timestamps in phase order
//! and returns the first thing left to do. A later phase can only be
//! reached once every earlier phase has a completion stamp, which is what
//! keeps phase ordering a structural fact rather than a convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// The three ordered phases of ballot item work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPhase {
    Retrieve,
    Analyze,
    Create,
}

impl fmt::Display for ChunkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkPhase::Retrieve => "retrieve",
            ChunkPhase::Analyze => "analyze",
            ChunkPhase::Create => "create",
        };
        write!(f, "{s}")
    }
}

/// What a scheduler invocation should do next with a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStep {
    StartRetrieve,
    AwaitRetrieve,
    StartAnalyze,
    AwaitAnalyze,
    StartCreate,
    AwaitCreate,
    Done,
}

/// One ballot item chunk record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BallotItemChunk {
    pub id: i64,
    pub batch_process_id: i64,
    /// Set once retrieval has produced a batch set
    pub batch_set_id: Option<i64>,
    pub retrieve_date_started: Option<DateTime<Utc>>,
    pub retrieve_date_completed: Option<DateTime<Utc>>,
    pub retrieve_row_count: i64,
    pub retrieve_timed_out: bool,
    pub analyze_date_started: Option<DateTime<Utc>>,
    pub analyze_date_completed: Option<DateTime<Utc>>,
    pub analyze_row_count: i64,
    pub analyze_timed_out: bool,
    pub create_date_started: Option<DateTime<Utc>>,
    pub create_date_completed: Option<DateTime<Utc>>,
    pub create_row_count: i64,
    pub create_timed_out: bool,
}

impl BallotItemChunk {
    /// First unfinished step, in phase order
    pub fn next_step(&self) -> ChunkStep {
        if self.retrieve_date_started.is_none() {
            ChunkStep::StartRetrieve
        } else if self.retrieve_date_completed.is_none() {
            ChunkStep::AwaitRetrieve
        } else if self.analyze_date_started.is_none() {
            ChunkStep::StartAnalyze
        } else if self.analyze_date_completed.is_none() {
            ChunkStep::AwaitAnalyze
        } else if self.create_date_started.is_none() {
            ChunkStep::StartCreate
        } else if self.create_date_completed.is_none() {
            ChunkStep::AwaitCreate
        } else {
            ChunkStep::Done
        }
    }

    /// All three phases carry completion stamps
    pub fn is_completed(&self) -> bool {
        self.next_step() == ChunkStep::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap()
    }

    fn chunk() -> BallotItemChunk {
        BallotItemChunk {
            id: 1,
            batch_process_id: 10,
            batch_set_id: None,
            retrieve_date_started: None,
            retrieve_date_completed: None,
            retrieve_row_count: 0,
            retrieve_timed_out: false,
            analyze_date_started: None,
            analyze_date_completed: None,
            analyze_row_count: 0,
            analyze_timed_out: false,
            create_date_started: None,
            create_date_completed: None,
            create_row_count: 0,
            create_timed_out: false,
        }
    }

    #[test]
    fn test_next_step_walks_phases_in_order() {
        let mut c = chunk();
        assert_eq!(c.next_step(), ChunkStep::StartRetrieve);

        c.retrieve_date_started = Some(ts(0));
        assert_eq!(c.next_step(), ChunkStep::AwaitRetrieve);

        c.retrieve_date_completed = Some(ts(1));
        assert_eq!(c.next_step(), ChunkStep::StartAnalyze);

        c.analyze_date_started = Some(ts(2));
        assert_eq!(c.next_step(), ChunkStep::AwaitAnalyze);

        c.analyze_date_completed = Some(ts(3));
        assert_eq!(c.next_step(), ChunkStep::StartCreate);

        c.create_date_started = Some(ts(4));
        assert_eq!(c.next_step(), ChunkStep::AwaitCreate);

        c.create_date_completed = Some(ts(5));
        assert_eq!(c.next_step(), ChunkStep::Done);
        assert!(c.is_completed());
    }

    #[test]
    fn test_later_phase_unreachable_without_earlier_completion() {
        // Analyze stamps present but the retrieve pair still open: the
        // machine stays in the retrieve phase.
        let mut c = chunk();
        c.retrieve_date_started = Some(ts(0));
        c.analyze_date_started = Some(ts(2));
        c.analyze_date_completed = Some(ts(3));
        assert_eq!(c.next_step(), ChunkStep::AwaitRetrieve);
    }

    #[test]
    fn test_phase_display_tokens() {
        assert_eq!(ChunkPhase::Retrieve.to_string(), "retrieve");
        assert_eq!(ChunkPhase::Analyze.to_string(), "analyze");
        assert_eq!(ChunkPhase::Create.to_string(), "create");
    }
}
