//! # Status Events
//!
//! The stable vocabulary of things a scheduler invocation can report.
//! Call sites accumulate [`StatusEvent`]s into a [`StatusLog`]; the joined
//! text form only exists at the boundary ([`StatusLog::summary`]), where
//! operators grep for the event codes. Tests assert on events, not on
//! substring matches against concatenated prose.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{ChunkPhase, ProcessKind};

/// One reportable occurrence inside a scheduler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatusEvent {
    /// Kill switch engaged; nothing was touched
    SystemOff,
    ActiveProcessCount(i64),
    CheckedOutProcessCount(i64),
    /// Active processes picked up for advancement this invocation
    ProcessesSelected(usize),
    /// Queued processes started this invocation
    ProcessesActivated(usize),
    ScheduledProcess { kind: ProcessKind },
    ScheduleFailed { kind: ProcessKind, message: String },
    DateStartedNotSaved { batch_process_id: i64 },
    CheckoutNotSaved { batch_process_id: i64 },
    CheckoutNotCleared { batch_process_id: i64 },
    PhaseStarted { phase: ChunkPhase },
    PhaseCompleted { phase: ChunkPhase, row_count: i64 },
    /// Phase running and still inside its budget; nothing to do
    PhaseWaiting { phase: ChunkPhase },
    PhaseTimedOut { phase: ChunkPhase },
    /// Retrieval succeeded but found nothing to process
    EmptyRetrieval,
    /// Retrieval reported success without opening a batch set
    NoBatchSetId,
    RetrieveFailed { message: String },
    AnalyticsChunkTimedOut,
    AnalyticsRowsReviewed { count: i64 },
    DailyMetricsSaved,
    DailyMetricsNotSaved { message: String },
    HandleSearchCompleted { analyzed: i64, to_analyze: i64 },
    ProcessMarkedComplete,
    RowsAnalyzed { count: i64 },
    RowsCreated { count: i64 },
    RowsDeleted { count: i64 },
    BatchSetIdRequired,
    StoreFailure { operation: String, message: String },
    /// Collaborator-reported status text, carried verbatim
    ExecutorStatus { status: String },
    KindNotRecognized { token: String },
}

impl StatusEvent {
    /// Stable grep token for this event
    pub fn code(&self) -> &'static str {
        match self {
            StatusEvent::SystemOff => "BATCH_PROCESS_SYSTEM_TURNED_OFF",
            StatusEvent::ActiveProcessCount(_) => "TOTAL_ACTIVE_BATCH_PROCESSES",
            StatusEvent::CheckedOutProcessCount(_) => "CHECKED_OUT_BATCH_PROCESSES",
            StatusEvent::ProcessesSelected(_) => "BATCH_PROCESS_COUNT",
            StatusEvent::ProcessesActivated(_) => "NEW_BATCH_PROCESS_COUNT",
            StatusEvent::ScheduledProcess { .. } => "SCHEDULED_PROCESS",
            StatusEvent::ScheduleFailed { .. } => "FAILED_TO_SCHEDULE",
            StatusEvent::DateStartedNotSaved { .. } => "CANNOT_SAVE_DATE_STARTED",
            StatusEvent::CheckoutNotSaved { .. } => "CHECKED_OUT_TIME_NOT_SAVED",
            StatusEvent::CheckoutNotCleared { .. } => "CANNOT_CLEAR_CHECKED_OUT_TIME",
            StatusEvent::PhaseStarted { phase } => match phase {
                ChunkPhase::Retrieve => "RETRIEVE_DATE_STARTED_SAVED",
                ChunkPhase::Analyze => "ANALYZE_DATE_STARTED_SAVED",
                ChunkPhase::Create => "CREATE_DATE_STARTED_SAVED",
            },
            StatusEvent::PhaseCompleted { phase, .. } => match phase {
                ChunkPhase::Retrieve => "RETRIEVE_DATE_COMPLETED_SAVED",
                ChunkPhase::Analyze => "ANALYZE_DATE_COMPLETED_SAVED",
                ChunkPhase::Create => "CREATE_DATE_COMPLETED_SAVED",
            },
            StatusEvent::PhaseWaiting { phase } => match phase {
                ChunkPhase::Retrieve => "RETRIEVE_IN_PROGRESS",
                ChunkPhase::Analyze => "ANALYZE_IN_PROGRESS",
                ChunkPhase::Create => "CREATE_IN_PROGRESS",
            },
            StatusEvent::PhaseTimedOut { phase } => match phase {
                ChunkPhase::Retrieve => "RETRIEVE_TIMED_OUT",
                ChunkPhase::Analyze => "ANALYZE_TIMED_OUT",
                ChunkPhase::Create => "CREATE_TIMED_OUT",
            },
            StatusEvent::EmptyRetrieval => "NO_RETRIEVE_VALUES_FOUND-BATCH_IS_COMPLETE",
            StatusEvent::NoBatchSetId => "NO_BATCH_SET_ID_FOUND-BATCH_IS_COMPLETE",
            StatusEvent::RetrieveFailed { .. } => "BALLOT_ITEMS_RETRIEVE_FAILED",
            StatusEvent::AnalyticsChunkTimedOut => "BATCH_PROCESS_ANALYTICS_CHUNK_TIMED_OUT",
            StatusEvent::AnalyticsRowsReviewed { .. } => "ANALYTICS_ROWS_REVIEWED",
            StatusEvent::DailyMetricsSaved => "SITEWIDE_DAILY_METRICS_SAVED",
            StatusEvent::DailyMetricsNotSaved { .. } => "SITEWIDE_DAILY_METRICS_NOT_SAVED",
            StatusEvent::HandleSearchCompleted { .. } => "HANDLE_SEARCH_COMPLETED",
            StatusEvent::ProcessMarkedComplete => "BATCH_PROCESS_MARKED_COMPLETE",
            StatusEvent::RowsAnalyzed { .. } => "BATCH_ROWS_ANALYZED",
            StatusEvent::RowsCreated { .. } => "BATCH_ROWS_CREATED",
            StatusEvent::RowsDeleted { .. } => "BATCH_ROWS_DELETED",
            StatusEvent::BatchSetIdRequired => "BATCH_SET_ID_REQUIRED",
            StatusEvent::StoreFailure { .. } => "STORE_ERROR",
            StatusEvent::ExecutorStatus { .. } => "EXECUTOR_STATUS",
            StatusEvent::KindNotRecognized { .. } => "KIND_OF_PROCESS_NOT_RECOGNIZED",
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::ActiveProcessCount(n)
            | StatusEvent::CheckedOutProcessCount(n)
            | StatusEvent::AnalyticsRowsReviewed { count: n }
            | StatusEvent::RowsAnalyzed { count: n }
            | StatusEvent::RowsCreated { count: n }
            | StatusEvent::RowsDeleted { count: n } => write!(f, "{}: {n}", self.code()),
            StatusEvent::ProcessesSelected(n) | StatusEvent::ProcessesActivated(n) => {
                write!(f, "{}: {n}", self.code())
            }
            StatusEvent::ScheduledProcess { kind } => write!(f, "{}: {kind}", self.code()),
            StatusEvent::ScheduleFailed { kind, message } => {
                write!(f, "{}-{kind}: {message}", self.code())
            }
            StatusEvent::DateStartedNotSaved { batch_process_id }
            | StatusEvent::CheckoutNotSaved { batch_process_id }
            | StatusEvent::CheckoutNotCleared { batch_process_id } => {
                write!(f, "{} batch_process_id={batch_process_id}", self.code())
            }
            StatusEvent::PhaseCompleted { row_count, .. } => {
                write!(f, "{} rows={row_count}", self.code())
            }
            StatusEvent::RetrieveFailed { message }
            | StatusEvent::DailyMetricsNotSaved { message } => {
                write!(f, "{}: {message}", self.code())
            }
            StatusEvent::HandleSearchCompleted {
                analyzed,
                to_analyze,
            } => write!(
                f,
                "{} Candidates Analyzed: {analyzed} out of {to_analyze}",
                self.code()
            ),
            StatusEvent::StoreFailure { operation, message } => {
                write!(f, "{}-{operation}: {message}", self.code())
            }
            StatusEvent::ExecutorStatus { status } => write!(f, "{status}"),
            StatusEvent::KindNotRecognized { token } => write!(f, "{}: {token}", self.code()),
            _ => write!(f, "{}", self.code()),
        }
    }
}

/// Ordered accumulator of status events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusLog {
    events: Vec<StatusEvent>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StatusEvent) {
        self.events.push(event);
    }

    /// Append every event of another log, preserving order
    pub fn merge(&mut self, other: StatusLog) {
        self.events.extend(other.events);
    }

    /// Whether any event carries the given code
    pub fn has(&self, code: &str) -> bool {
        self.events.iter().any(|e| e.code() == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Joined text form for audit rows and log lines
    pub fn summary(&self) -> String {
        self.events
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Result of one `advance_pipeline` invocation
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    pub success: bool,
    pub status: StatusLog,
}

impl SchedulerOutcome {
    pub fn new(success: bool, status: StatusLog) -> Self {
        Self { success, status }
    }
}

/// Result of advancing one checked-out process
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub success: bool,
    pub status: StatusLog,
}

impl AdvanceOutcome {
    pub fn new(success: bool, status: StatusLog) -> Self {
        Self { success, status }
    }
}
