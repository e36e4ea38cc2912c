//! # System Constants
//!
//! Operational boundaries of the batch process scheduler. These are the
//! defaults baked into [`SchedulerConfig::default`](crate::config::SchedulerConfig);
//! deployments override them through the config layer, never by editing
//! call sites.

/// Scheduling bounds
pub mod scheduling {
    /// Maximum number of batch processes active at the same time
    pub const MAX_ACTIVE_BATCH_PROCESSES: u32 = 3;
}

/// Phase timeout budgets, in minutes
pub mod timeouts {
    /// Ballot retrieval phase budget
    pub const RETRIEVE_PHASE_MINUTES: i64 = 30;

    /// Batch set analysis phase budget
    pub const ANALYZE_PHASE_MINUTES: i64 = 30;

    /// Record creation phase budget
    pub const CREATE_PHASE_MINUTES: i64 = 20;
}

/// Status reporting bounds
pub mod status {
    /// Maximum bytes of accumulated per-row error detail carried in a
    /// batch set outcome before further errors are counted silently
    pub const ERROR_DETAIL_LIMIT_BYTES: usize = 1024;
}
