//! # Orchestration Core
//!
//! Cooperative scheduling of civic data batch processes. One external
//! trigger invokes [`BatchProcessScheduler::advance_pipeline`] repeatedly;
//! each invocation performs a single bounded scheduling step and returns.
//! Long-running jobs progress as interleavings across invocations, never
//! as internal threads.
//!
//! ## Core Components
//!
//! - **BatchProcessScheduler**: entry point; counts, admission control,
//!   activation, synthesis of policy-driven jobs, dispatch by kind
//! - **BallotItemProcessor**: three-phase chunk machine for the ballot
//!   retrieval kinds (retrieve, analyze, create) with per-phase budgets
//! - **AnalyticsProcessor**: chunked analytics kinds plus the single-shot
//!   sitewide daily rollup
//! - **HandleSearchProcessor**: bulk candidate handle search
//! - **ProcessFinalizer**: idempotent completion stamping
//! - **AuditLog**: fire-and-forget process log entries
//! - **StatusLog**: structured status events with stable grep tokens

pub mod analytics;
pub mod audit;
pub mod ballot_item;
pub mod finalizer;
pub mod handle_search;
pub mod scheduler;
pub mod status;

pub use analytics::AnalyticsProcessor;
pub use audit::{AuditLog, LogScope};
pub use ballot_item::BallotItemProcessor;
pub use finalizer::{FinalizeChunk, FinalizeOutcome, ProcessFinalizer};
pub use handle_search::HandleSearchProcessor;
pub use scheduler::BatchProcessScheduler;
pub use status::{AdvanceOutcome, SchedulerOutcome, StatusEvent, StatusLog};
