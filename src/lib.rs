#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Civic Batch Core
//!
//! Orchestration core for civic election data batch processing: ballot
//! item retrieval from polling locations and voters, analytics rollups,
//! and candidate handle searches, all driven as cooperatively scheduled
//! batch processes over PostgreSQL.
//!
//! ## Overview
//!
//! Work is recorded as `BatchProcess` rows whose lifecycle lives entirely
//! in nullable timestamps. An external trigger (cron, a systemd timer, a
//! task queue beat) repeatedly calls
//! [`orchestration::BatchProcessScheduler::advance_pipeline`]; every call
//! performs exactly one bounded scheduling step and returns a structured
//! status log. There are no internal threads and no blocking waits, so a
//! stalled collaborator can never wedge more than one invocation.
//!
//! ## Key Properties
//!
//! - **Admission control**: a hard cap (default 3) on simultaneously
//!   active processes is the sole load-shedding mechanism
//! - **At most one advancement** per invocation, keeping progress fair
//!   across queued jobs
//! - **Timeout watchdogs**: a phase that outlives its budget is
//!   force-completed with whatever row counts remain recoverable
//! - **Idempotent finalization**: completion stamps only ever fill unset
//!   timestamps, so crash recovery converges
//!
//! ## Module Organization
//!
//! - [`models`] - Batch processes, chunks, row descriptions, kinds
//! - [`store`] - Persistence trait with PostgreSQL and in-memory backends
//! - [`executors`] - Collaborator seams for retrieval, analytics, search
//! - [`pipeline`] - Batch set row transformation passes
//! - [`orchestration`] - Scheduler, per-kind processors, finalizer, audit
//! - [`config`] - Layered configuration (file + environment)
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use civic_batch_core::clock::SystemClock;
//! use civic_batch_core::config::SchedulerConfig;
//! use civic_batch_core::orchestration::BatchProcessScheduler;
//! use civic_batch_core::store::PgProcessStore;
//! # use civic_batch_core::executors::StageExecutors;
//!
//! # async fn example(executors: StageExecutors) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(PgProcessStore::connect("postgres://localhost/civic").await?);
//! let config = SchedulerConfig::load()?;
//! let scheduler = BatchProcessScheduler::new(store, executors, config, Arc::new(SystemClock));
//!
//! let outcome = scheduler.advance_pipeline().await;
//! println!("{}", outcome.status.summary());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod executors;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod pipeline;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PhaseTimeouts, SchedulerConfig};
pub use error::{CoreError, Result};
pub use models::{
    AnalyticsChunk, BallotItemChunk, BallotItemKind, BatchProcess, BatchRowDescription,
    ChunkPhase, ChunkStep, ChunkedAnalyticsKind, NewBatchProcess, ProcessKind, ProcessRoute,
};
pub use orchestration::{BatchProcessScheduler, SchedulerOutcome, StatusEvent, StatusLog};
pub use store::{InMemoryProcessStore, PgProcessStore, ProcessStore};
