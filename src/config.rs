//! # Scheduler Configuration
//!
//! Explicit configuration for the batch process scheduler. There is no
//! process-global settings object: embedders construct a [`SchedulerConfig`]
//! (or load one) and hand it to the scheduler. The kill switch, admission
//! cap, and phase timeout budgets all live here.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use civic_batch_core::config::SchedulerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, or `civic-batch.toml` + CIVIC_BATCH_* overrides
//! let config = SchedulerConfig::load()?;
//! assert!(config.max_active_processes >= 1);
//! # Ok(())
//! # }
//! ```

use chrono::Duration;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{scheduling, status, timeouts};
use crate::error::{CoreError, Result};

/// Per-phase budgets for ballot item batch processes
///
/// A phase whose start timestamp is older than its budget is treated as
/// stuck and force-completed by the next scheduler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    pub retrieve_seconds: i64,
    pub analyze_seconds: i64,
    pub create_seconds: i64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            retrieve_seconds: timeouts::RETRIEVE_PHASE_MINUTES * 60, // 30 minutes
            analyze_seconds: timeouts::ANALYZE_PHASE_MINUTES * 60,   // 30 minutes
            create_seconds: timeouts::CREATE_PHASE_MINUTES * 60,     // 20 minutes
        }
    }
}

impl PhaseTimeouts {
    pub fn retrieve(&self) -> Duration {
        Duration::seconds(self.retrieve_seconds)
    }

    pub fn analyze(&self) -> Duration {
        Duration::seconds(self.analyze_seconds)
    }

    pub fn create(&self) -> Duration {
        Duration::seconds(self.create_seconds)
    }
}

/// Configuration for one scheduler instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Kill switch. When false the scheduler reports and touches nothing.
    pub system_on: bool,

    /// Admission cap: queued processes are only activated while the
    /// active count is below this
    pub max_active_processes: u32,

    /// Phase timeout budgets
    pub phase_timeouts: PhaseTimeouts,

    /// Cap on accumulated per-row error detail in a batch set outcome,
    /// in bytes
    pub status_detail_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            system_on: true,
            max_active_processes: scheduling::MAX_ACTIVE_BATCH_PROCESSES,
            phase_timeouts: PhaseTimeouts::default(),
            status_detail_limit: status::ERROR_DETAIL_LIMIT_BYTES,
        }
    }
}

impl SchedulerConfig {
    /// Configuration suitable for tests: tight budgets, small detail cap
    pub fn for_testing() -> Self {
        Self {
            system_on: true,
            max_active_processes: scheduling::MAX_ACTIVE_BATCH_PROCESSES,
            phase_timeouts: PhaseTimeouts {
                retrieve_seconds: 60,
                analyze_seconds: 60,
                create_seconds: 60,
            },
            status_detail_limit: 256,
        }
    }

    /// Load configuration from `civic-batch.{toml,yaml,json}` in the working
    /// directory (optional) with `CIVIC_BATCH_*` environment overrides.
    ///
    /// Nested fields use a double-underscore separator, e.g.
    /// `CIVIC_BATCH_PHASE_TIMEOUTS__RETRIEVE_SECONDS=120`.
    pub fn load() -> Result<Self> {
        Self::load_from("civic-batch")
    }

    /// Load from an explicit config file basename
    pub fn load_from(basename: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(basename).required(false))
            .add_source(
                Environment::with_prefix("CIVIC_BATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SchedulerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_active_processes == 0 {
            return Err(CoreError::configuration(
                "scheduler",
                "max_active_processes must be at least 1",
            ));
        }
        let timeouts = &self.phase_timeouts;
        if timeouts.retrieve_seconds <= 0
            || timeouts.analyze_seconds <= 0
            || timeouts.create_seconds <= 0
        {
            return Err(CoreError::configuration(
                "scheduler",
                "phase timeout budgets must be positive",
            ));
        }
        Ok(())
    }
}
