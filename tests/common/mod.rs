pub mod flaky_store;
pub mod scripted;

pub use flaky_store::*;
pub use scripted::*;

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use civic_batch_core::clock::ManualClock;
use civic_batch_core::config::SchedulerConfig;
use civic_batch_core::models::{BatchProcess, NewBatchProcess, ProcessKind};
use civic_batch_core::orchestration::BatchProcessScheduler;
use civic_batch_core::store::{InMemoryProcessStore, ProcessStore};

/// Fixed instant every harness clock starts from
pub fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// A scheduler wired over the in-memory store with a manual clock and
/// scripted executors, plus handles to all three for steering and
/// assertions.
#[allow(dead_code)]
pub struct SchedulerHarness {
    pub store: Arc<InMemoryProcessStore>,
    pub clock: ManualClock,
    pub executors: Arc<ScriptedExecutors>,
    pub scheduler: BatchProcessScheduler,
}

#[allow(dead_code)]
impl SchedulerHarness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::for_testing())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let clock = ManualClock::new(start_instant());
        let store = Arc::new(InMemoryProcessStore::with_clock(Arc::new(clock.clone())));
        let executors = ScriptedExecutors::new();
        let scheduler = BatchProcessScheduler::new(
            store.clone(),
            stage_executors(&executors),
            config,
            Arc::new(clock.clone()),
        );
        Self {
            store,
            clock,
            executors,
            scheduler,
        }
    }

    /// Insert one queued process
    pub async fn queue(&self, kind: ProcessKind) -> BatchProcess {
        self.queue_with(NewBatchProcess::new(kind)).await
    }

    pub async fn queue_with(&self, new_process: NewBatchProcess) -> BatchProcess {
        self.store.create_batch_process(new_process).await.unwrap()
    }

    /// Insert one process that is already started
    pub async fn activate(&self, kind: ProcessKind) -> BatchProcess {
        self.activate_with(NewBatchProcess::new(kind)).await
    }

    pub async fn activate_with(&self, new_process: NewBatchProcess) -> BatchProcess {
        let mut process = self.queue_with(new_process).await;
        process.date_started = Some(process.date_added_to_queue);
        self.store.update_batch_process(&process).await.unwrap();
        process
    }

    /// Fresh snapshot of a process row
    pub fn process(&self, id: i64) -> BatchProcess {
        self.store.get_batch_process(id).unwrap()
    }
}
