pub mod analytics_chunk;
pub mod ballot_item_chunk;
pub mod batch_process;
pub mod kind;
pub mod log_entry;
pub mod row_description;

// Re-export core models for easy access
pub use analytics_chunk::AnalyticsChunk;
pub use ballot_item_chunk::{BallotItemChunk, ChunkPhase, ChunkStep};
pub use batch_process::{BatchProcess, NewBatchProcess};
pub use kind::{
    BallotItemKind, ChunkedAnalyticsKind, ProcessKind, ProcessRoute, ALL_PROCESS_KINDS,
};
pub use log_entry::{NewProcessLogEntry, ProcessLogEntry};
pub use row_description::{BatchRowDescription, RowDescriptionFilter};
