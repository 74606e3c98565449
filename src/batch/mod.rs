//! Batch scoring: chunked execution, global ranking, persistence.
//!
//! - [`BatchRunner`]: runs every student in fixed-size chunks (in parallel
//!   inside a chunk with the `parallel` feature), reports progress after
//!   each chunk, and ranks the results once all are scored
//! - [`BatchConfig`]: chunk sizes, parallelism, snapshot capture, tie keys
//! - [`persist_results`]: writes ranked rows through a [`ResultSink`]
//!
//! The pipeline and the token menus are shared read-only across workers;
//! no mutable state crosses students. A failed student is logged and
//! reported in [`BatchResult::failures`] without stopping the batch.

mod config;
mod persist;
mod runner;
mod types;

pub use config::BatchConfig;
pub use persist::{persist_results, JsonLinesSink, MemorySink, PersistSummary, ResultSink};
pub use runner::BatchRunner;
pub use types::{BatchProgress, BatchResult, StudentResult};
