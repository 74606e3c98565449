//! Batch execution.
//!
//! [`BatchRunner`] drives the whole run: chunked execution, then one
//! global ranking pass once every student has a score.

use super::config::BatchConfig;
use super::types::{BatchProgress, BatchResult, StudentResult};
use crate::block::Pipeline;
use crate::error::{BatchError, StudentFailure};
use crate::model::{Context, TokenMenuStore};
use crate::pipeline::Executor;
use crate::ranking::RankEngine;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Executes a validated pipeline over a list of students.
///
/// # Usage
///
/// ```ignore
/// let pipeline = validate(&def)?;
/// let config = BatchConfig::default().with_chunk_size(200);
/// let result = BatchRunner::run(&pipeline, &menus, students, &config)?;
/// for row in &result.results {
///     println!("{} {} {}", row.final_rank, row.identify_number, row.final_score);
/// }
/// ```
pub struct BatchRunner;

impl BatchRunner {
    /// Runs every student and ranks the results.
    pub fn run(
        pipeline: &Pipeline,
        menus: &TokenMenuStore,
        students: Vec<Context>,
        config: &BatchConfig,
    ) -> Result<BatchResult, BatchError> {
        Self::run_with_cancel(
            pipeline,
            menus,
            students,
            config,
            None,
            &BatchProgress::new(),
            |_, _| {},
        )
    }

    /// Runs the batch with an optional cancellation token.
    ///
    /// The flag is checked before each chunk; a started chunk always
    /// finishes. `progress` is updated and `on_progress(processed, total)`
    /// is called after every chunk. A cancelled run still ranks the
    /// students it finished.
    pub fn run_with_cancel<F>(
        pipeline: &Pipeline,
        menus: &TokenMenuStore,
        students: Vec<Context>,
        config: &BatchConfig,
        cancel: Option<Arc<AtomicBool>>,
        progress: &BatchProgress,
        mut on_progress: F,
    ) -> Result<BatchResult, BatchError>
    where
        F: FnMut(usize, usize),
    {
        config.validate().map_err(BatchError::Config)?;
        let workers = Workers::new(config)?;
        let executor = Executor::new(pipeline, menus).with_snapshots(config.capture_snapshots);

        let total = students.len();
        progress.start(total);
        let started = Instant::now();
        info!(
            pipeline_id = pipeline.id,
            students = total,
            chunk_size = config.chunk_size,
            "batch started"
        );

        let mut scored = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut cancelled = false;
        let mut remaining = students.into_iter();

        loop {
            if let Some(ref flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
            }

            let chunk: Vec<Context> = remaining.by_ref().take(config.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let size = chunk.len();

            for outcome in workers.run(&executor, chunk) {
                match outcome {
                    Ok(ctx) => scored.push(StudentResult::from_context(ctx)),
                    Err(failure) => {
                        warn!(
                            student = %failure.student_id,
                            block_id = failure.block_id,
                            case_index = ?failure.case_index,
                            error = %failure.error,
                            "student failed"
                        );
                        failures.push(failure);
                    }
                }
            }

            let processed = progress.advance(size);
            debug!(processed, total, "chunk finished");
            on_progress(processed, total);
        }

        let results = rank(scored, config);
        let processed = progress.processed();
        info!(
            pipeline_id = pipeline.id,
            scored = results.len(),
            failed = failures.len(),
            cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );

        Ok(BatchResult {
            results,
            failures,
            processed,
            cancelled,
        })
    }
}

/// Orders results and fills in `final_rank`.
fn rank(scored: Vec<StudentResult>, config: &BatchConfig) -> Vec<StudentResult> {
    let engine = RankEngine::from_keys(&config.tie_keys, config.tie_epsilon);
    let placements = engine.rank(&scored);
    let mut slots: Vec<Option<StudentResult>> = scored.into_iter().map(Some).collect();
    placements
        .into_iter()
        .filter_map(|p| {
            let mut result = slots[p.index].take()?;
            result.final_rank = p.rank;
            Some(result)
        })
        .collect()
}

type Outcome = Result<Context, StudentFailure>;

/// Runs the students of one chunk.
struct Workers {
    #[cfg(feature = "parallel")]
    parallel: bool,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl Workers {
    #[cfg(feature = "parallel")]
    fn new(config: &BatchConfig) -> Result<Self, BatchError> {
        let pool = match config.max_workers {
            Some(n) if config.parallel => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| BatchError::WorkerPool(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(Self {
            parallel: config.parallel,
            pool,
        })
    }

    #[cfg(not(feature = "parallel"))]
    fn new(config: &BatchConfig) -> Result<Self, BatchError> {
        if config.parallel {
            debug!("built without the parallel feature, running sequentially");
        }
        Ok(Self {})
    }

    #[cfg(feature = "parallel")]
    fn run(&self, executor: &Executor<'_>, chunk: Vec<Context>) -> Vec<Outcome> {
        if !self.parallel {
            return sequential(executor, chunk);
        }
        let work = || -> Vec<Outcome> {
            chunk
                .into_par_iter()
                .map(|ctx| executor.run_student(ctx))
                .collect()
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn run(&self, executor: &Executor<'_>, chunk: Vec<Context>) -> Vec<Outcome> {
        sequential(executor, chunk)
    }
}

fn sequential(executor: &Executor<'_>, chunk: Vec<Context>) -> Vec<Outcome> {
    chunk
        .into_iter()
        .map(|ctx| executor.run_student(ctx))
        .collect()
}
