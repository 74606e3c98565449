//! Block-pipeline scoring engine for admissions transcripts.
//!
//! A pipeline is an ordered list of components, each a chain of typed
//! blocks that filter, transform and reduce a student's transcript into a
//! single final score:
//!
//! - **Division**: partitions subjects into cases by attribute criteria;
//!   each case runs its own chain in isolation.
//! - **Function**: one of nine transforms (subject/term filters, top-N,
//!   score maps, ratio weights, formulas).
//! - **Condition**: picks a `then` or `else` chain from an expression.
//! - **Aggregation**: reduces a subject list to one number.
//! - **Variable**: stores a value in the component or pipeline scope.
//! - **Finalize**: records a snapshot, or commits the final score.
//!
//! # Flow
//!
//! 1. [`block::validate`] checks a [`block::PipelineDef`] once (ids, edges,
//!    cycles, parameters, expressions) and returns a runnable
//!    [`block::Pipeline`], or every violation at once.
//! 2. [`pipeline::Executor`] runs the pipeline against one student's
//!    [`model::Context`].
//! 3. [`batch::BatchRunner`] runs a whole cohort in chunks, ranks it with
//!    [`ranking::RankEngine`] and hands rows to a [`batch::ResultSink`].
//!
//! Running a student never touches shared mutable state, so a batch can
//! score students in parallel (feature `parallel`, on by default).

pub mod batch;
pub mod block;
pub mod control;
pub mod division;
pub mod error;
pub mod expr;
pub mod function;
pub mod model;
pub mod pipeline;
pub mod ranking;
pub mod telemetry;
