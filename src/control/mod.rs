//! Control blocks: branching, reduction, scoped storage and termination.
//!
//! - [`ConditionBlock`]: picks `thenChain` or `elseChain`
//! - [`AggregationBlock`]: reduces a subject list to one scalar
//! - [`VariableBlock`]: stores a value in the component or pipeline scope
//! - [`FinalizeBlock`]: snapshots, or commits the final score and stops
//!
//! Each block only computes and records; walking chains is the
//! executor's job.

mod aggregation;
mod condition;
mod finalize;
mod variable;

pub use aggregation::AggregationBlock;
pub use condition::ConditionBlock;
pub use finalize::FinalizeBlock;
pub use variable::VariableBlock;

pub(crate) use finalize::{commit, Flow};
