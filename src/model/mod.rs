//! Data model shared by every stage of the engine.
//!
//! - [`Context`]: per-student working state (identity, subjects, variables,
//!   metrics, snapshots)
//! - [`Subject`]: one transcript line with a mutable `score` and a soft
//!   exclusion marker
//! - [`Snapshot`] / [`CalculationLog`]: audit records for replay
//! - [`TokenMenuStore`]: read-only coded vocabularies
//! - [`Value`]: loosely typed scalar used by variables and expressions

mod context;
mod menu;
mod snapshot;
mod subject;
mod value;

pub use context::{Context, VarScope, Vars};
pub use menu::{MenuItem, TokenMenuStore, MENU_REFERENCE_PREFIX};
pub use snapshot::{CalculationLog, Snapshot};
pub use subject::{Subject, SubjectField};
pub use value::Value;

/// Identifier of a block in the pipeline arena. `0` is reserved for
/// "not excluded" in [`Subject::filtered_block_id`].
pub type BlockId = u64;

/// Identifier of a pipeline component.
pub type ComponentId = u64;
