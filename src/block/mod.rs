//! Block schema, port compatibility and validation.
//!
//! - [`def`]: wire form as authored (`PipelineDef`, `BlockDef`, `CaseDef`)
//! - [`port`]: block kinds, their ports and the static edge matrix
//! - [`types`]: the validated, runnable [`Pipeline`]
//! - [`validate()`]: turns a definition into a pipeline or a
//!   [`ValidationError`](crate::error::ValidationError) listing every
//!   violation

pub mod def;
pub mod port;
pub mod types;
mod validate;

pub use def::{
    ordered_cases, AggregateOp, BlockBody, BlockDef, CaseDef, ComponentDef, FinalizeMode,
    OverwritePolicy, PipelineDef, SkipPolicy,
};
pub use port::{can_follow, BlockKind, PortKind, COMPATIBILITY};
pub use types::{AnyBlock, Block, Component, Pipeline};
pub use validate::validate;
