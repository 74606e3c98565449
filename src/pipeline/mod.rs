//! Per-student pipeline execution.
//!
//! [`order_components`] fixes the component order once per pipeline;
//! [`Executor`] walks every component chain for one student, threading a
//! subject list and a running scalar from block to block.
//!
//! # Usage
//!
//! ```
//! use u_gradeflow::block::{validate, PipelineDef};
//! use u_gradeflow::model::{Context, Subject, TokenMenuStore};
//! use u_gradeflow::pipeline::Executor;
//!
//! let def = PipelineDef::from_json(r#"{
//!     "id": 1,
//!     "components": [{"id": 1, "chain": [1, 2]}],
//!     "blocks": [
//!         {"id": 1, "type": "aggregation", "op": "SUM", "target": "score"},
//!         {"id": 2, "type": "finalize"}
//!     ]
//! }"#).unwrap();
//! let pipeline = validate(&def).unwrap();
//! let menus = TokenMenuStore::new();
//!
//! let subject = Subject { unit: 1.0, score: Some(42.0), ..Subject::default() };
//! let ctx = Executor::new(&pipeline, &menus)
//!     .run_student(Context::new("S1", vec![subject]))
//!     .unwrap();
//! assert_eq!(ctx.final_score, 42.0);
//! ```

mod executor;
pub(crate) mod frame;
mod sequencer;

pub use executor::Executor;
pub use sequencer::order_components;
