//! Global ranking of scored students.
//!
//! Ranking runs once per batch, after every student has a final score.
//! Keys are applied in order, each one only splitting what the previous
//! keys left equal:
//!
//! - **Primary key**: final score, descending, compared within epsilon.
//!   Equal scores share a competition rank (`[90, 90, 80]` → `[1, 1, 3]`).
//! - **Tie keys**: applied in order inside a tie group; they decide the
//!   listing order, never the rank.
//! - **Final key**: student id ascending, so the order is total.

mod engine;
mod types;

pub use engine::{competition_ranks, RankEngine};
pub use types::{Placement, RankRule, Ranked, SortOrder, TieField, TieKey};
