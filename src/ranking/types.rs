//! Core traits and keys for ranking.

use serde::{Deserialize, Serialize};

/// A rule that assigns a comparable value to an item.
///
/// The engine consults tie rules in order, each with its own
/// [`SortOrder`], only when every earlier key is tied within epsilon.
///
/// # Examples
///
/// ```ignore
/// struct MathScore;
///
/// impl RankRule<StudentResult> for MathScore {
///     fn name(&self) -> &str { "MathScore" }
///     fn score(&self, r: &StudentResult) -> f64 {
///         r.vars.get("math").and_then(Value::as_f64).unwrap_or(0.0)
///     }
/// }
/// ```
pub trait RankRule<T>: Send + Sync {
    /// Returns the name of this rule.
    fn name(&self) -> &str;

    /// Computes the value this rule sorts by.
    fn score(&self, item: &T) -> f64;
}

/// What the engine needs from every ranked item.
pub trait Ranked {
    /// Final key, always ascending.
    fn student_id(&self) -> &str;

    /// Primary key, always descending. Equal scores share a rank.
    fn final_score(&self) -> f64;

    /// Value of a built-in tie key.
    fn tie_value(&self, key: TieField) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Built-in secondary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieField {
    /// Sum of units over eligible subjects.
    WeightedUnitSum,
    /// Number of eligible subjects.
    EligibleSubjects,
}

/// One configured secondary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieKey {
    pub field: TieField,
    #[serde(default)]
    pub order: SortOrder,
}

impl TieKey {
    pub fn desc(field: TieField) -> Self {
        Self {
            field,
            order: SortOrder::Desc,
        }
    }

    pub fn asc(field: TieField) -> Self {
        Self {
            field,
            order: SortOrder::Asc,
        }
    }
}

/// Rule adapter over a [`TieField`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldRule(pub TieField);

impl<T: Ranked> RankRule<T> for FieldRule {
    fn name(&self) -> &str {
        match self.0 {
            TieField::WeightedUnitSum => "WeightedUnitSum",
            TieField::EligibleSubjects => "EligibleSubjects",
        }
    }

    fn score(&self, item: &T) -> f64 {
        item.tie_value(self.0)
    }
}

/// Position of one item after ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Index into the ranked slice.
    pub index: usize,
    /// 1-based competition rank.
    pub rank: u32,
}
