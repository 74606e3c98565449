//! Error taxonomy.
//!
//! Two families with different blast radius:
//!
//! - [`ValidationError`]: the pipeline definition is malformed. Raised once,
//!   before any student runs, and carries every violation found.
//! - [`RunError`]: one student cannot be scored. Wrapped in a
//!   [`StudentFailure`] at the student boundary; the batch carries on.
//!
//! [`BatchError`] and [`LoadError`] sit outside the engine: a bad batch
//! configuration, a sink that cannot write, or an unreadable document.

use crate::expr::EvalError;
use crate::model::{BlockId, ComponentId, VarScope};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Category of a validation violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A chain references a block id missing from the arena.
    UnknownBlock,
    /// Two arena entries share an id.
    DuplicateBlock,
    /// A block is referenced by more than one chain.
    SharedBlock,
    /// A chain reaches one of its own ancestors.
    Cycle,
    /// An adjacent block pair is not allowed by the port matrix.
    IllegalEdge,
    /// A division case's criteria failed its schema.
    InvalidCriteria,
    /// A block's parameters failed their schema.
    InvalidParams,
    /// An expression failed to parse.
    InvalidExpression,
    /// A division declares no cases.
    EmptyDivision,
    /// A block is not reachable from any component chain, or follows a
    /// terminating finalize.
    UnreachableBlock,
    /// Component predecessor links are inconsistent.
    ComponentOrder,
}

/// A single problem found while validating a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub component_id: Option<ComponentId>,
    pub block_id: Option<BlockId>,
    pub case_index: Option<usize>,
    pub message: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            component_id: None,
            block_id: None,
            case_index: None,
            message: message.into(),
        }
    }

    pub fn in_component(mut self, id: ComponentId) -> Self {
        self.component_id = Some(id);
        self
    }

    pub fn at_block(mut self, id: BlockId) -> Self {
        self.block_id = Some(id);
        self
    }

    pub fn at_case(mut self, index: usize) -> Self {
        self.case_index = Some(index);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}]", self.kind)?;
        if let Some(id) = self.component_id {
            write!(f, " component {id}")?;
        }
        if let Some(id) = self.block_id {
            write!(f, " block {id}")?;
        }
        if let Some(idx) = self.case_index {
            write!(f, " case {idx}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// The pipeline definition was rejected. Holds every violation found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pipeline rejected with {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn kinds(&self) -> Vec<ViolationKind> {
        self.violations.iter().map(|v| v.kind).collect()
    }

    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}

/// Why a single student could not be scored.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunError {
    /// A case with `error_empty_case` matched no subjects.
    #[error("case '{case_key}' matched no subjects")]
    EmptyCase { case_key: String },

    /// A `score_map` lookup missed its table under `outOfRange = error`.
    #[error("{field} value {value} is outside the score map table")]
    ScoreMapRange { field: String, value: String },

    /// A `deny` variable write hit an existing name.
    #[error("variable '{name}' already exists in {scope} scope")]
    VariableConflict { name: String, scope: VarScope },

    /// An expression could not be evaluated for this student.
    #[error("evaluation failed: {message}")]
    Evaluation { message: String },
}

impl From<EvalError> for RunError {
    fn from(e: EvalError) -> Self {
        RunError::Evaluation { message: e.message }
    }
}

/// A [`RunError`] located at the block that raised it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockError {
    pub block_id: BlockId,
    pub case_index: Option<usize>,
    pub error: RunError,
}

impl BlockError {
    pub fn new(block_id: BlockId, case_index: Option<usize>, error: RunError) -> Self {
        Self {
            block_id,
            case_index,
            error,
        }
    }

    pub fn into_failure(self, student_id: &str) -> StudentFailure {
        StudentFailure {
            student_id: student_id.to_string(),
            block_id: self.block_id,
            case_index: self.case_index,
            error: self.error,
        }
    }
}

/// A student excluded from ranking, with enough context to reproduce it.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("student {student_id}: block {block_id}{}: {error}", case_suffix(.case_index))]
pub struct StudentFailure {
    pub student_id: String,
    pub block_id: BlockId,
    pub case_index: Option<usize>,
    pub error: RunError,
}

fn case_suffix(case_index: &Option<usize>) -> String {
    case_index.map(|i| format!(" case {i}")).unwrap_or_default()
}

/// Failures while reading pipeline, student or menu documents.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failures that stop a whole batch before any student runs.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid batch configuration: {0}")]
    Config(String),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("failed to persist results: {0}")]
    Sink(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let v = Violation::new(ViolationKind::IllegalEdge, "aggregation -> function")
            .in_component(1)
            .at_block(12)
            .at_case(0);
        assert_eq!(
            v.to_string(),
            "[IllegalEdge] component 1 block 12 case 0: aggregation -> function"
        );
    }

    #[test]
    fn test_student_failure_display() {
        let failure = BlockError::new(
            5,
            Some(1),
            RunError::EmptyCase {
                case_key: "career".into(),
            },
        )
        .into_failure("S100");
        assert_eq!(
            failure.to_string(),
            "student S100: block 5 case 1: case 'career' matched no subjects"
        );
    }

    #[test]
    fn test_variable_conflict_names_scope() {
        let err = RunError::VariableConflict {
            name: "bonus".into(),
            scope: VarScope::Pipeline,
        };
        assert_eq!(err.to_string(), "variable 'bonus' already exists in pipeline scope");
    }

    #[test]
    fn test_validation_error_counts() {
        let err = ValidationError {
            violations: vec![
                Violation::new(ViolationKind::Cycle, "a"),
                Violation::new(ViolationKind::IllegalEdge, "b"),
            ],
        };
        assert_eq!(err.to_string(), "pipeline rejected with 2 violation(s)");
        assert!(err.has(ViolationKind::Cycle));
        assert!(!err.has(ViolationKind::SharedBlock));
    }
}
