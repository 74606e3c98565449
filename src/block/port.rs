//! Block kinds, their ports, and the static compatibility matrix.

use serde::{Deserialize, Serialize};

/// The six block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Division,
    Function,
    Condition,
    Aggregation,
    Variable,
    Finalize,
}

/// Data carried across a block edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// A list of subjects.
    Subjects,
    /// One number.
    Scalar,
    /// A result row (committed final score).
    Table,
    /// The variable scope.
    Dict,
}

impl PortKind {
    /// Whether an output of this kind may feed an input of kind `to`.
    ///
    /// A subject list can be reduced or read as scope; a scalar can be
    /// stored or read as scope. Dict and table outputs are terminal.
    pub fn accepts(self, to: PortKind) -> bool {
        matches!(
            (self, to),
            (PortKind::Subjects, PortKind::Subjects | PortKind::Dict | PortKind::Scalar)
                | (PortKind::Scalar, PortKind::Scalar | PortKind::Dict)
        )
    }
}

impl BlockKind {
    /// Every kind, in matrix order.
    pub const ALL: [BlockKind; 6] = [
        BlockKind::Division,
        BlockKind::Function,
        BlockKind::Condition,
        BlockKind::Aggregation,
        BlockKind::Variable,
        BlockKind::Finalize,
    ];

    /// Row/column of this kind in [`COMPATIBILITY`].
    pub const fn index(self) -> usize {
        match self {
            BlockKind::Division => 0,
            BlockKind::Function => 1,
            BlockKind::Condition => 2,
            BlockKind::Aggregation => 3,
            BlockKind::Variable => 4,
            BlockKind::Finalize => 5,
        }
    }

    pub fn input_port(self) -> PortKind {
        match self {
            BlockKind::Division | BlockKind::Function | BlockKind::Aggregation => {
                PortKind::Subjects
            }
            BlockKind::Condition => PortKind::Dict,
            BlockKind::Variable | BlockKind::Finalize => PortKind::Scalar,
        }
    }

    pub fn output_port(self) -> PortKind {
        match self {
            BlockKind::Division | BlockKind::Function | BlockKind::Condition => PortKind::Subjects,
            BlockKind::Aggregation => PortKind::Scalar,
            BlockKind::Variable => PortKind::Dict,
            BlockKind::Finalize => PortKind::Table,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Division => "division",
            BlockKind::Function => "function",
            BlockKind::Condition => "condition",
            BlockKind::Aggregation => "aggregation",
            BlockKind::Variable => "variable",
            BlockKind::Finalize => "finalize",
        }
    }
}

const T: bool = true;
const F: bool = false;

/// `COMPATIBILITY[from][to]`: whether `to` may directly follow `from`.
///
/// Rows and columns follow [`BlockKind::ALL`]. Variable and finalize rows
/// are all false: both are terminal in their chain.
pub const COMPATIBILITY: [[bool; 6]; 6] = [
    //  div fun con agg var fin
    [T, T, T, T, T, T], // division
    [T, T, T, T, T, T], // function
    [T, T, T, T, T, T], // condition
    [F, F, T, F, T, T], // aggregation
    [F, F, F, F, F, F], // variable
    [F, F, F, F, F, F], // finalize
];

// A new kind must come with a matrix row and column.
const _: () = assert!(BlockKind::ALL.len() == COMPATIBILITY.len());

/// Whether the edge `from → to` is legal.
pub fn can_follow(from: BlockKind, to: BlockKind) -> bool {
    COMPATIBILITY[from.index()][to.index()]
}
