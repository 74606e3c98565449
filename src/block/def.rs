//! Wire form of a pipeline, as authored in the editor.
//!
//! Blocks live in one flat arena keyed by id. Component chains, case
//! chains and condition branches hold block ids, never nested blocks.
//! Nothing here is trusted until [`validate`](super::validate) accepts it.

use super::port::BlockKind;
use crate::model::{BlockId, ComponentId, VarScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An unvalidated pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDef {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub components: Vec<ComponentDef>,
    pub blocks: Vec<BlockDef>,
}

impl PipelineDef {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDef {
    pub id: ComponentId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub predecessor_id: Option<ComponentId>,
    #[serde(default)]
    pub chain: Vec<BlockId>,
}

/// One arena entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDef {
    pub id: BlockId,
    #[serde(flatten)]
    pub body: BlockBody,
}

/// Kind-specific block payload, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BlockBody {
    Division {
        #[serde(default)]
        skip_policy: SkipPolicy,
        #[serde(default)]
        cases: Vec<CaseDef>,
    },
    Function {
        function_type: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Condition {
        expr: String,
        #[serde(default)]
        then_chain: Vec<BlockId>,
        #[serde(default)]
        else_chain: Vec<BlockId>,
    },
    Aggregation {
        op: AggregateOp,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        weight: Option<String>,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        output_name: Option<String>,
    },
    Variable {
        name: String,
        #[serde(default = "default_scope")]
        scope: VarScope,
        #[serde(default)]
        overwrite: OverwritePolicy,
        #[serde(default)]
        value: Option<String>,
    },
    Finalize {
        #[serde(default)]
        mode: FinalizeMode,
    },
}

impl BlockBody {
    pub fn kind(&self) -> BlockKind {
        match self {
            BlockBody::Division { .. } => BlockKind::Division,
            BlockBody::Function { .. } => BlockKind::Function,
            BlockBody::Condition { .. } => BlockKind::Condition,
            BlockBody::Aggregation { .. } => BlockKind::Aggregation,
            BlockBody::Variable { .. } => BlockKind::Variable,
            BlockBody::Finalize { .. } => BlockKind::Finalize,
        }
    }

    /// A finalize in `terminate` mode.
    pub fn terminates(&self) -> bool {
        matches!(
            self,
            BlockBody::Finalize {
                mode: FinalizeMode::Terminate
            }
        )
    }

    /// Nested chains in execution order: case chains for a division,
    /// then/else for a condition.
    pub fn child_chains(&self) -> Vec<&[BlockId]> {
        match self {
            BlockBody::Division { cases, .. } => ordered_cases(cases)
                .into_iter()
                .map(|c| c.right_chain.as_slice())
                .collect(),
            BlockBody::Condition {
                then_chain,
                else_chain,
                ..
            } => vec![then_chain.as_slice(), else_chain.as_slice()],
            _ => Vec::new(),
        }
    }
}

fn default_scope() -> VarScope {
    VarScope::Component
}

/// One division case as authored.
///
/// `criteria` maps a subject field name to the accepted values. Shape is
/// checked by the validator, so any JSON is accepted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDef {
    pub id: u64,
    #[serde(default)]
    pub case_key: String,
    #[serde(default)]
    pub criteria: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub menu: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub is_implicit: bool,
    #[serde(default)]
    pub right_chain: Vec<BlockId>,
}

/// Cases in execution order: explicit cases by `(position, id)`, then
/// implicit ones.
pub fn ordered_cases(cases: &[CaseDef]) -> Vec<&CaseDef> {
    let mut ordered: Vec<&CaseDef> = cases.iter().collect();
    ordered.sort_by_key(|c| (c.is_implicit, c.position, c.id));
    ordered
}

/// What a case matching zero subjects means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Run the case chain against an empty list.
    #[default]
    SkipEmptyCase,
    /// Fail the student.
    ErrorEmptyCase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateOp {
    Sum,
    Avg,
    Count,
    Max,
    Min,
    Std,
}

/// Behaviour when a variable name already exists in the target scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeMode {
    /// Record a snapshot and keep going.
    Snapshot,
    /// Commit the running scalar and stop the student.
    #[default]
    Terminate,
}
