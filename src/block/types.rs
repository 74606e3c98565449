//! Validated, runnable pipeline.

use super::port::BlockKind;
use crate::control::{AggregationBlock, ConditionBlock, FinalizeBlock, VariableBlock};
use crate::division::DivisionBlock;
use crate::function::FunctionBlock;
use crate::model::{BlockId, ComponentId};
use std::collections::BTreeMap;

/// A typed block body. The set of kinds is closed; every match over it
/// is exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyBlock {
    Division(DivisionBlock),
    Function(FunctionBlock),
    Condition(ConditionBlock),
    Aggregation(AggregationBlock),
    Variable(VariableBlock),
    Finalize(FinalizeBlock),
}

impl AnyBlock {
    pub fn kind(&self) -> BlockKind {
        match self {
            AnyBlock::Division(_) => BlockKind::Division,
            AnyBlock::Function(_) => BlockKind::Function,
            AnyBlock::Condition(_) => BlockKind::Condition,
            AnyBlock::Aggregation(_) => BlockKind::Aggregation,
            AnyBlock::Variable(_) => BlockKind::Variable,
            AnyBlock::Finalize(_) => BlockKind::Finalize,
        }
    }

    /// Child chains in execution order: division case chains, or the
    /// condition's then/else branches.
    pub fn child_chains(&self) -> Vec<&[BlockId]> {
        match self {
            AnyBlock::Division(d) => d.cases.iter().map(|c| c.right_chain.as_slice()).collect(),
            AnyBlock::Condition(c) => vec![c.then_chain.as_slice(), c.else_chain.as_slice()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub body: AnyBlock,
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        self.body.kind()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub position: i32,
    pub predecessor_id: Option<ComponentId>,
    pub chain: Vec<BlockId>,
}

/// A pipeline that passed validation.
///
/// Only [`validate`](super::validate) builds one, so every chain id
/// resolves, every edge is legal and every expression parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub id: u64,
    pub name: String,
    /// Components in execution order.
    pub components: Vec<Component>,
    pub blocks: BTreeMap<BlockId, Block>,
}

impl Pipeline {
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}
