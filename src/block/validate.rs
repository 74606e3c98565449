//! Pipeline validation.
//!
//! [`validate`] is the only way to obtain a [`Pipeline`]. It runs once per
//! batch and collects every violation instead of stopping at the first.
//!
//! Checks, in reporting order:
//!
//! 1. Arena: duplicate or reserved block ids
//! 2. Components: predecessor links form a valid order
//! 3. Chains, walked per component in execution order: unknown ids,
//!    cycles, blocks shared between chains, illegal edges, blocks after a
//!    terminating finalize
//! 4. Blocks, by id: params, criteria and expressions
//! 5. Arena blocks no chain reaches
//!
//! The result depends only on the definition, so re-validating the same
//! document yields the same violations in the same order.

use super::def::{BlockBody, BlockDef, PipelineDef};
use super::port::{can_follow, BlockKind};
use super::types::{AnyBlock, Block, Component, Pipeline};
use crate::control::{AggregationBlock, ConditionBlock, FinalizeBlock, VariableBlock};
use crate::division::DivisionBlock;
use crate::error::{ValidationError, Violation, ViolationKind};
use crate::function::{FunctionBlock, Transform};
use crate::model::{BlockId, ComponentId};
use crate::pipeline::order_components;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

/// Validates a pipeline definition and compiles it into runnable form.
pub fn validate(def: &PipelineDef) -> Result<Pipeline, ValidationError> {
    let mut violations = Vec::new();

    // 1. Arena
    let mut arena: BTreeMap<BlockId, &BlockDef> = BTreeMap::new();
    for block in &def.blocks {
        if block.id == 0 {
            violations.push(
                Violation::new(ViolationKind::DuplicateBlock, "block id 0 is reserved").at_block(0),
            );
            continue;
        }
        match arena.entry(block.id) {
            Entry::Vacant(slot) => {
                slot.insert(block);
            }
            Entry::Occupied(_) => violations.push(
                Violation::new(
                    ViolationKind::DuplicateBlock,
                    format!("block id {} is declared more than once", block.id),
                )
                .at_block(block.id),
            ),
        }
    }

    // 2. Components
    let order = match order_components(&def.components) {
        Ok(order) => order,
        Err(v) => {
            violations.extend(v);
            (0..def.components.len()).collect()
        }
    };

    // 3. Chains
    let mut walker = ChainWalker {
        arena: &arena,
        owner: BTreeMap::new(),
        violations: Vec::new(),
    };
    for &i in &order {
        let component = &def.components[i];
        let mut ancestors = Vec::new();
        walker.walk(component.id, &component.chain, None, None, &mut ancestors);
    }
    let owner = walker.owner;
    violations.extend(walker.violations);

    // 4. Blocks
    let mut blocks = BTreeMap::new();
    for (&id, block) in &arena {
        match compile_block(&block.body) {
            Ok(body) => {
                blocks.insert(id, Block { id, body });
            }
            Err(found) => violations.extend(found.into_iter().map(|v| {
                let v = v.at_block(id);
                match owner.get(&id) {
                    Some(&component) => v.in_component(component),
                    None => v,
                }
            })),
        }
    }

    // 5. Reachability
    for &id in arena.keys() {
        if !owner.contains_key(&id) {
            violations.push(
                Violation::new(
                    ViolationKind::UnreachableBlock,
                    format!("block {id} is not referenced by any chain"),
                )
                .at_block(id),
            );
        }
    }

    if !violations.is_empty() {
        debug!(
            pipeline_id = def.id,
            violations = violations.len(),
            "pipeline rejected"
        );
        return Err(ValidationError { violations });
    }

    let components = order
        .into_iter()
        .map(|i| {
            let c = &def.components[i];
            Component {
                id: c.id,
                name: c.name.clone(),
                position: c.position,
                predecessor_id: c.predecessor_id,
                chain: c.chain.clone(),
            }
        })
        .collect();

    debug!(
        pipeline_id = def.id,
        blocks = blocks.len(),
        "pipeline validated"
    );
    Ok(Pipeline {
        id: def.id,
        name: def.name.clone(),
        components,
        blocks,
    })
}

fn compile_block(body: &BlockBody) -> Result<AnyBlock, Vec<Violation>> {
    match body {
        BlockBody::Division { skip_policy, cases } => {
            DivisionBlock::from_defs(*skip_policy, cases).map(AnyBlock::Division)
        }
        BlockBody::Function {
            function_type,
            params,
        } => Transform::from_params(function_type, params)
            .map(|t| AnyBlock::Function(FunctionBlock::new(t))),
        BlockBody::Condition {
            expr,
            then_chain,
            else_chain,
        } => ConditionBlock::compile(expr, then_chain.clone(), else_chain.clone())
            .map(AnyBlock::Condition),
        BlockBody::Aggregation {
            op,
            target,
            weight,
            filter,
            output_name,
        } => AggregationBlock::compile(
            *op,
            target.as_deref(),
            weight.as_deref(),
            filter.as_deref(),
            output_name.clone(),
        )
        .map(AnyBlock::Aggregation),
        BlockBody::Variable {
            name,
            scope,
            overwrite,
            value,
        } => VariableBlock::compile(name, *scope, *overwrite, value.as_deref())
            .map(AnyBlock::Variable),
        BlockBody::Finalize { mode } => Ok(AnyBlock::Finalize(FinalizeBlock::new(*mode))),
    }
}

/// Walks chains over the raw arena so structural problems are reported
/// even for blocks whose params fail to compile.
struct ChainWalker<'a> {
    arena: &'a BTreeMap<BlockId, &'a BlockDef>,
    /// Block → component of the first chain that referenced it.
    owner: BTreeMap<BlockId, ComponentId>,
    violations: Vec<Violation>,
}

impl ChainWalker<'_> {
    fn walk(
        &mut self,
        component: ComponentId,
        chain: &[BlockId],
        parent: Option<(BlockId, BlockKind)>,
        case_index: Option<usize>,
        ancestors: &mut Vec<BlockId>,
    ) {
        let locate = |v: Violation, id: BlockId| {
            let v = v.in_component(component).at_block(id);
            match case_index {
                Some(i) => v.at_case(i),
                None => v,
            }
        };

        let arena = self.arena;
        let mut prev = parent;
        let mut terminated_by: Option<BlockId> = None;

        for &id in chain {
            if let Some(fin) = terminated_by {
                self.violations.push(locate(
                    Violation::new(
                        ViolationKind::UnreachableBlock,
                        format!("block {id} follows terminating finalize {fin}"),
                    ),
                    id,
                ));
            }
            if ancestors.contains(&id) {
                self.violations.push(locate(
                    Violation::new(
                        ViolationKind::Cycle,
                        format!("block {id} is referenced from inside itself"),
                    ),
                    id,
                ));
                prev = None;
                continue;
            }
            let Some(block) = arena.get(&id) else {
                self.violations.push(locate(
                    Violation::new(
                        ViolationKind::UnknownBlock,
                        format!("block {id} is not in the arena"),
                    ),
                    id,
                ));
                prev = None;
                continue;
            };
            if let Some(&first) = self.owner.get(&id) {
                self.violations.push(locate(
                    Violation::new(
                        ViolationKind::SharedBlock,
                        format!("block {id} is already used by a chain in component {first}"),
                    ),
                    id,
                ));
                prev = None;
                continue;
            }
            self.owner.insert(id, component);

            let kind = block.body.kind();
            if let Some((from_id, from_kind)) = prev {
                if !can_follow(from_kind, kind) {
                    self.violations.push(locate(
                        Violation::new(
                            ViolationKind::IllegalEdge,
                            format!(
                                "{} block {from_id} cannot feed {} block {id}",
                                from_kind.name(),
                                kind.name()
                            ),
                        ),
                        id,
                    ));
                }
            }

            ancestors.push(id);
            for (i, child) in block.body.child_chains().into_iter().enumerate() {
                let child_case = match kind {
                    BlockKind::Division => Some(i),
                    _ => case_index,
                };
                self.walk(component, child, Some((id, kind)), child_case, ancestors);
            }
            ancestors.pop();

            if block.body.terminates() && terminated_by.is_none() {
                terminated_by = Some(id);
            }
            prev = Some((id, kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn pipeline(components: serde_json::Value, blocks: serde_json::Value) -> PipelineDef {
        serde_json::from_value(json!({"id": 1, "components": components, "blocks": blocks}))
            .unwrap()
    }

    fn agg(id: u64) -> serde_json::Value {
        json!({"id": id, "type": "aggregation", "op": "AVG", "target": "score", "weight": "unit"})
    }

    fn fin(id: u64) -> serde_json::Value {
        json!({"id": id, "type": "finalize"})
    }

    fn func(id: u64) -> serde_json::Value {
        json!({"id": id, "type": "function", "functionType": "multiply_ratio",
               "params": {"ratio": 100}})
    }

    fn kinds(def: &PipelineDef) -> Vec<ViolationKind> {
        validate(def).unwrap_err().kinds()
    }

    #[test]
    fn test_valid_pipeline() {
        let def = pipeline(
            json!([{"id": 1, "chain": [10, 11, 12]}]),
            json!([
                {"id": 10, "type": "division",
                 "cases": [{"id": 1, "caseKey": "general",
                            "criteria": {"subjectSeparationCode": ["01"]},
                            "rightChain": [13]}]},
                agg(11), fin(12), func(13)
            ]),
        );
        let p = validate(&def).unwrap();
        assert_eq!(p.block_count(), 4);
        assert_eq!(p.components[0].chain, vec![10, 11, 12]);
        assert_eq!(p.block(11).unwrap().kind(), BlockKind::Aggregation);
    }

    #[test]
    fn test_illegal_edge() {
        let def = pipeline(
            json!([{"id": 1, "chain": [11, 13, 12]}]),
            json!([agg(11), func(13), fin(12)]),
        );
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kinds(), vec![ViolationKind::IllegalEdge]);
        assert_eq!(err.violations[0].block_id, Some(13));
        assert_eq!(err.violations[0].component_id, Some(1));
    }

    #[test]
    fn test_variable_is_terminal() {
        let def = pipeline(
            json!([{"id": 1, "chain": [11, 20, 12]}]),
            json!([agg(11), {"id": 20, "type": "variable", "name": "x"}, fin(12)]),
        );
        assert_eq!(kinds(&def), vec![ViolationKind::IllegalEdge]);
    }

    #[test]
    fn test_division_to_first_case_block_is_an_edge() {
        let def = pipeline(
            json!([{"id": 1, "chain": [11, 10]}]),
            json!([
                agg(11),
                {"id": 10, "type": "division",
                 "cases": [{"id": 1, "criteria": {"grade": [1]}, "rightChain": [12]}]},
                fin(12)
            ]),
        );
        // aggregation -> division is illegal; division -> finalize is fine
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kinds(), vec![ViolationKind::IllegalEdge]);
        assert_eq!(err.violations[0].block_id, Some(10));
    }

    #[test]
    fn test_unknown_shared_cycle_unreachable() {
        let def = pipeline(
            json!([
                {"id": 1, "position": 0, "chain": [10, 99]},
                {"id": 2, "position": 1, "chain": [13]}
            ]),
            json!([
                {"id": 10, "type": "division",
                 "cases": [{"id": 1, "criteria": {"grade": [1]}, "rightChain": [13, 10]}]},
                func(13),
                func(14)
            ]),
        );
        let err = validate(&def).unwrap_err();
        assert_eq!(
            err.kinds(),
            vec![
                ViolationKind::Cycle,
                ViolationKind::UnknownBlock,
                ViolationKind::SharedBlock,
                ViolationKind::UnreachableBlock,
            ]
        );
        assert_eq!(err.violations[0].case_index, Some(0));
        assert_eq!(err.violations[2].component_id, Some(2));
        assert_eq!(err.violations[3].block_id, Some(14));
    }

    #[test]
    fn test_block_after_terminate_unreachable() {
        let def = pipeline(
            json!([{"id": 1, "chain": [11, 12, 15]}]),
            json!([agg(11), fin(12), {"id": 15, "type": "finalize", "mode": "snapshot"}]),
        );
        // finalize -> finalize is also an illegal edge
        assert_eq!(
            kinds(&def),
            vec![ViolationKind::UnreachableBlock, ViolationKind::IllegalEdge]
        );
    }

    #[test]
    fn test_collects_every_param_violation() {
        let def = pipeline(
            json!([{"id": 1, "chain": [13, 14, 15, 16]}]),
            json!([
                {"id": 13, "type": "function", "functionType": "nope"},
                {"id": 14, "type": "condition", "expr": "a >"},
                {"id": 15, "type": "division", "cases": []},
                {"id": 16, "type": "division",
                 "cases": [{"id": 1, "criteria": {"color": ["red"]}}]}
            ]),
        );
        let err = validate(&def).unwrap_err();
        assert_eq!(
            err.kinds(),
            vec![
                ViolationKind::InvalidParams,
                ViolationKind::InvalidExpression,
                ViolationKind::EmptyDivision,
                ViolationKind::InvalidCriteria,
            ]
        );
        assert_eq!(err.violations[3].case_index, Some(0));
        assert!(err.violations.iter().all(|v| v.component_id == Some(1)));
    }

    #[test]
    fn test_duplicate_ids_and_component_order() {
        let def = pipeline(
            json!([{"id": 1, "predecessorId": 7, "chain": [11]}]),
            json!([agg(11), agg(11)]),
        );
        assert_eq!(
            kinds(&def),
            vec![ViolationKind::DuplicateBlock, ViolationKind::ComponentOrder]
        );
    }

    #[test]
    fn test_components_sorted() {
        let def = pipeline(
            json!([
                {"id": 1, "position": 1, "chain": [11]},
                {"id": 2, "position": 0, "chain": [12]}
            ]),
            json!([fin(11), fin(12)]),
        );
        let p = validate(&def).unwrap();
        let ids: Vec<_> = p.components.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    fn block_of_kind(id: u64, kind: usize, refs: Vec<u64>) -> serde_json::Value {
        match kind {
            0 => agg(id),
            1 => fin(id),
            2 => func(id),
            3 => json!({"id": id, "type": "variable", "name": "v"}),
            4 => json!({"id": id, "type": "condition", "expr": "value > 1", "thenChain": refs}),
            _ => json!({"id": id, "type": "division",
                        "cases": [{"id": 1, "criteria": {"grade": [1]}, "rightChain": refs}]}),
        }
    }

    fn arb_pipeline() -> impl Strategy<Value = PipelineDef> {
        let block = (0usize..6, prop::collection::vec(1u64..10, 0..3));
        (
            prop::collection::vec(block, 1..9),
            prop::collection::vec(1u64..10, 0..5),
        )
            .prop_map(|(specs, chain)| {
                let blocks: Vec<_> = specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (kind, refs))| block_of_kind(i as u64 + 1, kind, refs))
                    .collect();
                pipeline(json!([{"id": 1, "chain": chain}]), json!(blocks))
            })
    }

    proptest! {
        #[test]
        fn prop_validation_is_deterministic(def in arb_pipeline()) {
            let first = validate(&def);
            let second = validate(&def.clone());
            prop_assert_eq!(first, second);
        }
    }
}
