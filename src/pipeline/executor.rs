//! Per-student pipeline execution.
//!
//! A student moves `PENDING → RUNNING → {TERMINATED | FAILED}`. Running is
//! single-threaded: blocks mutate the one [`Context`] in chain order.

use super::frame::{BlockEnv, VarFrame};
use crate::block::{AnyBlock, Block, BlockKind, Pipeline, SkipPolicy};
use crate::control::{commit, Flow};
use crate::division::DivisionBlock;
use crate::error::{BlockError, RunError, StudentFailure};
use crate::model::{BlockId, CalculationLog, Context, TokenMenuStore};
use tracing::{debug, trace};

/// What a chain carries between blocks.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChainState {
    /// Indices into `Context.subjects`.
    pub subjects: Vec<usize>,
    pub scalar: Option<f64>,
}

/// Runs a validated pipeline against one student at a time.
///
/// Holds only shared, read-only references, so one executor serves every
/// worker thread of a batch.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'a> {
    pipeline: &'a Pipeline,
    menus: &'a TokenMenuStore,
    capture_snapshots: bool,
}

impl<'a> Executor<'a> {
    pub fn new(pipeline: &'a Pipeline, menus: &'a TokenMenuStore) -> Self {
        Self {
            pipeline,
            menus,
            capture_snapshots: true,
        }
    }

    /// Enables or disables snapshot capture. Scores are unaffected.
    pub fn with_snapshots(mut self, capture: bool) -> Self {
        self.capture_snapshots = capture;
        self
    }

    /// Runs every component in order and commits the final score.
    ///
    /// Reaching the end of the last component without a terminating
    /// finalize commits the last scalar any component produced, or `0.0`.
    pub fn run_student(&self, mut ctx: Context) -> Result<Context, StudentFailure> {
        let env = BlockEnv {
            block_id: 0,
            case_index: None,
            menus: self.menus,
            capture: self.capture_snapshots,
        };
        let mut frame = VarFrame::root(std::mem::take(&mut ctx.vars));
        let all: Vec<usize> = (0..ctx.subjects.len()).collect();
        let mut last_scalar = None;
        let mut terminated = false;

        for component in &self.pipeline.components {
            debug!(
                student = %ctx.identify_number,
                component_id = component.id,
                "running component"
            );
            frame.clear_component();
            let mut state = ChainState {
                subjects: all.clone(),
                scalar: None,
            };
            let flow = self
                .run_chain(&component.chain, env, &mut ctx, &mut frame, &mut state)
                .map_err(|e| e.into_failure(&ctx.identify_number))?;
            if state.scalar.is_some() {
                last_scalar = state.scalar;
            }
            if flow == Flow::Terminated {
                terminated = true;
                break;
            }
        }

        if !terminated {
            commit(&mut ctx, last_scalar);
        }
        ctx.vars = frame.into_vars();
        debug!(
            student = %ctx.identify_number,
            final_score = ctx.final_score,
            "student finished"
        );
        Ok(ctx)
    }

    fn run_chain(
        &self,
        chain: &[BlockId],
        env: BlockEnv<'a>,
        ctx: &mut Context,
        frame: &mut VarFrame,
        state: &mut ChainState,
    ) -> Result<Flow, BlockError> {
        for &id in chain {
            let Some(block) = self.pipeline.block(id) else {
                continue;
            };
            let env = env.at(id);
            trace!(
                student = %ctx.identify_number,
                block_id = id,
                kind = block.kind().name(),
                case_index = ?env.case_index,
                "running block"
            );
            if self.run_block(block, env, ctx, frame, state)? == Flow::Terminated {
                return Ok(Flow::Terminated);
            }
        }
        Ok(Flow::Continue)
    }

    fn run_block(
        &self,
        block: &Block,
        env: BlockEnv<'a>,
        ctx: &mut Context,
        frame: &mut VarFrame,
        state: &mut ChainState,
    ) -> Result<Flow, BlockError> {
        let at = |error: RunError| BlockError::new(block.id, env.case_index, error);

        match &block.body {
            AnyBlock::Division(division) => {
                return self.run_division(division, env, ctx, frame, state);
            }
            AnyBlock::Function(function) => function
                .transform
                .apply(&env, ctx, &frame.vars, &state.subjects, &mut state.scalar)
                .map_err(at)?,
            AnyBlock::Condition(condition) => {
                let taken = condition
                    .evaluate(&env, ctx, &frame.vars, state.scalar)
                    .map_err(at)?;
                return self.run_chain(condition.branch(taken), env, ctx, frame, state);
            }
            AnyBlock::Aggregation(aggregation) => aggregation
                .apply(&env, ctx, frame, &state.subjects, &mut state.scalar)
                .map_err(at)?,
            AnyBlock::Variable(variable) => variable
                .apply(&env, ctx, frame, state.scalar)
                .map_err(at)?,
            AnyBlock::Finalize(finalize) => return Ok(finalize.apply(&env, ctx, state.scalar)),
        }
        Ok(Flow::Continue)
    }

    /// Partitions, runs every case chain in isolation, then merges case
    /// variables in case order. The parent chain keeps its full subject
    /// list; its scalar becomes the sum of the case scalars.
    fn run_division(
        &self,
        division: &DivisionBlock,
        env: BlockEnv<'a>,
        ctx: &mut Context,
        frame: &mut VarFrame,
        state: &mut ChainState,
    ) -> Result<Flow, BlockError> {
        let partition = division.partition(&ctx.subjects, &state.subjects, self.menus);
        for &idx in &partition.unmatched {
            env.exclude(&mut ctx.subjects[idx], BlockKind::Division);
        }

        let mut logs: Vec<CalculationLog> = division
            .cases
            .iter()
            .zip(&partition.cases)
            .map(|(case, members)| {
                CalculationLog::new(
                    "subjects",
                    state.subjects.len() as f64,
                    format!("case:{}", case.case_key),
                    members.len() as f64,
                )
            })
            .collect();
        logs.push(CalculationLog::new(
            "subjects",
            state.subjects.len() as f64,
            "unmatched",
            partition.unmatched.len() as f64,
        ));
        env.record(ctx, BlockKind::Division, logs);

        let mut children = Vec::with_capacity(division.cases.len());
        let mut total: Option<f64> = None;
        let mut flow = Flow::Continue;

        for (index, (case, members)) in division.cases.iter().zip(partition.cases).enumerate() {
            let case_env = env.in_case(index);
            if members.is_empty() {
                if division.skip_policy == SkipPolicy::ErrorEmptyCase && !case.is_implicit {
                    return Err(BlockError::new(
                        env.block_id,
                        Some(index),
                        RunError::EmptyCase {
                            case_key: case.case_key.clone(),
                        },
                    ));
                }
                debug!(
                    student = %ctx.identify_number,
                    block_id = env.block_id,
                    case_index = index,
                    "case matched no subjects"
                );
            }

            let mut child = frame.isolated();
            let mut case_state = ChainState {
                subjects: members,
                scalar: None,
            };
            let case_flow =
                self.run_chain(&case.right_chain, case_env, ctx, &mut child, &mut case_state)?;
            children.push(child);
            if let Some(v) = case_state.scalar {
                total = Some(total.unwrap_or(0.0) + v);
            }
            if case_flow == Flow::Terminated {
                flow = Flow::Terminated;
                break;
            }
        }

        for child in children {
            frame.merge(child)?;
        }
        state.scalar = total;
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{validate, PipelineDef};
    use crate::model::{Subject, Value, VarScope};
    use serde_json::json;

    fn pipeline(components: serde_json::Value, blocks: serde_json::Value) -> Pipeline {
        let def: PipelineDef =
            serde_json::from_value(json!({"id": 1, "components": components, "blocks": blocks}))
                .unwrap();
        validate(&def).unwrap()
    }

    fn subject(code: &str, unit: f64, score: f64) -> Subject {
        Subject {
            subject_separation_code: code.into(),
            unit,
            score: Some(score),
            ..Subject::default()
        }
    }

    /// Division(code ∈ {01}) → [Aggregation(AVG score by unit)] → Finalize.
    fn weighted_average() -> Pipeline {
        pipeline(
            json!([{"id": 1, "chain": [10, 12]}]),
            json!([
                {"id": 10, "type": "division",
                 "cases": [{"id": 1, "caseKey": "general",
                            "criteria": {"subjectSeparationCode": ["01"]},
                            "rightChain": [11]}]},
                {"id": 11, "type": "aggregation", "op": "AVG", "target": "score", "weight": "unit"},
                {"id": 12, "type": "finalize"}
            ]),
        )
    }

    #[test]
    fn test_weighted_average_end_to_end() {
        let p = weighted_average();
        let menus = TokenMenuStore::new();
        let ctx = Context::new("S1", vec![subject("01", 3.0, 90.0), subject("01", 2.0, 80.0)]);
        let out = Executor::new(&p, &menus).run_student(ctx).unwrap();
        assert!((out.final_score - 86.0).abs() < 1e-10);
        assert_eq!(out.eligible_count(), 2);
    }

    #[test]
    fn test_non_matching_subject_excluded() {
        let p = weighted_average();
        let menus = TokenMenuStore::new();
        let ctx = Context::new("S1", vec![subject("01", 3.0, 90.0), subject("02", 2.0, 80.0)]);
        let out = Executor::new(&p, &menus).run_student(ctx).unwrap();
        assert!((out.final_score - 90.0).abs() < 1e-10);
        assert_eq!(out.subjects[1].filtered_block_id, 10);
        assert!(out.subjects[0].is_eligible());
    }

    #[test]
    fn test_skip_empty_case_runs_with_empty_list() {
        let p = pipeline(
            json!([{"id": 1, "chain": [10, 13]}]),
            json!([
                {"id": 10, "type": "division",
                 "cases": [
                    {"id": 1, "caseKey": "general", "position": 0,
                     "criteria": {"subjectSeparationCode": ["01"]}, "rightChain": [11]},
                    {"id": 2, "caseKey": "arts", "position": 1,
                     "criteria": {"subjectSeparationCode": ["03"]}, "rightChain": [12]}
                 ]},
                {"id": 11, "type": "aggregation", "op": "SUM", "target": "score"},
                {"id": 12, "type": "aggregation", "op": "COUNT", "outputName": "artsCount"},
                {"id": 13, "type": "variable", "name": "caseTotal", "scope": "pipeline"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let ctx = Context::new("S1", vec![subject("01", 1.0, 70.0)]);
        let out = Executor::new(&p, &menus).run_student(ctx).unwrap();
        // 70 from general plus 0 from the empty arts case
        assert_eq!(out.vars.pipeline["caseTotal"], Value::Number(70.0));
        assert!((out.final_score - 70.0).abs() < 1e-10);
    }

    #[test]
    fn test_error_empty_case_fails_student() {
        let p = pipeline(
            json!([{"id": 1, "chain": [10]}]),
            json!([
                {"id": 10, "type": "division", "skipPolicy": "error_empty_case",
                 "cases": [
                    {"id": 1, "caseKey": "general", "position": 0,
                     "criteria": {"subjectSeparationCode": ["01"]}},
                    {"id": 2, "caseKey": "career", "position": 1,
                     "criteria": {"subjectSeparationCode": ["02"]}}
                 ]}
            ]),
        );
        let menus = TokenMenuStore::new();
        let ctx = Context::new("S9", vec![subject("01", 1.0, 70.0), subject("04", 1.0, 50.0)]);
        let failure = Executor::new(&p, &menus).run_student(ctx).unwrap_err();
        assert_eq!(failure.student_id, "S9");
        assert_eq!(failure.block_id, 10);
        assert_eq!(failure.case_index, Some(1));
        assert_eq!(
            failure.error,
            RunError::EmptyCase {
                case_key: "career".into()
            }
        );
    }

    #[test]
    fn test_skip_policy_keeps_same_eligible_subjects() {
        let division = |policy: &str| {
            pipeline(
                json!([{"id": 1, "chain": [10, 12]}]),
                json!([
                    {"id": 10, "type": "division", "skipPolicy": policy,
                     "cases": [{"id": 1, "caseKey": "general",
                                "criteria": {"subjectSeparationCode": ["01"]},
                                "rightChain": [11]}]},
                    {"id": 11, "type": "aggregation", "op": "AVG", "target": "score", "weight": "unit"},
                    {"id": 12, "type": "finalize"}
                ]),
            )
        };
        let menus = TokenMenuStore::new();
        let seed = Context::new("S1", vec![subject("01", 3.0, 90.0), subject("02", 2.0, 80.0)]);

        let skip = division("skip_empty_case");
        let error = division("error_empty_case");
        let a = Executor::new(&skip, &menus).run_student(seed.clone()).unwrap();
        let b = Executor::new(&error, &menus).run_student(seed).unwrap();

        let filtered = |ctx: &Context| {
            ctx.subjects
                .iter()
                .map(|s| s.filtered_block_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(filtered(&a), vec![0, 10]);
        assert_eq!(filtered(&b), vec![0, 10]);
        assert_eq!(b.eligible_count(), 1);
        assert!((b.weighted_unit_sum() - 3.0).abs() < 1e-10);
        assert!((a.final_score - b.final_score).abs() < 1e-10);
    }

    #[test]
    fn test_cross_case_conflict_names_writer() {
        let p = pipeline(
            json!([{"id": 1, "chain": [10]}]),
            json!([
                {"id": 10, "type": "division",
                 "cases": [
                    {"id": 1, "caseKey": "a", "position": 0,
                     "criteria": {"subjectSeparationCode": ["01"]}, "rightChain": [11, 20]},
                    {"id": 2, "caseKey": "b", "position": 1,
                     "criteria": {"subjectSeparationCode": ["02"]}, "rightChain": [12, 21]}
                 ]},
                {"id": 11, "type": "aggregation", "op": "COUNT"},
                {"id": 12, "type": "aggregation", "op": "COUNT"},
                {"id": 20, "type": "variable", "name": "n", "scope": "pipeline", "overwrite": "deny"},
                {"id": 21, "type": "variable", "name": "n", "scope": "pipeline", "overwrite": "deny"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let ctx = Context::new("S5", vec![subject("01", 1.0, 10.0), subject("02", 1.0, 20.0)]);
        let failure = Executor::new(&p, &menus).run_student(ctx).unwrap_err();
        assert_eq!(failure.block_id, 21);
        assert_eq!(failure.case_index, Some(1));
        assert!(matches!(
            failure.error,
            RunError::VariableConflict { ref name, scope: VarScope::Pipeline } if name == "n"
        ));
    }

    #[test]
    fn test_deny_conflict_fails_student() {
        let p = pipeline(
            json!([
                {"id": 1, "position": 0, "chain": [11, 20]},
                {"id": 2, "position": 1, "chain": [12, 21]}
            ]),
            json!([
                {"id": 11, "type": "aggregation", "op": "COUNT"},
                {"id": 12, "type": "aggregation", "op": "COUNT"},
                {"id": 20, "type": "variable", "name": "n", "scope": "pipeline", "overwrite": "deny"},
                {"id": 21, "type": "variable", "name": "n", "scope": "pipeline", "overwrite": "deny"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let failure = Executor::new(&p, &menus)
            .run_student(Context::new("S2", vec![]))
            .unwrap_err();
        assert_eq!(failure.block_id, 21);
        assert!(matches!(
            failure.error,
            RunError::VariableConflict { ref name, scope: VarScope::Pipeline } if name == "n"
        ));
    }

    #[test]
    fn test_component_scope_cleared_between_components() {
        let p = pipeline(
            json!([
                {"id": 1, "position": 0, "chain": [11, 20]},
                {"id": 2, "position": 1, "chain": [12, 21]}
            ]),
            json!([
                {"id": 11, "type": "aggregation", "op": "COUNT"},
                {"id": 20, "type": "variable", "name": "n", "overwrite": "deny"},
                {"id": 12, "type": "aggregation", "op": "COUNT"},
                {"id": 21, "type": "variable", "name": "n", "overwrite": "deny"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let out = Executor::new(&p, &menus)
            .run_student(Context::new("S3", vec![subject("01", 1.0, 1.0)]))
            .unwrap();
        assert_eq!(out.vars.component["n"], Value::Number(1.0));
        assert_eq!(out.final_score, 1.0);
    }

    #[test]
    fn test_case_variables_isolated_then_merged() {
        let p = pipeline(
            json!([{"id": 1, "chain": [10, 30, 31]}]),
            json!([
                {"id": 10, "type": "division",
                 "cases": [
                    {"id": 1, "caseKey": "a", "position": 0,
                     "criteria": {"subjectSeparationCode": ["01"]}, "rightChain": [11, 20]},
                    {"id": 2, "caseKey": "b", "position": 1,
                     "criteria": {"subjectSeparationCode": ["02"]}, "rightChain": [12, 21]}
                 ]},
                {"id": 11, "type": "aggregation", "op": "SUM", "target": "score"},
                {"id": 20, "type": "variable", "name": "a", "scope": "pipeline"},
                // case b sees no 'a' from its sibling
                {"id": 12, "type": "aggregation", "op": "SUM", "target": "coalesce(pipeline.a, 0) + score"},
                {"id": 21, "type": "variable", "name": "b", "scope": "pipeline"},
                {"id": 30, "type": "condition", "expr": "pipeline.a + pipeline.b == 30",
                 "thenChain": [32]},
                {"id": 32, "type": "function", "functionType": "formula",
                 "params": {"dsl": "1000", "target": "score.final"}},
                {"id": 31, "type": "finalize"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let ctx = Context::new("S4", vec![subject("01", 1.0, 10.0), subject("02", 1.0, 20.0)]);
        let out = Executor::new(&p, &menus).run_student(ctx).unwrap();
        assert_eq!(out.vars.pipeline["a"], Value::Number(10.0));
        assert_eq!(out.vars.pipeline["b"], Value::Number(20.0));
        assert_eq!(out.final_score, 1000.0);
    }

    #[test]
    fn test_condition_else_passthrough() {
        let p = pipeline(
            json!([{"id": 1, "chain": [11, 30, 31]}]),
            json!([
                {"id": 11, "type": "aggregation", "op": "MAX", "target": "score"},
                {"id": 30, "type": "condition", "expr": "value > 95", "thenChain": [32]},
                {"id": 32, "type": "function", "functionType": "multiply_ratio",
                 "params": {"ratio": 50}},
                {"id": 31, "type": "finalize"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let exec = Executor::new(&p, &menus);
        let high = exec
            .run_student(Context::new("H", vec![subject("01", 1.0, 100.0)]))
            .unwrap();
        let low = exec
            .run_student(Context::new("L", vec![subject("01", 1.0, 90.0)]))
            .unwrap();
        assert_eq!(high.final_score, 50.0);
        assert_eq!(low.final_score, 90.0);
    }

    #[test]
    fn test_terminate_inside_case_stops_student() {
        let p = pipeline(
            json!([
                {"id": 1, "position": 0, "chain": [10]},
                {"id": 2, "position": 1, "chain": [13, 14]}
            ]),
            json!([
                {"id": 10, "type": "division",
                 "cases": [{"id": 1, "criteria": {"grade": [1]}, "rightChain": [11, 12]}]},
                {"id": 11, "type": "aggregation", "op": "SUM", "target": "score"},
                {"id": 12, "type": "finalize"},
                {"id": 13, "type": "aggregation", "op": "COUNT"},
                {"id": 14, "type": "finalize"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let mut s = subject("01", 1.0, 42.0);
        s.grade = 1;
        let out = Executor::new(&p, &menus)
            .run_student(Context::new("T", vec![s]))
            .unwrap();
        assert_eq!(out.final_score, 42.0);
    }

    #[test]
    fn test_implicit_terminate_commits_last_scalar() {
        let p = pipeline(
            json!([
                {"id": 1, "position": 0, "chain": [11]},
                {"id": 2, "position": 1, "chain": [15]}
            ]),
            json!([
                {"id": 11, "type": "aggregation", "op": "SUM", "target": "score"},
                {"id": 15, "type": "finalize", "mode": "snapshot"}
            ]),
        );
        let menus = TokenMenuStore::new();
        let out = Executor::new(&p, &menus)
            .run_student(Context::new("I", vec![subject("01", 1.0, 77.0)]))
            .unwrap();
        assert_eq!(out.final_score, 77.0);
    }

    #[test]
    fn test_snapshots_do_not_change_scores() {
        let p = weighted_average();
        let menus = TokenMenuStore::new();
        let seed = Context::new("S", vec![subject("01", 3.0, 90.0), subject("02", 2.0, 80.0)]);

        let with = Executor::new(&p, &menus).run_student(seed.clone()).unwrap();
        let without = Executor::new(&p, &menus)
            .with_snapshots(false)
            .run_student(seed)
            .unwrap();

        assert_eq!(with.final_score, without.final_score);
        assert!(!with.snapshot.is_empty());
        assert!(without.snapshot.is_empty());
        assert!(without.subjects.iter().all(|s| s.snapshot.is_empty()));
        assert_eq!(
            with.subjects.iter().map(|s| s.filtered_block_id).collect::<Vec<_>>(),
            without.subjects.iter().map(|s| s.filtered_block_id).collect::<Vec<_>>()
        );
    }
}
