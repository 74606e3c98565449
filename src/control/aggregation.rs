use crate::block::{AggregateOp, BlockKind, OverwritePolicy};
use crate::error::{RunError, Violation, ViolationKind};
use crate::expr::{compile, Expression, Scope};
use crate::model::{CalculationLog, Context, VarScope, Vars};
use crate::pipeline::frame::{BlockEnv, VarFrame, VarWrite};

/// Reduces the eligible subjects of the incoming list to one scalar.
///
/// The result always becomes the running scalar. With `output_name` it
/// is also stored in the component scope.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationBlock {
    pub op: AggregateOp,
    /// Required for every op but `COUNT`.
    pub target: Option<Expression>,
    /// Only meaningful for `AVG` and `SUM`.
    pub weight: Option<Expression>,
    pub filter: Option<Expression>,
    pub output_name: Option<String>,
}

impl AggregationBlock {
    pub fn compile(
        op: AggregateOp,
        target: Option<&str>,
        weight: Option<&str>,
        filter: Option<&str>,
        output_name: Option<String>,
    ) -> Result<Self, Vec<Violation>> {
        let mut violations = Vec::new();
        if target.is_none() && op != AggregateOp::Count {
            violations.push(Violation::new(
                ViolationKind::InvalidParams,
                format!("{op:?} aggregation needs a target"),
            ));
        }
        if weight.is_some() && !matches!(op, AggregateOp::Avg | AggregateOp::Sum) {
            violations.push(Violation::new(
                ViolationKind::InvalidParams,
                format!("{op:?} aggregation does not take a weight"),
            ));
        }
        if output_name.as_deref().is_some_and(str::is_empty) {
            violations.push(Violation::new(
                ViolationKind::InvalidParams,
                "aggregation outputName is empty",
            ));
        }

        let mut parse = |src: Option<&str>| match src.map(compile).transpose() {
            Ok(expr) => expr,
            Err(v) => {
                violations.push(v);
                None
            }
        };
        let target = parse(target);
        let weight = parse(weight);
        let filter = parse(filter);

        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Self {
            op,
            target,
            weight,
            filter,
            output_name,
        })
    }

    /// Reduces `subjects` and updates `scalar` (and `output_name`).
    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        frame: &mut VarFrame,
        subjects: &[usize],
        scalar: &mut Option<f64>,
    ) -> Result<(), RunError> {
        let (samples, considered) = self.collect(ctx, &frame.vars, subjects, *scalar)?;
        let result = reduce(self.op, &samples);
        *scalar = result;

        let output_key = self.output_name.as_deref().unwrap_or("value");
        if let Some(name) = &self.output_name {
            frame.write(VarWrite {
                block_id: env.block_id,
                case_index: env.case_index,
                name: name.clone(),
                scope: VarScope::Component,
                value: result.into(),
                overwrite: OverwritePolicy::Allow,
            })?;
        }
        env.record(
            ctx,
            BlockKind::Aggregation,
            vec![CalculationLog::new(
                format!("{:?}.subjects", self.op).to_lowercase(),
                considered as f64,
                output_key,
                result,
            )],
        );
        Ok(())
    }

    /// `(value, weight)` pairs for the subjects that pass the filter and
    /// have a non-null target, plus how many subjects passed the filter.
    fn collect(
        &self,
        ctx: &Context,
        vars: &Vars,
        subjects: &[usize],
        scalar: Option<f64>,
    ) -> Result<(Vec<(f64, f64)>, usize), RunError> {
        let mut samples = Vec::with_capacity(subjects.len());
        let mut considered = 0;
        for &idx in subjects {
            let subject = &ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let scope = Scope::new(ctx, vars)
                .with_subject(subject)
                .with_value(scalar);
            if let Some(filter) = &self.filter {
                if !filter.eval_bool(&scope)? {
                    continue;
                }
            }
            considered += 1;

            let value = match &self.target {
                Some(target) => match target.eval_number(&scope)? {
                    Some(v) => v,
                    None => continue,
                },
                None => 1.0,
            };
            let weight = match &self.weight {
                Some(weight) => match weight.eval_number(&scope)? {
                    Some(w) => w,
                    None => continue,
                },
                None => 1.0,
            };
            samples.push((value, weight));
        }
        Ok((samples, considered))
    }
}

/// Applies `op` to `(value, weight)` samples.
///
/// An empty input gives `0` for `SUM`/`COUNT` and `None` for the rest.
fn reduce(op: AggregateOp, samples: &[(f64, f64)]) -> Option<f64> {
    match op {
        AggregateOp::Count => Some(samples.len() as f64),
        AggregateOp::Sum => Some(samples.iter().map(|(v, w)| v * w).sum()),
        _ if samples.is_empty() => None,
        AggregateOp::Avg => {
            let total_weight: f64 = samples.iter().map(|(_, w)| w).sum();
            if total_weight == 0.0 {
                return None;
            }
            Some(samples.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
        }
        AggregateOp::Max => samples.iter().map(|(v, _)| *v).reduce(f64::max),
        AggregateOp::Min => samples.iter().map(|(v, _)| *v).reduce(f64::min),
        AggregateOp::Std => {
            let n = samples.len() as f64;
            let mean = samples.iter().map(|(v, _)| v).sum::<f64>() / n;
            let var = samples.iter().map(|(v, _)| (v - mean).powi(2)).sum::<f64>() / n;
            Some(var.sqrt())
        }
    }
}
