//! `formula`: evaluates an expression and writes the result.

use super::invalid;
use crate::block::BlockKind;
use crate::error::{RunError, Violation};
use crate::expr::{compile, Expression, Scope};
use crate::model::{CalculationLog, Context, Vars};
use crate::pipeline::frame::BlockEnv;
use serde::Deserialize;

/// Where a formula's result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaTarget {
    /// `score.converted` / `score.weighted`: evaluated once per eligible
    /// subject, written to its `score`.
    SubjectScore(String),
    /// `score.final`: evaluated once, becomes the running scalar.
    Final,
    /// `metrics.<name>`: evaluated once, written to `Context.metrics`.
    Metric(String),
}

impl FormulaTarget {
    pub fn parse(target: &str) -> Option<Self> {
        match target {
            "score.converted" | "score.weighted" => Some(Self::SubjectScore(target.to_string())),
            "score.final" => Some(Self::Final),
            _ => target
                .strip_prefix("metrics.")
                .filter(|name| !name.is_empty())
                .map(|name| Self::Metric(name.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FormulaRaw {
    dsl: String,
    target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub dsl: Expression,
    pub target: FormulaTarget,
}

impl Formula {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: FormulaRaw = super::decode("formula", params)?;
        let target = FormulaTarget::parse(&raw.target).ok_or_else(|| {
            invalid(format!(
                "formula target '{}' must be score.converted, score.weighted, score.final or metrics.<name>",
                raw.target
            ))
        });
        let dsl = compile(&raw.dsl);
        match (dsl, target) {
            (Ok(dsl), Ok(target)) => Ok(Self { dsl, target }),
            (dsl, target) => Err(dsl.err().into_iter().chain(target.err()).collect()),
        }
    }

    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        vars: &Vars,
        subjects: &[usize],
        scalar: &mut Option<f64>,
    ) -> Result<(), RunError> {
        match &self.target {
            FormulaTarget::SubjectScore(key) => {
                let mut results = Vec::with_capacity(subjects.len());
                for &idx in subjects {
                    let subject = &ctx.subjects[idx];
                    if !subject.is_eligible() {
                        continue;
                    }
                    let scope = Scope::new(ctx, vars)
                        .with_subject(subject)
                        .with_value(*scalar);
                    let result = self.dsl.eval_number(&scope)?;
                    results.push((idx, result));
                }
                for (idx, result) in results {
                    let subject = &mut ctx.subjects[idx];
                    let before = subject.score;
                    subject.score = result;
                    env.record_subject(
                        subject,
                        BlockKind::Function,
                        CalculationLog::new("score", before, key.clone(), result),
                    );
                }
            }
            FormulaTarget::Final => {
                let scope = Scope::new(ctx, vars).with_value(*scalar);
                let result = self.dsl.eval_number(&scope)?;
                let before = *scalar;
                *scalar = result;
                env.record(
                    ctx,
                    BlockKind::Function,
                    vec![CalculationLog::new(
                        self.dsl.source(),
                        before,
                        "score.final",
                        result,
                    )],
                );
            }
            FormulaTarget::Metric(name) => {
                let scope = Scope::new(ctx, vars).with_value(*scalar);
                let result = self.dsl.eval_number(&scope)?;
                match result {
                    Some(v) => {
                        ctx.metrics.insert(name.clone(), v);
                    }
                    None => {
                        ctx.metrics.remove(name);
                    }
                }
                env.record(
                    ctx,
                    BlockKind::Function,
                    vec![CalculationLog::new(
                        self.dsl.source(),
                        *scalar,
                        format!("metrics.{name}"),
                        result,
                    )],
                );
            }
        }
        Ok(())
    }
}
