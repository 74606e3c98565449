//! Function transforms.
//!
//! Nine stateless transforms over a subject list or the running scalar:
//!
//! - **Filters** ([`filter`]): `apply_subject`, `apply_term`, `top_subject`
//!   soft-exclude subjects.
//! - **Score mapping** ([`score_map`]): `score_map` converts one score
//!   representation into `score` through an exact, range or linear table.
//! - **Ratios** ([`ratio`]): `grade_ratio`, `subject_group_ratio`,
//!   `separation_ratio`, `multiply_ratio` scale already-computed scores.
//! - **Formula** ([`formula`]): evaluates an expression into a score,
//!   the running scalar or a metric.
//!
//! Parameters are decoded from JSON once, at validation time. An unknown
//! `functionType` or malformed params reject the pipeline.

pub mod filter;
pub mod formula;
pub mod ratio;
pub mod score_map;

pub use filter::{ApplySubject, ApplyTerm, SelectMode, SortKey, SortOrder, TopMode, TopSubject};
pub use formula::{Formula, FormulaTarget};
pub use ratio::{GradeRatio, GroupRatioRow, MultiplyRatio, SeparationRatio, SubjectGroupRatio};
pub use score_map::{MatchMode, OutOfRange, ScoreMap, ScoreTable};

use crate::block::BlockKind;
use crate::error::{RunError, Violation, ViolationKind};
use crate::model::{CalculationLog, Context, Subject, Vars};
use crate::pipeline::frame::BlockEnv;
use serde::de::DeserializeOwned;

/// Every supported `functionType`.
pub const FUNCTION_TYPES: [&str; 9] = [
    "apply_subject",
    "apply_term",
    "top_subject",
    "score_map",
    "grade_ratio",
    "subject_group_ratio",
    "separation_ratio",
    "multiply_ratio",
    "formula",
];

/// A function block with its params decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    ApplySubject(ApplySubject),
    ApplyTerm(ApplyTerm),
    TopSubject(TopSubject),
    ScoreMap(ScoreMap),
    GradeRatio(GradeRatio),
    SubjectGroupRatio(SubjectGroupRatio),
    SeparationRatio(SeparationRatio),
    MultiplyRatio(MultiplyRatio),
    Formula(Formula),
}

impl Transform {
    /// Decodes `params` for the given `function_type`.
    pub fn from_params(
        function_type: &str,
        params: &serde_json::Value,
    ) -> Result<Self, Vec<Violation>> {
        let params = match params {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        };
        Ok(match function_type {
            "apply_subject" => Transform::ApplySubject(ApplySubject::from_params(params)?),
            "apply_term" => Transform::ApplyTerm(ApplyTerm::from_params(params)?),
            "top_subject" => Transform::TopSubject(TopSubject::from_params(params)?),
            "score_map" => Transform::ScoreMap(ScoreMap::from_params(params)?),
            "grade_ratio" => Transform::GradeRatio(GradeRatio::from_params(params)?),
            "subject_group_ratio" => {
                Transform::SubjectGroupRatio(SubjectGroupRatio::from_params(params)?)
            }
            "separation_ratio" => Transform::SeparationRatio(SeparationRatio::from_params(params)?),
            "multiply_ratio" => Transform::MultiplyRatio(MultiplyRatio::from_params(params)?),
            "formula" => Transform::Formula(Formula::from_params(params)?),
            other => {
                return Err(vec![invalid(format!(
                    "unknown functionType '{other}', expected one of {}",
                    FUNCTION_TYPES.join(", ")
                ))])
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transform::ApplySubject(_) => "apply_subject",
            Transform::ApplyTerm(_) => "apply_term",
            Transform::TopSubject(_) => "top_subject",
            Transform::ScoreMap(_) => "score_map",
            Transform::GradeRatio(_) => "grade_ratio",
            Transform::SubjectGroupRatio(_) => "subject_group_ratio",
            Transform::SeparationRatio(_) => "separation_ratio",
            Transform::MultiplyRatio(_) => "multiply_ratio",
            Transform::Formula(_) => "formula",
        }
    }

    /// Applies the transform to `subjects` (indices into `ctx.subjects`)
    /// and the running `scalar`.
    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        vars: &Vars,
        subjects: &[usize],
        scalar: &mut Option<f64>,
    ) -> Result<(), RunError> {
        match self {
            Transform::ApplySubject(f) => {
                f.apply(env, ctx, subjects);
                Ok(())
            }
            Transform::ApplyTerm(f) => f.apply(env, ctx, vars, subjects),
            Transform::TopSubject(f) => f.apply(env, ctx, vars, subjects),
            Transform::ScoreMap(f) => f.apply(env, ctx, subjects),
            Transform::GradeRatio(f) => {
                f.apply(env, ctx, subjects);
                Ok(())
            }
            Transform::SubjectGroupRatio(f) => {
                f.apply(env, ctx, subjects);
                Ok(())
            }
            Transform::SeparationRatio(f) => {
                f.apply(env, ctx, subjects);
                Ok(())
            }
            Transform::MultiplyRatio(f) => {
                f.apply(env, ctx, subjects, scalar);
                Ok(())
            }
            Transform::Formula(f) => f.apply(env, ctx, vars, subjects, scalar),
        }
    }
}

/// A validated function block.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBlock {
    pub transform: Transform,
}

impl FunctionBlock {
    pub fn new(transform: Transform) -> Self {
        Self { transform }
    }
}

// ============================================================================
// Param decoding helpers
// ============================================================================

pub(crate) fn invalid(message: impl Into<String>) -> Violation {
    Violation::new(ViolationKind::InvalidParams, message)
}

fn decode<T: DeserializeOwned>(name: &str, params: serde_json::Value) -> Result<T, Vec<Violation>> {
    serde_json::from_value(params).map_err(|e| vec![invalid(format!("{name} params: {e}"))])
}

/// Multiplies a subject's score by `factor` and records it.
fn scale_score(env: &BlockEnv<'_>, subject: &mut Subject, key: &str, factor: f64) {
    let Some(before) = subject.score else {
        return;
    };
    let after = before * factor;
    subject.score = Some(after);
    env.record_subject(
        subject,
        BlockKind::Function,
        CalculationLog::new(key, before, key, after),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_function_type_decodes() {
        let samples = [
            ("apply_subject", json!({"groups": ["국어"]})),
            ("apply_term", json!({"terms": {"1-1": true}})),
            ("top_subject", json!({"n": 3})),
            (
                "score_map",
                json!({"source": "rankingGrade", "match": "exact",
                       "table": [{"key": 1, "value": 100}]}),
            ),
            ("grade_ratio", json!({"grade1": 20, "grade2": 40, "grade3": 40})),
            (
                "subject_group_ratio",
                json!({"rows": [{"groups": ["국어"], "ratio": 50}]}),
            ),
            ("separation_ratio", json!({"general": 80, "career": 20})),
            ("multiply_ratio", json!({"ratio": 50})),
            ("formula", json!({"dsl": "score * 2", "target": "score.converted"})),
        ];
        assert_eq!(samples.len(), FUNCTION_TYPES.len());
        for (name, params) in samples {
            let t = Transform::from_params(name, &params)
                .unwrap_or_else(|v| panic!("{name}: {v:?}"));
            assert_eq!(t.name(), name);
        }
    }

    #[test]
    fn test_unknown_function_type() {
        let err = Transform::from_params("sqrt", &json!({})).unwrap_err();
        assert_eq!(err[0].kind, ViolationKind::InvalidParams);
        assert!(err[0].message.contains("sqrt"));
    }

    #[test]
    fn test_unknown_param_field_rejected() {
        let err = Transform::from_params("multiply_ratio", &json!({"ratio": 1, "x": 2}))
            .unwrap_err();
        assert_eq!(err[0].kind, ViolationKind::InvalidParams);
    }

    #[test]
    fn test_bad_expression_is_invalid_expression() {
        let err = Transform::from_params("formula", &json!({"dsl": "1 +", "target": "score.final"}))
            .unwrap_err();
        assert_eq!(err[0].kind, ViolationKind::InvalidExpression);
    }
}
