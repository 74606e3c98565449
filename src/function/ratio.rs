//! Percentage weights applied to already-computed scores.
//!
//! Every ratio is a percentage: `50` halves a score. Subjects whose score
//! is still `null` are left alone.

use super::{invalid, scale_score};
use crate::block::BlockKind;
use crate::error::Violation;
use crate::model::{CalculationLog, Context};
use crate::pipeline::frame::BlockEnv;
use serde::Deserialize;
use std::collections::BTreeSet;

fn check_ratio(name: &str, ratio: f64) -> Result<f64, Violation> {
    if ratio.is_finite() && ratio >= 0.0 {
        Ok(ratio / 100.0)
    } else {
        Err(invalid(format!(
            "{name} must be a non-negative percentage, got {ratio}"
        )))
    }
}

fn collect(results: Vec<Result<f64, Violation>>) -> Result<Vec<f64>, Vec<Violation>> {
    let mut factors = Vec::with_capacity(results.len());
    let mut violations = Vec::new();
    for r in results {
        match r {
            Ok(f) => factors.push(f),
            Err(v) => violations.push(v),
        }
    }
    if violations.is_empty() {
        Ok(factors)
    } else {
        Err(violations)
    }
}

// ============================================================================
// grade_ratio
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GradeRatioRaw {
    grade1: f64,
    grade2: f64,
    grade3: f64,
}

/// Weights each subject by its school year.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRatio {
    /// Factors (not percentages) for grades 1, 2, 3.
    pub factors: [f64; 3],
}

impl GradeRatio {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: GradeRatioRaw = super::decode("grade_ratio", params)?;
        let f = collect(vec![
            check_ratio("grade1", raw.grade1),
            check_ratio("grade2", raw.grade2),
            check_ratio("grade3", raw.grade3),
        ])?;
        Ok(Self {
            factors: [f[0], f[1], f[2]],
        })
    }

    pub(crate) fn apply(&self, env: &BlockEnv<'_>, ctx: &mut Context, subjects: &[usize]) {
        for &idx in subjects {
            let subject = &mut ctx.subjects[idx];
            if !subject.is_eligible() || !(1..=3).contains(&subject.grade) {
                continue;
            }
            let factor = self.factors[usize::from(subject.grade - 1)];
            scale_score(env, subject, "score", factor);
        }
    }
}

// ============================================================================
// subject_group_ratio
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupRatioRowRaw {
    groups: Vec<String>,
    ratio: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubjectGroupRatioRaw {
    rows: Vec<GroupRatioRowRaw>,
    #[serde(default)]
    menu: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRatioRow {
    pub groups: Vec<String>,
    pub factor: f64,
}

/// Weights each subject by the first row listing its subject group.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectGroupRatio {
    pub rows: Vec<GroupRatioRow>,
    pub menu: Option<String>,
}

impl SubjectGroupRatio {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: SubjectGroupRatioRaw = super::decode("subject_group_ratio", params)?;
        if raw.rows.is_empty() {
            return Err(vec![invalid("subject_group_ratio needs at least one row")]);
        }
        let mut violations = Vec::new();
        let mut rows = Vec::with_capacity(raw.rows.len());
        for (i, row) in raw.rows.into_iter().enumerate() {
            if row.groups.is_empty() {
                violations.push(invalid(format!("subject_group_ratio row {i} has no groups")));
            }
            match check_ratio(&format!("subject_group_ratio row {i} ratio"), row.ratio) {
                Ok(factor) => rows.push(GroupRatioRow {
                    groups: row.groups,
                    factor,
                }),
                Err(v) => violations.push(v),
            }
        }
        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Self {
            rows,
            menu: raw.menu,
        })
    }

    pub(crate) fn apply(&self, env: &BlockEnv<'_>, ctx: &mut Context, subjects: &[usize]) {
        let rows: Vec<(BTreeSet<String>, f64)> = self
            .rows
            .iter()
            .map(|row| {
                let groups = env.menus.expand_tokens(self.menu.as_deref(), &row.groups);
                (groups.into_iter().collect(), row.factor)
            })
            .collect();

        for &idx in subjects {
            let subject = &mut ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            if let Some((_, factor)) = rows
                .iter()
                .find(|(groups, _)| groups.contains(&subject.subject_group))
            {
                scale_score(env, subject, "score", *factor);
            }
        }
    }
}

// ============================================================================
// separation_ratio
// ============================================================================

/// Separation codes in bucket order: general, career, arts, common.
pub const SEPARATION_CODES: [&str; 4] = ["01", "02", "03", "04"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeparationRatioRaw {
    general: Option<f64>,
    career: Option<f64>,
    arts: Option<f64>,
    common: Option<f64>,
}

/// Weights each subject by its `subjectSeparationCode` bucket. Buckets
/// left unset keep their score.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationRatio {
    /// Factors indexed like [`SEPARATION_CODES`].
    pub factors: [Option<f64>; 4],
}

impl SeparationRatio {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: SeparationRatioRaw = super::decode("separation_ratio", params)?;
        let named = [
            ("general", raw.general),
            ("career", raw.career),
            ("arts", raw.arts),
            ("common", raw.common),
        ];
        if named.iter().all(|(_, r)| r.is_none()) {
            return Err(vec![invalid(
                "separation_ratio needs at least one of general, career, arts, common",
            )]);
        }

        let mut factors = [None; 4];
        let mut violations = Vec::new();
        for (i, (name, ratio)) in named.into_iter().enumerate() {
            if let Some(ratio) = ratio {
                match check_ratio(name, ratio) {
                    Ok(f) => factors[i] = Some(f),
                    Err(v) => violations.push(v),
                }
            }
        }
        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Self { factors })
    }

    pub(crate) fn apply(&self, env: &BlockEnv<'_>, ctx: &mut Context, subjects: &[usize]) {
        for &idx in subjects {
            let subject = &mut ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let bucket = SEPARATION_CODES
                .iter()
                .position(|c| *c == subject.subject_separation_code);
            if let Some(factor) = bucket.and_then(|b| self.factors[b]) {
                scale_score(env, subject, "score", factor);
            }
        }
    }
}

// ============================================================================
// multiply_ratio
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MultiplyRatioRaw {
    ratio: f64,
}

/// A flat percentage applied to the running scalar, or to every eligible
/// subject score when no scalar has been produced yet.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplyRatio {
    pub factor: f64,
}

impl MultiplyRatio {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: MultiplyRatioRaw = super::decode("multiply_ratio", params)?;
        let factor = check_ratio("multiply_ratio ratio", raw.ratio).map_err(|v| vec![v])?;
        Ok(Self { factor })
    }

    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        subjects: &[usize],
        scalar: &mut Option<f64>,
    ) {
        if let Some(before) = *scalar {
            let after = before * self.factor;
            *scalar = Some(after);
            env.record(
                ctx,
                BlockKind::Function,
                vec![CalculationLog::new("value", before, "value", after)],
            );
            return;
        }
        for &idx in subjects {
            let subject = &mut ctx.subjects[idx];
            if subject.is_eligible() {
                scale_score(env, subject, "score", self.factor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MenuItem, Subject, TokenMenuStore};
    use serde_json::json;

    fn env(menus: &TokenMenuStore) -> BlockEnv<'_> {
        BlockEnv {
            block_id: 9,
            case_index: None,
            menus,
            capture: false,
        }
    }

    fn subject(grade: u8, group: &str, code: &str, score: Option<f64>) -> Subject {
        Subject {
            grade,
            subject_group: group.into(),
            subject_separation_code: code.into(),
            score,
            ..Subject::default()
        }
    }

    fn scores(ctx: &Context) -> Vec<Option<f64>> {
        ctx.subjects.iter().map(|s| s.score).collect()
    }

    #[test]
    fn test_grade_ratio() {
        let menus = TokenMenuStore::new();
        let f = GradeRatio::from_params(json!({"grade1": 20, "grade2": 30, "grade3": 50}))
            .unwrap();
        let mut ctx = Context::new(
            "S",
            vec![
                subject(1, "", "", Some(100.0)),
                subject(2, "", "", Some(100.0)),
                subject(3, "", "", None),
            ],
        );
        f.apply(&env(&menus), &mut ctx, &[0, 1, 2]);
        assert_eq!(scores(&ctx), vec![Some(20.0), Some(30.0), None]);
    }

    #[test]
    fn test_subject_group_ratio_first_match_wins() {
        let mut menus = TokenMenuStore::new();
        menus.insert(
            "groups",
            vec![MenuItem {
                order: 1,
                label: "KOR".into(),
                value: "국어".into(),
            }],
        );
        let f = SubjectGroupRatio::from_params(json!({
            "menu": "groups",
            "rows": [
                {"groups": ["KOR"], "ratio": 50},
                {"groups": ["국어", "수학"], "ratio": 10}
            ]
        }))
        .unwrap();
        let mut ctx = Context::new(
            "S",
            vec![
                subject(1, "국어", "", Some(80.0)),
                subject(1, "수학", "", Some(80.0)),
                subject(1, "과학", "", Some(80.0)),
            ],
        );
        f.apply(&env(&menus), &mut ctx, &[0, 1, 2]);
        assert_eq!(scores(&ctx), vec![Some(40.0), Some(8.0), Some(80.0)]);
    }

    #[test]
    fn test_separation_ratio_buckets() {
        let menus = TokenMenuStore::new();
        let f = SeparationRatio::from_params(json!({"general": 80, "arts": 0})).unwrap();
        let mut ctx = Context::new(
            "S",
            vec![
                subject(1, "", "01", Some(100.0)),
                subject(1, "", "02", Some(100.0)),
                subject(1, "", "03", Some(100.0)),
            ],
        );
        f.apply(&env(&menus), &mut ctx, &[0, 1, 2]);
        assert_eq!(scores(&ctx), vec![Some(80.0), Some(100.0), Some(0.0)]);
    }

    #[test]
    fn test_multiply_ratio_prefers_scalar() {
        let menus = TokenMenuStore::new();
        let f = MultiplyRatio::from_params(json!({"ratio": 50})).unwrap();
        let mut ctx = Context::new("S", vec![subject(1, "", "", Some(90.0))]);

        let mut scalar = Some(86.0);
        f.apply(&env(&menus), &mut ctx, &[0], &mut scalar);
        assert_eq!(scalar, Some(43.0));
        assert_eq!(ctx.subjects[0].score, Some(90.0));

        let mut none = None;
        f.apply(&env(&menus), &mut ctx, &[0], &mut none);
        assert_eq!(none, None);
        assert_eq!(ctx.subjects[0].score, Some(45.0));
    }

    #[test]
    fn test_excluded_subjects_untouched() {
        let menus = TokenMenuStore::new();
        let f = MultiplyRatio::from_params(json!({"ratio": 200})).unwrap();
        let mut excluded = subject(1, "", "", Some(10.0));
        excluded.exclude(3);
        let mut ctx = Context::new("S", vec![excluded]);
        f.apply(&env(&menus), &mut ctx, &[0], &mut None);
        assert_eq!(ctx.subjects[0].score, Some(10.0));
    }

    #[test]
    fn test_ratio_validation() {
        assert!(GradeRatio::from_params(json!({"grade1": 10, "grade2": 10})).is_err());
        assert!(MultiplyRatio::from_params(json!({"ratio": -5})).is_err());
        assert!(SeparationRatio::from_params(json!({})).is_err());
        assert!(SubjectGroupRatio::from_params(json!({"rows": []})).is_err());
        let err = SubjectGroupRatio::from_params(json!({"rows": [
            {"groups": [], "ratio": -1}
        ]}))
        .unwrap_err();
        assert_eq!(err.len(), 2);
    }
}
