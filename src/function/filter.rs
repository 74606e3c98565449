//! Subject-selecting transforms: `apply_subject`, `apply_term`, `top_subject`.
//!
//! Filters never remove subjects from the list. They stamp
//! `filtered_block_id` on the ones they drop.

use super::invalid;
use crate::block::BlockKind;
use crate::error::{RunError, Violation};
use crate::expr::{compile, Expression, Scope};
use crate::model::{CalculationLog, Context, Value, Vars};
use crate::pipeline::frame::BlockEnv;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// apply_subject
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectMode {
    #[default]
    Include,
    Exclude,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApplySubjectRaw {
    #[serde(default)]
    mode: SelectMode,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    organizations: Vec<String>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    menu: Option<String>,
}

/// Keeps or drops subjects by group, organization or name.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplySubject {
    pub mode: SelectMode,
    pub groups: Vec<String>,
    pub organizations: Vec<String>,
    pub names: Vec<String>,
    pub menu: Option<String>,
}

impl ApplySubject {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: ApplySubjectRaw = super::decode("apply_subject", params)?;
        if raw.groups.is_empty() && raw.organizations.is_empty() && raw.names.is_empty() {
            return Err(vec![invalid(
                "apply_subject needs at least one of groups, organizations or names",
            )]);
        }
        Ok(Self {
            mode: raw.mode,
            groups: raw.groups,
            organizations: raw.organizations,
            names: raw.names,
            menu: raw.menu,
        })
    }

    pub(crate) fn apply(&self, env: &BlockEnv<'_>, ctx: &mut Context, subjects: &[usize]) {
        let groups: BTreeSet<String> = env
            .menus
            .expand_tokens(self.menu.as_deref(), &self.groups)
            .into_iter()
            .collect();
        let before = count_eligible(ctx, subjects);

        for &idx in subjects {
            let subject = &mut ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let matched = groups.contains(&subject.subject_group)
                || subject
                    .organization_name
                    .as_ref()
                    .is_some_and(|org| self.organizations.contains(org))
                || self.names.contains(&subject.subject_name);
            let keep = match self.mode {
                SelectMode::Include => matched,
                SelectMode::Exclude => !matched,
            };
            if !keep {
                env.exclude(subject, BlockKind::Function);
            }
        }

        record_counts(env, ctx, "apply_subject", before, subjects);
    }
}

// ============================================================================
// apply_term
// ============================================================================

/// Grid slot labels in slot order.
pub const TERM_SLOTS: [&str; 6] = ["1-1", "1-2", "2-1", "2-2", "3-1", "3-2"];

fn slot_of(grade: u8, term: u8) -> Option<usize> {
    if (1..=3).contains(&grade) && (1..=2).contains(&term) {
        Some(usize::from(grade - 1) * 2 + usize::from(term - 1))
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ApplyTermRaw {
    #[serde(default)]
    terms: BTreeMap<String, bool>,
    #[serde(default)]
    top_terms: Option<usize>,
    #[serde(default)]
    sort: Option<String>,
}

/// Keeps subjects from enabled `(grade, term)` slots, optionally only the
/// best `top_terms` of them.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyTerm {
    pub enabled: [bool; 6],
    pub top_terms: Option<usize>,
    /// Ranks terms by the mean of this expression; defaults to `score`.
    pub sort: Option<Expression>,
}

impl ApplyTerm {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: ApplyTermRaw = super::decode("apply_term", params)?;
        let mut violations = Vec::new();
        let mut enabled = [false; 6];
        for (slot, on) in &raw.terms {
            match TERM_SLOTS.iter().position(|s| s == slot) {
                Some(i) => enabled[i] = *on,
                None => violations.push(invalid(format!(
                    "apply_term slot '{slot}' is not one of {}",
                    TERM_SLOTS.join(", ")
                ))),
            }
        }
        if raw.top_terms == Some(0) {
            violations.push(invalid("apply_term topTerms must be at least 1"));
        }
        let sort = match raw.sort.as_deref().map(compile).transpose() {
            Ok(sort) => sort,
            Err(v) => {
                violations.push(v);
                None
            }
        };
        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Self {
            enabled,
            top_terms: raw.top_terms,
            sort,
        })
    }

    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        vars: &Vars,
        subjects: &[usize],
    ) -> Result<(), RunError> {
        let before = count_eligible(ctx, subjects);

        let mut keep_slots = self.enabled;
        if let Some(n) = self.top_terms {
            let ranked = self.rank_slots(ctx, vars, subjects)?;
            keep_slots = [false; 6];
            for slot in ranked.into_iter().take(n) {
                keep_slots[slot] = true;
            }
        }

        for &idx in subjects {
            let subject = &mut ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let keep = slot_of(subject.grade, subject.term).is_some_and(|s| keep_slots[s]);
            if !keep {
                env.exclude(subject, BlockKind::Function);
            }
        }

        record_counts(env, ctx, "apply_term", before, subjects);
        Ok(())
    }

    /// Enabled slots with at least one subject, best mean first.
    fn rank_slots(
        &self,
        ctx: &Context,
        vars: &Vars,
        subjects: &[usize],
    ) -> Result<Vec<usize>, RunError> {
        let mut sums: [(f64, usize, bool); 6] = [(0.0, 0, false); 6];
        for &idx in subjects {
            let subject = &ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let Some(slot) = slot_of(subject.grade, subject.term) else {
                continue;
            };
            if !self.enabled[slot] {
                continue;
            }
            sums[slot].2 = true;
            let value = match &self.sort {
                Some(expr) => expr.eval_number(&Scope::new(ctx, vars).with_subject(subject))?,
                None => subject.score,
            };
            if let Some(v) = value {
                sums[slot].0 += v;
                sums[slot].1 += 1;
            }
        }

        let mut slots: Vec<(usize, Option<f64>)> = sums
            .iter()
            .enumerate()
            .filter(|(_, (_, _, present))| *present)
            .map(|(slot, (sum, n, _))| (slot, (*n > 0).then(|| sum / *n as f64)))
            .collect();
        slots.sort_by(|a, b| match (a.1, b.1) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.0.cmp(&b.0),
        });
        Ok(slots.into_iter().map(|(slot, _)| slot).collect())
    }
}

// ============================================================================
// top_subject
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopMode {
    #[default]
    Overall,
    PerGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SortKeyRaw {
    expr: String,
    #[serde(default)]
    order: SortOrder,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TopSubjectRaw {
    n: usize,
    #[serde(default)]
    mode: TopMode,
    #[serde(default)]
    sort: Option<Vec<SortKeyRaw>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expression,
    pub order: SortOrder,
}

/// Keeps the best `n` subjects overall or per subject group.
#[derive(Debug, Clone, PartialEq)]
pub struct TopSubject {
    pub n: usize,
    pub mode: TopMode,
    pub sort: Vec<SortKey>,
}

const DEFAULT_TOP_SORT: [&str; 3] = ["unit", "grade", "term"];

impl TopSubject {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: TopSubjectRaw = super::decode("top_subject", params)?;
        let mut violations = Vec::new();
        if raw.n == 0 {
            violations.push(invalid("top_subject n must be at least 1"));
        }

        let keys: Vec<(String, SortOrder)> = match raw.sort {
            Some(keys) if !keys.is_empty() => {
                keys.into_iter().map(|k| (k.expr, k.order)).collect()
            }
            _ => DEFAULT_TOP_SORT
                .iter()
                .map(|s| (s.to_string(), SortOrder::Desc))
                .collect(),
        };
        let mut sort = Vec::with_capacity(keys.len());
        for (src, order) in keys {
            match compile(&src) {
                Ok(expr) => sort.push(SortKey { expr, order }),
                Err(v) => violations.push(v),
            }
        }

        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Self {
            n: raw.n,
            mode: raw.mode,
            sort,
        })
    }

    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        vars: &Vars,
        subjects: &[usize],
    ) -> Result<(), RunError> {
        let before = count_eligible(ctx, subjects);

        let mut groups: BTreeMap<String, Vec<(usize, Vec<Value>)>> = BTreeMap::new();
        for &idx in subjects {
            let subject = &ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let scope = Scope::new(ctx, vars).with_subject(subject);
            let keys = self
                .sort
                .iter()
                .map(|k| k.expr.eval(&scope))
                .collect::<Result<Vec<_>, _>>()?;
            let group = match self.mode {
                TopMode::Overall => String::new(),
                TopMode::PerGroup => subject.subject_group.clone(),
            };
            groups.entry(group).or_default().push((idx, keys));
        }

        let mut dropped = Vec::new();
        for (_, mut members) in groups {
            members.sort_by(|(ia, ka), (ib, kb)| {
                for (key, (a, b)) in self.sort.iter().zip(ka.iter().zip(kb.iter())) {
                    let ord = compare_sort_values(a, b, key.order);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                ctx.subjects[*ia]
                    .subject_name
                    .cmp(&ctx.subjects[*ib].subject_name)
                    .then(ia.cmp(ib))
            });
            dropped.extend(members.into_iter().skip(self.n).map(|(idx, _)| idx));
        }

        for idx in dropped {
            env.exclude(&mut ctx.subjects[idx], BlockKind::Function);
        }

        record_counts(env, ctx, "top_subject", before, subjects);
        Ok(())
    }
}

/// Orders two sort values; nulls always sort last.
fn compare_sort_values(a: &Value, b: &Value, order: SortOrder) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    let natural = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.key_string().cmp(&b.key_string()),
    };
    match order {
        SortOrder::Asc => natural,
        SortOrder::Desc => natural.reverse(),
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn count_eligible(ctx: &Context, subjects: &[usize]) -> usize {
    subjects
        .iter()
        .filter(|&&i| ctx.subjects[i].is_eligible())
        .count()
}

fn record_counts(
    env: &BlockEnv<'_>,
    ctx: &mut Context,
    name: &str,
    before: usize,
    subjects: &[usize],
) {
    let after = count_eligible(ctx, subjects);
    env.record(
        ctx,
        BlockKind::Function,
        vec![CalculationLog::new(
            format!("{name}.eligible"),
            before as f64,
            format!("{name}.eligible"),
            after as f64,
        )],
    );
}
