//! Division: partitioning a subject list into cases.
//!
//! A division owns one or more [`DivisionCase`]s. Each explicit case
//! selects the subjects whose attributes match all of its criteria rows
//! (rows combine with AND, values within a row with OR). Cases are
//! evaluated independently in declared order, so overlapping criteria
//! put a subject into several cases; the engine does not enforce
//! exclusivity.
//!
//! A declared implicit case receives every subject that matched no
//! explicit case. Without one, such subjects are excluded by the
//! division block itself. The implicit case added for
//! `error_empty_case` never keeps subjects eligible, so the skip policy
//! does not change which subjects survive.
//!
//! Partitioning is a pure function of the subjects and the case
//! definitions; running each case's chain is the executor's job.

use crate::block::{ordered_cases, CaseDef, SkipPolicy};
use crate::error::{Violation, ViolationKind};
use crate::model::{BlockId, Subject, SubjectField, TokenMenuStore, Value};

/// Key given to a synthesised implicit case.
pub const IMPLICIT_CASE_KEY: &str = "__implicit__";

/// One criteria row: `field ∈ values`.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub field: SubjectField,
    pub field_name: String,
    pub values: Vec<String>,
}

/// A validated division case.
#[derive(Debug, Clone, PartialEq)]
pub struct DivisionCase {
    pub id: u64,
    pub case_key: String,
    pub criteria: Vec<Criterion>,
    /// Token menu used to resolve labels in `criteria`.
    pub menu: Option<String>,
    pub position: i32,
    pub is_implicit: bool,
    /// Added by the engine rather than declared in the document.
    pub is_synthesised: bool,
    pub right_chain: Vec<BlockId>,
}

impl DivisionCase {
    /// Resolves criteria tokens through the menu store.
    fn resolved(&self, menus: &TokenMenuStore) -> Vec<(SubjectField, Vec<String>)> {
        self.criteria
            .iter()
            .map(|c| (c.field, menus.expand_tokens(self.menu.as_deref(), &c.values)))
            .collect()
    }
}

fn matches_rows(subject: &Subject, rows: &[(SubjectField, Vec<String>)]) -> bool {
    rows.iter().all(|(field, values)| {
        let attr = subject.attribute(*field);
        if attr.is_null() {
            return false;
        }
        let key = attr.key_string();
        values.iter().any(|v| *v == key)
    })
}

/// A validated division block.
///
/// `cases` are in execution order: explicit cases by `(position, id)`,
/// then the implicit case if any.
#[derive(Debug, Clone, PartialEq)]
pub struct DivisionBlock {
    pub skip_policy: SkipPolicy,
    pub cases: Vec<DivisionCase>,
}

/// Result of partitioning: subject indices per case, plus those that fell
/// through every case when there is no declared implicit case.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Partition {
    pub cases: Vec<Vec<usize>>,
    pub unmatched: Vec<usize>,
}

impl DivisionBlock {
    /// Builds a division from its authored cases, collecting every problem.
    pub(crate) fn from_defs(
        skip_policy: SkipPolicy,
        defs: &[CaseDef],
    ) -> Result<Self, Vec<Violation>> {
        if defs.is_empty() {
            return Err(vec![Violation::new(
                ViolationKind::EmptyDivision,
                "division declares no cases",
            )]);
        }

        let ordered = ordered_cases(defs);

        let mut violations = Vec::new();
        let mut cases = Vec::with_capacity(ordered.len());
        let implicit_count = ordered.iter().filter(|c| c.is_implicit).count();
        if implicit_count > 1 {
            violations.push(Violation::new(
                ViolationKind::InvalidCriteria,
                format!("{implicit_count} implicit cases declared, at most one allowed"),
            ));
        }

        for (index, def) in ordered.iter().enumerate() {
            match compile_case(def) {
                Ok(case) => cases.push(case),
                Err(messages) => violations.extend(
                    messages
                        .into_iter()
                        .map(|m| Violation::new(ViolationKind::InvalidCriteria, m).at_case(index)),
                ),
            }
        }

        if !violations.is_empty() {
            return Err(violations);
        }

        if skip_policy == SkipPolicy::ErrorEmptyCase && implicit_count == 0 {
            cases.push(DivisionCase {
                id: 0,
                case_key: IMPLICIT_CASE_KEY.to_string(),
                criteria: Vec::new(),
                menu: None,
                position: i32::MAX,
                is_implicit: true,
                is_synthesised: true,
                right_chain: Vec::new(),
            });
        }

        Ok(Self { skip_policy, cases })
    }

    pub fn implicit_index(&self) -> Option<usize> {
        self.cases.iter().position(|c| c.is_implicit)
    }

    /// Splits `candidates` (indices into `subjects`) across the cases.
    ///
    /// Already-excluded subjects are skipped. Output lists preserve the
    /// candidate order.
    pub fn partition(
        &self,
        subjects: &[Subject],
        candidates: &[usize],
        menus: &TokenMenuStore,
    ) -> Partition {
        let rows: Vec<_> = self.cases.iter().map(|c| c.resolved(menus)).collect();
        let mut partition = Partition {
            cases: vec![Vec::new(); self.cases.len()],
            unmatched: Vec::new(),
        };
        let implicit = self
            .implicit_index()
            .filter(|&i| !self.cases[i].is_synthesised);

        for &idx in candidates {
            let subject = &subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let mut matched_any = false;
            for (case_idx, case) in self.cases.iter().enumerate() {
                if case.is_implicit {
                    continue;
                }
                if matches_rows(subject, &rows[case_idx]) {
                    partition.cases[case_idx].push(idx);
                    matched_any = true;
                }
            }
            if !matched_any {
                match implicit {
                    Some(i) => partition.cases[i].push(idx),
                    None => partition.unmatched.push(idx),
                }
            }
        }

        partition
    }
}

fn compile_case(def: &CaseDef) -> Result<DivisionCase, Vec<String>> {
    let mut errors = Vec::new();
    let label = if def.case_key.is_empty() {
        format!("case {}", def.id)
    } else {
        format!("case '{}'", def.case_key)
    };

    if def.is_implicit && !def.criteria.is_empty() {
        errors.push(format!("{label}: implicit case must not declare criteria"));
    }
    if !def.is_implicit && def.criteria.is_empty() {
        errors.push(format!("{label}: explicit case needs at least one criteria row"));
    }

    let mut criteria = Vec::with_capacity(def.criteria.len());
    for (name, raw) in &def.criteria {
        let Some(field) = SubjectField::from_name(name) else {
            errors.push(format!("{label}: unknown subject field '{name}'"));
            continue;
        };
        match criteria_values(raw) {
            Ok(values) if values.is_empty() => {
                errors.push(format!("{label}: criteria '{name}' has no values"));
            }
            Ok(values) => criteria.push(Criterion {
                field,
                field_name: name.clone(),
                values,
            }),
            Err(msg) => errors.push(format!("{label}: criteria '{name}' {msg}")),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(DivisionCase {
        id: def.id,
        case_key: def.case_key.clone(),
        criteria,
        menu: def.menu.clone(),
        position: def.position,
        is_implicit: def.is_implicit,
        is_synthesised: false,
        right_chain: def.right_chain.clone(),
    })
}

/// Accepts a scalar or an array of scalars.
fn criteria_values(raw: &serde_json::Value) -> Result<Vec<String>, String> {
    let items: Vec<&serde_json::Value> = match raw {
        serde_json::Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| match serde_json::from_value::<Value>(item.clone()) {
            Ok(Value::Null) | Err(_) => Err(format!("must be scalars, found {item}")),
            Ok(v) => Ok(v.key_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MenuItem;
    use serde_json::json;

    fn case(id: u64, key: &str, criteria: serde_json::Value, position: i32) -> CaseDef {
        serde_json::from_value(json!({
            "id": id,
            "caseKey": key,
            "criteria": criteria,
            "position": position,
        }))
        .unwrap()
    }

    fn subject(code: &str, grade: u8) -> Subject {
        Subject {
            grade,
            subject_separation_code: code.into(),
            ..Subject::default()
        }
    }

    #[test]
    fn test_partition_basic() {
        let division = DivisionBlock::from_defs(
            SkipPolicy::SkipEmptyCase,
            &[
                case(1, "general", json!({"subjectSeparationCode": ["01"]}), 0),
                case(2, "career", json!({"subjectSeparationCode": ["02"]}), 1),
            ],
        )
        .unwrap();
        let subjects = vec![subject("01", 1), subject("02", 1), subject("03", 1)];
        let p = division.partition(&subjects, &[0, 1, 2], &TokenMenuStore::new());
        assert_eq!(p.cases, vec![vec![0], vec![1]]);
        assert_eq!(p.unmatched, vec![2]);
    }

    #[test]
    fn test_rows_combine_with_and() {
        let division = DivisionBlock::from_defs(
            SkipPolicy::SkipEmptyCase,
            &[case(
                1,
                "general-g3",
                json!({"subjectSeparationCode": ["01"], "grade": [3]}),
                0,
            )],
        )
        .unwrap();
        let subjects = vec![subject("01", 3), subject("01", 2)];
        let p = division.partition(&subjects, &[0, 1], &TokenMenuStore::new());
        assert_eq!(p.cases[0], vec![0]);
        assert_eq!(p.unmatched, vec![1]);
    }

    #[test]
    fn test_overlapping_cases_not_exclusive() {
        let division = DivisionBlock::from_defs(
            SkipPolicy::SkipEmptyCase,
            &[
                case(1, "a", json!({"grade": ["1", "2"]}), 0),
                case(2, "b", json!({"grade": "2"}), 1),
            ],
        )
        .unwrap();
        let subjects = vec![subject("01", 2)];
        let p = division.partition(&subjects, &[0], &TokenMenuStore::new());
        assert_eq!(p.cases, vec![vec![0], vec![0]]);
    }

    #[test]
    fn test_error_policy_synthesises_implicit_case() {
        let division = DivisionBlock::from_defs(
            SkipPolicy::ErrorEmptyCase,
            &[case(1, "general", json!({"subjectSeparationCode": ["01"]}), 0)],
        )
        .unwrap();
        assert_eq!(division.cases.len(), 2);
        assert_eq!(division.implicit_index(), Some(1));

        let subjects = vec![subject("01", 1), subject("04", 1)];
        let p = division.partition(&subjects, &[0, 1], &TokenMenuStore::new());
        assert_eq!(p.cases, vec![vec![0], vec![]]);
        assert_eq!(p.unmatched, vec![1]);
    }

    #[test]
    fn test_skip_policy_does_not_change_unmatched() {
        let defs = [case(1, "general", json!({"subjectSeparationCode": ["01"]}), 0)];
        let subjects = vec![subject("01", 1), subject("02", 1)];
        let menus = TokenMenuStore::new();

        let skip = DivisionBlock::from_defs(SkipPolicy::SkipEmptyCase, &defs).unwrap();
        let error = DivisionBlock::from_defs(SkipPolicy::ErrorEmptyCase, &defs).unwrap();
        let a = skip.partition(&subjects, &[0, 1], &menus);
        let b = error.partition(&subjects, &[0, 1], &menus);
        assert_eq!(a.unmatched, b.unmatched);
        assert_eq!(a.cases[0], b.cases[0]);
    }

    #[test]
    fn test_declared_implicit_case_keeps_rest() {
        let mut rest = case(2, "rest", json!({}), 1);
        rest.is_implicit = true;
        let division = DivisionBlock::from_defs(
            SkipPolicy::ErrorEmptyCase,
            &[case(1, "general", json!({"subjectSeparationCode": ["01"]}), 0), rest],
        )
        .unwrap();
        assert_eq!(division.cases.len(), 2);
        assert!(!division.cases[1].is_synthesised);

        let subjects = vec![subject("01", 1), subject("02", 1)];
        let p = division.partition(&subjects, &[0, 1], &TokenMenuStore::new());
        assert_eq!(p.cases, vec![vec![0], vec![1]]);
        assert!(p.unmatched.is_empty());
    }

    #[test]
    fn test_cases_sorted_by_position_implicit_last() {
        let mut implicit = case(9, "rest", json!({}), -5);
        implicit.is_implicit = true;
        let division = DivisionBlock::from_defs(
            SkipPolicy::SkipEmptyCase,
            &[
                implicit,
                case(2, "second", json!({"grade": [2]}), 1),
                case(1, "first", json!({"grade": [1]}), 0),
            ],
        )
        .unwrap();
        let keys: Vec<_> = division.cases.iter().map(|c| c.case_key.as_str()).collect();
        assert_eq!(keys, vec!["first", "second", "rest"]);
    }

    #[test]
    fn test_excluded_subjects_not_partitioned() {
        let division = DivisionBlock::from_defs(
            SkipPolicy::SkipEmptyCase,
            &[case(1, "all", json!({"grade": [1]}), 0)],
        )
        .unwrap();
        let mut subjects = vec![subject("01", 1), subject("01", 1)];
        subjects[1].exclude(42);
        let p = division.partition(&subjects, &[0, 1], &TokenMenuStore::new());
        assert_eq!(p.cases[0], vec![0]);
        assert!(p.unmatched.is_empty());
    }

    #[test]
    fn test_menu_labels_resolve() {
        let mut menus = TokenMenuStore::new();
        menus.insert(
            "separation",
            vec![MenuItem {
                order: 1,
                label: "general".into(),
                value: "01".into(),
            }],
        );
        let mut def = case(1, "g", json!({"subjectSeparationCode": ["general"]}), 0);
        def.menu = Some("separation".into());
        let division = DivisionBlock::from_defs(SkipPolicy::SkipEmptyCase, &[def]).unwrap();
        let subjects = vec![subject("01", 1)];
        let p = division.partition(&subjects, &[0], &menus);
        assert_eq!(p.cases[0], vec![0]);
    }

    #[test]
    fn test_invalid_criteria_collected() {
        let err = DivisionBlock::from_defs(
            SkipPolicy::SkipEmptyCase,
            &[
                case(1, "a", json!({"colour": ["red"]}), 0),
                case(2, "b", json!({"grade": []}), 1),
                case(3, "c", json!({"grade": [{"x": 1}]}), 2),
                case(4, "d", json!({}), 3),
            ],
        )
        .unwrap_err();
        assert_eq!(err.len(), 4);
        assert!(err.iter().all(|v| v.kind == ViolationKind::InvalidCriteria));
        assert_eq!(err[1].case_index, Some(1));
    }

    #[test]
    fn test_empty_division_rejected() {
        let err = DivisionBlock::from_defs(SkipPolicy::SkipEmptyCase, &[]).unwrap_err();
        assert_eq!(err[0].kind, ViolationKind::EmptyDivision);
    }
}
