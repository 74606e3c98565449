//! Per-student working state threaded through a pipeline.

use super::snapshot::Snapshot;
use super::subject::Subject;
use super::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Visibility of a stored variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarScope {
    /// Visible only inside the component that wrote it.
    Component,
    /// Visible to every later component for the same student.
    Pipeline,
}

impl VarScope {
    /// Name used in pipeline documents.
    pub fn name(self) -> &'static str {
        match self {
            VarScope::Component => "component",
            VarScope::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for VarScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The two nested variable scopes of a student.
///
/// Lookup order is fixed: component scope shadows pipeline scope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vars {
    pub component: BTreeMap<String, Value>,
    pub pipeline: BTreeMap<String, Value>,
}

impl Vars {
    /// Resolves `name`, component scope first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.component
            .get(name)
            .or_else(|| self.pipeline.get(name))
    }

    pub fn scope(&self, scope: VarScope) -> &BTreeMap<String, Value> {
        match scope {
            VarScope::Component => &self.component,
            VarScope::Pipeline => &self.pipeline,
        }
    }

    pub fn scope_mut(&mut self, scope: VarScope) -> &mut BTreeMap<String, Value> {
        match scope {
            VarScope::Component => &mut self.component,
            VarScope::Pipeline => &mut self.pipeline,
        }
    }
}

/// Working state for one student.
///
/// A context seed arrives with identity fields and `subjects`; the engine
/// fills in scores, variables, metrics and snapshots as the pipeline runs.
/// Each context is owned by exactly one student run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Context {
    pub identify_number: String,
    pub admission_code: String,
    pub major_code: String,
    pub graduate_year: Option<u16>,
    pub graduate_grade: Option<u8>,
    pub applicant_type_code: Option<String>,
    pub final_score: f64,
    pub final_rank: u32,
    pub subjects: Vec<Subject>,
    pub vars: Vars,
    pub metrics: BTreeMap<String, f64>,
    pub snapshot: Vec<Snapshot>,
}

impl Context {
    pub fn new(identify_number: impl Into<String>, subjects: Vec<Subject>) -> Self {
        Self {
            identify_number: identify_number.into(),
            subjects,
            ..Self::default()
        }
    }

    /// Indices of subjects not yet excluded by any block.
    pub fn eligible_indices(&self) -> Vec<usize> {
        self.subjects
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_eligible())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn eligible_count(&self) -> usize {
        self.subjects.iter().filter(|s| s.is_eligible()).count()
    }

    /// Sum of units over eligible subjects.
    pub fn weighted_unit_sum(&self) -> f64 {
        self.subjects
            .iter()
            .filter(|s| s.is_eligible())
            .map(|s| s.unit)
            .sum()
    }

    /// Reads a student identity field by name (`student.<field>` in expressions).
    pub fn student_field(&self, name: &str) -> Value {
        match name {
            "identifyNumber" | "identify_number" | "id" => {
                Value::Text(self.identify_number.clone())
            }
            "admissionCode" | "admission_code" => Value::Text(self.admission_code.clone()),
            "majorCode" | "major_code" => Value::Text(self.major_code.clone()),
            "graduateYear" | "graduate_year" => self.graduate_year.map(f64::from).into(),
            "graduateGrade" | "graduate_grade" => self.graduate_grade.map(f64::from).into(),
            "applicantTypeCode" | "applicant_type_code" => self
                .applicant_type_code
                .clone()
                .map_or(Value::Null, Value::Text),
            "finalScore" | "final_score" => Value::Number(self.final_score),
            _ => Value::Null,
        }
    }

    /// Drops every snapshot on the student and its subjects.
    pub fn clear_snapshots(&mut self) {
        self.snapshot.clear();
        for subject in &mut self.subjects {
            subject.snapshot.clear();
        }
    }
}
