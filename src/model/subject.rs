//! One transcript line and the attribute vocabulary used to address it.

use super::snapshot::Snapshot;
use super::value::Value;
use super::BlockId;
use serde::{Deserialize, Serialize};

/// One course result on a student's transcript.
///
/// `score` starts as `None` and is filled in by transforms such as
/// `score_map` or `formula`. Exclusion is soft: a non-zero
/// `filtered_block_id` records which block removed the subject, and the
/// subject stays in the list for audit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subject {
    pub grade: u8,
    pub term: u8,
    pub unit: f64,
    pub subject_group: String,
    pub subject_name: String,
    pub subject_code: String,
    pub organization_name: Option<String>,
    pub original_score: Option<f64>,
    pub ranking_grade: Option<f64>,
    pub achievement: Option<String>,
    pub assessment: Option<String>,
    pub avg: Option<f64>,
    pub standard_deviation: Option<f64>,
    pub student_count: Option<u32>,
    pub subject_separation_code: String,
    pub score: Option<f64>,
    #[serde(rename = "filtered_block_id")]
    pub filtered_block_id: BlockId,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub snapshot: Vec<Snapshot>,
}

impl Subject {
    /// Whether later blocks still consider this subject.
    pub fn is_eligible(&self) -> bool {
        self.filtered_block_id == 0
    }

    /// Marks the subject as excluded by `block_id`.
    ///
    /// The first exclusion wins; later blocks do not overwrite it.
    pub fn exclude(&mut self, block_id: BlockId) {
        if self.filtered_block_id == 0 {
            self.filtered_block_id = block_id;
        }
    }

    /// `(grade, term)` as a single sortable key.
    pub fn term_key(&self) -> (u8, u8) {
        (self.grade, self.term)
    }

    /// Reads an attribute by field.
    pub fn attribute(&self, field: SubjectField) -> Value {
        match field {
            SubjectField::Grade => Value::Number(f64::from(self.grade)),
            SubjectField::Term => Value::Number(f64::from(self.term)),
            SubjectField::Unit => Value::Number(self.unit),
            SubjectField::SubjectGroup => Value::Text(self.subject_group.clone()),
            SubjectField::SubjectName => Value::Text(self.subject_name.clone()),
            SubjectField::SubjectCode => Value::Text(self.subject_code.clone()),
            SubjectField::OrganizationName => {
                self.organization_name.clone().map_or(Value::Null, Value::Text)
            }
            SubjectField::OriginalScore => self.original_score.into(),
            SubjectField::RankingGrade => self.ranking_grade.into(),
            SubjectField::Achievement => self.achievement.clone().map_or(Value::Null, Value::Text),
            SubjectField::Assessment => self.assessment.clone().map_or(Value::Null, Value::Text),
            SubjectField::Avg => self.avg.into(),
            SubjectField::StandardDeviation => self.standard_deviation.into(),
            SubjectField::StudentCount => self.student_count.map(f64::from).into(),
            SubjectField::SubjectSeparationCode => {
                Value::Text(self.subject_separation_code.clone())
            }
            SubjectField::Score => self.score.into(),
        }
    }
}

/// Addressable subject attributes.
///
/// Names are accepted in both `camelCase` (wire form) and `snake_case`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectField {
    Grade,
    Term,
    Unit,
    SubjectGroup,
    SubjectName,
    SubjectCode,
    OrganizationName,
    OriginalScore,
    RankingGrade,
    Achievement,
    Assessment,
    Avg,
    StandardDeviation,
    StudentCount,
    SubjectSeparationCode,
    Score,
}

impl SubjectField {
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "grade" => Self::Grade,
            "term" => Self::Term,
            "unit" => Self::Unit,
            "subjectGroup" | "subject_group" => Self::SubjectGroup,
            "subjectName" | "subject_name" => Self::SubjectName,
            "subjectCode" | "subject_code" => Self::SubjectCode,
            "organizationName" | "organization_name" => Self::OrganizationName,
            "originalScore" | "original_score" => Self::OriginalScore,
            "rankingGrade" | "ranking_grade" => Self::RankingGrade,
            "achievement" => Self::Achievement,
            "assessment" => Self::Assessment,
            "avg" | "mean" => Self::Avg,
            "standardDeviation" | "standard_deviation" | "stddev" => Self::StandardDeviation,
            "studentCount" | "student_count" => Self::StudentCount,
            "subjectSeparationCode" | "subject_separation_code" => Self::SubjectSeparationCode,
            "score" => Self::Score,
            _ => return None,
        };
        Some(field)
    }
}
