//! `score_map`: converts one score representation into `score`.

use super::invalid;
use crate::block::BlockKind;
use crate::error::{RunError, Violation};
use crate::model::{CalculationLog, Context, SubjectField, Value};
use crate::pipeline::frame::BlockEnv;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Exact,
    RangeInclusive,
    Linear,
}

/// What happens when an input falls outside the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfRange {
    /// Saturate to the nearest bound. An exact-table miss yields `null`.
    #[default]
    Clip,
    /// Fail the student.
    Error,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExactRow {
    pub key: Value,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeRow {
    pub min: f64,
    pub max: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearPoint {
    pub x: f64,
    pub y: f64,
}

/// A decoded lookup table. Range rows are sorted by `min`, linear points
/// by `x`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreTable {
    Exact(Vec<ExactRow>),
    Range(Vec<RangeRow>),
    Linear(Vec<LinearPoint>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Lookup {
    Hit(f64),
    /// Outside the table; carries the saturated value.
    Clipped(f64),
    Miss,
}

impl ScoreTable {
    fn lookup(&self, input: &Value) -> Lookup {
        match self {
            ScoreTable::Exact(rows) => rows
                .iter()
                .find(|row| keys_equal(&row.key, input))
                .map_or(Lookup::Miss, |row| Lookup::Hit(row.value)),
            ScoreTable::Range(rows) => match input.as_f64() {
                Some(x) => lookup_range(rows, x),
                None => Lookup::Miss,
            },
            ScoreTable::Linear(points) => match input.as_f64() {
                Some(x) => interpolate(points, x),
                None => Lookup::Miss,
            },
        }
    }
}

fn keys_equal(key: &Value, input: &Value) -> bool {
    match (key.as_f64(), input.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() < 1e-9,
        _ => key.key_string() == input.key_string(),
    }
}

fn lookup_range(rows: &[RangeRow], x: f64) -> Lookup {
    if let Some(row) = rows.iter().find(|r| r.min <= x && x <= r.max) {
        return Lookup::Hit(row.value);
    }
    let (Some(lowest), Some(highest)) = (
        rows.first(),
        rows.iter().max_by(|a, b| a.max.total_cmp(&b.max)),
    ) else {
        return Lookup::Miss;
    };
    if x < lowest.min {
        return Lookup::Clipped(lowest.value);
    }
    if x > highest.max {
        return Lookup::Clipped(highest.value);
    }

    // Inside the table but between rows: nearest row wins, earlier on ties.
    let distance = |r: &RangeRow| (r.min - x).abs().min((x - r.max).abs());
    let mut best = &rows[0];
    for row in &rows[1..] {
        if distance(row) < distance(best) {
            best = row;
        }
    }
    Lookup::Hit(best.value)
}

fn interpolate(points: &[LinearPoint], x: f64) -> Lookup {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Lookup::Miss;
    };
    if x < first.x {
        return Lookup::Clipped(first.y);
    }
    if x > last.x {
        return Lookup::Clipped(last.y);
    }
    for pair in points.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if x <= b.x {
            let t = (x - a.x) / (b.x - a.x);
            return Lookup::Hit(a.y + t * (b.y - a.y));
        }
    }
    Lookup::Hit(last.y)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScoreMapRaw {
    source: String,
    #[serde(rename = "match")]
    match_mode: MatchMode,
    table: serde_json::Value,
    #[serde(default)]
    out_of_range: OutOfRange,
    #[serde(default)]
    target: Option<String>,
}

/// Maps `source` through `table` into each eligible subject's `score`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMap {
    pub source: SubjectField,
    pub source_name: String,
    pub table: ScoreTable,
    pub out_of_range: OutOfRange,
}

impl ScoreMap {
    pub(crate) fn from_params(params: serde_json::Value) -> Result<Self, Vec<Violation>> {
        let raw: ScoreMapRaw = super::decode("score_map", params)?;
        let mut violations = Vec::new();

        let source = SubjectField::from_name(&raw.source);
        if source.is_none() {
            violations.push(invalid(format!(
                "score_map source '{}' is not a subject field",
                raw.source
            )));
        }
        if let Some(target) = raw.target.as_deref() {
            if target != "score" {
                violations.push(invalid(format!(
                    "score_map target '{target}' is not supported, only 'score'"
                )));
            }
        }

        let table = match decode_table(raw.match_mode, raw.table) {
            Ok(table) => Some(table),
            Err(v) => {
                violations.push(v);
                None
            }
        };

        match (source, table) {
            (Some(source), Some(table)) if violations.is_empty() => Ok(Self {
                source,
                source_name: raw.source,
                table,
                out_of_range: raw.out_of_range,
            }),
            _ => Err(violations),
        }
    }

    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        subjects: &[usize],
    ) -> Result<(), RunError> {
        for &idx in subjects {
            let subject = &mut ctx.subjects[idx];
            if !subject.is_eligible() {
                continue;
            }
            let input = subject.attribute(self.source);
            let mapped = if input.is_null() {
                None
            } else {
                match (self.table.lookup(&input), self.out_of_range) {
                    (Lookup::Hit(v), _) => Some(v),
                    (Lookup::Clipped(v), OutOfRange::Clip) => {
                        warn!(
                            student = %ctx.identify_number,
                            block_id = env.block_id,
                            subject = %subject.subject_name,
                            input = %input,
                            clipped = v,
                            "score_map input outside table, clipped"
                        );
                        Some(v)
                    }
                    (Lookup::Miss, OutOfRange::Clip) => None,
                    (_, OutOfRange::Error) => {
                        return Err(RunError::ScoreMapRange {
                            field: self.source_name.clone(),
                            value: input.to_string(),
                        })
                    }
                }
            };
            subject.score = mapped;
            env.record_subject(
                subject,
                BlockKind::Function,
                CalculationLog::new(self.source_name.clone(), input, "score", mapped),
            );
        }
        Ok(())
    }
}

fn decode_table(mode: MatchMode, table: serde_json::Value) -> Result<ScoreTable, Violation> {
    let decode_err = |e: serde_json::Error| invalid(format!("score_map table: {e}"));
    let table = match mode {
        MatchMode::Exact => {
            let rows: Vec<ExactRow> = serde_json::from_value(table).map_err(decode_err)?;
            if rows.is_empty() {
                return Err(invalid("score_map table is empty"));
            }
            ScoreTable::Exact(rows)
        }
        MatchMode::RangeInclusive => {
            let mut rows: Vec<RangeRow> = serde_json::from_value(table).map_err(decode_err)?;
            if rows.is_empty() {
                return Err(invalid("score_map table is empty"));
            }
            if let Some(row) = rows.iter().find(|r| !(r.min <= r.max)) {
                return Err(invalid(format!(
                    "score_map range row has min {} above max {}",
                    row.min, row.max
                )));
            }
            rows.sort_by(|a, b| a.min.total_cmp(&b.min));
            ScoreTable::Range(rows)
        }
        MatchMode::Linear => {
            let mut points: Vec<LinearPoint> =
                serde_json::from_value(table).map_err(decode_err)?;
            if points.len() < 2 {
                return Err(invalid("score_map linear table needs at least two points"));
            }
            points.sort_by(|a, b| a.x.total_cmp(&b.x));
            if points.windows(2).any(|p| !(p[0].x < p[1].x)) {
                return Err(invalid("score_map linear points must have distinct x"));
            }
            ScoreTable::Linear(points)
        }
    };
    Ok(table)
}
