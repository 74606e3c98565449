//! Batch inputs and outputs.

use crate::error::StudentFailure;
use crate::model::{Context, Snapshot, Subject, Vars};
use crate::ranking::{Ranked, TieField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One scored, ranked student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub identify_number: String,
    pub final_score: f64,
    /// 1-based competition rank; `0` until ranking ran.
    pub final_rank: u32,
    pub subjects: Vec<Subject>,
    pub vars: Vars,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshot: Vec<Snapshot>,
    pub weighted_unit_sum: f64,
    pub eligible_subjects: usize,
}

impl StudentResult {
    pub fn from_context(ctx: Context) -> Self {
        Self {
            weighted_unit_sum: ctx.weighted_unit_sum(),
            eligible_subjects: ctx.eligible_count(),
            identify_number: ctx.identify_number,
            final_score: ctx.final_score,
            final_rank: 0,
            subjects: ctx.subjects,
            vars: ctx.vars,
            metrics: ctx.metrics,
            snapshot: ctx.snapshot,
        }
    }

    /// Whether any snapshot is attached to the student or a subject.
    pub fn has_snapshots(&self) -> bool {
        !self.snapshot.is_empty() || self.subjects.iter().any(|s| !s.snapshot.is_empty())
    }

    /// A copy with every snapshot removed.
    pub fn without_snapshots(&self) -> Self {
        let mut light = Self {
            snapshot: Vec::new(),
            ..self.clone()
        };
        for subject in &mut light.subjects {
            subject.snapshot.clear();
        }
        light
    }
}

impl Ranked for StudentResult {
    fn student_id(&self) -> &str {
        &self.identify_number
    }

    fn final_score(&self) -> f64 {
        self.final_score
    }

    fn tie_value(&self, key: TieField) -> f64 {
        match key {
            TieField::WeightedUnitSum => self.weighted_unit_sum,
            TieField::EligibleSubjects => self.eligible_subjects as f64,
        }
    }
}

/// Result of a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Scored students in ranked order.
    pub results: Vec<StudentResult>,

    /// Students that failed, in input order. They take no rank.
    pub failures: Vec<StudentFailure>,

    /// Number of students that were run.
    pub processed: usize,

    /// Whether the run was cancelled between chunks.
    pub cancelled: bool,
}

/// Shared progress counters, safe to poll from another thread.
#[derive(Debug, Default)]
pub struct BatchProgress {
    processed: AtomicUsize,
    total: AtomicUsize,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub(crate) fn start(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, n: usize) -> usize {
        self.processed.fetch_add(n, Ordering::Relaxed) + n
    }
}
