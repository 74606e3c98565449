//! Result persistence.
//!
//! Storage is an external collaborator behind [`ResultSink`]. A run
//! replaces every row of its pipeline id, inserts light rows (subjects
//! without snapshots) in chunks, then attaches the full snapshots in a
//! second chunked pass. Students with no eligible subject are not stored.

use super::types::StudentResult;
use crate::error::BatchError;
use crate::model::Snapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use tracing::{debug, info};

/// Destination for ranked results.
pub trait ResultSink {
    /// Drops every stored row for `pipeline_id`.
    fn replace_pipeline(&mut self, pipeline_id: u64) -> io::Result<()>;

    /// Inserts rows without snapshots.
    fn insert_rows(&mut self, pipeline_id: u64, rows: &[StudentResult]) -> io::Result<()>;

    /// Attaches the snapshots of already inserted rows.
    fn attach_snapshots(&mut self, pipeline_id: u64, rows: &[&StudentResult]) -> io::Result<()>;
}

/// Counts from one [`persist_results`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub inserted: usize,
    /// Students left out for having no eligible subject.
    pub skipped: usize,
    pub attached: usize,
    pub chunks: usize,
}

/// Writes `results` for `pipeline_id` through `sink`.
pub fn persist_results<S: ResultSink + ?Sized>(
    sink: &mut S,
    pipeline_id: u64,
    results: &[StudentResult],
    chunk_size: usize,
) -> Result<PersistSummary, BatchError> {
    if chunk_size == 0 {
        return Err(BatchError::Config("persist chunk size must be at least 1".into()));
    }

    sink.replace_pipeline(pipeline_id)?;
    let rows: Vec<&StudentResult> = results.iter().filter(|r| r.eligible_subjects > 0).collect();
    let mut summary = PersistSummary {
        skipped: results.len() - rows.len(),
        ..PersistSummary::default()
    };

    for chunk in rows.chunks(chunk_size) {
        let light: Vec<StudentResult> = chunk.iter().map(|r| r.without_snapshots()).collect();
        sink.insert_rows(pipeline_id, &light)?;
        summary.inserted += light.len();
        summary.chunks += 1;
        debug!(pipeline_id, rows = light.len(), "inserted chunk");
    }

    let heavy: Vec<&StudentResult> = rows.into_iter().filter(|r| r.has_snapshots()).collect();
    for chunk in heavy.chunks(chunk_size) {
        sink.attach_snapshots(pipeline_id, chunk)?;
        summary.attached += chunk.len();
        summary.chunks += 1;
        debug!(pipeline_id, rows = chunk.len(), "attached snapshots");
    }

    info!(
        pipeline_id,
        inserted = summary.inserted,
        skipped = summary.skipped,
        attached = summary.attached,
        "results persisted"
    );
    Ok(summary)
}

/// In-memory sink keyed by pipeline id.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: BTreeMap<u64, Vec<StudentResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, pipeline_id: u64) -> &[StudentResult] {
        self.rows.get(&pipeline_id).map(Vec::as_slice).unwrap_or_default()
    }
}

impl ResultSink for MemorySink {
    fn replace_pipeline(&mut self, pipeline_id: u64) -> io::Result<()> {
        self.rows.remove(&pipeline_id);
        Ok(())
    }

    fn insert_rows(&mut self, pipeline_id: u64, rows: &[StudentResult]) -> io::Result<()> {
        self.rows
            .entry(pipeline_id)
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    fn attach_snapshots(&mut self, pipeline_id: u64, rows: &[&StudentResult]) -> io::Result<()> {
        let stored = self.rows.entry(pipeline_id).or_default();
        for row in rows {
            let Some(target) = stored
                .iter_mut()
                .find(|s| s.identify_number == row.identify_number)
            else {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no row for student {}", row.identify_number),
                ));
            };
            target.snapshot = row.snapshot.clone();
            for (dst, src) in target.subjects.iter_mut().zip(&row.subjects) {
                dst.snapshot = src.snapshot.clone();
            }
        }
        Ok(())
    }
}

/// One line of a [`JsonLinesSink`] stream.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum SinkRecord<'a> {
    Replace {
        pipeline_id: u64,
    },
    Insert {
        pipeline_id: u64,
        row: &'a StudentResult,
    },
    Attach {
        pipeline_id: u64,
        identify_number: &'a str,
        snapshot: &'a [Snapshot],
        subject_snapshots: Vec<&'a [Snapshot]>,
    },
}

/// Writes every sink operation as one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, record: &SinkRecord<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn replace_pipeline(&mut self, pipeline_id: u64) -> io::Result<()> {
        self.emit(&SinkRecord::Replace { pipeline_id })
    }

    fn insert_rows(&mut self, pipeline_id: u64, rows: &[StudentResult]) -> io::Result<()> {
        for row in rows {
            self.emit(&SinkRecord::Insert { pipeline_id, row })?;
        }
        self.out.flush()
    }

    fn attach_snapshots(&mut self, pipeline_id: u64, rows: &[&StudentResult]) -> io::Result<()> {
        for row in rows {
            self.emit(&SinkRecord::Attach {
                pipeline_id,
                identify_number: &row.identify_number,
                snapshot: &row.snapshot,
                subject_snapshots: row.subjects.iter().map(|s| s.snapshot.as_slice()).collect(),
            })?;
        }
        self.out.flush()
    }
}
