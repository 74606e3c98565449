//! Execution plumbing shared by every block evaluator.

use crate::block::{BlockKind, OverwritePolicy};
use crate::error::{BlockError, RunError};
use crate::model::{
    BlockId, CalculationLog, Context, Snapshot, Subject, TokenMenuStore, Value, VarScope, Vars,
};

/// Where a block runs and what it may read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockEnv<'a> {
    pub block_id: BlockId,
    pub case_index: Option<usize>,
    pub menus: &'a TokenMenuStore,
    pub capture: bool,
}

impl<'a> BlockEnv<'a> {
    pub fn at(self, block_id: BlockId) -> Self {
        Self { block_id, ..self }
    }

    pub fn in_case(self, case_index: usize) -> Self {
        Self {
            case_index: Some(case_index),
            ..self
        }
    }

    /// Appends a student-level snapshot if capture is on.
    pub fn record(&self, ctx: &mut Context, kind: BlockKind, logs: Vec<CalculationLog>) {
        if self.capture {
            let mut snapshot = Snapshot::new(self.block_id, self.case_index, kind);
            snapshot.logs = logs;
            ctx.snapshot.push(snapshot);
        }
    }

    /// Appends a subject-level snapshot if capture is on.
    pub fn record_subject(&self, subject: &mut Subject, kind: BlockKind, log: CalculationLog) {
        if self.capture {
            subject
                .snapshot
                .push(Snapshot::new(self.block_id, self.case_index, kind).with_log(log));
        }
    }

    /// Soft-excludes a subject and records the transition.
    pub fn exclude(&self, subject: &mut Subject, kind: BlockKind) {
        if !subject.is_eligible() {
            return;
        }
        subject.exclude(self.block_id);
        self.record_subject(
            subject,
            kind,
            CalculationLog::new(
                "filtered_block_id",
                0.0,
                "filtered_block_id",
                self.block_id as f64,
            ),
        );
    }
}

/// A pending variable write, replayed into the parent frame when a case
/// finishes. Carries the writing block and case so a conflict found at
/// merge time points at its origin.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VarWrite {
    pub block_id: BlockId,
    pub case_index: Option<usize>,
    pub name: String,
    pub scope: VarScope,
    pub value: Value,
    pub overwrite: OverwritePolicy,
}

/// Variable state visible to one chain.
///
/// The root frame writes straight through. A case frame starts as a copy
/// of its parent and also logs its writes so they can be merged back
/// after all sibling cases ran; siblings never see each other's writes.
#[derive(Debug, Clone, Default)]
pub(crate) struct VarFrame {
    pub vars: Vars,
    log: Option<Vec<VarWrite>>,
}

impl VarFrame {
    pub fn root(vars: Vars) -> Self {
        Self { vars, log: None }
    }

    /// A child frame for one division case.
    pub fn isolated(&self) -> Self {
        Self {
            vars: self.vars.clone(),
            log: Some(Vec::new()),
        }
    }

    pub fn write(&mut self, write: VarWrite) -> Result<(), RunError> {
        let scope = self.vars.scope_mut(write.scope);
        if write.overwrite == OverwritePolicy::Deny && scope.contains_key(&write.name) {
            return Err(RunError::VariableConflict {
                name: write.name,
                scope: write.scope,
            });
        }
        scope.insert(write.name.clone(), write.value.clone());
        if let Some(log) = &mut self.log {
            log.push(write);
        }
        Ok(())
    }

    /// Replays a finished case frame's writes, in order.
    pub fn merge(&mut self, child: VarFrame) -> Result<(), BlockError> {
        for write in child.log.unwrap_or_default() {
            let (block_id, case_index) = (write.block_id, write.case_index);
            self.write(write)
                .map_err(|e| BlockError::new(block_id, case_index, e))?;
        }
        Ok(())
    }

    pub fn clear_component(&mut self) {
        self.vars.component.clear();
    }

    pub fn into_vars(self) -> Vars {
        self.vars
    }
}
