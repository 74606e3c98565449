//! Audit records emitted while a block runs.
//!
//! Snapshots exist for replay in the editor only. Nothing in the engine
//! reads them back, so capturing or dropping them never changes a score.

use super::value::Value;
use super::BlockId;
use crate::block::BlockKind;
use serde::{Deserialize, Serialize};

/// One named input → output record inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationLog {
    pub input_key: String,
    pub input: Value,
    pub output_key: String,
    pub output: Value,
}

impl CalculationLog {
    pub fn new(
        input_key: impl Into<String>,
        input: impl Into<Value>,
        output_key: impl Into<String>,
        output: impl Into<Value>,
    ) -> Self {
        Self {
            input_key: input_key.into(),
            input: input.into(),
            output_key: output_key.into(),
            output: output.into(),
        }
    }
}

/// The audit trail of one block execution against a student or subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub block_id: BlockId,
    pub case_index: Option<usize>,
    pub block_type: BlockKind,
    pub logs: Vec<CalculationLog>,
}

impl Snapshot {
    pub fn new(block_id: BlockId, case_index: Option<usize>, block_type: BlockKind) -> Self {
        Self {
            block_id,
            case_index,
            block_type,
            logs: Vec::new(),
        }
    }

    /// Appends a log entry, builder style.
    pub fn with_log(mut self, log: CalculationLog) -> Self {
        self.logs.push(log);
        self
    }
}
