use crate::block::{BlockKind, FinalizeMode};
use crate::model::{CalculationLog, Context};
use crate::pipeline::frame::BlockEnv;

/// Whether a chain keeps running after a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeBlock {
    pub mode: FinalizeMode,
}

impl FinalizeBlock {
    pub fn new(mode: FinalizeMode) -> Self {
        Self { mode }
    }

    pub fn terminates(&self) -> bool {
        self.mode == FinalizeMode::Terminate
    }

    /// `snapshot` records the running scalar; `terminate` also commits it
    /// as the final score (`0.0` when absent) and stops the student.
    pub(crate) fn apply(&self, env: &BlockEnv<'_>, ctx: &mut Context, scalar: Option<f64>) -> Flow {
        match self.mode {
            FinalizeMode::Snapshot => {
                env.record(
                    ctx,
                    BlockKind::Finalize,
                    vec![CalculationLog::new("value", scalar, "snapshot", scalar)],
                );
                Flow::Continue
            }
            FinalizeMode::Terminate => {
                commit(ctx, scalar);
                env.record(
                    ctx,
                    BlockKind::Finalize,
                    vec![CalculationLog::new(
                        "value",
                        scalar,
                        "finalScore",
                        ctx.final_score,
                    )],
                );
                Flow::Terminated
            }
        }
    }
}

/// Commits the running scalar as the student's final score.
pub(crate) fn commit(ctx: &mut Context, scalar: Option<f64>) {
    ctx.final_score = scalar.unwrap_or(0.0);
}
