use crate::block::BlockKind;
use crate::error::{RunError, Violation};
use crate::expr::{compile, Expression, Scope};
use crate::model::{BlockId, CalculationLog, Context, Vars};
use crate::pipeline::frame::BlockEnv;

/// Selects which branch runs next. Never filters subjects itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionBlock {
    pub expr: Expression,
    pub then_chain: Vec<BlockId>,
    /// Empty means pass-through.
    pub else_chain: Vec<BlockId>,
}

impl ConditionBlock {
    pub fn compile(
        expr: &str,
        then_chain: Vec<BlockId>,
        else_chain: Vec<BlockId>,
    ) -> Result<Self, Vec<Violation>> {
        Ok(Self {
            expr: compile(expr).map_err(|v| vec![v])?,
            then_chain,
            else_chain,
        })
    }

    /// Evaluates the condition against student scope. `null` is false; any
    /// other non-boolean result is an error.
    pub(crate) fn evaluate(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        vars: &Vars,
        scalar: Option<f64>,
    ) -> Result<bool, RunError> {
        let taken = self
            .expr
            .eval_bool(&Scope::new(ctx, vars).with_value(scalar))?;
        env.record(
            ctx,
            BlockKind::Condition,
            vec![CalculationLog::new(
                self.expr.source(),
                scalar,
                "branch",
                if taken { "then" } else { "else" },
            )],
        );
        Ok(taken)
    }

    /// The chain selected by `taken`.
    pub fn branch(&self, taken: bool) -> &[BlockId] {
        if taken {
            &self.then_chain
        } else {
            &self.else_chain
        }
    }
}
