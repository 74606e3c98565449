use crate::block::{BlockKind, OverwritePolicy};
use crate::error::{RunError, Violation, ViolationKind};
use crate::expr::{compile, Expression, Scope};
use crate::model::{CalculationLog, Context, Value, VarScope};
use crate::pipeline::frame::{BlockEnv, VarFrame, VarWrite};

/// Stores a value under `name` in the component or pipeline scope.
///
/// The value is the `value` expression when given, else the running
/// scalar, else `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableBlock {
    pub name: String,
    pub scope: VarScope,
    pub overwrite: OverwritePolicy,
    pub value: Option<Expression>,
}

impl VariableBlock {
    pub fn compile(
        name: &str,
        scope: VarScope,
        overwrite: OverwritePolicy,
        value: Option<&str>,
    ) -> Result<Self, Vec<Violation>> {
        let mut violations = Vec::new();
        if name.is_empty() || name.contains('.') {
            violations.push(Violation::new(
                ViolationKind::InvalidParams,
                format!("variable name '{name}' must be non-empty and contain no '.'"),
            ));
        }
        let value = match value.map(compile).transpose() {
            Ok(value) => value,
            Err(v) => {
                violations.push(v);
                None
            }
        };
        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Self {
            name: name.to_string(),
            scope,
            overwrite,
            value,
        })
    }

    pub(crate) fn apply(
        &self,
        env: &BlockEnv<'_>,
        ctx: &mut Context,
        frame: &mut VarFrame,
        scalar: Option<f64>,
    ) -> Result<(), RunError> {
        let value = match &self.value {
            Some(expr) => expr.eval(&Scope::new(ctx, &frame.vars).with_value(scalar))?,
            None => Value::from(scalar),
        };
        frame.write(VarWrite {
            block_id: env.block_id,
            case_index: env.case_index,
            name: self.name.clone(),
            scope: self.scope,
            value: value.clone(),
            overwrite: self.overwrite,
        })?;

        let scope_name = self.scope.name();
        env.record(
            ctx,
            BlockKind::Variable,
            vec![CalculationLog::new(
                "value",
                scalar,
                format!("{scope_name}.{}", self.name),
                value,
            )],
        );
        Ok(())
    }
}
