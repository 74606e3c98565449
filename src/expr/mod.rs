//! Expression language used by condition, formula, aggregation and
//! variable blocks.
//!
//! The grammar is deliberately small: literals, dotted identifiers,
//! arithmetic, comparisons, `&&` / `||` / `!`, and a fixed set of
//! functions (`min max abs round floor ceil coalesce if`).
//!
//! Expressions are parsed once while the pipeline is validated and then
//! evaluated many times. Evaluation is pure: it reads a [`Scope`] and
//! returns a [`Value`](crate::model::Value); writing the result is the
//! calling block's job.
//!
//! # Null semantics
//!
//! Unknown identifiers resolve to `null`. Arithmetic on `null` (and
//! division by zero) yields `null`, so a formula referencing a missing
//! variable contributes nothing instead of failing the batch.

mod eval;
mod lexer;
mod parser;

pub use eval::Scope;
pub use parser::{BinaryOp, Expr, Func, UnaryOp};

use crate::error::{Violation, ViolationKind};
use crate::model::Value;
use std::fmt;
use thiserror::Error;

/// A syntax error with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at offset {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// A runtime failure such as a type mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A parsed expression together with its source text.
#[derive(Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    pub fn eval(&self, scope: &Scope<'_>) -> Result<Value, EvalError> {
        let value = eval::eval(&self.ast, scope)?;
        tracing::trace!(expr = %self.source, result = %value, "evaluated expression");
        Ok(value)
    }

    /// Evaluates and requires a boolean. `null` counts as `false`.
    pub fn eval_bool(&self, scope: &Scope<'_>) -> Result<bool, EvalError> {
        match self.eval(scope)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(EvalError::new(format!(
                "'{}' must yield a boolean, got {} '{other}'",
                self.source,
                other.type_name()
            ))),
        }
    }

    /// Evaluates to a number; `null` and non-numeric values yield `None`.
    pub fn eval_number(&self, scope: &Scope<'_>) -> Result<Option<f64>, EvalError> {
        Ok(self.eval(scope)?.as_f64())
    }
}

/// Parses `source`, reporting a syntax error as a pipeline violation.
pub(crate) fn compile(source: &str) -> Result<Expression, Violation> {
    Expression::parse(source).map_err(|e| {
        Violation::new(ViolationKind::InvalidExpression, format!("'{source}': {e}"))
    })
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expression({:?})", self.source)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Context;

    #[test]
    fn test_eval_bool_rejects_numbers() {
        let ctx = Context::default();
        let scope = Scope::new(&ctx, &ctx.vars);
        assert!(Expression::parse("1 + 1").unwrap().eval_bool(&scope).is_err());
        assert!(!Expression::parse("missing").unwrap().eval_bool(&scope).unwrap());
        assert!(Expression::parse("2 > 1").unwrap().eval_bool(&scope).unwrap());
    }

    #[test]
    fn test_source_roundtrip() {
        let expr = Expression::parse("unit * 2").unwrap();
        assert_eq!(expr.source(), "unit * 2");
        assert_eq!(expr.to_string(), "unit * 2");
    }
}
