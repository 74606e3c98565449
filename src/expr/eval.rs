//! Expression evaluation against an immutable scope.

use super::parser::{BinaryOp, Expr, Func, UnaryOp};
use super::EvalError;
use crate::model::{Context, Subject, SubjectField, Value, VarScope, Vars};
use std::cmp::Ordering;

const EQ_EPSILON: f64 = 1e-9;

/// Read-only view an expression is evaluated against.
///
/// `vars` is passed separately from `context` because a division case
/// evaluates against its own isolated variable frame.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub context: &'a Context,
    pub vars: &'a Vars,
    pub subject: Option<&'a Subject>,
    /// The running scalar, exposed as `value`.
    pub value: Option<f64>,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a Context, vars: &'a Vars) -> Self {
        Self {
            context,
            vars,
            subject: None,
            value: None,
        }
    }

    pub fn with_subject(mut self, subject: &'a Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_value(mut self, value: Option<f64>) -> Self {
        self.value = value;
        self
    }

    /// Resolves an identifier. Unknown names are `Null`.
    pub fn lookup(&self, path: &str) -> Value {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match (head, rest) {
            ("subject", Some(field)) => self.subject_field(field),
            ("vars", Some(name)) => self.vars.get(name).cloned().unwrap_or_default(),
            ("component", Some(name)) => self.scoped(VarScope::Component, name),
            ("pipeline", Some(name)) => self.scoped(VarScope::Pipeline, name),
            ("metrics", Some(name)) => self
                .context
                .metrics
                .get(name)
                .copied()
                .map_or(Value::Null, Value::Number),
            ("student", Some(field)) => self.context.student_field(field),
            ("value", None) => self.value.into(),
            (name, None) => {
                if self.subject.is_some() && SubjectField::from_name(name).is_some() {
                    return self.subject_field(name);
                }
                self.vars.get(name).cloned().unwrap_or_default()
            }
            _ => Value::Null,
        }
    }

    fn subject_field(&self, name: &str) -> Value {
        match (self.subject, SubjectField::from_name(name)) {
            (Some(subject), Some(field)) => subject.attribute(field),
            _ => Value::Null,
        }
    }

    fn scoped(&self, scope: VarScope, name: &str) -> Value {
        self.vars.scope(scope).get(name).cloned().unwrap_or_default()
    }
}

pub(crate) fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(path) => Ok(scope.lookup(path)),
        Expr::Unary(op, inner) => {
            let v = eval(inner, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                UnaryOp::Neg => match v {
                    Value::Null => Ok(Value::Null),
                    other => numeric(&other, "-").map(|n| Value::Number(-n)),
                },
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !eval(lhs, scope)?.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(rhs, scope)?.truthy()))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if eval(lhs, scope)?.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(rhs, scope)?.truthy()))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = eval(lhs, scope)?;
            let b = eval(rhs, scope)?;
            binary(*op, a, b)
        }
        Expr::Call(func, args) => call(*func, args, scope),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

fn numeric(v: &Value, op: &str) -> Result<f64, EvalError> {
    v.as_f64().ok_or_else(|| {
        EvalError::new(format!("cannot apply '{op}' to {} value '{v}'", v.type_name()))
    })
}

fn binary(op: BinaryOp, a: Value, b: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(loose_eq(&a, &b))),
        BinaryOp::Ne => return Ok(Value::Bool(!loose_eq(&a, &b))),
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            let Some(ord) = compare(&a, &b, op)? else {
                return Ok(Value::Bool(false));
            };
            let result = match op {
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                BinaryOp::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }

    if op == BinaryOp::Add {
        if let (Value::Text(x), Value::Text(y)) = (&a, &b) {
            if x.parse::<f64>().is_err() || y.parse::<f64>().is_err() {
                return Ok(Value::Text(format!("{x}{y}")));
            }
        }
    }

    let sym = op_symbol(op);
    let x = numeric(&a, sym)?;
    let y = numeric(&b, sym)?;
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => return Ok(Value::Null),
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => unreachable!("comparison and logical operators handled above"),
    };
    Ok(Value::Number(result))
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= EQ_EPSILON,
            _ => a.key_string() == b.key_string(),
        },
    }
}

/// `None` means "not comparable because of a null", which makes every
/// ordering comparison false.
fn compare(a: &Value, b: &Value, op: BinaryOp) -> Result<Option<Ordering>, EvalError> {
    if a.is_null() || b.is_null() {
        return Ok(None);
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        if (x - y).abs() <= EQ_EPSILON {
            return Ok(Some(Ordering::Equal));
        }
        return Ok(x.partial_cmp(&y));
    }
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Ok(Some(x.cmp(y))),
        _ => Err(EvalError::new(format!(
            "cannot compare {} with {} using '{}'",
            a.type_name(),
            b.type_name(),
            op_symbol(op)
        ))),
    }
}

fn call(func: Func, args: &[Expr], scope: &Scope<'_>) -> Result<Value, EvalError> {
    if func == Func::If {
        let cond = eval(&args[0], scope)?;
        return if cond.truthy() {
            eval(&args[1], scope)
        } else {
            eval(&args[2], scope)
        };
    }

    let values = args
        .iter()
        .map(|arg| eval(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;

    match func {
        Func::Coalesce => Ok(values.into_iter().find(|v| !v.is_null()).unwrap_or_default()),
        Func::Min | Func::Max => {
            let mut best: Option<f64> = None;
            for v in values.iter().filter(|v| !v.is_null()) {
                let n = numeric(v, if func == Func::Min { "min" } else { "max" })?;
                best = Some(match best {
                    None => n,
                    Some(b) if func == Func::Min => b.min(n),
                    Some(b) => b.max(n),
                });
            }
            Ok(best.into())
        }
        Func::Abs | Func::Floor | Func::Ceil | Func::Round => {
            let x = &values[0];
            if x.is_null() {
                return Ok(Value::Null);
            }
            let n = numeric(x, "math")?;
            let out = match func {
                Func::Abs => n.abs(),
                Func::Floor => n.floor(),
                Func::Ceil => n.ceil(),
                _ => {
                    let digits = match values.get(1) {
                        Some(d) if !d.is_null() => numeric(d, "round")? as i32,
                        _ => 0,
                    };
                    let factor = 10f64.powi(digits);
                    (n * factor).round() / factor
                }
            };
            Ok(Value::Number(out))
        }
        Func::If => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Expression;
    use super::*;

    fn ctx() -> Context {
        let mut ctx = Context::new(
            "S1",
            vec![Subject {
                grade: 2,
                term: 1,
                unit: 3.0,
                subject_group: "수학".into(),
                score: Some(90.0),
                ..Subject::default()
            }],
        );
        ctx.metrics.insert("bonus".into(), 1.5);
        ctx.vars.pipeline.insert("base".into(), Value::Number(10.0));
        ctx
    }

    fn run(src: &str, ctx: &Context, with_subject: bool) -> Value {
        let expr = Expression::parse(src).unwrap();
        let mut scope = Scope::new(ctx, &ctx.vars).with_value(Some(4.0));
        if with_subject {
            scope = scope.with_subject(&ctx.subjects[0]);
        }
        expr.eval(&scope).unwrap()
    }

    #[test]
    fn test_arithmetic_over_subject_fields() {
        let ctx = ctx();
        assert_eq!(run("unit * score", &ctx, true), Value::Number(270.0));
        assert_eq!(run("subject.grade + 1", &ctx, true), Value::Number(3.0));
        assert_eq!(run("value / 2", &ctx, true), Value::Number(2.0));
    }

    #[test]
    fn test_scope_resolution() {
        let mut ctx = ctx();
        assert_eq!(run("base", &ctx, false), Value::Number(10.0));
        ctx.vars.component.insert("base".into(), Value::Number(20.0));
        assert_eq!(run("base", &ctx, false), Value::Number(20.0));
        assert_eq!(run("vars.base", &ctx, false), Value::Number(20.0));
        assert_eq!(run("pipeline.base", &ctx, false), Value::Number(10.0));
        assert_eq!(run("metrics.bonus", &ctx, false), Value::Number(1.5));
        assert_eq!(run("student.id", &ctx, false), Value::Text("S1".into()));
    }

    #[test]
    fn test_null_propagation() {
        let ctx = ctx();
        assert_eq!(run("missing + 1", &ctx, false), Value::Null);
        assert_eq!(run("score * missing", &ctx, true), Value::Null);
        assert_eq!(run("10 / 0", &ctx, false), Value::Null);
        assert_eq!(run("missing > 1", &ctx, false), Value::Bool(false));
        assert_eq!(run("missing == null", &ctx, false), Value::Bool(true));
        assert_eq!(run("coalesce(missing, 7)", &ctx, false), Value::Number(7.0));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let ctx = ctx();
        assert_eq!(run("grade == '2'", &ctx, true), Value::Bool(true));
        assert_eq!(run("subjectGroup == '수학'", &ctx, true), Value::Bool(true));
        assert_eq!(
            run("score >= 90 && unit < 3 || grade == 2", &ctx, true),
            Value::Bool(true)
        );
        assert_eq!(run("!(score > 95)", &ctx, true), Value::Bool(true));
    }

    #[test]
    fn test_functions() {
        let ctx = ctx();
        assert_eq!(run("max(1, 5, null, 3)", &ctx, false), Value::Number(5.0));
        assert_eq!(run("min(4, -2)", &ctx, false), Value::Number(-2.0));
        assert_eq!(run("round(2.346, 2)", &ctx, false), Value::Number(2.35));
        assert_eq!(run("if(score > 50, 1, 0)", &ctx, true), Value::Number(1.0));
        assert_eq!(run("abs(-3)", &ctx, false), Value::Number(3.0));
    }

    #[test]
    fn test_type_errors() {
        let ctx = ctx();
        let expr = Expression::parse("subjectGroup * 2").unwrap();
        let scope = Scope::new(&ctx, &ctx.vars).with_subject(&ctx.subjects[0]);
        assert!(expr.eval(&scope).is_err());

        let expr = Expression::parse("true > 'a'").unwrap();
        assert!(expr.eval(&Scope::new(&ctx, &ctx.vars)).is_err());
    }
}
