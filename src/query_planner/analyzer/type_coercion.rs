//! Explicit casts where the server's numeric rules differ from the CLR's.
//!
//! - `AVG` over an integral argument averages `CAST(x AS float)`; the engine
//!   would otherwise return a truncated integer.
//! - `SUM`/`AVG` over a `Single` argument aggregate in double precision and
//!   cast the result back to `Single`.
//! - Arithmetic mixing an integral operand with a decimal casts the integral
//!   side to decimal.
//! - Numeric literals compared or combined with a column take the column's
//!   type, so the generated literal matches the column width.
//! - Casts to the operand's own type are dropped; casts of literals fold.

use std::sync::Arc;

use crate::query::{AggregateFunction, ClrType, TypeMapping, Value};
use crate::query_planner::{
    analyzer::analyzer_pass::{rewrite_plan, AnalyzerPass, AnalyzerResult},
    errors::Pass,
    logical_expr::LogicalExpr,
    logical_plan::LogicalPlan,
    transformed::Transformed,
};

pub struct TypeCoercion;

impl AnalyzerPass for TypeCoercion {
    fn pass(&self) -> Pass {
        Pass::TypeCoercion
    }

    fn analyze(&self, logical_plan: Arc<LogicalPlan>) -> AnalyzerResult<Transformed<Arc<LogicalPlan>>> {
        rewrite_plan(logical_plan, &mut |expr, _| expr.transform_up(&mut |e| Ok(coerce(e))))
    }
}

fn coerce(expr: LogicalExpr) -> LogicalExpr {
    match expr {
        LogicalExpr::Aggregate {
            function,
            arg: Some(arg),
            type_mapping,
        } => coerce_aggregate(function, *arg, type_mapping),
        LogicalExpr::Binary {
            op,
            left,
            right,
            type_mapping,
        } if op.is_comparison() || op.is_arithmetic() => {
            let (left, right) = align_literals(*left, *right);
            let (left, right) = if op.is_arithmetic() {
                widen_to_decimal(left, right)
            } else {
                (left, right)
            };
            LogicalExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                type_mapping,
            }
        }
        LogicalExpr::Cast { expr, to } => {
            let from = expr.type_mapping();
            if from.clr == to.clr {
                return *expr;
            }
            match *expr {
                LogicalExpr::Literal(value, _) => match convert_literal(&value, to.clr) {
                    Some(converted) => LogicalExpr::Literal(converted, to.with_nullable(false)),
                    None => LogicalExpr::Cast {
                        expr: Box::new(LogicalExpr::Literal(value, from)),
                        to,
                    },
                },
                other => LogicalExpr::Cast {
                    expr: Box::new(other),
                    to,
                },
            }
        }
        other => other,
    }
}

fn coerce_aggregate(function: AggregateFunction, arg: LogicalExpr, type_mapping: TypeMapping) -> LogicalExpr {
    let arg_type = arg.type_mapping();
    let already_cast = matches!(&arg, LogicalExpr::Cast { to, .. } if to.clr == ClrType::Double);
    match function {
        AggregateFunction::Average if arg_type.clr.is_integral() => LogicalExpr::Aggregate {
            function,
            arg: Some(Box::new(cast(arg, ClrType::Double))),
            type_mapping: TypeMapping::new(ClrType::Double, type_mapping.nullable),
        },
        AggregateFunction::Sum | AggregateFunction::Average
            if arg_type.clr == ClrType::Single && !already_cast =>
        {
            let widened = LogicalExpr::Aggregate {
                function,
                arg: Some(Box::new(cast(arg, ClrType::Double))),
                type_mapping: TypeMapping::new(ClrType::Double, type_mapping.nullable),
            };
            LogicalExpr::Cast {
                expr: Box::new(widened),
                to: TypeMapping::new(ClrType::Single, type_mapping.nullable),
            }
        }
        _ => LogicalExpr::Aggregate {
            function,
            arg: Some(Box::new(arg)),
            type_mapping,
        },
    }
}

fn cast(expr: LogicalExpr, clr: ClrType) -> LogicalExpr {
    if expr.type_mapping().clr == clr {
        return expr;
    }
    let nullable = expr.is_nullable();
    LogicalExpr::Cast {
        expr: Box::new(expr),
        to: TypeMapping::new(clr, nullable),
    }
}

/// Retypes a numeric literal operand to the type of the other operand.
fn align_literals(left: LogicalExpr, right: LogicalExpr) -> (LogicalExpr, LogicalExpr) {
    let target_of = |other: &LogicalExpr| {
        let clr = other.type_mapping().clr;
        (!matches!(other, LogicalExpr::Literal(..)) && clr.is_numeric()).then_some(clr)
    };
    let retyped = |value: &Value, other: &LogicalExpr| {
        let clr = target_of(other)?;
        convert_literal(value, clr).map(|v| LogicalExpr::Literal(v, TypeMapping::non_null(clr)))
    };
    match (&left, &right) {
        (LogicalExpr::Literal(value, _), _) => match retyped(value, &right) {
            Some(literal) => (literal, right),
            None => (left, right),
        },
        (_, LogicalExpr::Literal(value, _)) => match retyped(value, &left) {
            Some(literal) => (left, literal),
            None => (left, right),
        },
        _ => (left, right),
    }
}

fn widen_to_decimal(left: LogicalExpr, right: LogicalExpr) -> (LogicalExpr, LogicalExpr) {
    let l = left.type_mapping().clr;
    let r = right.type_mapping().clr;
    if l.is_integral() && r == ClrType::Decimal && !matches!(left, LogicalExpr::Literal(..)) {
        (cast(left, ClrType::Decimal), right)
    } else if r.is_integral() && l == ClrType::Decimal && !matches!(right, LogicalExpr::Literal(..)) {
        (left, cast(right, ClrType::Decimal))
    } else {
        (left, right)
    }
}

/// Lossless conversion of a numeric literal, `None` when the value does not
/// fit or the target is not numeric.
fn convert_literal(value: &Value, clr: ClrType) -> Option<Value> {
    if value.clr_type() == Some(clr) {
        return Some(value.clone());
    }
    if !value.clr_type().is_some_and(ClrType::is_numeric) {
        return None;
    }
    let integral = value.as_i64();
    match clr {
        ClrType::Byte => integral.and_then(|v| u8::try_from(v).ok()).map(Value::Byte),
        ClrType::Int16 => integral.and_then(|v| i16::try_from(v).ok()).map(Value::Short),
        ClrType::Int32 => integral.and_then(|v| i32::try_from(v).ok()).map(Value::Int),
        ClrType::Int64 => integral.map(Value::Long),
        ClrType::Single => value.as_f64().map(|v| Value::Single(v as f32)),
        ClrType::Double => value.as_f64().map(Value::Double),
        ClrType::Decimal => value.as_f64().map(Value::Decimal),
        _ => None,
    }
}
