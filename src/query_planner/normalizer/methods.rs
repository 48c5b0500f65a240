//! Method calls: string functions, `Contains` and client methods.

use super::{Bound, Env, ListValue, Normalizer};
use crate::query::{ClrType, Expr, Method, TypeMapping, Value};
use crate::query_planner::errors::QueryPlannerError;
use crate::query_planner::logical_expr::{LogicalExpr, SqlFunction, SqlOperator};
use crate::query_planner::shape::{ClientProjection, ProjectionShape};

pub(crate) const LIKE_ESCAPE: char = '\\';

/// Escapes LIKE wildcards so `value` matches literally.
pub(crate) fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '[') || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

fn string_literal(value: &str) -> LogicalExpr {
    LogicalExpr::literal(Value::String(value.to_string()))
}

impl<'a> Normalizer<'a> {
    pub(super) fn bind_call(
        &mut self,
        method: &Method,
        target: Option<&Expr>,
        args: &[Expr],
        expr: &Expr,
        env: &Env,
    ) -> Result<Bound, QueryPlannerError> {
        match method {
            Method::Client(name) => self.client_call(name, target, args, expr, env),
            Method::Contains => self.bind_contains(target, args, expr, env),
            Method::StartsWith | Method::EndsWith => {
                let (subject, pattern) = match (target, args) {
                    (Some(target), [pattern]) => (target, pattern),
                    _ => return Err(QueryPlannerError::translation_failed(expr.to_string())),
                };
                let bound = self.bind(subject, env)?;
                let subject = self.to_scalar(bound, subject)?;
                let bound = self.bind(pattern, env)?;
                let pattern = self.to_scalar(bound, pattern)?;
                Ok(Bound::scalar(prefix_match(
                    subject,
                    pattern,
                    *method == Method::StartsWith,
                )))
            }
            Method::ToUpper | Method::ToLower | Method::Trim => {
                let subject = self.call_operands(target, args, 0, expr, env)?.remove(0);
                let function = match method {
                    Method::ToUpper => SqlFunction::Upper,
                    Method::ToLower => SqlFunction::Lower,
                    _ => SqlFunction::Trim,
                };
                let type_mapping = subject.type_mapping();
                Ok(Bound::scalar(LogicalExpr::Function {
                    function,
                    args: vec![subject],
                    type_mapping,
                }))
            }
            Method::Replace => {
                let operands = self.call_operands(target, args, 2, expr, env)?;
                let type_mapping = operands[0].type_mapping();
                Ok(Bound::scalar(LogicalExpr::Function {
                    function: SqlFunction::Replace,
                    args: operands,
                    type_mapping,
                }))
            }
            Method::Substring => {
                let mut operands = match args.len() {
                    1 | 2 => self.call_operands(target, args, args.len(), expr, env)?,
                    _ => return Err(QueryPlannerError::translation_failed(expr.to_string())),
                };
                let subject = operands.remove(0);
                let start = operands.remove(0);
                let start = match start {
                    LogicalExpr::Literal(Value::Int(v), tm) => LogicalExpr::Literal(Value::Int(v + 1), tm),
                    other => LogicalExpr::binary(
                        SqlOperator::Add,
                        other,
                        LogicalExpr::literal(Value::Int(1)),
                    ),
                };
                let length = match operands.pop() {
                    Some(length) => length,
                    None => LogicalExpr::Function {
                        function: SqlFunction::Length,
                        args: vec![subject.clone()],
                        type_mapping: TypeMapping::new(ClrType::Int32, subject.is_nullable()),
                    },
                };
                let type_mapping = subject.type_mapping();
                Ok(Bound::scalar(LogicalExpr::Function {
                    function: SqlFunction::Substring,
                    args: vec![subject, start, length],
                    type_mapping,
                }))
            }
            Method::Abs => {
                let value = match (target, args) {
                    (None, [value]) | (Some(value), []) => value,
                    _ => return Err(QueryPlannerError::translation_failed(expr.to_string())),
                };
                let bound = self.bind(value, env)?;
                let value = self.to_scalar(bound, value)?;
                let type_mapping = value.type_mapping();
                Ok(Bound::scalar(LogicalExpr::Function {
                    function: SqlFunction::Abs,
                    args: vec![value],
                    type_mapping,
                }))
            }
        }
    }

    /// Target plus `arity` arguments of an instance call, as scalars.
    fn call_operands(
        &mut self,
        target: Option<&Expr>,
        args: &[Expr],
        arity: usize,
        expr: &Expr,
        env: &Env,
    ) -> Result<Vec<LogicalExpr>, QueryPlannerError> {
        let Some(target) = target else {
            return Err(QueryPlannerError::translation_failed(expr.to_string()));
        };
        if args.len() != arity {
            return Err(QueryPlannerError::translation_failed(expr.to_string()));
        }
        let mut operands = Vec::with_capacity(arity + 1);
        for operand in std::iter::once(target).chain(args.iter()) {
            let bound = self.bind(operand, env)?;
            operands.push(self.to_scalar(bound, operand)?);
        }
        Ok(operands)
    }

    /// Calls to methods with no server translation: evaluated per row on the
    /// client when they sit in the final projection.
    fn client_call(
        &mut self,
        name: &str,
        target: Option<&Expr>,
        args: &[Expr],
        expr: &Expr,
        env: &Env,
    ) -> Result<Bound, QueryPlannerError> {
        let mut shapes = Vec::with_capacity(args.len() + 1);
        for operand in target.into_iter().chain(args.iter()) {
            match self.bind(operand, env)? {
                Bound::Shape(shape) => shapes.push(shape),
                _ => {
                    return Err(QueryPlannerError::translation_failed_with_context(
                        expr.to_string(),
                        "client methods take values, entities or anonymous objects",
                    ))
                }
            }
        }
        Ok(Bound::Shape(ProjectionShape::Client(ClientProjection {
            function: name.to_string(),
            args: shapes,
            description: expr.to_string(),
        })))
    }

    fn bind_contains(
        &mut self,
        target: Option<&Expr>,
        args: &[Expr],
        expr: &Expr,
        env: &Env,
    ) -> Result<Bound, QueryPlannerError> {
        let (collection, item) = match (target, args) {
            (Some(collection), [item]) | (None, [collection, item]) => (collection, item),
            _ => return Err(QueryPlannerError::translation_failed(expr.to_string())),
        };
        match self.bind(collection, env)? {
            Bound::List(list) => {
                let bound = self.bind(item, env)?;
                let item = self.to_scalar(bound, item)?;
                Ok(Bound::scalar(self.list_contains(list, item)))
            }
            Bound::Query(t) => Ok(Bound::scalar(self.contains_in(*t, item, env)?)),
            Bound::Shape(ProjectionShape::Scalar(subject)) if subject.type_mapping().clr == ClrType::String => {
                let bound = self.bind(item, env)?;
                let pattern = self.to_scalar(bound, item)?;
                Ok(Bound::scalar(string_contains(subject, pattern)))
            }
            other => {
                self.to_scalar(other, collection)?;
                Err(QueryPlannerError::translation_failed(expr.to_string()))
            }
        }
    }

    /// Membership in a local list. Lists bound from a parameter get one
    /// parameter per element up to the configured limit; longer or constant
    /// lists are inlined.
    pub(super) fn list_contains(&mut self, list: ListValue, item: LogicalExpr) -> LogicalExpr {
        let has_null = list.values.iter().any(Value::is_null);
        let non_null: Vec<(usize, &Value)> = list
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .collect();
        if non_null.is_empty() {
            return if has_null {
                LogicalExpr::IsNull(Box::new(item))
            } else {
                LogicalExpr::bool_literal(false)
            };
        }
        let clr = non_null
            .iter()
            .find_map(|(_, v)| v.clr_type())
            .unwrap_or(item.type_mapping().clr);
        let type_mapping = TypeMapping::non_null(clr);
        let parameterized = match &list.name {
            Some(_) => non_null.len() <= self.contains_parameter_limit,
            None => false,
        };
        if list.name.is_some() && !parameterized {
            log::debug!(
                "Normalizer: inlining {} list values (limit {})",
                non_null.len(),
                self.contains_parameter_limit
            );
        }
        let values = non_null
            .into_iter()
            .map(|(index, value)| match (&list.name, parameterized) {
                (Some(name), true) => {
                    LogicalExpr::Parameter(self.ctx.list_element_parameter(name, index, type_mapping))
                }
                _ => LogicalExpr::Literal(value.clone(), type_mapping),
            })
            .collect();
        let test = LogicalExpr::InList {
            expr: Box::new(item.clone()),
            values,
            negated: false,
        };
        if has_null {
            LogicalExpr::or(test, LogicalExpr::IsNull(Box::new(item)))
        } else {
            test
        }
    }
}

/// `StartsWith`/`EndsWith`: LIKE for constant patterns, a LEFT/RIGHT
/// comparison otherwise.
fn prefix_match(subject: LogicalExpr, pattern: LogicalExpr, starts: bool) -> LogicalExpr {
    if let LogicalExpr::Literal(Value::String(value), _) = &pattern {
        if value.is_empty() {
            return LogicalExpr::bool_literal(true);
        }
        let escaped = escape_like(value);
        let escape = (escaped != *value).then_some(LIKE_ESCAPE);
        let text = if starts {
            format!("{}%", escaped)
        } else {
            format!("%{}", escaped)
        };
        return LogicalExpr::Like {
            expr: Box::new(subject),
            pattern: Box::new(string_literal(&text)),
            escape,
        };
    }
    let length = LogicalExpr::Function {
        function: SqlFunction::Length,
        args: vec![pattern.clone()],
        type_mapping: TypeMapping::new(ClrType::Int32, pattern.is_nullable()),
    };
    let cut = LogicalExpr::Function {
        function: if starts { SqlFunction::Left } else { SqlFunction::Right },
        args: vec![subject.clone(), length],
        type_mapping: subject.type_mapping(),
    };
    let mut matched = LogicalExpr::equal(cut, pattern.clone());
    if subject.is_nullable() {
        matched = LogicalExpr::and(LogicalExpr::IsNotNull(Box::new(subject)), matched);
    }
    LogicalExpr::or(LogicalExpr::equal(pattern, string_literal("")), matched)
}

/// String `Contains`; an empty pattern matches every string.
fn string_contains(subject: LogicalExpr, pattern: LogicalExpr) -> LogicalExpr {
    if let LogicalExpr::Literal(Value::String(value), _) = &pattern {
        if value.is_empty() {
            return LogicalExpr::bool_literal(true);
        }
    }
    let guard_empty = !matches!(pattern, LogicalExpr::Literal(..));
    let test = LogicalExpr::Function {
        function: SqlFunction::StringContains,
        args: vec![subject, pattern.clone()],
        type_mapping: TypeMapping::bool(),
    };
    if guard_empty {
        LogicalExpr::or(LogicalExpr::equal(pattern, string_literal("")), test)
    } else {
        test
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_escapes_wildcards() {
        assert_eq!(escape_like("50%_off[x]"), "50\\%\\_off\\[x]");
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_constant_prefix_becomes_like() {
        let subject = LogicalExpr::literal(Value::String("x".into()));
        match prefix_match(subject, string_literal("Al"), true) {
            LogicalExpr::Like { pattern, escape, .. } => {
                assert_eq!(*pattern, string_literal("Al%"));
                assert_eq!(escape, None);
            }
            other => panic!("expected LIKE, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_prefix_is_true() {
        let subject = LogicalExpr::literal(Value::String("x".into()));
        assert_eq!(
            prefix_match(subject, string_literal(""), false),
            LogicalExpr::bool_literal(true)
        );
    }
}
