//! C#-like textual rendering of expression trees, used in error messages
//! and log output.

use std::fmt;

use super::expr::{BinaryOp, Expr, Lambda, Method, UnaryOp};
use super::queryable::QueryExpr;
use super::value::Value;

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::LessThan => "<",
        BinaryOp::LessThanOrEqual => "<=",
        BinaryOp::GreaterThan => ">",
        BinaryOp::GreaterThanOrEqual => ">=",
        BinaryOp::AndAlso => "&&",
        BinaryOp::OrElse => "||",
        BinaryOp::Coalesce => "??",
    }
}

fn write_constant(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "\"{}\"", s),
        Value::List(items) => {
            write!(f, "new [] {{ ")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_constant(f, item)?;
            }
            write!(f, " }}")
        }
        other => write!(f, "{}", other),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write_constant(f, v),
            Expr::Parameter(name) => write!(f, "__{}", name),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::Member { target, member } => write!(f, "{}.{}", target, member),
            Expr::Binary { op, left, right } => {
                write!(f, "{} {} {}", left, binary_symbol(*op), right)
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!({})", operand),
                UnaryOp::Negate => write!(f, "-({})", operand),
            },
            Expr::Convert { operand, to } => write!(f, "({}){}", to, operand),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "{} ? {} : {}", test, if_true, if_false),
            Expr::Call {
                method,
                target,
                args,
            } => {
                if let Some(target) = target {
                    write!(f, "{}.", target)?;
                }
                let name = match method {
                    Method::Client(name) => name.as_str(),
                    other => other.name(),
                };
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::New(members) => {
                write!(f, "new {{ ")?;
                for (i, (name, expr)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, expr)?;
                }
                write!(f, " }}")
            }
            Expr::Query(query) => write!(f, "{}", query),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.len() == 1 {
            write!(f, "{} => {}", self.params[0], self.body)
        } else {
            write!(f, "({}) => {}", self.params.join(", "), self.body)
        }
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.operator_name();
        match self {
            QueryExpr::Set { entity } => write!(f, "DbSet<{}>()", entity),
            QueryExpr::FromSql { entity, sql } => write!(f, "DbSet<{}>().FromSql(\"{}\")", entity, sql),
            QueryExpr::Collection(expr) => write!(f, "{}", expr),
            QueryExpr::Where { source, predicate } => write!(f, "{}.{}({})", source, name, predicate),
            QueryExpr::Select { source, selector } => write!(f, "{}.{}({})", source, name, selector),
            QueryExpr::SelectMany {
                source,
                collection,
                result,
            } => match result {
                Some(result) => write!(f, "{}.{}({}, {})", source, name, collection, result),
                None => write!(f, "{}.{}({})", source, name, collection),
            },
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
                ..
            } => write!(
                f,
                "{}.{}({}, {}, {}, {})",
                outer, name, inner, outer_key, inner_key, result
            ),
            QueryExpr::OrderBy { source, key, .. } | QueryExpr::ThenBy { source, key, .. } => {
                write!(f, "{}.{}({})", source, name, key)
            }
            QueryExpr::GroupBy { source, key, element } => match element {
                Some(element) => write!(f, "{}.{}({}, {})", source, name, key, element),
                None => write!(f, "{}.{}({})", source, name, key),
            },
            QueryExpr::Distinct { source }
            | QueryExpr::IgnoreQueryFilters { source }
            | QueryExpr::AsNoTracking { source } => write!(f, "{}.{}()", source, name),
            QueryExpr::Skip { source, count } | QueryExpr::Take { source, count } => {
                write!(f, "{}.{}({})", source, name, count)
            }
            QueryExpr::SetOperation { left, right, .. } => write!(f, "{}.{}({})", left, name, right),
            QueryExpr::Include { source, navigation } => {
                write!(f, "{}.{}(\"{}\")", source, name, navigation.join("."))
            }
            QueryExpr::Aggregate {
                source, selector, ..
            } => match selector {
                Some(selector) => write!(f, "{}.{}({})", source, name, selector),
                None => write!(f, "{}.{}()", source, name),
            },
            QueryExpr::Any { source, predicate } | QueryExpr::Element { source, predicate, .. } => {
                match predicate {
                    Some(predicate) => write!(f, "{}.{}({})", source, name, predicate),
                    None => write!(f, "{}.{}()", source, name),
                }
            }
            QueryExpr::All { source, predicate } => write!(f, "{}.{}({})", source, name, predicate),
            QueryExpr::Contains { source, item } => write!(f, "{}.{}({})", source, name, item),
        }
    }
}
