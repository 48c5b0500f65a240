use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::errors::QueryPlannerError;
use super::logical_plan::LogicalPlan;
use crate::query::{AggregateFunction, ClrType, TypeMapping, Value};

/// Identity of a row source (table scan, derived set) within one translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub source: SourceId,
    /// Store column name; owned-type prefixes already applied.
    pub column: String,
    /// Property path for document stores (`["Address", "City"]`).
    pub path: Vec<String>,
    pub type_mapping: TypeMapping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRef {
    /// Name without the dialect prefix, e.g. `__p_0`.
    pub name: String,
    pub type_mapping: TypeMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SqlOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
}

impl SqlOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            SqlOperator::Equal
                | SqlOperator::NotEqual
                | SqlOperator::LessThan
                | SqlOperator::LessThanOrEqual
                | SqlOperator::GreaterThan
                | SqlOperator::GreaterThanOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, SqlOperator::And | SqlOperator::Or)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            SqlOperator::Add
                | SqlOperator::Subtract
                | SqlOperator::Multiply
                | SqlOperator::Divide
                | SqlOperator::Modulo
        )
    }

    /// Operator that yields the logical negation of this comparison for
    /// non-null operands.
    pub fn negated_comparison(self) -> Option<SqlOperator> {
        match self {
            SqlOperator::Equal => Some(SqlOperator::NotEqual),
            SqlOperator::NotEqual => Some(SqlOperator::Equal),
            SqlOperator::LessThan => Some(SqlOperator::GreaterThanOrEqual),
            SqlOperator::LessThanOrEqual => Some(SqlOperator::GreaterThan),
            SqlOperator::GreaterThan => Some(SqlOperator::LessThanOrEqual),
            SqlOperator::GreaterThanOrEqual => Some(SqlOperator::LessThan),
            _ => None,
        }
    }
}

/// Server functions; each dialect maps them to its own spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SqlFunction {
    Upper,
    Lower,
    Trim,
    Length,
    Substring,
    Replace,
    Abs,
    Coalesce,
    Left,
    Right,
    /// Boolean substring test (`CHARINDEX(p, s) > 0`, `CONTAINS(s, p)`, ...).
    StringContains,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: LogicalExpr,
    pub descending: bool,
}

impl OrderByItem {
    pub fn reversed(&self) -> OrderByItem {
        OrderByItem {
            expr: self.expr.clone(),
            descending: !self.descending,
        }
    }
}

/// Server-side scalar expression over explicit row sources.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalExpr {
    Column(ColumnRef),
    Literal(Value, TypeMapping),
    Parameter(ParameterRef),
    Binary {
        op: SqlOperator,
        left: Box<LogicalExpr>,
        right: Box<LogicalExpr>,
        type_mapping: TypeMapping,
    },
    Not(Box<LogicalExpr>),
    Negate(Box<LogicalExpr>),
    IsNull(Box<LogicalExpr>),
    IsNotNull(Box<LogicalExpr>),
    Like {
        expr: Box<LogicalExpr>,
        pattern: Box<LogicalExpr>,
        escape: Option<char>,
    },
    InList {
        expr: Box<LogicalExpr>,
        values: Vec<LogicalExpr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<LogicalExpr>,
        subquery: Arc<LogicalPlan>,
        negated: bool,
    },
    Exists {
        subquery: Arc<LogicalPlan>,
        negated: bool,
    },
    ScalarSubquery {
        subquery: Arc<LogicalPlan>,
        type_mapping: TypeMapping,
    },
    Function {
        function: SqlFunction,
        args: Vec<LogicalExpr>,
        type_mapping: TypeMapping,
    },
    Aggregate {
        function: AggregateFunction,
        arg: Option<Box<LogicalExpr>>,
        type_mapping: TypeMapping,
    },
    Cast {
        expr: Box<LogicalExpr>,
        to: TypeMapping,
    },
    Case {
        whens: Vec<(LogicalExpr, LogicalExpr)>,
        else_result: Option<Box<LogicalExpr>>,
        type_mapping: TypeMapping,
    },
    /// Content with no server translation. Never valid in a finished plan.
    ClientOnly { description: String },
}

impl LogicalExpr {
    pub fn literal(value: Value) -> Self {
        let type_mapping = match value.clr_type() {
            Some(clr) => TypeMapping::non_null(clr),
            None => TypeMapping::new(ClrType::String, true),
        };
        LogicalExpr::Literal(value, type_mapping)
    }

    pub fn bool_literal(value: bool) -> Self {
        LogicalExpr::Literal(Value::Bool(value), TypeMapping::bool())
    }

    pub fn binary(op: SqlOperator, left: LogicalExpr, right: LogicalExpr) -> Self {
        let type_mapping = if op.is_comparison() || op.is_logical() {
            TypeMapping::bool()
        } else {
            let l = left.type_mapping();
            let r = right.type_mapping();
            let clr = if op == SqlOperator::Concat {
                ClrType::String
            } else {
                ClrType::promote(l.clr, r.clr)
            };
            TypeMapping::new(clr, l.nullable || r.nullable)
        };
        LogicalExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            type_mapping,
        }
    }

    pub fn and(left: LogicalExpr, right: LogicalExpr) -> Self {
        LogicalExpr::binary(SqlOperator::And, left, right)
    }

    pub fn or(left: LogicalExpr, right: LogicalExpr) -> Self {
        LogicalExpr::binary(SqlOperator::Or, left, right)
    }

    pub fn equal(left: LogicalExpr, right: LogicalExpr) -> Self {
        LogicalExpr::binary(SqlOperator::Equal, left, right)
    }

    /// Conjunction of all predicates, `None` when empty.
    pub fn conjunction(predicates: Vec<LogicalExpr>) -> Option<LogicalExpr> {
        predicates.into_iter().reduce(LogicalExpr::and)
    }

    pub fn client_only(description: impl Into<String>) -> Self {
        LogicalExpr::ClientOnly {
            description: description.into(),
        }
    }

    pub fn type_mapping(&self) -> TypeMapping {
        match self {
            LogicalExpr::Column(c) => c.type_mapping,
            LogicalExpr::Literal(_, t) => *t,
            LogicalExpr::Parameter(p) => p.type_mapping,
            LogicalExpr::Binary { type_mapping, .. }
            | LogicalExpr::ScalarSubquery { type_mapping, .. }
            | LogicalExpr::Function { type_mapping, .. }
            | LogicalExpr::Aggregate { type_mapping, .. }
            | LogicalExpr::Case { type_mapping, .. } => *type_mapping,
            LogicalExpr::Not(inner) => TypeMapping::new(ClrType::Bool, inner.type_mapping().nullable),
            LogicalExpr::Negate(inner) => inner.type_mapping(),
            LogicalExpr::Cast { to, .. } => *to,
            LogicalExpr::IsNull(_)
            | LogicalExpr::IsNotNull(_)
            | LogicalExpr::Like { .. }
            | LogicalExpr::InList { .. }
            | LogicalExpr::InSubquery { .. }
            | LogicalExpr::Exists { .. } => TypeMapping::bool(),
            LogicalExpr::ClientOnly { .. } => TypeMapping::new(ClrType::String, true),
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            LogicalExpr::Literal(v, _) => v.is_null(),
            other => other.type_mapping().nullable,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, LogicalExpr::Literal(Value::Null, _))
    }

    /// True for expressions that are conditions rather than values.
    pub fn is_predicate(&self) -> bool {
        match self {
            LogicalExpr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            LogicalExpr::Not(inner) => inner.is_predicate() || inner.type_mapping().clr == ClrType::Bool,
            LogicalExpr::IsNull(_)
            | LogicalExpr::IsNotNull(_)
            | LogicalExpr::Like { .. }
            | LogicalExpr::InList { .. }
            | LogicalExpr::InSubquery { .. }
            | LogicalExpr::Exists { .. } => true,
            LogicalExpr::Function {
                function: SqlFunction::StringContains,
                ..
            } => true,
            _ => false,
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, LogicalExpr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// First client-only description in this expression, including nested
    /// subqueries.
    pub fn find_client_only(&self) -> Option<String> {
        let mut found: Option<String> = None;
        self.visit(&mut |e| {
            if found.is_some() {
                return;
            }
            match e {
                LogicalExpr::ClientOnly { description } => found = Some(description.clone()),
                LogicalExpr::InSubquery { subquery, .. }
                | LogicalExpr::Exists { subquery, .. }
                | LogicalExpr::ScalarSubquery { subquery, .. } => {
                    found = subquery.find_client_only();
                }
                _ => {}
            }
        });
        found
    }

    /// Source ids referenced by columns, not descending into subqueries.
    pub fn referenced_sources(&self) -> Vec<SourceId> {
        let mut sources = Vec::new();
        self.visit(&mut |e| {
            if let LogicalExpr::Column(c) = e {
                if !sources.contains(&c.source) {
                    sources.push(c.source);
                }
            }
        });
        sources
    }

    /// Pre-order walk over this expression. Subquery plans are not entered.
    pub fn visit(&self, f: &mut dyn FnMut(&LogicalExpr)) {
        f(self);
        match self {
            LogicalExpr::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            LogicalExpr::Not(inner)
            | LogicalExpr::Negate(inner)
            | LogicalExpr::IsNull(inner)
            | LogicalExpr::IsNotNull(inner) => inner.visit(f),
            LogicalExpr::Like { expr, pattern, .. } => {
                expr.visit(f);
                pattern.visit(f);
            }
            LogicalExpr::InList { expr, values, .. } => {
                expr.visit(f);
                for v in values {
                    v.visit(f);
                }
            }
            LogicalExpr::InSubquery { expr, .. } => expr.visit(f),
            LogicalExpr::Function { args, .. } => {
                for a in args {
                    a.visit(f);
                }
            }
            LogicalExpr::Aggregate { arg, .. } => {
                if let Some(a) = arg {
                    a.visit(f);
                }
            }
            LogicalExpr::Cast { expr, .. } => expr.visit(f),
            LogicalExpr::Case {
                whens, else_result, ..
            } => {
                for (w, t) in whens {
                    w.visit(f);
                    t.visit(f);
                }
                if let Some(e) = else_result {
                    e.visit(f);
                }
            }
            LogicalExpr::Column(_)
            | LogicalExpr::Literal(..)
            | LogicalExpr::Parameter(_)
            | LogicalExpr::Exists { .. }
            | LogicalExpr::ScalarSubquery { .. }
            | LogicalExpr::ClientOnly { .. } => {}
        }
    }

    /// Rebuilds the expression with `f` applied to each direct child.
    /// Subquery plans are not children.
    pub fn map_children(
        self,
        f: &mut dyn FnMut(LogicalExpr) -> Result<LogicalExpr, QueryPlannerError>,
    ) -> Result<LogicalExpr, QueryPlannerError> {
        Ok(match self {
            LogicalExpr::Binary {
                op,
                left,
                right,
                type_mapping,
            } => LogicalExpr::Binary {
                op,
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
                type_mapping,
            },
            LogicalExpr::Not(inner) => LogicalExpr::Not(Box::new(f(*inner)?)),
            LogicalExpr::Negate(inner) => LogicalExpr::Negate(Box::new(f(*inner)?)),
            LogicalExpr::IsNull(inner) => LogicalExpr::IsNull(Box::new(f(*inner)?)),
            LogicalExpr::IsNotNull(inner) => LogicalExpr::IsNotNull(Box::new(f(*inner)?)),
            LogicalExpr::Like {
                expr,
                pattern,
                escape,
            } => LogicalExpr::Like {
                expr: Box::new(f(*expr)?),
                pattern: Box::new(f(*pattern)?),
                escape,
            },
            LogicalExpr::InList {
                expr,
                values,
                negated,
            } => LogicalExpr::InList {
                expr: Box::new(f(*expr)?),
                values: values.into_iter().map(&mut *f).collect::<Result<Vec<_>, _>>()?,
                negated,
            },
            LogicalExpr::InSubquery {
                expr,
                subquery,
                negated,
            } => LogicalExpr::InSubquery {
                expr: Box::new(f(*expr)?),
                subquery,
                negated,
            },
            LogicalExpr::Function {
                function,
                args,
                type_mapping,
            } => LogicalExpr::Function {
                function,
                args: args.into_iter().map(&mut *f).collect::<Result<Vec<_>, _>>()?,
                type_mapping,
            },
            LogicalExpr::Aggregate {
                function,
                arg,
                type_mapping,
            } => LogicalExpr::Aggregate {
                function,
                arg: match arg {
                    Some(a) => Some(Box::new(f(*a)?)),
                    None => None,
                },
                type_mapping,
            },
            LogicalExpr::Cast { expr, to } => LogicalExpr::Cast {
                expr: Box::new(f(*expr)?),
                to,
            },
            LogicalExpr::Case {
                whens,
                else_result,
                type_mapping,
            } => {
                let mut new_whens = Vec::with_capacity(whens.len());
                for (w, t) in whens {
                    new_whens.push((f(w)?, f(t)?));
                }
                LogicalExpr::Case {
                    whens: new_whens,
                    else_result: match else_result {
                        Some(e) => Some(Box::new(f(*e)?)),
                        None => None,
                    },
                    type_mapping,
                }
            }
            leaf => leaf,
        })
    }

    /// Rebuilds the expression bottom-up, applying `f` to every node after its
    /// children. Subquery plans are left to `f`.
    pub fn transform_up(
        self,
        f: &mut dyn FnMut(LogicalExpr) -> Result<LogicalExpr, QueryPlannerError>,
    ) -> Result<LogicalExpr, QueryPlannerError> {
        let rebuilt = self.map_children(&mut |child| child.transform_up(f))?;
        f(rebuilt)
    }

    /// Marks every column reference as nullable (the source became the
    /// optional side of an outer join).
    pub fn into_nullable(self) -> LogicalExpr {
        let mut mark = |e: LogicalExpr| -> Result<LogicalExpr, QueryPlannerError> {
            Ok(match e {
                LogicalExpr::Column(mut c) => {
                    c.type_mapping.nullable = true;
                    LogicalExpr::Column(c)
                }
                LogicalExpr::Binary {
                    op,
                    left,
                    right,
                    type_mapping,
                } if !op.is_comparison() && !op.is_logical() => {
                    let nullable = left.is_nullable() || right.is_nullable();
                    LogicalExpr::Binary {
                        op,
                        left,
                        right,
                        type_mapping: type_mapping.with_nullable(nullable),
                    }
                }
                other => other,
            })
        };
        let original = self.clone();
        self.transform_up(&mut mark).unwrap_or(original)
    }
}

impl fmt::Display for LogicalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalExpr::Column(c) => write!(f, "{}.{}", c.source, c.column),
            LogicalExpr::Literal(v, _) => write!(f, "{}", v),
            LogicalExpr::Parameter(p) => write!(f, "@{}", p.name),
            LogicalExpr::Binary { op, left, right, .. } => write!(f, "({} {:?} {})", left, op, right),
            LogicalExpr::Not(inner) => write!(f, "NOT {}", inner),
            LogicalExpr::Negate(inner) => write!(f, "-{}", inner),
            LogicalExpr::IsNull(inner) => write!(f, "{} IS NULL", inner),
            LogicalExpr::IsNotNull(inner) => write!(f, "{} IS NOT NULL", inner),
            LogicalExpr::Like { expr, pattern, .. } => write!(f, "{} LIKE {}", expr, pattern),
            LogicalExpr::InList { expr, values, negated } => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{} {}IN ({})", expr, not, items.join(", "))
            }
            LogicalExpr::InSubquery { expr, negated, .. } => {
                write!(f, "{} {}IN (subquery)", expr, if *negated { "NOT " } else { "" })
            }
            LogicalExpr::Exists { negated, .. } => {
                write!(f, "{}EXISTS (subquery)", if *negated { "NOT " } else { "" })
            }
            LogicalExpr::ScalarSubquery { .. } => write!(f, "(scalar subquery)"),
            LogicalExpr::Function { function, args, .. } => {
                let items: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{:?}({})", function, items.join(", "))
            }
            LogicalExpr::Aggregate { function, arg, .. } => match arg {
                Some(a) => write!(f, "{}({})", function.name(), a),
                None => write!(f, "{}(*)", function.name()),
            },
            LogicalExpr::Cast { expr, to } => write!(f, "CAST({} AS {})", expr, to.clr),
            LogicalExpr::Case { .. } => write!(f, "CASE ... END"),
            LogicalExpr::ClientOnly { description } => write!(f, "client({})", description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, clr: ClrType, nullable: bool) -> LogicalExpr {
        LogicalExpr::Column(ColumnRef {
            source: SourceId(0),
            column: name.to_string(),
            path: vec![name.to_string()],
            type_mapping: TypeMapping::new(clr, nullable),
        })
    }

    #[test]
    fn test_binary_arithmetic_promotes_type() {
        let e = LogicalExpr::binary(
            SqlOperator::Multiply,
            column("Quantity", ClrType::Int16, false),
            LogicalExpr::literal(Value::Decimal(2.09)),
        );
        assert_eq!(e.type_mapping(), TypeMapping::non_null(ClrType::Decimal));
    }

    #[test]
    fn test_comparison_is_predicate() {
        let e = LogicalExpr::equal(
            column("City", ClrType::String, true),
            LogicalExpr::literal(Value::from("London")),
        );
        assert!(e.is_predicate());
        assert!(!column("Discontinued", ClrType::Bool, false).is_predicate());
    }

    #[test]
    fn test_find_client_only() {
        let e = LogicalExpr::and(
            column("A", ClrType::Bool, false),
            LogicalExpr::client_only("c.IsLondon"),
        );
        assert_eq!(e.find_client_only(), Some("c.IsLondon".to_string()));
    }

    #[test]
    fn test_into_nullable_marks_columns() {
        let e = column("City", ClrType::String, false).into_nullable();
        assert!(e.is_nullable());
    }

    #[test]
    fn test_conjunction_of_empty_is_none() {
        assert!(LogicalExpr::conjunction(vec![]).is_none());
    }
}
