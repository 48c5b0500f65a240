use serde::Serialize;

use super::RenderQuery;
use crate::query::{AggregateFunction, TypeMapping, Value};
use crate::query_planner::logical_expr::{SqlFunction, SqlOperator};

/// Column of a table or derived table, by alias.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct ColumnRef {
    pub table_alias: String,
    pub column: String,
    /// Property path inside a document; `[column]` for flat columns.
    pub path: Vec<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct OrderByItem {
    pub expression: RenderExpr,
    pub order: OrderByOrder,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
pub enum OrderByOrder {
    Asc,
    Desc,
}

/// Scalar expression of a lowered statement. Unlike the logical form it
/// only names aliases that exist in the statement text.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub enum RenderExpr {
    Column(ColumnRef),
    Literal(Value, TypeMapping),
    Parameter {
        name: String,
        type_mapping: TypeMapping,
    },
    Binary {
        op: SqlOperator,
        left: Box<RenderExpr>,
        right: Box<RenderExpr>,
    },
    Not(Box<RenderExpr>),
    Negate(Box<RenderExpr>),
    IsNull(Box<RenderExpr>),
    IsNotNull(Box<RenderExpr>),
    Like {
        expr: Box<RenderExpr>,
        pattern: Box<RenderExpr>,
        escape: Option<char>,
    },
    InList {
        expr: Box<RenderExpr>,
        values: Vec<RenderExpr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<RenderExpr>,
        query: Box<RenderQuery>,
        negated: bool,
    },
    Exists {
        query: Box<RenderQuery>,
        negated: bool,
    },
    ScalarSubquery(Box<RenderQuery>),
    Function {
        function: SqlFunction,
        args: Vec<RenderExpr>,
    },
    Aggregate {
        function: AggregateFunction,
        arg: Option<Box<RenderExpr>>,
    },
    Cast {
        expr: Box<RenderExpr>,
        to: TypeMapping,
    },
    Case {
        whens: Vec<(RenderExpr, RenderExpr)>,
        else_result: Option<Box<RenderExpr>>,
    },
    /// `ROW_NUMBER() OVER(PARTITION BY .. ORDER BY ..)`
    RowNumber {
        partition_by: Vec<RenderExpr>,
        order_by: Vec<OrderByItem>,
    },
}

impl RenderExpr {
    pub fn and(left: RenderExpr, right: RenderExpr) -> RenderExpr {
        RenderExpr::Binary {
            op: SqlOperator::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn binary(op: SqlOperator, left: RenderExpr, right: RenderExpr) -> RenderExpr {
        RenderExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// AND of all parts, `None` when there are none.
    pub fn conjunction(parts: impl IntoIterator<Item = RenderExpr>) -> Option<RenderExpr> {
        parts.into_iter().reduce(RenderExpr::and)
    }

    /// True for expressions that are conditions rather than values. Dialects
    /// without a boolean type render the two differently.
    pub fn is_condition(&self) -> bool {
        match self {
            RenderExpr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            RenderExpr::Not(_)
            | RenderExpr::IsNull(_)
            | RenderExpr::IsNotNull(_)
            | RenderExpr::Like { .. }
            | RenderExpr::InList { .. }
            | RenderExpr::InSubquery { .. }
            | RenderExpr::Exists { .. } => true,
            RenderExpr::Function {
                function: SqlFunction::StringContains,
                ..
            } => true,
            _ => false,
        }
    }

    /// Applies `f` to every column reference, including those of nested
    /// statements.
    pub fn rewrite_columns(&mut self, f: &mut dyn FnMut(&ColumnRef) -> Option<RenderExpr>) {
        match self {
            RenderExpr::Column(c) => {
                if let Some(replacement) = f(c) {
                    *self = replacement;
                }
            }
            RenderExpr::Literal(..) | RenderExpr::Parameter { .. } => {}
            RenderExpr::Binary { left, right, .. } => {
                left.rewrite_columns(f);
                right.rewrite_columns(f);
            }
            RenderExpr::Not(e)
            | RenderExpr::Negate(e)
            | RenderExpr::IsNull(e)
            | RenderExpr::IsNotNull(e) => e.rewrite_columns(f),
            RenderExpr::Like { expr, pattern, .. } => {
                expr.rewrite_columns(f);
                pattern.rewrite_columns(f);
            }
            RenderExpr::InList { expr, values, .. } => {
                expr.rewrite_columns(f);
                for v in values {
                    v.rewrite_columns(f);
                }
            }
            RenderExpr::InSubquery { expr, query, .. } => {
                expr.rewrite_columns(f);
                query.rewrite_columns(f);
            }
            RenderExpr::Exists { query, .. } => query.rewrite_columns(f),
            RenderExpr::ScalarSubquery(query) => query.rewrite_columns(f),
            RenderExpr::Function { args, .. } => {
                for a in args {
                    a.rewrite_columns(f);
                }
            }
            RenderExpr::Aggregate { arg, .. } => {
                if let Some(a) = arg {
                    a.rewrite_columns(f);
                }
            }
            RenderExpr::Cast { expr, .. } => expr.rewrite_columns(f),
            RenderExpr::Case { whens, else_result } => {
                for (w, t) in whens {
                    w.rewrite_columns(f);
                    t.rewrite_columns(f);
                }
                if let Some(e) = else_result {
                    e.rewrite_columns(f);
                }
            }
            RenderExpr::RowNumber {
                partition_by,
                order_by,
            } => {
                for p in partition_by {
                    p.rewrite_columns(f);
                }
                for o in order_by {
                    o.expression.rewrite_columns(f);
                }
            }
        }
    }

    /// True when any column reference (nested statements included) uses
    /// `alias`.
    pub fn references_alias(&self, alias: &str) -> bool {
        let mut found = false;
        let mut scan = self.clone();
        scan.rewrite_columns(&mut |c| {
            if c.table_alias == alias {
                found = true;
            }
            None
        });
        found
    }
}
