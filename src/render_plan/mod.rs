//! Relational lowering: [`QueryPlan`] to a SQL-shaped statement tree.
//!
//! The logical plan speaks in sources and shapes; the render plan speaks in
//! aliases, select lists and clauses. Lowering decides where derived tables
//! are needed (paging before a filter, DISTINCT before a join, ...), picks
//! unique aliases and fixes the result column order the materializer reads.
//! The statement tree is dialect independent; `sql_generator` prints it.

pub mod alias_resolver;
pub mod errors;
pub mod flattening;
pub mod plan_builder;
pub mod render_expr;

use serde::Serialize;

use errors::RenderBuildError;
use render_expr::{ColumnRef, OrderByItem, RenderExpr};

use crate::query::SetOperationKind;
use crate::query_planner::logical_plan::{ParameterSpec, QueryPlan, ResultCardinality};
use crate::query_planner::shape::QueryShape;


/// A translated query ready for text generation.
#[derive(Debug, PartialEq, Clone)]
pub struct RenderPlan {
    pub query: RenderQuery,
    /// Result column names, in select-list order.
    pub columns: Vec<String>,
    pub shape: QueryShape,
    pub parameters: Vec<ParameterSpec>,
    pub cardinality: ResultCardinality,
    pub tracking: bool,
}

/// Lowers an analyzed plan.
pub fn logical_plan_to_render_plan(plan: &QueryPlan) -> Result<RenderPlan, RenderBuildError> {
    let built = plan_builder::PlanBuilder::new().build(&plan.root)?;
    let query = flattening::flatten(built.query);
    log::trace!("RENDER_PLAN: {:?}", query);
    Ok(RenderPlan {
        query,
        columns: built.columns,
        shape: built.shape,
        parameters: plan.parameters.clone(),
        cardinality: plan.cardinality,
        tracking: plan.tracking,
    })
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub enum RenderQuery {
    Select(Box<SelectStatement>),
    SetOperation {
        kind: SetOperationKind,
        left: Box<RenderQuery>,
        right: Box<RenderQuery>,
    },
    /// Raw SQL sent as written.
    Verbatim(String),
}

impl RenderQuery {
    pub fn select(statement: SelectStatement) -> Self {
        RenderQuery::Select(Box::new(statement))
    }

    pub fn rewrite_columns(&mut self, f: &mut dyn FnMut(&ColumnRef) -> Option<RenderExpr>) {
        match self {
            RenderQuery::Select(s) => s.rewrite_columns(f),
            RenderQuery::SetOperation { left, right, .. } => {
                left.rewrite_columns(f);
                right.rewrite_columns(f);
            }
            RenderQuery::Verbatim(_) => {}
        }
    }

    /// Output column names of the query.
    pub fn column_names(&self) -> Vec<String> {
        match self {
            RenderQuery::Select(s) => s.select.iter().map(|i| i.alias.clone()).collect(),
            RenderQuery::SetOperation { left, .. } => left.column_names(),
            RenderQuery::Verbatim(_) => Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Default, Serialize)]
pub struct SelectStatement {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Option<TableSource>,
    pub joins: Vec<Join>,
    pub filter: Option<RenderExpr>,
    pub group_by: Vec<RenderExpr>,
    pub having: Option<RenderExpr>,
    pub order_by: Vec<OrderByItem>,
    pub offset: Option<RenderExpr>,
    pub limit: Option<RenderExpr>,
}

impl SelectStatement {
    pub fn has_paging(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }

    /// Sources and filters only: nothing that changes cardinality or
    /// column visibility beyond a WHERE.
    pub fn is_simple_filter(&self) -> bool {
        !self.distinct
            && self.joins.is_empty()
            && self.group_by.is_empty()
            && self.having.is_none()
            && self.order_by.is_empty()
            && !self.has_paging()
            && self.select.iter().all(|i| !contains_window(&i.expression))
    }

    pub fn rewrite_columns(&mut self, f: &mut dyn FnMut(&ColumnRef) -> Option<RenderExpr>) {
        for item in &mut self.select {
            item.expression.rewrite_columns(f);
        }
        if let Some(from) = &mut self.from {
            from.rewrite_columns(f);
        }
        for join in &mut self.joins {
            join.source.rewrite_columns(f);
            if let Some(on) = &mut join.on {
                on.rewrite_columns(f);
            }
        }
        for e in self
            .filter
            .iter_mut()
            .chain(self.group_by.iter_mut())
            .chain(self.having.iter_mut())
            .chain(self.offset.iter_mut())
            .chain(self.limit.iter_mut())
        {
            e.rewrite_columns(f);
        }
        for o in &mut self.order_by {
            o.expression.rewrite_columns(f);
        }
    }
}

fn contains_window(expr: &RenderExpr) -> bool {
    matches!(expr, RenderExpr::RowNumber { .. })
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct SelectItem {
    pub expression: RenderExpr,
    /// Output name; printed as `AS` only when it differs from the column.
    pub alias: String,
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub enum TableSource {
    Table {
        name: String,
        schema: Option<String>,
        alias: String,
    },
    /// Raw SQL text used as a derived table.
    Sql { sql: String, alias: String },
    Derived { query: Box<RenderQuery>, alias: String },
}

impl TableSource {
    pub fn alias(&self) -> &str {
        match self {
            TableSource::Table { alias, .. }
            | TableSource::Sql { alias, .. }
            | TableSource::Derived { alias, .. } => alias,
        }
    }

    fn rewrite_columns(&mut self, f: &mut dyn FnMut(&ColumnRef) -> Option<RenderExpr>) {
        if let TableSource::Derived { query, .. } = self {
            query.rewrite_columns(f);
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct Join {
    pub join_type: JoinType,
    pub source: TableSource,
    /// `None` only for cross joins.
    pub on: Option<RenderExpr>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}
