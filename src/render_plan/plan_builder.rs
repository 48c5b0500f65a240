//! Lowers a logical plan into a [`RenderQuery`].
//!
//! The plan is walked bottom-up while one [`Statement`] is being filled in.
//! An operator that cannot be expressed in the statement built so far
//! (a filter after paging, a projection after `DISTINCT`, a second `TAKE`)
//! seals that statement into a derived table and continues in a new one
//! selecting from it. Orderings and projections stay logical until the
//! statement is sealed, so they can be re-resolved through derived tables.

use std::collections::HashSet;
use std::sync::Arc;

use super::alias_resolver::{resolve_in, same_value_form, AliasGenerator, Scope};
use super::errors::RenderBuildError;
use super::render_expr::{ColumnRef, OrderByItem as RenderOrderByItem, OrderByOrder, RenderExpr};
use super::{Join, JoinType, RenderQuery, SelectItem, SelectStatement, TableSource};
use crate::query::{ClrType, TypeMapping, Value};
use crate::query_planner::logical_expr::{
    ColumnRef as LogicalColumn, LogicalExpr, OrderByItem, SqlOperator,
};
use crate::query_planner::logical_plan::{
    CollectionJoin, JoinType as LogicalJoinType, LogicalPlan, Scan, ScanSource, SetOperation,
};
use crate::query_planner::shape::{ProjectionShape, QueryShape};

type BuildResult<T> = Result<T, RenderBuildError>;

/// Leaf expressions with the member name they are projected under.
type Leaves = Vec<(Option<String>, LogicalExpr)>;

/// Output of lowering the root plan.
#[derive(Debug)]
pub struct Built {
    pub query: RenderQuery,
    pub columns: Vec<String>,
    pub shape: QueryShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SealMode {
    /// The outermost statement; keeps its full ordering.
    Top,
    /// A derived table; ordering only survives with paging.
    Derived,
    /// `EXISTS`, `IN` or scalar subquery.
    Subquery,
    /// One operand of a set operation; leaves are never deduplicated so
    /// both sides keep the same column count.
    SetSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubqueryKind {
    Exists,
    Values,
    Scalar,
}

/// The statement under construction.
#[derive(Debug)]
struct Statement {
    from: Option<TableSource>,
    joins: Vec<Join>,
    filter: Vec<RenderExpr>,
    having: Vec<RenderExpr>,
    grouping: Option<Vec<LogicalExpr>>,
    distinct: bool,
    ordering: Vec<OrderByItem>,
    /// Row-grouping orderings added by collection joins; they follow the
    /// user ordering.
    trailing: Vec<OrderByItem>,
    offset: Option<RenderExpr>,
    limit: Option<RenderExpr>,
    aggregated: bool,
    shape: ProjectionShape,
    scope: Scope,
}

impl Statement {
    fn new(shape: ProjectionShape) -> Self {
        Statement {
            from: None,
            joins: Vec::new(),
            filter: Vec::new(),
            having: Vec::new(),
            grouping: None,
            distinct: false,
            ordering: Vec::new(),
            trailing: Vec::new(),
            offset: None,
            limit: None,
            aggregated: false,
            shape,
            scope: Scope::new(),
        }
    }

    fn is_paged(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }

    /// Anything that changes which rows later operators see.
    fn is_closed(&self) -> bool {
        self.is_paged() || self.distinct || self.aggregated || self.grouping.is_some()
    }

    /// A single table with optional filters, joinable without a derived table.
    fn is_plain_source(&self) -> bool {
        self.joins.is_empty()
            && !self.is_closed()
            && matches!(self.from, Some(TableSource::Table { .. }) | Some(TableSource::Sql { .. }))
    }
}

struct Sealed {
    statement: SelectStatement,
    /// Select-list position of every requested leaf.
    slots: Vec<usize>,
}

pub struct PlanBuilder {
    aliases: AliasGenerator,
    /// Scopes of the statements enclosing the subquery being lowered.
    outer: Vec<Scope>,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        PlanBuilder {
            aliases: AliasGenerator::new(),
            outer: Vec::new(),
        }
    }

    pub fn build(mut self, root: &LogicalPlan) -> BuildResult<Built> {
        if let Some(built) = verbatim(root)? {
            return Ok(built);
        }
        let statement = self.lower(root)?;
        let shape = statement.shape.clone();
        let leaves = owned_leaves(&shape);
        let sealed = self.seal(statement, &leaves, SealMode::Top)?;
        let keys: Vec<LogicalExpr> = leaves.iter().map(|(_, e)| same_value_form(e)).collect();
        let slots = &sealed.slots;
        let query_shape = shape
            .to_query_shape(&mut |e| {
                let key = same_value_form(e);
                keys.iter().position(|k| *k == key).map(|i| slots[i])
            })
            .map_err(|e| RenderBuildError::Shape(e.to_string()))?;
        let columns = sealed.statement.select.iter().map(|i| i.alias.clone()).collect();
        Ok(Built {
            query: RenderQuery::select(sealed.statement),
            columns,
            shape: query_shape,
        })
    }

    fn lower(&mut self, plan: &LogicalPlan) -> BuildResult<Statement> {
        match plan {
            LogicalPlan::Empty => Ok(Statement::new(ProjectionShape::Composite(Vec::new()))),
            LogicalPlan::Scan(scan) => Ok(self.lower_scan(scan)),
            LogicalPlan::Filter(filter) => {
                let mut st = self.lower(&filter.input)?;
                if st.is_paged() || st.distinct || st.aggregated {
                    st = self.push_down(st)?;
                }
                let predicate = self.render(&filter.predicate, &st.scope)?;
                if st.grouping.is_some() {
                    st.having.push(predicate);
                } else {
                    st.filter.push(predicate);
                }
                Ok(st)
            }
            LogicalPlan::Projection(projection) => {
                let mut st = self.lower(&projection.input)?;
                if st.distinct || st.aggregated {
                    st = self.push_down(st)?;
                }
                st.shape = projection.shape.clone();
                Ok(st)
            }
            LogicalPlan::Join(join) => {
                let mut st = self.lower(&join.left)?;
                if st.is_closed() {
                    st = self.push_down(st)?;
                }
                let right = self.lower(&join.right)?;
                let (source, right_filter, scope) = self.joined_source(right)?;
                st.scope.merge(scope);
                let condition = match &join.condition {
                    Some(condition) => Some(self.render(condition, &st.scope)?),
                    None => None,
                };
                let (join_type, on) = match join.join_type {
                    LogicalJoinType::Cross => {
                        st.filter.extend(right_filter);
                        (JoinType::Cross, None)
                    }
                    LogicalJoinType::Inner | LogicalJoinType::Left => {
                        let on = RenderExpr::conjunction(condition.into_iter().chain(right_filter))
                            .ok_or_else(|| RenderBuildError::unsupported("join without a condition"))?;
                        let join_type = if join.join_type == LogicalJoinType::Left {
                            JoinType::Left
                        } else {
                            JoinType::Inner
                        };
                        (join_type, Some(on))
                    }
                };
                st.joins.push(Join {
                    join_type,
                    source,
                    on,
                });
                st.shape = join.shape.clone();
                Ok(st)
            }
            LogicalPlan::CollectionJoin(collection) => self.lower_collection_join(collection),
            LogicalPlan::GroupBy(group_by) => {
                let mut st = self.lower(&group_by.input)?;
                if st.is_closed() {
                    st = self.push_down(st)?;
                }
                st.ordering.clear();
                st.trailing.clear();
                st.grouping = Some(group_by.keys.clone());
                st.shape = group_by.shape.clone();
                Ok(st)
            }
            LogicalPlan::Aggregate(aggregate) => {
                let mut st = self.lower(&aggregate.input)?;
                if st.is_closed() {
                    st = self.push_down(st)?;
                }
                st.ordering.clear();
                st.trailing.clear();
                st.shape = aggregate.shape.clone();
                st.aggregated = true;
                Ok(st)
            }
            LogicalPlan::OrderBy(order_by) => {
                let mut st = self.lower(&order_by.input)?;
                if st.is_paged() || st.distinct {
                    st = self.push_down(st)?;
                }
                if !order_by.append {
                    st.ordering.clear();
                }
                st.ordering.extend(order_by.items.iter().cloned());
                Ok(st)
            }
            LogicalPlan::Skip(skip) => {
                let mut st = self.lower(&skip.input)?;
                if st.is_paged() {
                    st = self.push_down(st)?;
                }
                st.offset = Some(self.render(&skip.count, &st.scope)?);
                Ok(st)
            }
            LogicalPlan::Limit(limit) => {
                let mut st = self.lower(&limit.input)?;
                if st.limit.is_some() {
                    st = self.push_down(st)?;
                }
                st.limit = Some(self.render(&limit.count, &st.scope)?);
                Ok(st)
            }
            LogicalPlan::Distinct(distinct) => {
                let mut st = self.lower(&distinct.input)?;
                if st.is_paged() {
                    st = self.push_down(st)?;
                }
                st.ordering.clear();
                st.distinct = true;
                Ok(st)
            }
            LogicalPlan::SetOperation(set) => self.lower_set_operation(set),
        }
    }

    fn lower_scan(&mut self, scan: &Scan) -> Statement {
        let alias = self.aliases.next(&scan.alias_hint);
        let from = match &scan.table {
            ScanSource::Table { name, schema } => TableSource::Table {
                name: name.clone(),
                schema: schema.clone(),
                alias: alias.clone(),
            },
            ScanSource::Sql { sql, .. } => TableSource::Sql {
                sql: sql.clone(),
                alias: alias.clone(),
            },
        };
        let mut st = Statement::new(scan.shape.clone());
        st.from = Some(from);
        st.scope.bind_table(scan.source, &alias);
        st
    }

    /// The right side of a join: the table itself when it is a plain
    /// source (its filters move to the join condition), a derived table
    /// otherwise.
    fn joined_source(&mut self, right: Statement) -> BuildResult<(TableSource, Vec<RenderExpr>, Scope)> {
        if right.is_plain_source() {
            let Statement {
                from, filter, scope, ..
            } = right;
            let from = from.ok_or_else(|| RenderBuildError::InvalidRenderPlan("join source without a table".to_string()))?;
            return Ok((from, filter, scope));
        }
        let leaves = owned_leaves(&right.shape);
        let sealed = self.seal(right, &leaves, SealMode::Derived)?;
        let alias = self.aliases.next("t");
        let scope = bind_leaves(&alias, &leaves, &sealed);
        Ok((derived(sealed.statement, alias), Vec::new(), scope))
    }

    /// `LEFT JOIN` of a collection, ordered so each parent's elements are
    /// contiguous in the result.
    fn lower_collection_join(&mut self, collection: &CollectionJoin) -> BuildResult<Statement> {
        let mut st = self.lower(&collection.input)?;
        if st.is_closed() {
            st = self.push_down(st)?;
        }
        let inner = self.lower(&collection.collection)?;
        let inner_trailing = inner.trailing.clone();
        let (source, mut extra, scope) = if collection.window.is_none() && inner.is_plain_source() {
            self.joined_source(inner)?
        } else {
            self.collection_table(inner, collection)?
        };
        st.scope.merge(scope);

        let mut on = Vec::with_capacity(collection.outer_key.len() + extra.len());
        for (outer, inner) in collection.outer_key.iter().zip(&collection.inner_key) {
            on.push(RenderExpr::binary(
                SqlOperator::Equal,
                self.render(outer, &st.scope)?,
                self.render(inner, &st.scope)?,
            ));
        }
        on.append(&mut extra);
        let on = RenderExpr::conjunction(on)
            .ok_or_else(|| RenderBuildError::unsupported("collection join without a correlation key"))?;
        st.joins.push(Join {
            join_type: JoinType::Left,
            source,
            on: Some(on),
        });

        st.trailing.extend(collection.parent_key.iter().map(ascending));
        st.trailing.extend(collection.ordering.iter().cloned());
        st.trailing.extend(collection.element_key.iter().map(ascending));
        st.trailing.extend(inner_trailing);
        st.shape = collection.shape.clone();
        Ok(st)
    }

    /// Collection as a derived table. A row window numbers the elements per
    /// parent and the join keeps the rows inside it.
    fn collection_table(
        &mut self,
        inner: Statement,
        collection: &CollectionJoin,
    ) -> BuildResult<(TableSource, Vec<RenderExpr>, Scope)> {
        let mut leaves = owned_leaves(&inner.shape);
        leaves.extend(collection.inner_key.iter().map(|k| (None, k.clone())));
        leaves.extend(collection.element_key.iter().map(|k| (None, k.clone())));
        leaves.extend(
            collection
                .ordering
                .iter()
                .chain(&inner.trailing)
                .map(|o| (None, o.expr.clone())),
        );

        let row_number = match &collection.window {
            Some(window) => {
                let mut partition_by = Vec::with_capacity(collection.inner_key.len());
                for key in &collection.inner_key {
                    partition_by.push(self.render(key, &inner.scope)?);
                }
                let order_by = self.render_ordering(&window.ordering, &inner.scope)?;
                Some((
                    RenderExpr::RowNumber {
                        partition_by,
                        order_by,
                    },
                    window,
                ))
            }
            None => None,
        };

        let mut sealed = self.seal(inner, &leaves, SealMode::Derived)?;
        let alias = self.aliases.next("t");
        let mut extra = Vec::new();
        if let Some((row_number, window)) = row_number {
            let mut used: HashSet<String> = sealed.statement.select.iter().map(|i| i.alias.clone()).collect();
            let name = unique_name(&mut used, "row");
            sealed.statement.select.push(SelectItem {
                expression: row_number,
                alias: name.clone(),
            });
            let row = RenderExpr::Column(ColumnRef {
                table_alias: alias.clone(),
                column: name.clone(),
                path: vec![name],
            });
            let empty = Scope::new();
            let skip = match &window.skip {
                Some(skip) => Some(self.render(skip, &empty)?),
                None => None,
            };
            if let Some(skip) = &skip {
                extra.push(RenderExpr::binary(SqlOperator::GreaterThan, row.clone(), skip.clone()));
            }
            if let Some(take) = &window.take {
                let take = self.render(take, &empty)?;
                let upper = match skip {
                    Some(skip) => RenderExpr::binary(SqlOperator::Add, skip, take),
                    None => take,
                };
                extra.push(RenderExpr::binary(SqlOperator::LessThanOrEqual, row, upper));
            }
        }
        let scope = bind_leaves(&alias, &leaves, &sealed);
        Ok((derived(sealed.statement, alias), extra, scope))
    }

    fn lower_set_operation(&mut self, set: &SetOperation) -> BuildResult<Statement> {
        let left = self.set_side(&set.left)?;
        let right = self.set_side(&set.right)?;
        let leaves = owned_leaves(&set.shape);
        if left.select.len() != right.select.len() {
            return Err(RenderBuildError::unsupported(format!(
                "{} operands project different column counts",
                set.kind.name()
            )));
        }
        let names: Vec<String> = left.select.iter().map(|i| i.alias.clone()).collect();
        let query = RenderQuery::SetOperation {
            kind: set.kind,
            left: Box::new(RenderQuery::select(left)),
            right: Box::new(RenderQuery::select(right)),
        };
        let alias = self.aliases.next("t");
        let mut st = Statement::new(set.shape.clone());
        for ((_, leaf), name) in leaves.iter().zip(&names) {
            st.scope.bind_projected(&alias, name, leaf);
        }
        st.from = Some(TableSource::Derived {
            query: Box::new(query),
            alias,
        });
        Ok(st)
    }

    fn set_side(&mut self, plan: &Arc<LogicalPlan>) -> BuildResult<SelectStatement> {
        let mut st = self.lower(plan)?;
        if st.is_paged() {
            st = self.push_down(st)?;
        }
        st.ordering.clear();
        let leaves = owned_leaves(&st.shape);
        Ok(self.seal(st, &leaves, SealMode::SetSide)?.statement)
    }

    /// Seals `st` into a derived table and starts a statement over it.
    fn push_down(&mut self, mut st: Statement) -> BuildResult<Statement> {
        if st.grouping.is_some() {
            if let ProjectionShape::Grouping { key, .. } = &st.shape {
                st.shape = (**key).clone();
            }
        }
        let shape = st.shape.clone();
        let ordering = st.ordering.clone();
        let trailing = st.trailing.clone();
        let mut leaves = owned_leaves(&shape);
        leaves.extend(ordering.iter().chain(&trailing).map(|o| (None, o.expr.clone())));
        let sealed = self.seal(st, &leaves, SealMode::Derived)?;
        let alias = self.aliases.next("t");
        log::debug!("PlanBuilder: pushing statement down into derived table {}", alias);
        let mut outer = Statement::new(shape);
        outer.scope = bind_leaves(&alias, &leaves, &sealed);
        outer.from = Some(derived(sealed.statement, alias));
        outer.ordering = ordering;
        outer.trailing = trailing;
        Ok(outer)
    }

    fn seal(&mut self, st: Statement, leaves: &[(Option<String>, LogicalExpr)], mode: SealMode) -> BuildResult<Sealed> {
        let Statement {
            from,
            joins,
            filter,
            having,
            grouping,
            distinct,
            ordering,
            trailing,
            offset,
            limit,
            shape,
            scope,
            ..
        } = st;

        let mut select: Vec<SelectItem> = Vec::with_capacity(leaves.len());
        let mut seen: Vec<LogicalExpr> = Vec::with_capacity(leaves.len());
        let mut used = HashSet::new();
        let mut slots = Vec::with_capacity(leaves.len());
        for (name, leaf) in leaves {
            let key = same_value_form(leaf);
            if mode != SealMode::SetSide {
                if let Some(existing) = seen.iter().position(|s| *s == key) {
                    slots.push(existing);
                    continue;
                }
            }
            let expression = self.render(leaf, &scope)?;
            let alias = if mode == SealMode::Subquery {
                String::new()
            } else {
                unique_name(&mut used, &leaf_name(name.as_deref(), leaf))
            };
            slots.push(select.len());
            seen.push(key);
            select.push(SelectItem { expression, alias });
        }
        if select.is_empty() {
            select.push(SelectItem {
                expression: RenderExpr::Literal(Value::Int(1), TypeMapping::non_null(ClrType::Int32)),
                alias: if mode == SealMode::Subquery {
                    String::new()
                } else {
                    "c".to_string()
                },
            });
        }

        let mut order_items = ordering;
        let mut group_by = Vec::new();
        if let Some(keys) = &grouping {
            if matches!(shape, ProjectionShape::Grouping { .. }) {
                if mode != SealMode::Top {
                    return Err(RenderBuildError::unsupported(
                        "groups can only be materialized by the outermost query",
                    ));
                }
                if !having.is_empty() {
                    return Err(RenderBuildError::unsupported(
                        "filtering materialized groups on an aggregate",
                    ));
                }
                order_items.extend(keys.iter().map(ascending));
            } else {
                for key in keys {
                    group_by.push(self.render(key, &scope)?);
                }
            }
        }
        let paged = offset.is_some() || limit.is_some();
        let order_by = if mode == SealMode::Top || paged {
            if mode == SealMode::Top {
                order_items.extend(trailing);
            }
            let items = dedupe_ordering(order_items);
            self.render_ordering(&items, &scope)?
        } else {
            Vec::new()
        };

        Ok(Sealed {
            statement: SelectStatement {
                distinct,
                select,
                from,
                joins,
                filter: RenderExpr::conjunction(filter),
                group_by,
                having: RenderExpr::conjunction(having),
                order_by,
                offset,
                limit,
            },
            slots,
        })
    }

    fn render_ordering(&mut self, items: &[OrderByItem], scope: &Scope) -> BuildResult<Vec<RenderOrderByItem>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(RenderOrderByItem {
                expression: self.render(&item.expr, scope)?,
                order: if item.descending {
                    OrderByOrder::Desc
                } else {
                    OrderByOrder::Asc
                },
            });
        }
        Ok(out)
    }

    fn render(&mut self, expr: &LogicalExpr, scope: &Scope) -> BuildResult<RenderExpr> {
        if !matches!(
            expr,
            LogicalExpr::Column(_) | LogicalExpr::Literal(..) | LogicalExpr::Parameter(_)
        ) {
            if let Some(found) = scope.resolve_computed(expr) {
                return Ok(found);
            }
        }
        Ok(match expr {
            LogicalExpr::Column(column) => self.resolve(column, scope)?,
            LogicalExpr::Literal(value, type_mapping) => RenderExpr::Literal(value.clone(), *type_mapping),
            LogicalExpr::Parameter(p) => RenderExpr::Parameter {
                name: p.name.clone(),
                type_mapping: p.type_mapping,
            },
            LogicalExpr::Binary { op, left, right, .. } => {
                RenderExpr::binary(*op, self.render(left, scope)?, self.render(right, scope)?)
            }
            LogicalExpr::Not(inner) => RenderExpr::Not(Box::new(self.render(inner, scope)?)),
            LogicalExpr::Negate(inner) => RenderExpr::Negate(Box::new(self.render(inner, scope)?)),
            LogicalExpr::IsNull(inner) => RenderExpr::IsNull(Box::new(self.render(inner, scope)?)),
            LogicalExpr::IsNotNull(inner) => RenderExpr::IsNotNull(Box::new(self.render(inner, scope)?)),
            LogicalExpr::Like { expr, pattern, escape } => RenderExpr::Like {
                expr: Box::new(self.render(expr, scope)?),
                pattern: Box::new(self.render(pattern, scope)?),
                escape: *escape,
            },
            LogicalExpr::InList { expr, values, negated } => {
                let expr = self.render(expr, scope)?;
                let mut rendered = Vec::with_capacity(values.len());
                for v in values {
                    rendered.push(self.render(v, scope)?);
                }
                RenderExpr::InList {
                    expr: Box::new(expr),
                    values: rendered,
                    negated: *negated,
                }
            }
            LogicalExpr::InSubquery { expr, subquery, negated } => {
                let expr = self.render(expr, scope)?;
                let query = self.subquery(subquery, scope, SubqueryKind::Values)?;
                RenderExpr::InSubquery {
                    expr: Box::new(expr),
                    query: Box::new(query),
                    negated: *negated,
                }
            }
            LogicalExpr::Exists { subquery, negated } => RenderExpr::Exists {
                query: Box::new(self.subquery(subquery, scope, SubqueryKind::Exists)?),
                negated: *negated,
            },
            LogicalExpr::ScalarSubquery { subquery, .. } => {
                RenderExpr::ScalarSubquery(Box::new(self.subquery(subquery, scope, SubqueryKind::Scalar)?))
            }
            LogicalExpr::Function { function, args, .. } => {
                let mut rendered = Vec::with_capacity(args.len());
                for a in args {
                    rendered.push(self.render(a, scope)?);
                }
                RenderExpr::Function {
                    function: *function,
                    args: rendered,
                }
            }
            LogicalExpr::Aggregate { function, arg, .. } => RenderExpr::Aggregate {
                function: *function,
                arg: match arg {
                    Some(a) => Some(Box::new(self.render(a, scope)?)),
                    None => None,
                },
            },
            LogicalExpr::Cast { expr, to } => RenderExpr::Cast {
                expr: Box::new(self.render(expr, scope)?),
                to: *to,
            },
            LogicalExpr::Case {
                whens, else_result, ..
            } => {
                let mut rendered = Vec::with_capacity(whens.len());
                for (when, then) in whens {
                    rendered.push((self.render(when, scope)?, self.render(then, scope)?));
                }
                RenderExpr::Case {
                    whens: rendered,
                    else_result: match else_result {
                        Some(e) => Some(Box::new(self.render(e, scope)?)),
                        None => None,
                    },
                }
            }
            LogicalExpr::ClientOnly { description } => {
                return Err(RenderBuildError::ClientOnlyExpression(description.clone()))
            }
        })
    }

    fn resolve(&self, column: &LogicalColumn, scope: &Scope) -> BuildResult<RenderExpr> {
        let mut chain: Vec<&Scope> = Vec::with_capacity(self.outer.len() + 1);
        chain.push(scope);
        chain.extend(self.outer.iter().rev());
        resolve_in(&chain, column)
    }

    /// Lowers a nested plan that may reference columns of `scope`.
    fn subquery(&mut self, plan: &LogicalPlan, scope: &Scope, kind: SubqueryKind) -> BuildResult<RenderQuery> {
        self.outer.push(scope.clone());
        let result = self.lower_subquery(plan, kind);
        self.outer.pop();
        result
    }

    fn lower_subquery(&mut self, plan: &LogicalPlan, kind: SubqueryKind) -> BuildResult<RenderQuery> {
        let st = self.lower(plan)?;
        let leaves = match kind {
            SubqueryKind::Exists => Vec::new(),
            SubqueryKind::Values | SubqueryKind::Scalar => {
                let leaves = owned_leaves(&st.shape);
                if leaves.len() != 1 {
                    return Err(RenderBuildError::unsupported(format!(
                        "a {} subquery must project exactly one value, found {}",
                        if kind == SubqueryKind::Scalar { "scalar" } else { "IN" },
                        leaves.len()
                    )));
                }
                leaves
            }
        };
        let sealed = self.seal(st, &leaves, SealMode::Subquery)?;
        Ok(RenderQuery::select(sealed.statement))
    }
}

/// A root that is raw SQL with nothing composed over it is sent as written.
fn verbatim(root: &LogicalPlan) -> BuildResult<Option<Built>> {
    let LogicalPlan::Scan(scan) = root else {
        return Ok(None);
    };
    let ScanSource::Sql { sql, verbatim: true } = &scan.table else {
        return Ok(None);
    };
    let leaves = scan.shape.scalar_leaves();
    let mut columns = Vec::with_capacity(leaves.len());
    for leaf in &leaves {
        match leaf {
            LogicalExpr::Column(c) => columns.push(c.column.clone()),
            other => {
                return Err(RenderBuildError::UnprojectedExpression(other.to_string()));
            }
        }
    }
    let shape = scan
        .shape
        .to_query_shape(&mut |e| leaves.iter().position(|l| *l == e))
        .map_err(|e| RenderBuildError::Shape(e.to_string()))?;
    Ok(Some(Built {
        query: RenderQuery::Verbatim(sql.clone()),
        columns,
        shape,
    }))
}

fn derived(statement: SelectStatement, alias: String) -> TableSource {
    TableSource::Derived {
        query: Box::new(RenderQuery::select(statement)),
        alias,
    }
}

fn owned_leaves(shape: &ProjectionShape) -> Leaves {
    shape
        .named_leaves()
        .into_iter()
        .map(|(name, expr)| (name, expr.clone()))
        .collect()
}

fn bind_leaves(alias: &str, leaves: &[(Option<String>, LogicalExpr)], sealed: &Sealed) -> Scope {
    let mut scope = Scope::new();
    for ((_, leaf), slot) in leaves.iter().zip(&sealed.slots) {
        if let Some(item) = sealed.statement.select.get(*slot) {
            scope.bind_projected(alias, &item.alias, leaf);
        }
    }
    scope
}

fn ascending(expr: &LogicalExpr) -> OrderByItem {
    OrderByItem {
        expr: expr.clone(),
        descending: false,
    }
}

fn dedupe_ordering(items: Vec<OrderByItem>) -> Vec<OrderByItem> {
    let mut seen: Vec<LogicalExpr> = Vec::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let key = same_value_form(&item.expr);
        if !seen.contains(&key) {
            seen.push(key);
            out.push(item);
        }
    }
    out
}

fn leaf_name(name: Option<&str>, expr: &LogicalExpr) -> String {
    match (name, expr) {
        (Some(name), _) => name.to_string(),
        (None, LogicalExpr::Column(c)) => c.column.clone(),
        _ => "c".to_string(),
    }
}

fn unique_name(used: &mut HashSet<String>, base: &str) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 0usize;
    loop {
        let candidate = format!("{}{}", base, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
