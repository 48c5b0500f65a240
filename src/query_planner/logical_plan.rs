use std::fmt;
use std::sync::Arc;

use super::errors::QueryPlannerError;
use super::logical_expr::{LogicalExpr, OrderByItem, SourceId};
use super::shape::{shape_for, ProjectionShape};
use crate::query::{ElementKind, SetOperationKind, TypeMapping, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}

/// Relational operator graph produced by the normalizer. Navigation accesses
/// are already explicit joins or subqueries here.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// No source at all (`SELECT <expr>` without FROM).
    Empty,
    Scan(Scan),
    Filter(Filter),
    Projection(Projection),
    Join(Join),
    CollectionJoin(CollectionJoin),
    GroupBy(GroupBy),
    Aggregate(Aggregate),
    OrderBy(OrderBy),
    Skip(Skip),
    Limit(Limit),
    Distinct(Distinct),
    SetOperation(SetOperation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanSource {
    Table { name: String, schema: Option<String> },
    /// Raw SQL; `verbatim` when the query may be sent as-is if nothing is
    /// composed over it.
    Sql { sql: String, verbatim: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub source: SourceId,
    pub entity: String,
    pub table: ScanSource,
    pub alias_hint: String,
    pub shape: ProjectionShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub input: Arc<LogicalPlan>,
    pub predicate: LogicalExpr,
    /// Correlation with an enclosing query, introduced for a collection
    /// navigation. Lifted into join conditions when the subquery becomes a join.
    pub correlation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub input: Arc<LogicalPlan>,
    pub shape: ProjectionShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub left: Arc<LogicalPlan>,
    pub right: Arc<LogicalPlan>,
    pub join_type: JoinType,
    pub condition: Option<LogicalExpr>,
    pub shape: ProjectionShape,
}

/// Per-parent row window for collections limited by `Take`/`Skip`/`First`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowWindow {
    pub ordering: Vec<OrderByItem>,
    pub skip: Option<LogicalExpr>,
    pub take: Option<LogicalExpr>,
}

/// Outer join against a correlated collection, one result row per
/// (parent, element) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionJoin {
    pub input: Arc<LogicalPlan>,
    pub collection: Arc<LogicalPlan>,
    pub outer_key: Vec<LogicalExpr>,
    pub inner_key: Vec<LogicalExpr>,
    /// Identifying columns of the owning row; results are ordered on them
    /// so the rows of one parent stay consecutive.
    pub parent_key: Vec<LogicalExpr>,
    /// Identifying columns of the collection element, used for default
    /// window ordering.
    pub element_key: Vec<LogicalExpr>,
    /// Element ordering requested inside the collection.
    pub ordering: Vec<OrderByItem>,
    pub window: Option<RowWindow>,
    pub shape: ProjectionShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub input: Arc<LogicalPlan>,
    pub keys: Vec<LogicalExpr>,
    pub shape: ProjectionShape,
}

/// Terminal aggregate over the whole input.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub input: Arc<LogicalPlan>,
    pub shape: ProjectionShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub input: Arc<LogicalPlan>,
    pub items: Vec<OrderByItem>,
    /// `ThenBy`: extends the existing ordering instead of replacing it.
    pub append: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skip {
    pub input: Arc<LogicalPlan>,
    pub count: LogicalExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub input: Arc<LogicalPlan>,
    pub count: LogicalExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Distinct {
    pub input: Arc<LogicalPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOperation {
    pub left: Arc<LogicalPlan>,
    pub right: Arc<LogicalPlan>,
    pub kind: SetOperationKind,
    pub shape: ProjectionShape,
}

/// Position an expression occupies in a plan, for passes that treat
/// conditions and values differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprPosition {
    Predicate,
    JoinCondition,
    Ordering,
    GroupingKey,
    Projection,
    Paging,
}

impl ExprPosition {
    /// Operator name used in translation failure messages.
    pub fn operator(self) -> &'static str {
        match self {
            ExprPosition::Predicate => "Where",
            ExprPosition::JoinCondition => "Join",
            ExprPosition::Ordering => "OrderBy",
            ExprPosition::GroupingKey => "GroupBy",
            ExprPosition::Projection => "Select",
            ExprPosition::Paging => "Skip/Take",
        }
    }
}

type ExprRewriter<'a> =
    dyn FnMut(LogicalExpr, ExprPosition) -> Result<LogicalExpr, QueryPlannerError> + 'a;

impl LogicalPlan {
    pub fn shape(&self) -> ProjectionShape {
        shape_for(self)
    }

    /// Direct inputs of this node.
    pub fn inputs(&self) -> Vec<&Arc<LogicalPlan>> {
        match self {
            LogicalPlan::Empty | LogicalPlan::Scan(_) => vec![],
            LogicalPlan::Filter(n) => vec![&n.input],
            LogicalPlan::Projection(n) => vec![&n.input],
            LogicalPlan::Join(n) => vec![&n.left, &n.right],
            LogicalPlan::CollectionJoin(n) => vec![&n.input, &n.collection],
            LogicalPlan::GroupBy(n) => vec![&n.input],
            LogicalPlan::Aggregate(n) => vec![&n.input],
            LogicalPlan::OrderBy(n) => vec![&n.input],
            LogicalPlan::Skip(n) => vec![&n.input],
            LogicalPlan::Limit(n) => vec![&n.input],
            LogicalPlan::Distinct(n) => vec![&n.input],
            LogicalPlan::SetOperation(n) => vec![&n.left, &n.right],
        }
    }

    /// Expressions held directly by this node with their positions.
    pub fn expressions(&self) -> Vec<(&LogicalExpr, ExprPosition)> {
        let mut out: Vec<(&LogicalExpr, ExprPosition)> = Vec::new();
        match self {
            LogicalPlan::Filter(n) => out.push((&n.predicate, ExprPosition::Predicate)),
            LogicalPlan::Projection(n) => {
                for leaf in n.shape.scalar_leaves() {
                    out.push((leaf, ExprPosition::Projection));
                }
            }
            LogicalPlan::Join(n) => {
                if let Some(c) = &n.condition {
                    out.push((c, ExprPosition::JoinCondition));
                }
            }
            LogicalPlan::CollectionJoin(n) => {
                for k in n.outer_key.iter().chain(n.inner_key.iter()) {
                    out.push((k, ExprPosition::JoinCondition));
                }
                for item in &n.ordering {
                    out.push((&item.expr, ExprPosition::Ordering));
                }
                if let Some(w) = &n.window {
                    for item in &w.ordering {
                        out.push((&item.expr, ExprPosition::Ordering));
                    }
                    for c in w.skip.iter().chain(w.take.iter()) {
                        out.push((c, ExprPosition::Paging));
                    }
                }
                for leaf in n.shape.scalar_leaves() {
                    out.push((leaf, ExprPosition::Projection));
                }
            }
            LogicalPlan::GroupBy(n) => {
                for k in &n.keys {
                    out.push((k, ExprPosition::GroupingKey));
                }
            }
            LogicalPlan::Aggregate(n) => {
                for leaf in n.shape.scalar_leaves() {
                    out.push((leaf, ExprPosition::Projection));
                }
            }
            LogicalPlan::OrderBy(n) => {
                for item in &n.items {
                    out.push((&item.expr, ExprPosition::Ordering));
                }
            }
            LogicalPlan::Skip(n) => out.push((&n.count, ExprPosition::Paging)),
            LogicalPlan::Limit(n) => out.push((&n.count, ExprPosition::Paging)),
            LogicalPlan::Empty
            | LogicalPlan::Scan(_)
            | LogicalPlan::Distinct(_)
            | LogicalPlan::SetOperation(_) => {}
        }
        out
    }

    /// First client-only description anywhere in the plan.
    pub fn find_client_only(&self) -> Option<String> {
        for (expr, _) in self.expressions() {
            if let Some(found) = expr.find_client_only() {
                return Some(found);
            }
        }
        self.inputs().into_iter().find_map(|i| i.find_client_only())
    }

    /// Rebuilds the plan, passing every expression (bottom-up by node) through
    /// `f`. Shapes are rewritten leaf by leaf.
    pub fn transform_expressions(
        &self,
        f: &mut ExprRewriter<'_>,
    ) -> Result<Arc<LogicalPlan>, QueryPlannerError> {
        let plan = match self {
            LogicalPlan::Empty => LogicalPlan::Empty,
            LogicalPlan::Scan(scan) => LogicalPlan::Scan(scan.clone()),
            LogicalPlan::Filter(n) => LogicalPlan::Filter(Filter {
                input: n.input.transform_expressions(f)?,
                predicate: f(n.predicate.clone(), ExprPosition::Predicate)?,
                correlation: n.correlation,
            }),
            LogicalPlan::Projection(n) => LogicalPlan::Projection(Projection {
                input: n.input.transform_expressions(f)?,
                shape: n.shape.map_scalars(&mut |e| f(e, ExprPosition::Projection))?,
            }),
            LogicalPlan::Join(n) => LogicalPlan::Join(Join {
                left: n.left.transform_expressions(f)?,
                right: n.right.transform_expressions(f)?,
                join_type: n.join_type,
                condition: match &n.condition {
                    Some(c) => Some(f(c.clone(), ExprPosition::JoinCondition)?),
                    None => None,
                },
                shape: n.shape.map_scalars(&mut |e| f(e, ExprPosition::Projection))?,
            }),
            LogicalPlan::CollectionJoin(n) => {
                let window = match &n.window {
                    Some(w) => Some(RowWindow {
                        ordering: w
                            .ordering
                            .iter()
                            .map(|item| {
                                Ok(OrderByItem {
                                    expr: f(item.expr.clone(), ExprPosition::Ordering)?,
                                    descending: item.descending,
                                })
                            })
                            .collect::<Result<Vec<_>, QueryPlannerError>>()?,
                        skip: match &w.skip {
                            Some(s) => Some(f(s.clone(), ExprPosition::Paging)?),
                            None => None,
                        },
                        take: match &w.take {
                            Some(t) => Some(f(t.clone(), ExprPosition::Paging)?),
                            None => None,
                        },
                    }),
                    None => None,
                };
                LogicalPlan::CollectionJoin(CollectionJoin {
                    input: n.input.transform_expressions(f)?,
                    collection: n.collection.transform_expressions(f)?,
                    outer_key: n
                        .outer_key
                        .iter()
                        .map(|k| f(k.clone(), ExprPosition::JoinCondition))
                        .collect::<Result<Vec<_>, _>>()?,
                    inner_key: n
                        .inner_key
                        .iter()
                        .map(|k| f(k.clone(), ExprPosition::JoinCondition))
                        .collect::<Result<Vec<_>, _>>()?,
                    parent_key: n.parent_key.clone(),
                    element_key: n.element_key.clone(),
                    ordering: n
                        .ordering
                        .iter()
                        .map(|item| {
                            Ok(OrderByItem {
                                expr: f(item.expr.clone(), ExprPosition::Ordering)?,
                                descending: item.descending,
                            })
                        })
                        .collect::<Result<Vec<_>, QueryPlannerError>>()?,
                    window,
                    shape: n.shape.map_scalars(&mut |e| f(e, ExprPosition::Projection))?,
                })
            }
            LogicalPlan::GroupBy(n) => LogicalPlan::GroupBy(GroupBy {
                input: n.input.transform_expressions(f)?,
                keys: n
                    .keys
                    .iter()
                    .map(|k| f(k.clone(), ExprPosition::GroupingKey))
                    .collect::<Result<Vec<_>, _>>()?,
                shape: n.shape.map_scalars(&mut |e| f(e, ExprPosition::GroupingKey))?,
            }),
            LogicalPlan::Aggregate(n) => LogicalPlan::Aggregate(Aggregate {
                input: n.input.transform_expressions(f)?,
                shape: n.shape.map_scalars(&mut |e| f(e, ExprPosition::Projection))?,
            }),
            LogicalPlan::OrderBy(n) => LogicalPlan::OrderBy(OrderBy {
                input: n.input.transform_expressions(f)?,
                items: n
                    .items
                    .iter()
                    .map(|item| {
                        Ok(OrderByItem {
                            expr: f(item.expr.clone(), ExprPosition::Ordering)?,
                            descending: item.descending,
                        })
                    })
                    .collect::<Result<Vec<_>, QueryPlannerError>>()?,
                append: n.append,
            }),
            LogicalPlan::Skip(n) => LogicalPlan::Skip(Skip {
                input: n.input.transform_expressions(f)?,
                count: f(n.count.clone(), ExprPosition::Paging)?,
            }),
            LogicalPlan::Limit(n) => LogicalPlan::Limit(Limit {
                input: n.input.transform_expressions(f)?,
                count: f(n.count.clone(), ExprPosition::Paging)?,
            }),
            LogicalPlan::Distinct(n) => LogicalPlan::Distinct(Distinct {
                input: n.input.transform_expressions(f)?,
            }),
            LogicalPlan::SetOperation(n) => LogicalPlan::SetOperation(SetOperation {
                left: n.left.transform_expressions(f)?,
                right: n.right.transform_expressions(f)?,
                kind: n.kind,
                shape: n.shape.map_scalars(&mut |e| f(e, ExprPosition::Projection))?,
            }),
        };
        Ok(Arc::new(plan))
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let label = match self {
            LogicalPlan::Empty => "Empty".to_string(),
            LogicalPlan::Scan(s) => format!("Scan {} {} as {}", s.source, s.entity, s.alias_hint),
            LogicalPlan::Filter(n) => format!(
                "Filter{} {}",
                if n.correlation { " (correlation)" } else { "" },
                n.predicate
            ),
            LogicalPlan::Projection(_) => "Projection".to_string(),
            LogicalPlan::Join(n) => format!("Join {:?}", n.join_type),
            LogicalPlan::CollectionJoin(n) => format!(
                "CollectionJoin{}",
                if n.window.is_some() { " (windowed)" } else { "" }
            ),
            LogicalPlan::GroupBy(n) => format!("GroupBy {} keys", n.keys.len()),
            LogicalPlan::Aggregate(_) => "Aggregate".to_string(),
            LogicalPlan::OrderBy(n) => format!(
                "OrderBy {} items{}",
                n.items.len(),
                if n.append { " (then)" } else { "" }
            ),
            LogicalPlan::Skip(n) => format!("Skip {}", n.count),
            LogicalPlan::Limit(n) => format!("Limit {}", n.count),
            LogicalPlan::Distinct(_) => "Distinct".to_string(),
            LogicalPlan::SetOperation(n) => format!("SetOperation {:?}", n.kind),
        };
        writeln!(f, "{}{}", pad, label)?;
        for input in self.inputs() {
            input.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Where a bound parameter's value comes from at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSource {
    /// A closed-over variable supplied with each execution.
    Closure(String),
    /// One element of a closed-over list.
    ListElement { name: String, index: usize },
    /// A constant lifted out of the query text (paging counts).
    Constant(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub source: ParameterSource,
    pub type_mapping: TypeMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCardinality {
    Sequence,
    Element(ElementKind),
    Scalar,
}

/// Output of the translation front end.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub root: Arc<LogicalPlan>,
    pub cardinality: ResultCardinality,
    pub parameters: Vec<ParameterSpec>,
    pub tracking: bool,
}
