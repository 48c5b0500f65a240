//! Normalizer: turns a LINQ operator chain into a [`LogicalPlan`].
//!
//! Every operator is translated on top of the plan of its source while the
//! projection shape of the output is threaded along. Navigation accesses are
//! expanded on the way:
//! - a to-one navigation becomes a join, queued in the scope that owns the
//!   navigating source and attached by the next operator of that scope
//! - a to-many navigation becomes a correlated query; it stays a subquery in
//!   predicates and aggregates and turns into a collection join when projected
//!
//! Sub-expressions without a server translation are kept as client-only
//! markers. Whether their position allows client evaluation is decided later
//! by the analyzer.

mod binder;
mod methods;
mod navigation;

use std::collections::HashMap;
use std::sync::Arc;

use super::errors::{Pass, QueryPlannerError};
use super::logical_expr::{LogicalExpr, OrderByItem, SourceId, SqlFunction, SqlOperator};
use super::logical_plan::{
    Aggregate, CollectionJoin, Distinct, Filter, GroupBy, Join, JoinType, Limit, LogicalPlan,
    OrderBy, Projection, QueryPlan, ResultCardinality, RowWindow, SetOperation, Skip,
};
use super::plan_ctx::{PendingJoin, PlanCtx};
use super::shape::ProjectionShape;
use super::QueryParameters;
use crate::model::Model;
use crate::query::{
    AggregateFunction, ClrType, ElementKind, Expr, JoinKind, Lambda, QueryExpr, SetOperationKind,
    TypeMapping, Value,
};

/// Lambda parameters in scope, bound to the shape of the rows they range over.
pub(crate) type Env = HashMap<String, ProjectionShape>;

/// Key pairs tying a collection query to the row that owns it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Correlation {
    pub outer_key: Vec<LogicalExpr>,
    pub inner_key: Vec<LogicalExpr>,
}

/// A translated (sub)query and what later operators need to know about it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Translated {
    pub plan: Arc<LogicalPlan>,
    pub correlation: Option<Correlation>,
    /// Ordering currently in effect, for `Last` and collection windows.
    pub ordering: Vec<OrderByItem>,
    /// `Include` paths, applied once the final shape is known.
    pub includes: Vec<Vec<String>>,
    /// Set when the query was reduced to a single element.
    pub element: Option<ElementKind>,
}

impl Translated {
    fn new(plan: Arc<LogicalPlan>) -> Self {
        Translated {
            plan,
            correlation: None,
            ordering: Vec::new(),
            includes: Vec::new(),
            element: None,
        }
    }

    fn shape(&self) -> ProjectionShape {
        self.plan.shape()
    }
}

/// A closed-over or constant list; only usable as a `Contains` source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListValue {
    /// Parameter name when the list came from a closure variable.
    pub name: Option<String>,
    pub values: Vec<Value>,
}

/// Result of binding an expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bound {
    Shape(ProjectionShape),
    /// Anonymous type with at least one member that is not a plain shape.
    Composite(Vec<(String, Bound)>),
    Query(Box<Translated>),
    List(ListValue),
}

impl Bound {
    fn scalar(expr: LogicalExpr) -> Self {
        Bound::Shape(ProjectionShape::Scalar(expr))
    }

    fn composite(members: Vec<(String, Bound)>) -> Self {
        if members.iter().all(|(_, b)| matches!(b, Bound::Shape(_))) {
            let shapes = members
                .into_iter()
                .filter_map(|(name, b)| match b {
                    Bound::Shape(s) => Some((name, s)),
                    _ => None,
                })
                .collect();
            Bound::Shape(ProjectionShape::Composite(shapes))
        } else {
            Bound::Composite(members)
        }
    }

    fn has_query(&self) -> bool {
        match self {
            Bound::Query(_) => true,
            Bound::Composite(members) => members.iter().any(|(_, b)| b.has_query()),
            Bound::Shape(_) | Bound::List(_) => false,
        }
    }
}

/// A collection join waiting for the plan it attaches to.
struct PendingCollection {
    collection: Arc<LogicalPlan>,
    correlation: Correlation,
    parent_key: Vec<LogicalExpr>,
    element_key: Vec<LogicalExpr>,
    ordering: Vec<OrderByItem>,
    window: Option<RowWindow>,
}

impl PendingCollection {
    fn attach(self, input: Arc<LogicalPlan>) -> Arc<LogicalPlan> {
        let shape = input.shape();
        Arc::new(LogicalPlan::CollectionJoin(CollectionJoin {
            input,
            collection: self.collection,
            outer_key: self.correlation.outer_key,
            inner_key: self.correlation.inner_key,
            parent_key: self.parent_key,
            element_key: self.element_key,
            ordering: self.ordering,
            window: self.window,
            shape,
        }))
    }
}

/// Query-level switches found anywhere in the operator chain.
#[derive(Debug, Default, Clone, Copy)]
struct QueryFlags {
    ignore_query_filters: bool,
    no_tracking: bool,
}

impl QueryFlags {
    fn scan(query: &QueryExpr) -> Self {
        let mut flags = QueryFlags::default();
        flags.visit(query);
        flags
    }

    fn visit(&mut self, query: &QueryExpr) {
        match query {
            QueryExpr::IgnoreQueryFilters { source } => {
                self.ignore_query_filters = true;
                self.visit(source);
            }
            QueryExpr::AsNoTracking { source } => {
                self.no_tracking = true;
                self.visit(source);
            }
            QueryExpr::Join { outer, inner, .. } => {
                self.visit(outer);
                self.visit(inner);
            }
            QueryExpr::SetOperation { left, right, .. } => {
                self.visit(left);
                self.visit(right);
            }
            QueryExpr::Set { .. } | QueryExpr::FromSql { .. } | QueryExpr::Collection(_) => {}
            QueryExpr::Where { source, .. }
            | QueryExpr::Select { source, .. }
            | QueryExpr::SelectMany { source, .. }
            | QueryExpr::OrderBy { source, .. }
            | QueryExpr::ThenBy { source, .. }
            | QueryExpr::GroupBy { source, .. }
            | QueryExpr::Distinct { source }
            | QueryExpr::Skip { source, .. }
            | QueryExpr::Take { source, .. }
            | QueryExpr::Include { source, .. }
            | QueryExpr::Aggregate { source, .. }
            | QueryExpr::Any { source, .. }
            | QueryExpr::All { source, .. }
            | QueryExpr::Contains { source, .. }
            | QueryExpr::Element { source, .. } => self.visit(source),
        }
    }
}

pub struct Normalizer<'a> {
    model: &'a Model,
    params: &'a QueryParameters,
    contains_parameter_limit: usize,
    document_store: bool,
    ctx: PlanCtx,
    /// navigation target source -> shape it was expanded into
    nav_shapes: HashMap<SourceId, ProjectionShape>,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        model: &'a Model,
        params: &'a QueryParameters,
        contains_parameter_limit: usize,
        tracking: bool,
    ) -> Self {
        Normalizer {
            model,
            params,
            contains_parameter_limit,
            document_store: false,
            ctx: PlanCtx::new(tracking),
            nav_shapes: HashMap::new(),
        }
    }

    pub fn with_document_store(mut self, document_store: bool) -> Self {
        self.document_store = document_store;
        self
    }

    pub fn normalize(mut self, query: &QueryExpr) -> Result<QueryPlan, QueryPlannerError> {
        let flags = QueryFlags::scan(query);
        if flags.ignore_query_filters {
            self.ctx.set_ignore_query_filters(true);
        }
        if flags.no_tracking {
            self.ctx.set_tracking(false);
        }

        let env = Env::new();
        let (root, cardinality) = match query {
            QueryExpr::Aggregate {
                source,
                function,
                selector,
            } => {
                let plan = self.aggregate_plan(source, *function, selector.as_ref(), &env)?;
                (declare_non_nullable_result(plan), ResultCardinality::Scalar)
            }
            QueryExpr::Any { .. } | QueryExpr::All { .. } | QueryExpr::Contains { .. } => {
                let test = self.quantifier(query, &env)?;
                let case = LogicalExpr::Case {
                    whens: vec![(test, LogicalExpr::bool_literal(true))],
                    else_result: Some(Box::new(LogicalExpr::bool_literal(false))),
                    type_mapping: TypeMapping::bool(),
                };
                let plan = Arc::new(LogicalPlan::Projection(Projection {
                    input: Arc::new(LogicalPlan::Empty),
                    shape: ProjectionShape::Scalar(case),
                }));
                (plan, ResultCardinality::Scalar)
            }
            QueryExpr::Element {
                source,
                kind,
                predicate,
            } => {
                let t = self.element_query(source, *kind, predicate.as_ref(), &env)?;
                let t = self.apply_includes(t)?;
                (t.plan, ResultCardinality::Element(*kind))
            }
            _ => {
                let t = self.translate_query(query, &env)?;
                let t = self.apply_includes(t)?;
                (t.plan, ResultCardinality::Sequence)
            }
        };
        let leftovers = self.ctx.take_pending_joins();
        let root = with_joins(root, leftovers);

        log::trace!("Normalizer: plan\n{}", root);
        log::trace!("Normalizer: {}", self.ctx);

        let tracking = self.ctx.tracking();
        Ok(QueryPlan {
            root,
            cardinality,
            parameters: self.ctx.into_parameters(),
            tracking,
        })
    }

    pub(crate) fn translate_query(
        &mut self,
        query: &QueryExpr,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        match query {
            QueryExpr::Set { entity } => self.entity_root(entity, None, false, false),
            QueryExpr::FromSql { entity, sql } => self.entity_root(entity, Some(sql), false, false),
            QueryExpr::Collection(expr) => match self.bind(expr, env)? {
                Bound::Query(t) => Ok(*t),
                Bound::List(_) => Err(QueryPlannerError::translation_failed_with_context(
                    expr.to_string(),
                    "a local collection cannot be used as a query source",
                )),
                _ => Err(QueryPlannerError::translation_failed(expr.to_string())),
            },
            QueryExpr::Where { source, predicate } => {
                let t = self.translate_query(source, env)?;
                self.filter(t, predicate, env)
            }
            QueryExpr::Select { source, selector } => {
                let t = self.translate_query(source, env)?;
                let shape = t.shape();
                let bound = self.bind_lambda(selector, &[shape], env)?;
                self.finish_projection(t, bound)
            }
            QueryExpr::SelectMany {
                source,
                collection,
                result,
            } => {
                let t = self.translate_query(source, env)?;
                self.select_many(t, collection, result.as_ref(), env)
            }
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
                kind,
            } => self.join(outer, inner, outer_key, inner_key, result, *kind, env),
            QueryExpr::OrderBy {
                source,
                key,
                descending,
            } => {
                let t = self.translate_query(source, env)?;
                self.order_by(t, key, *descending, false, env)
            }
            QueryExpr::ThenBy {
                source,
                key,
                descending,
            } => {
                let t = self.translate_query(source, env)?;
                self.order_by(t, key, *descending, true, env)
            }
            QueryExpr::GroupBy {
                source,
                key,
                element,
            } => {
                let t = self.translate_query(source, env)?;
                self.group_by(t, key, element.as_ref(), env)
            }
            QueryExpr::Distinct { source } => {
                let mut t = self.translate_query(source, env)?;
                if t.shape().contains_collection() {
                    return Err(QueryPlannerError::unsupported(
                        "Distinct over a projection containing a collection",
                    ));
                }
                t.plan = Arc::new(LogicalPlan::Distinct(Distinct { input: t.plan }));
                Ok(t)
            }
            QueryExpr::Skip { source, count } => {
                let mut t = self.translate_query(source, env)?;
                let count = self.paging_count(count, env)?;
                let joins = self.ctx.take_pending_joins();
                t.plan = wrap_below_collections(&t.plan, joins, &|input| {
                    LogicalPlan::Skip(Skip {
                        input,
                        count: count.clone(),
                    })
                });
                Ok(t)
            }
            QueryExpr::Take { source, count } => {
                let mut t = self.translate_query(source, env)?;
                let count = self.paging_count(count, env)?;
                let joins = self.ctx.take_pending_joins();
                t.plan = wrap_below_collections(&t.plan, joins, &|input| {
                    LogicalPlan::Limit(Limit {
                        input,
                        count: count.clone(),
                    })
                });
                Ok(t)
            }
            QueryExpr::SetOperation { left, right, kind } => self.set_operation(left, right, *kind, env),
            QueryExpr::Include { source, navigation } => {
                let mut t = self.translate_query(source, env)?;
                t.includes.push(navigation.clone());
                Ok(t)
            }
            QueryExpr::IgnoreQueryFilters { source } | QueryExpr::AsNoTracking { source } => {
                self.translate_query(source, env)
            }
            QueryExpr::Aggregate { .. }
            | QueryExpr::Any { .. }
            | QueryExpr::All { .. }
            | QueryExpr::Contains { .. }
            | QueryExpr::Element { .. } => Err(QueryPlannerError::unsupported(format!(
                "{} cannot be composed with further query operators",
                query.operator_name()
            ))),
        }
    }

    pub(crate) fn filter(
        &mut self,
        mut t: Translated,
        predicate: &Lambda,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        let bound = self.bind_lambda(predicate, &[t.shape()], env)?;
        let predicate = self.to_scalar(bound, &predicate.body)?;
        let joins = self.ctx.take_pending_joins();
        t.plan = wrap_below_collections(&t.plan, joins, &|input| {
            LogicalPlan::Filter(Filter {
                input,
                predicate: predicate.clone(),
                correlation: false,
            })
        });
        Ok(t)
    }

    /// Attaches the joins the selector introduced, turns projected queries
    /// into collection joins and wraps the result in a projection.
    fn finish_projection(
        &mut self,
        t: Translated,
        bound: Bound,
    ) -> Result<Translated, QueryPlannerError> {
        let joins = self.ctx.take_pending_joins();
        let mut plan = with_joins(t.plan, joins);
        let parent_key = if bound.has_query() {
            let keys = self.identifying_keys(&plan)?;
            if keys.is_empty() {
                return Err(QueryPlannerError::unsupported(
                    "a collection can only be projected from rows with a key",
                ));
            }
            keys
        } else {
            Vec::new()
        };
        let mut collections = Vec::new();
        let shape = self.lift_bound(bound, &parent_key, &mut collections)?;
        for collection in collections {
            plan = collection.attach(plan);
        }
        let plan = Arc::new(LogicalPlan::Projection(Projection { input: plan, shape }));
        Ok(Translated {
            plan,
            correlation: t.correlation,
            ordering: t.ordering,
            includes: Vec::new(),
            element: t.element,
        })
    }

    fn lift_bound(
        &mut self,
        bound: Bound,
        parent_key: &[LogicalExpr],
        collections: &mut Vec<PendingCollection>,
    ) -> Result<ProjectionShape, QueryPlannerError> {
        match bound {
            Bound::Shape(shape) => Ok(shape),
            Bound::Composite(members) => {
                let mut out = Vec::with_capacity(members.len());
                for (name, member) in members {
                    out.push((name, self.lift_bound(member, parent_key, collections)?));
                }
                Ok(ProjectionShape::Composite(out))
            }
            Bound::Query(t) => {
                let (pending, shape) = self.collection_projection(*t, parent_key)?;
                collections.push(pending);
                Ok(shape)
            }
            Bound::List(list) => Err(QueryPlannerError::translation_failed(
                Value::List(list.values).to_string(),
            )),
        }
    }

    /// Turns a correlated query into a collection join plus the shape that
    /// reads it back per parent.
    fn collection_projection(
        &mut self,
        t: Translated,
        parent_key: &[LogicalExpr],
    ) -> Result<(PendingCollection, ProjectionShape), QueryPlannerError> {
        let correlation = t.correlation.clone().ok_or_else(|| {
            QueryPlannerError::unsupported("an uncorrelated query cannot be projected as a collection")
        })?;
        let single = t.element.is_some();
        let stripped = strip_correlation(&t.plan);
        let (plan, skip, take) = peel_paging(&stripped);
        if has_set_semantics(&plan) {
            return Err(QueryPlannerError::unsupported(
                "Distinct or GroupBy inside a projected collection",
            ));
        }
        let plan = strip_ordering(&plan);
        let window = if skip.is_some() || take.is_some() {
            Some(RowWindow {
                ordering: t.ordering.clone(),
                skip,
                take,
            })
        } else {
            None
        };
        let element_key = self.identifying_keys(&plan)?;
        if element_key.is_empty() {
            return Err(QueryPlannerError::unsupported(
                "collection elements without a key cannot be projected",
            ));
        }
        let shape = ProjectionShape::Collection(super::shape::CollectionProjection {
            parent_key: parent_key.to_vec(),
            element: Box::new(plan.shape().make_nullable()),
            element_key: element_key.iter().map(|k| k.clone().into_nullable()).collect(),
            single,
        });
        let pending = PendingCollection {
            collection: plan,
            correlation,
            parent_key: parent_key.to_vec(),
            element_key,
            ordering: t.ordering,
            window,
        };
        Ok((pending, shape))
    }

    fn select_many(
        &mut self,
        t: Translated,
        collection: &Lambda,
        result: Option<&Lambda>,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        let left_shape = t.shape();
        let bound = self.bind_lambda(collection, &[left_shape.clone()], env)?;
        let joins = self.ctx.take_pending_joins();
        let left = with_joins(t.plan, joins);
        let inner = match bound {
            Bound::Query(q) => *q,
            Bound::List(_) => {
                return Err(QueryPlannerError::translation_failed_with_context(
                    collection.to_string(),
                    "SelectMany over a local collection",
                ))
            }
            _ => return Err(QueryPlannerError::translation_failed(collection.body.to_string())),
        };
        let right_shape = inner.shape();
        let (join_type, condition, right) = match &inner.correlation {
            Some(c) => (
                JoinType::Inner,
                key_equality(&c.outer_key, &c.inner_key),
                strip_correlation(&inner.plan),
            ),
            None => (JoinType::Cross, None, inner.plan.clone()),
        };
        let plan = Arc::new(LogicalPlan::Join(Join {
            left,
            right,
            join_type,
            condition,
            shape: right_shape.clone(),
        }));
        let joined = Translated {
            plan,
            correlation: t.correlation,
            ordering: t.ordering,
            includes: Vec::new(),
            element: None,
        };
        match result {
            Some(result) => {
                let bound = self.bind_lambda(result, &[left_shape, right_shape], env)?;
                self.finish_projection(joined, bound)
            }
            None => Ok(joined),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn join(
        &mut self,
        outer: &QueryExpr,
        inner: &QueryExpr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
        kind: JoinKind,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        let o = self.translate_query(outer, env)?;
        let i = self.translate_query(inner, env)?;
        let outer_shape = o.shape();
        let mut inner_shape = i.shape();

        let bound = self.bind_lambda(outer_key, &[outer_shape.clone()], env)?;
        let left_keys = self.key_exprs(bound, &outer_key.body)?;
        let left = with_joins(o.plan, self.ctx.take_pending_joins());

        let bound = self.bind_lambda(inner_key, &[inner_shape.clone()], env)?;
        let right_keys = self.key_exprs(bound, &inner_key.body)?;
        let right = with_joins(i.plan, self.ctx.take_pending_joins());

        if left_keys.len() != right_keys.len() {
            return Err(QueryPlannerError::unsupported(format!(
                "join keys {} and {} have different arity",
                outer_key, inner_key
            )));
        }
        let join_type = match kind {
            JoinKind::Inner => JoinType::Inner,
            JoinKind::Left => {
                for source in collect_sources(&right) {
                    self.ctx.mark_nullable(source);
                }
                inner_shape = inner_shape.make_nullable();
                JoinType::Left
            }
        };
        let plan = Arc::new(LogicalPlan::Join(Join {
            left,
            right,
            join_type,
            condition: key_equality(&left_keys, &right_keys),
            shape: ProjectionShape::Composite(vec![
                ("Outer".to_string(), outer_shape.clone()),
                ("Inner".to_string(), inner_shape.clone()),
            ]),
        }));
        let joined = Translated {
            plan,
            correlation: None,
            ordering: o.ordering,
            includes: Vec::new(),
            element: None,
        };
        let bound = self.bind_lambda(result, &[outer_shape, inner_shape], env)?;
        self.finish_projection(joined, bound)
    }

    fn order_by(
        &mut self,
        mut t: Translated,
        key: &Lambda,
        descending: bool,
        append: bool,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        let bound = self.bind_lambda(key, &[t.shape()], env)?;
        let items: Vec<OrderByItem> = self
            .key_exprs(bound, &key.body)?
            .into_iter()
            .map(|expr| OrderByItem { expr, descending })
            .collect();
        let joins = self.ctx.take_pending_joins();
        t.plan = wrap_below_collections(&t.plan, joins, &|input| {
            LogicalPlan::OrderBy(OrderBy {
                input,
                items: items.clone(),
                append,
            })
        });
        if append {
            t.ordering.extend(items);
        } else {
            t.ordering = items;
        }
        Ok(t)
    }

    fn group_by(
        &mut self,
        t: Translated,
        key: &Lambda,
        element: Option<&Lambda>,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        let shape = t.shape();
        let bound = self.bind_lambda(key, &[shape.clone()], env)?;
        let key_shape = self.plain_shape(bound, &key.body)?;
        if key_shape.contains_client() {
            return Err(QueryPlannerError::translation_failed_with_context(
                key.body.to_string(),
                "in GroupBy",
            ));
        }
        let element_shape = match element {
            Some(element) => {
                let bound = self.bind_lambda(element, &[shape], env)?;
                self.plain_shape(bound, &element.body)?
            }
            None => shape,
        };
        let joins = self.ctx.take_pending_joins();
        let input = with_joins(t.plan, joins);
        let keys = key_shape.scalar_leaves().into_iter().cloned().collect();
        let plan = Arc::new(LogicalPlan::GroupBy(GroupBy {
            input,
            keys,
            shape: ProjectionShape::Grouping {
                key: Box::new(key_shape),
                element: Box::new(element_shape),
            },
        }));
        Ok(Translated::new(plan))
    }

    fn set_operation(
        &mut self,
        left: &QueryExpr,
        right: &QueryExpr,
        kind: SetOperationKind,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        let l = self.translate_query(left, env)?;
        let r = self.translate_query(right, env)?;
        let left_shape = l.shape();
        let right_shape = r.shape();
        if !left_shape.is_compatible_with(&right_shape) {
            return Err(QueryPlannerError::unsupported(format!(
                "{} requires both sides to project the same shape",
                kind.name()
            )));
        }
        let plan = Arc::new(LogicalPlan::SetOperation(SetOperation {
            left: l.plan,
            right: r.plan,
            kind,
            shape: left_shape,
        }));
        Ok(Translated::new(plan))
    }

    fn paging_count(&mut self, count: &Expr, env: &Env) -> Result<LogicalExpr, QueryPlannerError> {
        match count {
            Expr::Constant(value) if value.as_i64().is_some() => {
                let clr = value.clr_type().unwrap_or(ClrType::Int32);
                let param = self
                    .ctx
                    .constant_parameter(value.clone(), TypeMapping::non_null(clr));
                Ok(LogicalExpr::Parameter(param))
            }
            other => {
                let bound = self.bind(other, env)?;
                self.to_scalar(bound, other)
            }
        }
    }

    /// Plan computing `function` over `source`, with an optional selector.
    fn aggregate_plan(
        &mut self,
        source: &QueryExpr,
        function: AggregateFunction,
        selector: Option<&Lambda>,
        env: &Env,
    ) -> Result<Arc<LogicalPlan>, QueryPlannerError> {
        let t = self.translate_query(source, env)?;
        let shape = t.shape();
        let arg = match selector {
            Some(selector) => {
                let bound = self.bind_lambda(selector, &[shape], env)?;
                Some(self.to_scalar(bound, &selector.body)?)
            }
            None => match (function, shape) {
                (AggregateFunction::Count | AggregateFunction::LongCount, _) => None,
                (_, ProjectionShape::Scalar(e)) => Some(e),
                _ => {
                    return Err(QueryPlannerError::translation_failed_with_context(
                        format!("{}.{}()", source, function.name()),
                        "aggregates need a scalar argument",
                    ))
                }
            },
        };
        let joins = self.ctx.take_pending_joins();
        let input = with_joins(t.plan, joins);
        Ok(Arc::new(LogicalPlan::Aggregate(Aggregate {
            input,
            shape: ProjectionShape::Scalar(aggregate_expr(function, arg)),
        })))
    }

    /// `Any`/`All`/`Contains` as a condition, in a scope of its own.
    fn quantifier(&mut self, query: &QueryExpr, env: &Env) -> Result<LogicalExpr, QueryPlannerError> {
        self.ctx.push_scope();
        let result = self.quantifier_body(query, env);
        let leftovers = self.ctx.pop_scope()?;
        if !leftovers.is_empty() {
            log::debug!("Normalizer: {} unapplied joins after {}", leftovers.len(), query.operator_name());
        }
        result
    }

    fn quantifier_body(
        &mut self,
        query: &QueryExpr,
        env: &Env,
    ) -> Result<LogicalExpr, QueryPlannerError> {
        match query {
            QueryExpr::Any { source, predicate } => {
                let mut t = self.translate_query(source, env)?;
                if let Some(predicate) = predicate {
                    t = self.filter(t, predicate, env)?;
                }
                Ok(LogicalExpr::Exists {
                    subquery: t.plan,
                    negated: false,
                })
            }
            QueryExpr::All { source, predicate } => {
                let t = self.translate_query(source, env)?;
                let bound = self.bind_lambda(predicate, &[t.shape()], env)?;
                let test = self.to_scalar(bound, &predicate.body)?;
                let input = with_joins(t.plan, self.ctx.take_pending_joins());
                Ok(LogicalExpr::Exists {
                    subquery: Arc::new(LogicalPlan::Filter(Filter {
                        input,
                        predicate: LogicalExpr::Not(Box::new(test)),
                        correlation: false,
                    })),
                    negated: true,
                })
            }
            QueryExpr::Contains { source, item } => {
                let t = match source.as_ref() {
                    QueryExpr::Collection(expr) => match self.bind(expr, env)? {
                        Bound::List(list) => {
                            let bound = self.bind(item, env)?;
                            let item = self.to_scalar(bound, item)?;
                            return Ok(self.list_contains(list, item));
                        }
                        Bound::Query(t) => *t,
                        _ => return Err(QueryPlannerError::translation_failed(expr.to_string())),
                    },
                    other => self.translate_query(other, env)?,
                };
                self.contains_in(t, item, env)
            }
            other => Err(QueryPlannerError::internal(
                Pass::Normalizer,
                format!("{} is not a quantifier", other.operator_name()),
            )),
        }
    }

    /// `item` membership in a translated query.
    fn contains_in(
        &mut self,
        t: Translated,
        item: &Expr,
        env: &Env,
    ) -> Result<LogicalExpr, QueryPlannerError> {
        let bound = self.bind(item, env)?;
        match (t.shape(), bound) {
            (ProjectionShape::Entity(element), Bound::Shape(ProjectionShape::Entity(needle))) => {
                let predicate = key_equality(&element.key_exprs(), &needle.key_exprs())
                    .ok_or_else(|| QueryPlannerError::translation_failed(item.to_string()))?;
                Ok(LogicalExpr::Exists {
                    subquery: Arc::new(LogicalPlan::Filter(Filter {
                        input: t.plan,
                        predicate,
                        correlation: false,
                    })),
                    negated: false,
                })
            }
            (ProjectionShape::Scalar(_), bound) => {
                let needle = self.to_scalar(bound, item)?;
                Ok(LogicalExpr::InSubquery {
                    expr: Box::new(needle),
                    subquery: t.plan,
                    negated: false,
                })
            }
            _ => Err(QueryPlannerError::translation_failed(item.to_string())),
        }
    }

    /// `First`/`Single`/`Last` family: reverses the ordering for `Last` and
    /// limits the rows.
    fn element_query(
        &mut self,
        source: &QueryExpr,
        kind: ElementKind,
        predicate: Option<&Lambda>,
        env: &Env,
    ) -> Result<Translated, QueryPlannerError> {
        let mut t = self.translate_query(source, env)?;
        if let Some(predicate) = predicate {
            t = self.filter(t, predicate, env)?;
        }
        if kind.is_last() {
            if t.ordering.is_empty() {
                return Err(QueryPlannerError::translation_failed_with_context(
                    format!("{}.{}()", source, kind.name()),
                    "Last requires the query to be ordered",
                ));
            }
            let reversed: Vec<OrderByItem> = t.ordering.iter().map(OrderByItem::reversed).collect();
            t.plan = wrap_below_collections(&t.plan, Vec::new(), &|input| {
                LogicalPlan::OrderBy(OrderBy {
                    input,
                    items: reversed.clone(),
                    append: false,
                })
            });
            t.ordering = reversed;
        }
        let count = if kind.is_single() { 2 } else { 1 };
        t.plan = wrap_below_collections(&t.plan, Vec::new(), &|input| {
            LogicalPlan::Limit(Limit {
                input,
                count: LogicalExpr::literal(Value::Int(count)),
            })
        });
        t.element = Some(kind);
        Ok(t)
    }

    /// Columns that identify a row of `plan`: keys of every root source, or
    /// the grouping keys.
    pub(crate) fn identifying_keys(
        &self,
        plan: &LogicalPlan,
    ) -> Result<Vec<LogicalExpr>, QueryPlannerError> {
        match plan {
            LogicalPlan::Scan(scan) => {
                if self.ctx.is_nav_target(scan.source) {
                    return Ok(Vec::new());
                }
                match &scan.shape {
                    ProjectionShape::Entity(e) if e.keyless => Err(QueryPlannerError::unsupported(
                        format!("keyless entity `{}` cannot own a projected collection", e.entity),
                    )),
                    ProjectionShape::Entity(e) => Ok(e.key_exprs()),
                    _ => Ok(Vec::new()),
                }
            }
            LogicalPlan::Join(j) => {
                let mut keys = self.identifying_keys(&j.left)?;
                keys.extend(self.identifying_keys(&j.right)?);
                Ok(keys)
            }
            LogicalPlan::GroupBy(g) => Ok(g.keys.clone()),
            LogicalPlan::Filter(n) => self.identifying_keys(&n.input),
            LogicalPlan::Projection(n) => self.identifying_keys(&n.input),
            LogicalPlan::CollectionJoin(n) => self.identifying_keys(&n.input),
            LogicalPlan::OrderBy(n) => self.identifying_keys(&n.input),
            LogicalPlan::Skip(n) => self.identifying_keys(&n.input),
            LogicalPlan::Limit(n) => self.identifying_keys(&n.input),
            LogicalPlan::Distinct(n) => self.identifying_keys(&n.input),
            LogicalPlan::Aggregate(_) | LogicalPlan::Empty => Ok(Vec::new()),
            LogicalPlan::SetOperation(_) => Err(QueryPlannerError::unsupported(
                "rows of a set operation cannot own a projected collection",
            )),
        }
    }
}

/// Attaches navigation joins on top of `plan`. Joins queued after a grouping
/// belong below it, where the navigating source still has rows.
pub(crate) fn with_joins(plan: Arc<LogicalPlan>, joins: Vec<PendingJoin>) -> Arc<LogicalPlan> {
    joins.into_iter().fold(plan, attach_join)
}

fn attach_join(plan: Arc<LogicalPlan>, join: PendingJoin) -> Arc<LogicalPlan> {
    if let LogicalPlan::GroupBy(g) = plan.as_ref() {
        return Arc::new(LogicalPlan::GroupBy(GroupBy {
            input: attach_join(g.input.clone(), join),
            keys: g.keys.clone(),
            shape: g.shape.clone(),
        }));
    }
    let shape = plan.shape();
    Arc::new(LogicalPlan::Join(Join {
        left: plan,
        right: join.right,
        join_type: join.join_type,
        condition: Some(join.condition),
        shape,
    }))
}

/// Applies `wrap` below any collection joins at the top of `plan`, so row
/// operators act on parent rows rather than (parent, element) pairs.
fn wrap_below_collections(
    plan: &Arc<LogicalPlan>,
    joins: Vec<PendingJoin>,
    wrap: &dyn Fn(Arc<LogicalPlan>) -> LogicalPlan,
) -> Arc<LogicalPlan> {
    match plan.as_ref() {
        LogicalPlan::Projection(p) if p.shape.contains_collection() => {
            Arc::new(LogicalPlan::Projection(Projection {
                input: wrap_below_collections(&p.input, joins, wrap),
                shape: p.shape.clone(),
            }))
        }
        LogicalPlan::CollectionJoin(c) => {
            let mut node = c.clone();
            node.input = wrap_below_collections(&c.input, joins, wrap);
            node.shape = node.input.shape();
            Arc::new(LogicalPlan::CollectionJoin(node))
        }
        _ => Arc::new(wrap(with_joins(plan.clone(), joins))),
    }
}

/// Removes the correlation filter of a collection query; the caller turns
/// it into a join condition.
fn strip_correlation(plan: &Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let rebuilt = match plan.as_ref() {
        LogicalPlan::Filter(f) if f.correlation => return f.input.clone(),
        LogicalPlan::Filter(f) => LogicalPlan::Filter(Filter {
            input: strip_correlation(&f.input),
            predicate: f.predicate.clone(),
            correlation: false,
        }),
        LogicalPlan::Projection(p) => LogicalPlan::Projection(Projection {
            input: strip_correlation(&p.input),
            shape: p.shape.clone(),
        }),
        LogicalPlan::OrderBy(o) => LogicalPlan::OrderBy(OrderBy {
            input: strip_correlation(&o.input),
            items: o.items.clone(),
            append: o.append,
        }),
        LogicalPlan::Skip(s) => LogicalPlan::Skip(Skip {
            input: strip_correlation(&s.input),
            count: s.count.clone(),
        }),
        LogicalPlan::Limit(l) => LogicalPlan::Limit(Limit {
            input: strip_correlation(&l.input),
            count: l.count.clone(),
        }),
        LogicalPlan::Distinct(d) => LogicalPlan::Distinct(Distinct {
            input: strip_correlation(&d.input),
        }),
        LogicalPlan::Join(j) => LogicalPlan::Join(Join {
            left: strip_correlation(&j.left),
            ..j.clone()
        }),
        LogicalPlan::CollectionJoin(c) => LogicalPlan::CollectionJoin(CollectionJoin {
            input: strip_correlation(&c.input),
            ..c.clone()
        }),
        LogicalPlan::GroupBy(g) => LogicalPlan::GroupBy(GroupBy {
            input: strip_correlation(&g.input),
            ..g.clone()
        }),
        _ => return plan.clone(),
    };
    Arc::new(rebuilt)
}

/// Drops orderings from the top of a collection query; they move to the
/// window or the outer ORDER BY.
fn strip_ordering(plan: &Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let rebuilt = match plan.as_ref() {
        LogicalPlan::OrderBy(o) => return strip_ordering(&o.input),
        LogicalPlan::Filter(f) => LogicalPlan::Filter(Filter {
            input: strip_ordering(&f.input),
            ..f.clone()
        }),
        LogicalPlan::Projection(p) => LogicalPlan::Projection(Projection {
            input: strip_ordering(&p.input),
            shape: p.shape.clone(),
        }),
        LogicalPlan::Join(j) => LogicalPlan::Join(Join {
            left: strip_ordering(&j.left),
            ..j.clone()
        }),
        LogicalPlan::CollectionJoin(c) => LogicalPlan::CollectionJoin(CollectionJoin {
            input: strip_ordering(&c.input),
            ..c.clone()
        }),
        _ => return plan.clone(),
    };
    Arc::new(rebuilt)
}

/// Splits `Skip`/`Take` off the top of a collection query (looking through
/// one projection). `Take(a).Skip(b)` becomes skip `b`, take `a - b`.
fn peel_paging(
    plan: &Arc<LogicalPlan>,
) -> (Arc<LogicalPlan>, Option<LogicalExpr>, Option<LogicalExpr>) {
    if let LogicalPlan::Projection(p) = plan.as_ref() {
        let (input, skip, take) = peel_paging(&p.input);
        if skip.is_some() || take.is_some() {
            let rebuilt = Arc::new(LogicalPlan::Projection(Projection {
                input,
                shape: p.shape.clone(),
            }));
            return (rebuilt, skip, take);
        }
        return (plan.clone(), None, None);
    }
    match plan.as_ref() {
        LogicalPlan::Limit(l) => match l.input.as_ref() {
            LogicalPlan::Skip(s) => (s.input.clone(), Some(s.count.clone()), Some(l.count.clone())),
            _ => (l.input.clone(), None, Some(l.count.clone())),
        },
        LogicalPlan::Skip(s) => match s.input.as_ref() {
            LogicalPlan::Limit(l) => {
                let take = LogicalExpr::binary(SqlOperator::Subtract, l.count.clone(), s.count.clone());
                (l.input.clone(), Some(s.count.clone()), Some(take))
            }
            _ => (s.input.clone(), Some(s.count.clone()), None),
        },
        _ => (plan.clone(), None, None),
    }
}

fn has_set_semantics(plan: &LogicalPlan) -> bool {
    match plan {
        LogicalPlan::Distinct(_) | LogicalPlan::GroupBy(_) | LogicalPlan::SetOperation(_) => true,
        LogicalPlan::Filter(n) => has_set_semantics(&n.input),
        LogicalPlan::Projection(n) => has_set_semantics(&n.input),
        LogicalPlan::OrderBy(n) => has_set_semantics(&n.input),
        _ => false,
    }
}

/// Row sources introduced by `plan`, not descending into subqueries.
fn collect_sources(plan: &LogicalPlan) -> Vec<SourceId> {
    let mut out = Vec::new();
    if let LogicalPlan::Scan(scan) = plan {
        out.push(scan.source);
    }
    for input in plan.inputs() {
        out.extend(collect_sources(input));
    }
    out
}

/// Pairwise equality of two key lists, `None` when empty.
fn key_equality(left: &[LogicalExpr], right: &[LogicalExpr]) -> Option<LogicalExpr> {
    LogicalExpr::conjunction(
        left.iter()
            .zip(right.iter())
            .map(|(l, r)| LogicalExpr::equal(l.clone(), r.clone()))
            .collect(),
    )
}

/// Aggregate call with the result type LINQ gives it: `Count` is an int,
/// `Sum` of nothing is zero, `Average` of integers is a double.
pub(crate) fn aggregate_expr(function: AggregateFunction, arg: Option<LogicalExpr>) -> LogicalExpr {
    let arg_type = arg
        .as_ref()
        .map(|a| a.type_mapping())
        .unwrap_or_else(|| TypeMapping::non_null(ClrType::Int32));
    match function {
        AggregateFunction::Count | AggregateFunction::LongCount => {
            let clr = if function == AggregateFunction::Count {
                ClrType::Int32
            } else {
                ClrType::Int64
            };
            LogicalExpr::Aggregate {
                function,
                arg: arg.map(Box::new),
                type_mapping: TypeMapping::non_null(clr),
            }
        }
        AggregateFunction::Sum => {
            let sum = LogicalExpr::Aggregate {
                function,
                arg: arg.map(Box::new),
                type_mapping: arg_type.with_nullable(true),
            };
            LogicalExpr::Function {
                function: SqlFunction::Coalesce,
                args: vec![sum, zero_literal(arg_type.clr)],
                type_mapping: arg_type.with_nullable(false),
            }
        }
        AggregateFunction::Average => {
            let clr = if arg_type.clr.is_integral() {
                ClrType::Double
            } else {
                arg_type.clr
            };
            LogicalExpr::Aggregate {
                function,
                arg: arg.map(Box::new),
                type_mapping: TypeMapping::new(clr, true),
            }
        }
        AggregateFunction::Min | AggregateFunction::Max => LogicalExpr::Aggregate {
            function,
            arg: arg.map(Box::new),
            type_mapping: arg_type.with_nullable(true),
        },
    }
}

fn zero_literal(clr: ClrType) -> LogicalExpr {
    let value = match clr {
        ClrType::Byte => Value::Byte(0),
        ClrType::Int16 => Value::Short(0),
        ClrType::Int64 => Value::Long(0),
        ClrType::Single => Value::Single(0.0),
        ClrType::Double => Value::Double(0.0),
        ClrType::Decimal => Value::Decimal(0.0),
        _ => Value::Int(0),
    };
    LogicalExpr::literal(value)
}

/// A top-level `Min`/`Max`/`Average` over non-nullable values has a
/// non-nullable result; an empty input then fails at materialization.
fn declare_non_nullable_result(plan: Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let LogicalPlan::Aggregate(node) = plan.as_ref() else {
        return plan;
    };
    let ProjectionShape::Scalar(LogicalExpr::Aggregate {
        function,
        arg: Some(arg),
        type_mapping,
    }) = &node.shape
    else {
        return plan;
    };
    if !matches!(
        function,
        AggregateFunction::Min | AggregateFunction::Max | AggregateFunction::Average
    ) || arg.is_nullable()
    {
        return plan;
    }
    Arc::new(LogicalPlan::Aggregate(Aggregate {
        input: node.input.clone(),
        shape: ProjectionShape::Scalar(LogicalExpr::Aggregate {
            function: *function,
            arg: Some(arg.clone()),
            type_mapping: type_mapping.with_nullable(false),
        }),
    }))
}

#[cfg(test)]
mod tests;
