//! Binding of lambda bodies against the shapes of the rows they range over.

use std::sync::Arc;

use super::{aggregate_expr, with_joins, Bound, Env, ListValue, Normalizer, Translated};
use crate::query::{AggregateFunction, BinaryOp, ClrType, Expr, Lambda, QueryExpr, TypeMapping, UnaryOp, Value};
use crate::query_planner::errors::{Pass, QueryPlannerError};
use crate::query_planner::logical_expr::{LogicalExpr, SqlFunction, SqlOperator};
use crate::query_planner::logical_plan::{Aggregate, LogicalPlan, Projection};
use crate::query_planner::shape::{ClientProjection, EntityProjection, ProjectionShape};

fn sql_operator(op: BinaryOp) -> SqlOperator {
    match op {
        BinaryOp::Add => SqlOperator::Add,
        BinaryOp::Subtract => SqlOperator::Subtract,
        BinaryOp::Multiply => SqlOperator::Multiply,
        BinaryOp::Divide => SqlOperator::Divide,
        BinaryOp::Modulo => SqlOperator::Modulo,
        BinaryOp::Equal => SqlOperator::Equal,
        BinaryOp::NotEqual => SqlOperator::NotEqual,
        BinaryOp::LessThan => SqlOperator::LessThan,
        BinaryOp::LessThanOrEqual => SqlOperator::LessThanOrEqual,
        BinaryOp::GreaterThan => SqlOperator::GreaterThan,
        BinaryOp::GreaterThanOrEqual => SqlOperator::GreaterThanOrEqual,
        BinaryOp::AndAlso => SqlOperator::And,
        BinaryOp::OrElse => SqlOperator::Or,
        // handled before operator mapping
        BinaryOp::Coalesce => SqlOperator::Or,
    }
}

impl<'a> Normalizer<'a> {
    pub(crate) fn bind_lambda(
        &mut self,
        lambda: &Lambda,
        args: &[ProjectionShape],
        env: &Env,
    ) -> Result<Bound, QueryPlannerError> {
        if lambda.params.len() != args.len() {
            return Err(QueryPlannerError::internal(
                Pass::Normalizer,
                format!(
                    "lambda {} takes {} parameters, bound with {}",
                    lambda,
                    lambda.params.len(),
                    args.len()
                ),
            ));
        }
        let mut scope = env.clone();
        for (name, shape) in lambda.params.iter().zip(args) {
            scope.insert(name.clone(), shape.clone());
        }
        self.bind(&lambda.body, &scope)
    }

    pub(crate) fn bind(&mut self, expr: &Expr, env: &Env) -> Result<Bound, QueryPlannerError> {
        match expr {
            Expr::Constant(Value::List(values)) => Ok(Bound::List(ListValue {
                name: None,
                values: values.clone(),
            })),
            Expr::Constant(value) => Ok(Bound::scalar(LogicalExpr::literal(value.clone()))),
            Expr::Parameter(name) => self.bind_parameter(name),
            Expr::Variable(name) => env
                .get(name)
                .cloned()
                .map(Bound::Shape)
                .ok_or_else(|| QueryPlannerError::translation_failed(name.clone())),
            Expr::Member { target, member } => {
                let bound = self.bind(target, env)?;
                self.member_of(bound, member, expr)
            }
            Expr::Binary { op, left, right } => self.bind_binary(*op, left, right, expr, env),
            Expr::Unary { op, operand } => {
                let bound = self.bind(operand, env)?;
                let inner = self.to_scalar(bound, operand)?;
                Ok(Bound::scalar(match op {
                    UnaryOp::Not => LogicalExpr::Not(Box::new(inner)),
                    UnaryOp::Negate => LogicalExpr::Negate(Box::new(inner)),
                }))
            }
            Expr::Convert { operand, to } => match self.bind(operand, env)? {
                Bound::Shape(ProjectionShape::Scalar(inner)) => {
                    let to = TypeMapping::new(*to, inner.is_nullable());
                    Ok(Bound::scalar(LogicalExpr::Cast {
                        expr: Box::new(inner),
                        to,
                    }))
                }
                other => Ok(other),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let bound = self.bind(test, env)?;
                let test = self.to_scalar(bound, test)?;
                let bound = self.bind(if_true, env)?;
                let then = self.to_scalar(bound, if_true)?;
                let bound = self.bind(if_false, env)?;
                let otherwise = self.to_scalar(bound, if_false)?;
                let clr = if then.is_null_literal() {
                    otherwise.type_mapping().clr
                } else {
                    then.type_mapping().clr
                };
                let type_mapping = TypeMapping::new(clr, then.is_nullable() || otherwise.is_nullable());
                Ok(Bound::scalar(LogicalExpr::Case {
                    whens: vec![(test, then)],
                    else_result: Some(Box::new(otherwise)),
                    type_mapping,
                }))
            }
            Expr::Call {
                method,
                target,
                args,
            } => self.bind_call(method, target.as_deref(), args, expr, env),
            Expr::New(members) => {
                let mut bound = Vec::with_capacity(members.len());
                for (name, member) in members {
                    bound.push((name.clone(), self.bind(member, env)?));
                }
                Ok(Bound::composite(bound))
            }
            Expr::Query(query) => self.bind_subquery(query, env),
        }
    }

    /// Scalar value of a binding; client-only shapes become markers the
    /// analyzer reports with the operator they appear in.
    pub(crate) fn to_scalar(&self, bound: Bound, expr: &Expr) -> Result<LogicalExpr, QueryPlannerError> {
        match bound {
            Bound::Shape(ProjectionShape::Scalar(e)) => Ok(e),
            Bound::Shape(ProjectionShape::Client(c)) => Ok(LogicalExpr::client_only(c.description)),
            Bound::List(_) => Err(QueryPlannerError::translation_failed_with_context(
                expr.to_string(),
                "a local collection can only be used with Contains",
            )),
            _ => Err(QueryPlannerError::translation_failed(expr.to_string())),
        }
    }

    /// Shape of a binding that must not contain queries.
    pub(super) fn plain_shape(&self, bound: Bound, expr: &Expr) -> Result<ProjectionShape, QueryPlannerError> {
        match bound {
            Bound::Shape(shape) => Ok(shape),
            Bound::Composite(members) => {
                let mut shapes = Vec::with_capacity(members.len());
                for (name, member) in members {
                    shapes.push((name, self.plain_shape(member, expr)?));
                }
                Ok(ProjectionShape::Composite(shapes))
            }
            Bound::Query(_) => Err(QueryPlannerError::unsupported(format!(
                "a query cannot be used as a grouping key or element: {}",
                expr
            ))),
            Bound::List(_) => Err(QueryPlannerError::translation_failed(expr.to_string())),
        }
    }

    /// Key columns of a binding: scalars, members of an anonymous type, or
    /// the key of an entity.
    pub(super) fn key_exprs(&self, bound: Bound, expr: &Expr) -> Result<Vec<LogicalExpr>, QueryPlannerError> {
        match bound {
            Bound::Shape(ProjectionShape::Entity(e)) if !e.keyless => Ok(e.key_exprs()),
            Bound::Shape(ProjectionShape::Composite(members)) => {
                let mut out = Vec::new();
                for (_, member) in members {
                    out.extend(self.key_exprs(Bound::Shape(member), expr)?);
                }
                Ok(out)
            }
            other => Ok(vec![self.to_scalar(other, expr)?]),
        }
    }

    fn bind_parameter(&mut self, name: &str) -> Result<Bound, QueryPlannerError> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| QueryPlannerError::MissingParameter(name.to_string()))?;
        Ok(match value {
            Value::List(values) => Bound::List(ListValue {
                name: Some(name.to_string()),
                values: values.clone(),
            }),
            Value::Null => Bound::scalar(LogicalExpr::Literal(
                Value::Null,
                TypeMapping::new(ClrType::String, true),
            )),
            other => {
                let clr = other.clr_type().unwrap_or(ClrType::String);
                let param = self.ctx.closure_parameter(name, TypeMapping::non_null(clr));
                Bound::scalar(LogicalExpr::Parameter(param))
            }
        })
    }

    /// Member access on any binding.
    pub(super) fn member_of(&mut self, bound: Bound, member: &str, expr: &Expr) -> Result<Bound, QueryPlannerError> {
        match bound {
            Bound::Shape(ProjectionShape::Entity(entity)) => self.entity_member(&entity, member, expr),
            Bound::Shape(ProjectionShape::Composite(members)) => members
                .into_iter()
                .find(|(name, _)| name == member)
                .map(|(_, shape)| Bound::Shape(shape))
                .ok_or_else(|| QueryPlannerError::translation_failed(expr.to_string())),
            Bound::Composite(members) => members
                .into_iter()
                .find(|(name, _)| name == member)
                .map(|(_, bound)| bound)
                .ok_or_else(|| QueryPlannerError::translation_failed(expr.to_string())),
            Bound::Shape(ProjectionShape::Grouping { key, .. }) if member == "Key" => Ok(Bound::Shape(*key)),
            Bound::Shape(ProjectionShape::Scalar(scalar)) => Ok(scalar_member(scalar, member, expr)),
            Bound::Shape(client @ ProjectionShape::Client(_)) => {
                Ok(Bound::Shape(ProjectionShape::Client(ClientProjection {
                    function: member.to_string(),
                    args: vec![client],
                    description: expr.to_string(),
                })))
            }
            Bound::Query(t) if t.element.is_some() => self.element_member(*t, member, expr),
            Bound::Query(t) if member == "Count" => {
                let count = aggregate_expr(AggregateFunction::Count, None);
                let type_mapping = count.type_mapping();
                let plan = Arc::new(LogicalPlan::Aggregate(Aggregate {
                    input: t.plan,
                    shape: ProjectionShape::Scalar(count),
                }));
                Ok(Bound::scalar(LogicalExpr::ScalarSubquery {
                    subquery: plan,
                    type_mapping,
                }))
            }
            Bound::List(list) if member == "Count" || member == "Length" => Ok(Bound::scalar(
                LogicalExpr::literal(Value::Int(list.values.len() as i32)),
            )),
            _ => Err(QueryPlannerError::translation_failed(expr.to_string())),
        }
    }

    fn entity_member(
        &mut self,
        entity: &EntityProjection,
        member: &str,
        expr: &Expr,
    ) -> Result<Bound, QueryPlannerError> {
        if let Some(column) = entity.column(member) {
            return Ok(Bound::scalar(column.clone()));
        }
        match self.find_navigation(&entity.entity, member) {
            Some(nav) if nav.owned => entity
                .include(member)
                .cloned()
                .map(Bound::Shape)
                .ok_or_else(|| {
                    QueryPlannerError::internal(
                        Pass::Normalizer,
                        format!("owned navigation {}.{} was not projected", entity.entity, member),
                    )
                }),
            Some(nav) if nav.is_collection() => {
                Ok(Bound::Query(Box::new(self.expand_collection(entity, nav)?)))
            }
            Some(nav) => Ok(Bound::Shape(self.expand_reference(entity, nav)?)),
            None => {
                log::debug!("Normalizer: {}.{} is not mapped, evaluating on the client", entity.entity, member);
                Ok(Bound::Shape(ProjectionShape::Client(ClientProjection {
                    function: format!("{}.{}", entity.entity, member),
                    args: vec![ProjectionShape::Entity(entity.clone())],
                    description: expr.to_string(),
                })))
            }
        }
    }

    /// Member of a single element taken from a subquery: a scalar subquery
    /// for a value, a narrowed query for anything else.
    fn element_member(&mut self, t: Translated, member: &str, expr: &Expr) -> Result<Bound, QueryPlannerError> {
        let shape = t.shape();
        self.ctx.push_scope();
        let inner = self.member_of(Bound::Shape(shape), member, expr);
        let joins = self.ctx.pop_scope()?;
        let inner = inner?;
        let input = with_joins(t.plan.clone(), joins);
        match inner {
            Bound::Shape(ProjectionShape::Scalar(value)) => {
                let type_mapping = value.type_mapping().with_nullable(true);
                let subquery = Arc::new(LogicalPlan::Projection(Projection {
                    input,
                    shape: ProjectionShape::Scalar(value),
                }));
                Ok(Bound::scalar(LogicalExpr::ScalarSubquery {
                    subquery,
                    type_mapping,
                }))
            }
            Bound::Shape(shape @ ProjectionShape::Entity(_)) => {
                let plan = Arc::new(LogicalPlan::Projection(Projection { input, shape }));
                Ok(Bound::Query(Box::new(Translated { plan, ..t })))
            }
            _ => Err(QueryPlannerError::translation_failed(expr.to_string())),
        }
    }

    fn bind_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        expr: &Expr,
        env: &Env,
    ) -> Result<Bound, QueryPlannerError> {
        let l = self.bind(left, env)?;
        let r = self.bind(right, env)?;
        if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual) {
            if let Some(predicate) = entity_comparison(&l, &r, op == BinaryOp::Equal, expr)? {
                return Ok(Bound::scalar(predicate));
            }
        }
        let l = self.to_scalar(l, left)?;
        let r = self.to_scalar(r, right)?;
        let result = match op {
            BinaryOp::Coalesce => {
                let clr = if l.is_null_literal() {
                    r.type_mapping().clr
                } else {
                    l.type_mapping().clr
                };
                let type_mapping = TypeMapping::new(clr, r.is_nullable());
                LogicalExpr::Function {
                    function: SqlFunction::Coalesce,
                    args: vec![l, r],
                    type_mapping,
                }
            }
            BinaryOp::Add
                if l.type_mapping().clr == ClrType::String || r.type_mapping().clr == ClrType::String =>
            {
                LogicalExpr::binary(SqlOperator::Concat, l, r)
            }
            other => LogicalExpr::binary(sql_operator(other), l, r),
        };
        Ok(Bound::scalar(result))
    }

    /// Subquery in expression position: aggregates, quantifiers and elements
    /// reduce to scalar conditions or values, anything else stays a query.
    fn bind_subquery(&mut self, query: &QueryExpr, env: &Env) -> Result<Bound, QueryPlannerError> {
        if let QueryExpr::Collection(inner) = query {
            return self.bind(inner, env);
        }
        if let Some(bound) = self.bind_grouping_aggregate(query, env)? {
            return Ok(bound);
        }
        self.ctx.push_scope();
        let result = self.subquery_body(query, env);
        let leftovers = self.ctx.pop_scope()?;
        let mut bound = result?;
        if !leftovers.is_empty() {
            match &mut bound {
                Bound::Query(t) => t.plan = with_joins(t.plan.clone(), leftovers),
                _ => log::debug!(
                    "Normalizer: {} unapplied joins after {}",
                    leftovers.len(),
                    query.operator_name()
                ),
            }
        }
        Ok(bound)
    }

    fn subquery_body(&mut self, query: &QueryExpr, env: &Env) -> Result<Bound, QueryPlannerError> {
        match query {
            QueryExpr::Aggregate {
                source,
                function,
                selector,
            } => {
                let plan = self.aggregate_plan(source, *function, selector.as_ref(), env)?;
                let type_mapping = match plan.shape() {
                    ProjectionShape::Scalar(e) => e.type_mapping(),
                    _ => {
                        return Err(QueryPlannerError::internal(
                            Pass::Normalizer,
                            "aggregate without a scalar result",
                        ))
                    }
                };
                Ok(Bound::scalar(LogicalExpr::ScalarSubquery {
                    subquery: plan,
                    type_mapping,
                }))
            }
            QueryExpr::Any { .. } | QueryExpr::All { .. } | QueryExpr::Contains { .. } => {
                Ok(Bound::scalar(self.quantifier_body(query, env)?))
            }
            QueryExpr::Element {
                source,
                kind,
                predicate,
            } => {
                let t = self.element_query(source, *kind, predicate.as_ref(), env)?;
                let t = self.apply_includes(t)?;
                match t.shape() {
                    ProjectionShape::Scalar(e) => Ok(Bound::scalar(LogicalExpr::ScalarSubquery {
                        subquery: t.plan,
                        type_mapping: e.type_mapping().with_nullable(true),
                    })),
                    _ => Ok(Bound::Query(Box::new(t))),
                }
            }
            other => Ok(Bound::Query(Box::new(self.translate_query(other, env)?))),
        }
    }

    /// Aggregate over the elements of a group (`g.Count()`, `g.Sum(...)`,
    /// `g.Where(p).Count()`), computed in the grouping query itself.
    fn bind_grouping_aggregate(&mut self, query: &QueryExpr, env: &Env) -> Result<Option<Bound>, QueryPlannerError> {
        let QueryExpr::Aggregate {
            source,
            function,
            selector,
        } = query
        else {
            return Ok(None);
        };
        let mut chain = Vec::new();
        let mut current = source.as_ref();
        let grouping = loop {
            match current {
                QueryExpr::Collection(inner) => match inner.as_ref() {
                    Expr::Variable(name) => break name,
                    _ => return Ok(None),
                },
                QueryExpr::Where { source, .. } | QueryExpr::Select { source, .. } => {
                    chain.push(current);
                    current = source;
                }
                _ => return Ok(None),
            }
        };
        let Some(ProjectionShape::Grouping { element, .. }) = env.get(grouping) else {
            return Ok(None);
        };
        let mut shape = (**element).clone();
        let mut conditions = Vec::new();
        for op in chain.iter().rev() {
            match op {
                QueryExpr::Where { predicate, .. } => {
                    let bound = self.bind_lambda(predicate, &[shape.clone()], env)?;
                    conditions.push(self.to_scalar(bound, &predicate.body)?);
                }
                QueryExpr::Select { selector, .. } => {
                    let bound = self.bind_lambda(selector, &[shape.clone()], env)?;
                    shape = self.plain_shape(bound, &selector.body)?;
                }
                _ => {}
            }
        }
        let arg = match selector {
            Some(selector) => {
                let bound = self.bind_lambda(selector, &[shape], env)?;
                Some(self.to_scalar(bound, &selector.body)?)
            }
            None => match (function, shape) {
                (AggregateFunction::Count | AggregateFunction::LongCount, _) => None,
                (_, ProjectionShape::Scalar(e)) => Some(e),
                _ => return Err(QueryPlannerError::translation_failed(query.to_string())),
            },
        };
        let arg = match LogicalExpr::conjunction(conditions) {
            Some(condition) => {
                let value = arg.unwrap_or_else(|| LogicalExpr::literal(Value::Int(1)));
                let type_mapping = value.type_mapping().with_nullable(true);
                Some(LogicalExpr::Case {
                    whens: vec![(condition, value)],
                    else_result: None,
                    type_mapping,
                })
            }
            None => arg,
        };
        Ok(Some(Bound::scalar(aggregate_expr(*function, arg))))
    }
}

fn scalar_member(scalar: LogicalExpr, member: &str, expr: &Expr) -> Bound {
    let type_mapping = scalar.type_mapping();
    match member {
        "Length" if type_mapping.clr == ClrType::String => Bound::scalar(LogicalExpr::Function {
            function: SqlFunction::Length,
            args: vec![scalar],
            type_mapping: TypeMapping::new(ClrType::Int32, type_mapping.nullable),
        }),
        "HasValue" => Bound::scalar(LogicalExpr::IsNotNull(Box::new(scalar))),
        "Value" => Bound::scalar(scalar),
        _ => Bound::Shape(ProjectionShape::Client(ClientProjection {
            function: format!("{}.{}", type_mapping.clr, member),
            args: vec![ProjectionShape::Scalar(scalar)],
            description: expr.to_string(),
        })),
    }
}

/// `entity == null`, `entity != null` and `entity == entity`, compared by key.
fn entity_comparison(
    left: &Bound,
    right: &Bound,
    equal: bool,
    expr: &Expr,
) -> Result<Option<LogicalExpr>, QueryPlannerError> {
    let entity_of = |b: &Bound| match b {
        Bound::Shape(ProjectionShape::Entity(e)) => Some(e.clone()),
        _ => None,
    };
    let is_null = |b: &Bound| matches!(b, Bound::Shape(ProjectionShape::Scalar(e)) if e.is_null_literal());
    let predicate = match (entity_of(left), entity_of(right)) {
        (Some(e), None) if is_null(right) => null_check(&e, equal),
        (None, Some(e)) if is_null(left) => null_check(&e, equal),
        (Some(a), Some(b)) => {
            let pairs: Vec<LogicalExpr> = a
                .key_exprs()
                .into_iter()
                .zip(b.key_exprs())
                .map(|(l, r)| {
                    let op = if equal { SqlOperator::Equal } else { SqlOperator::NotEqual };
                    LogicalExpr::binary(op, l, r)
                })
                .collect();
            let combined = if equal {
                LogicalExpr::conjunction(pairs)
            } else {
                pairs.into_iter().reduce(LogicalExpr::or)
            };
            combined.ok_or_else(|| QueryPlannerError::translation_failed(expr.to_string()))?
        }
        (None, None) => return Ok(None),
        _ => return Err(QueryPlannerError::translation_failed(expr.to_string())),
    };
    Ok(Some(predicate))
}

fn null_check(entity: &EntityProjection, is_null: bool) -> LogicalExpr {
    let mut columns = entity.key_exprs();
    if columns.is_empty() {
        columns = entity.columns.iter().map(|c| c.expr.clone()).collect();
    }
    let checks = columns.into_iter().map(|c| {
        if is_null {
            LogicalExpr::IsNull(Box::new(c))
        } else {
            LogicalExpr::IsNotNull(Box::new(c))
        }
    });
    let combined = if is_null {
        checks.reduce(LogicalExpr::and)
    } else {
        checks.reduce(LogicalExpr::or)
    };
    combined.unwrap_or_else(|| LogicalExpr::bool_literal(!is_null))
}
