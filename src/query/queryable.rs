use serde::{Deserialize, Serialize};

use super::expr::{Expr, Lambda};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    LongCount,
    Sum,
    Average,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "Count",
            AggregateFunction::LongCount => "LongCount",
            AggregateFunction::Sum => "Sum",
            AggregateFunction::Average => "Average",
            AggregateFunction::Min => "Min",
            AggregateFunction::Max => "Max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
}

impl ElementKind {
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::First => "First",
            ElementKind::FirstOrDefault => "FirstOrDefault",
            ElementKind::Single => "Single",
            ElementKind::SingleOrDefault => "SingleOrDefault",
            ElementKind::Last => "Last",
            ElementKind::LastOrDefault => "LastOrDefault",
        }
    }

    pub fn allows_empty(self) -> bool {
        matches!(
            self,
            ElementKind::FirstOrDefault | ElementKind::SingleOrDefault | ElementKind::LastOrDefault
        )
    }

    pub fn is_single(self) -> bool {
        matches!(self, ElementKind::Single | ElementKind::SingleOrDefault)
    }

    pub fn is_last(self) -> bool {
        matches!(self, ElementKind::Last | ElementKind::LastOrDefault)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperationKind {
    Union,
    Concat,
    Intersect,
    Except,
}

impl SetOperationKind {
    pub fn name(self) -> &'static str {
        match self {
            SetOperationKind::Union => "Union",
            SetOperationKind::Concat => "Concat",
            SetOperationKind::Intersect => "Intersect",
            SetOperationKind::Except => "Except",
        }
    }
}

/// Operator chain of a LINQ query. Each operator wraps its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryExpr {
    /// Query root over every instance of a mapped entity.
    Set { entity: String },
    /// Query root over raw SQL that returns rows of an entity.
    FromSql { entity: String, sql: String },
    /// Query rooted at a collection-valued expression: a collection
    /// navigation, or a local list parameter.
    Collection(Box<Expr>),
    Where {
        source: Box<QueryExpr>,
        predicate: Lambda,
    },
    Select {
        source: Box<QueryExpr>,
        selector: Lambda,
    },
    SelectMany {
        source: Box<QueryExpr>,
        collection: Lambda,
        result: Option<Lambda>,
    },
    Join {
        outer: Box<QueryExpr>,
        inner: Box<QueryExpr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
        kind: JoinKind,
    },
    OrderBy {
        source: Box<QueryExpr>,
        key: Lambda,
        descending: bool,
    },
    ThenBy {
        source: Box<QueryExpr>,
        key: Lambda,
        descending: bool,
    },
    GroupBy {
        source: Box<QueryExpr>,
        key: Lambda,
        element: Option<Lambda>,
    },
    Distinct {
        source: Box<QueryExpr>,
    },
    Skip {
        source: Box<QueryExpr>,
        count: Box<Expr>,
    },
    Take {
        source: Box<QueryExpr>,
        count: Box<Expr>,
    },
    SetOperation {
        left: Box<QueryExpr>,
        right: Box<QueryExpr>,
        kind: SetOperationKind,
    },
    Include {
        source: Box<QueryExpr>,
        navigation: Vec<String>,
    },
    IgnoreQueryFilters {
        source: Box<QueryExpr>,
    },
    AsNoTracking {
        source: Box<QueryExpr>,
    },
    Aggregate {
        source: Box<QueryExpr>,
        function: AggregateFunction,
        selector: Option<Lambda>,
    },
    Any {
        source: Box<QueryExpr>,
        predicate: Option<Lambda>,
    },
    All {
        source: Box<QueryExpr>,
        predicate: Lambda,
    },
    Contains {
        source: Box<QueryExpr>,
        item: Box<Expr>,
    },
    Element {
        source: Box<QueryExpr>,
        kind: ElementKind,
        predicate: Option<Lambda>,
    },
}

impl QueryExpr {
    /// Whether the operator ends the chain and produces a single value.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryExpr::Aggregate { .. }
                | QueryExpr::Any { .. }
                | QueryExpr::All { .. }
                | QueryExpr::Contains { .. }
                | QueryExpr::Element { .. }
        )
    }

    pub fn operator_name(&self) -> &'static str {
        match self {
            QueryExpr::Set { .. } => "DbSet",
            QueryExpr::FromSql { .. } => "FromSql",
            QueryExpr::Collection(_) => "Collection",
            QueryExpr::Where { .. } => "Where",
            QueryExpr::Select { .. } => "Select",
            QueryExpr::SelectMany { .. } => "SelectMany",
            QueryExpr::Join { kind: JoinKind::Inner, .. } => "Join",
            QueryExpr::Join { kind: JoinKind::Left, .. } => "LeftJoin",
            QueryExpr::OrderBy { descending: false, .. } => "OrderBy",
            QueryExpr::OrderBy { descending: true, .. } => "OrderByDescending",
            QueryExpr::ThenBy { descending: false, .. } => "ThenBy",
            QueryExpr::ThenBy { descending: true, .. } => "ThenByDescending",
            QueryExpr::GroupBy { .. } => "GroupBy",
            QueryExpr::Distinct { .. } => "Distinct",
            QueryExpr::Skip { .. } => "Skip",
            QueryExpr::Take { .. } => "Take",
            QueryExpr::SetOperation { kind, .. } => kind.name(),
            QueryExpr::Include { .. } => "Include",
            QueryExpr::IgnoreQueryFilters { .. } => "IgnoreQueryFilters",
            QueryExpr::AsNoTracking { .. } => "AsNoTracking",
            QueryExpr::Aggregate { function, .. } => function.name(),
            QueryExpr::Any { .. } => "Any",
            QueryExpr::All { .. } => "All",
            QueryExpr::Contains { .. } => "Contains",
            QueryExpr::Element { kind, .. } => kind.name(),
        }
    }
}

/// Fluent, lazily-composed query. Nothing is translated until the query is
/// compiled or executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queryable {
    expr: QueryExpr,
}

impl Queryable {
    pub fn set(entity: &str) -> Self {
        Queryable {
            expr: QueryExpr::Set {
                entity: entity.to_string(),
            },
        }
    }

    pub fn from_sql(entity: &str, sql: &str) -> Self {
        Queryable {
            expr: QueryExpr::FromSql {
                entity: entity.to_string(),
                sql: sql.to_string(),
            },
        }
    }

    pub fn over(collection: Expr) -> Self {
        Queryable {
            expr: QueryExpr::Collection(Box::new(collection)),
        }
    }

    pub fn from_expr(expr: QueryExpr) -> Self {
        Queryable { expr }
    }

    pub fn expr(&self) -> &QueryExpr {
        &self.expr
    }

    pub fn into_expr(self) -> QueryExpr {
        self.expr
    }

    /// Uses the query as a value inside another expression (subquery).
    pub fn into_value(self) -> Expr {
        Expr::Query(Box::new(self.expr))
    }

    fn source(self) -> Box<QueryExpr> {
        Box::new(self.expr)
    }

    fn wrap(expr: QueryExpr) -> Self {
        Queryable { expr }
    }

    pub fn filter(self, predicate: Lambda) -> Self {
        Self::wrap(QueryExpr::Where {
            source: self.source(),
            predicate,
        })
    }

    pub fn select(self, selector: Lambda) -> Self {
        Self::wrap(QueryExpr::Select {
            source: self.source(),
            selector,
        })
    }

    pub fn select_many(self, collection: Lambda, result: Option<Lambda>) -> Self {
        Self::wrap(QueryExpr::SelectMany {
            source: self.source(),
            collection,
            result,
        })
    }

    pub fn join(self, inner: Queryable, outer_key: Lambda, inner_key: Lambda, result: Lambda) -> Self {
        Self::wrap(QueryExpr::Join {
            outer: self.source(),
            inner: inner.source(),
            outer_key,
            inner_key,
            result,
            kind: JoinKind::Inner,
        })
    }

    pub fn left_join(
        self,
        inner: Queryable,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    ) -> Self {
        Self::wrap(QueryExpr::Join {
            outer: self.source(),
            inner: inner.source(),
            outer_key,
            inner_key,
            result,
            kind: JoinKind::Left,
        })
    }

    pub fn order_by(self, key: Lambda) -> Self {
        Self::wrap(QueryExpr::OrderBy {
            source: self.source(),
            key,
            descending: false,
        })
    }

    pub fn order_by_descending(self, key: Lambda) -> Self {
        Self::wrap(QueryExpr::OrderBy {
            source: self.source(),
            key,
            descending: true,
        })
    }

    pub fn then_by(self, key: Lambda) -> Self {
        Self::wrap(QueryExpr::ThenBy {
            source: self.source(),
            key,
            descending: false,
        })
    }

    pub fn then_by_descending(self, key: Lambda) -> Self {
        Self::wrap(QueryExpr::ThenBy {
            source: self.source(),
            key,
            descending: true,
        })
    }

    pub fn group_by(self, key: Lambda) -> Self {
        Self::wrap(QueryExpr::GroupBy {
            source: self.source(),
            key,
            element: None,
        })
    }

    pub fn distinct(self) -> Self {
        Self::wrap(QueryExpr::Distinct {
            source: self.source(),
        })
    }

    pub fn skip(self, count: impl Into<Expr>) -> Self {
        Self::wrap(QueryExpr::Skip {
            source: self.source(),
            count: Box::new(count.into()),
        })
    }

    pub fn take(self, count: impl Into<Expr>) -> Self {
        Self::wrap(QueryExpr::Take {
            source: self.source(),
            count: Box::new(count.into()),
        })
    }

    fn set_operation(self, other: Queryable, kind: SetOperationKind) -> Self {
        Self::wrap(QueryExpr::SetOperation {
            left: self.source(),
            right: other.source(),
            kind,
        })
    }

    pub fn union(self, other: Queryable) -> Self {
        self.set_operation(other, SetOperationKind::Union)
    }

    pub fn concat(self, other: Queryable) -> Self {
        self.set_operation(other, SetOperationKind::Concat)
    }

    pub fn intersect(self, other: Queryable) -> Self {
        self.set_operation(other, SetOperationKind::Intersect)
    }

    pub fn except(self, other: Queryable) -> Self {
        self.set_operation(other, SetOperationKind::Except)
    }

    /// Eager-loads a navigation path, e.g. `["Orders"]` or `["Customer"]`.
    pub fn include(self, path: &[&str]) -> Self {
        Self::wrap(QueryExpr::Include {
            source: self.source(),
            navigation: path.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn ignore_query_filters(self) -> Self {
        Self::wrap(QueryExpr::IgnoreQueryFilters {
            source: self.source(),
        })
    }

    pub fn as_no_tracking(self) -> Self {
        Self::wrap(QueryExpr::AsNoTracking {
            source: self.source(),
        })
    }

    fn aggregate(self, function: AggregateFunction, selector: Option<Lambda>) -> Self {
        Self::wrap(QueryExpr::Aggregate {
            source: self.source(),
            function,
            selector,
        })
    }

    pub fn count(self) -> Self {
        self.aggregate(AggregateFunction::Count, None)
    }

    pub fn long_count(self) -> Self {
        self.aggregate(AggregateFunction::LongCount, None)
    }

    pub fn sum(self, selector: Lambda) -> Self {
        self.aggregate(AggregateFunction::Sum, Some(selector))
    }

    pub fn average(self, selector: Lambda) -> Self {
        self.aggregate(AggregateFunction::Average, Some(selector))
    }

    pub fn min(self, selector: Lambda) -> Self {
        self.aggregate(AggregateFunction::Min, Some(selector))
    }

    pub fn max(self, selector: Lambda) -> Self {
        self.aggregate(AggregateFunction::Max, Some(selector))
    }

    pub fn any(self) -> Self {
        Self::wrap(QueryExpr::Any {
            source: self.source(),
            predicate: None,
        })
    }

    pub fn any_where(self, predicate: Lambda) -> Self {
        Self::wrap(QueryExpr::Any {
            source: self.source(),
            predicate: Some(predicate),
        })
    }

    pub fn all(self, predicate: Lambda) -> Self {
        Self::wrap(QueryExpr::All {
            source: self.source(),
            predicate,
        })
    }

    pub fn contains(self, item: impl Into<Expr>) -> Self {
        Self::wrap(QueryExpr::Contains {
            source: self.source(),
            item: Box::new(item.into()),
        })
    }

    fn element(self, kind: ElementKind) -> Self {
        Self::wrap(QueryExpr::Element {
            source: self.source(),
            kind,
            predicate: None,
        })
    }

    pub fn first(self) -> Self {
        self.element(ElementKind::First)
    }

    pub fn first_or_default(self) -> Self {
        self.element(ElementKind::FirstOrDefault)
    }

    pub fn single(self) -> Self {
        self.element(ElementKind::Single)
    }

    pub fn single_or_default(self) -> Self {
        self.element(ElementKind::SingleOrDefault)
    }

    pub fn last(self) -> Self {
        self.element(ElementKind::Last)
    }

    pub fn last_or_default(self) -> Self {
        self.element(ElementKind::LastOrDefault)
    }
}
