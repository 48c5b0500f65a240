//! Projection shapes.
//!
//! [`ProjectionShape`] travels with the logical plan and describes what each
//! output row materializes into, in terms of server expressions. After
//! lowering, every leaf expression is assigned a result column and the shape
//! becomes a [`QueryShape`], which is all the materializer sees.

use super::errors::QueryPlannerError;
use super::logical_expr::{LogicalExpr, SourceId};
use super::logical_plan::LogicalPlan;
use crate::query::TypeMapping;

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyColumn {
    pub property: String,
    pub expr: LogicalExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityProjection {
    pub source: SourceId,
    pub entity: String,
    /// Mapped properties in projection order (key first).
    pub columns: Vec<PropertyColumn>,
    /// Key property names; empty for keyless and owned entities.
    pub key: Vec<String>,
    /// The entity sits on the optional side of an outer join.
    pub nullable: bool,
    pub keyless: bool,
    /// Eagerly loaded navigations and owned types, by navigation name.
    pub includes: Vec<(String, ProjectionShape)>,
    pub discriminator: Option<DiscriminatorMap>,
}

/// Picks the concrete entity type of a row in a type hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscriminatorMap {
    /// Property (in `columns`) holding the discriminator value.
    pub property: String,
    /// discriminator value -> entity type
    pub types: Vec<(String, String)>,
}

impl EntityProjection {
    pub fn column(&self, property: &str) -> Option<&LogicalExpr> {
        self.columns
            .iter()
            .find(|c| c.property == property)
            .map(|c| &c.expr)
    }

    pub fn key_exprs(&self) -> Vec<LogicalExpr> {
        self.key
            .iter()
            .filter_map(|k| self.column(k).cloned())
            .collect()
    }

    pub fn include(&self, navigation: &str) -> Option<&ProjectionShape> {
        self.includes
            .iter()
            .find(|(name, _)| name == navigation)
            .map(|(_, shape)| shape)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionProjection {
    /// Identifying columns of the owning row; rows are grouped on them.
    pub parent_key: Vec<LogicalExpr>,
    pub element: Box<ProjectionShape>,
    /// Identifying columns of an element; all-null means "no element".
    pub element_key: Vec<LogicalExpr>,
    /// At most one element per parent (`FirstOrDefault` inside a projection).
    pub single: bool,
}

/// Client-side call evaluated after the row is materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientProjection {
    pub function: String,
    pub args: Vec<ProjectionShape>,
    /// Text of the original sub-expression.
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionShape {
    Entity(EntityProjection),
    Scalar(LogicalExpr),
    /// Anonymous type or tuple with named members.
    Composite(Vec<(String, ProjectionShape)>),
    Grouping {
        key: Box<ProjectionShape>,
        element: Box<ProjectionShape>,
    },
    Collection(CollectionProjection),
    Client(ClientProjection),
}

impl ProjectionShape {
    pub fn scalar(expr: LogicalExpr) -> Self {
        ProjectionShape::Scalar(expr)
    }

    /// Server expressions this shape needs in the result row, in output
    /// order. Duplicates are kept; lowering dedupes by column.
    pub fn scalar_leaves(&self) -> Vec<&LogicalExpr> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LogicalExpr>) {
        match self {
            ProjectionShape::Entity(entity) => {
                for c in &entity.columns {
                    out.push(&c.expr);
                }
                for (_, include) in &entity.includes {
                    include.collect_leaves(out);
                }
            }
            ProjectionShape::Scalar(expr) => out.push(expr),
            ProjectionShape::Composite(members) => {
                for (_, member) in members {
                    member.collect_leaves(out);
                }
            }
            ProjectionShape::Grouping { key, element } => {
                key.collect_leaves(out);
                element.collect_leaves(out);
            }
            ProjectionShape::Collection(collection) => {
                out.extend(collection.parent_key.iter());
                collection.element.collect_leaves(out);
                out.extend(collection.element_key.iter());
            }
            ProjectionShape::Client(client) => {
                for arg in &client.args {
                    arg.collect_leaves(out);
                }
            }
        }
    }

    /// Leaves paired with the member name they are projected under, used to
    /// pick result column aliases.
    pub fn named_leaves(&self) -> Vec<(Option<String>, &LogicalExpr)> {
        let mut out = Vec::new();
        self.collect_named(None, &mut out);
        out
    }

    fn collect_named<'a>(
        &'a self,
        name: Option<&str>,
        out: &mut Vec<(Option<String>, &'a LogicalExpr)>,
    ) {
        match self {
            ProjectionShape::Entity(entity) => {
                for c in &entity.columns {
                    out.push((None, &c.expr));
                }
                for (_, include) in &entity.includes {
                    include.collect_named(None, out);
                }
            }
            ProjectionShape::Scalar(expr) => out.push((name.map(str::to_string), expr)),
            ProjectionShape::Composite(members) => {
                for (member, shape) in members {
                    shape.collect_named(Some(member), out);
                }
            }
            ProjectionShape::Grouping { key, element } => {
                key.collect_named(Some("Key"), out);
                element.collect_named(None, out);
            }
            ProjectionShape::Collection(collection) => {
                for k in &collection.parent_key {
                    out.push((None, k));
                }
                collection.element.collect_named(None, out);
                for k in &collection.element_key {
                    out.push((None, k));
                }
            }
            ProjectionShape::Client(client) => {
                for arg in &client.args {
                    arg.collect_named(None, out);
                }
            }
        }
    }

    /// Rebuilds the shape with every leaf expression passed through `f`.
    pub fn map_scalars(
        &self,
        f: &mut dyn FnMut(LogicalExpr) -> Result<LogicalExpr, QueryPlannerError>,
    ) -> Result<ProjectionShape, QueryPlannerError> {
        Ok(match self {
            ProjectionShape::Entity(entity) => ProjectionShape::Entity(EntityProjection {
                source: entity.source,
                entity: entity.entity.clone(),
                columns: entity
                    .columns
                    .iter()
                    .map(|c| {
                        Ok(PropertyColumn {
                            property: c.property.clone(),
                            expr: f(c.expr.clone())?,
                        })
                    })
                    .collect::<Result<Vec<_>, QueryPlannerError>>()?,
                key: entity.key.clone(),
                nullable: entity.nullable,
                keyless: entity.keyless,
                includes: entity
                    .includes
                    .iter()
                    .map(|(name, shape)| Ok((name.clone(), shape.map_scalars(f)?)))
                    .collect::<Result<Vec<_>, QueryPlannerError>>()?,
                discriminator: entity.discriminator.clone(),
            }),
            ProjectionShape::Scalar(expr) => ProjectionShape::Scalar(f(expr.clone())?),
            ProjectionShape::Composite(members) => ProjectionShape::Composite(
                members
                    .iter()
                    .map(|(name, shape)| Ok((name.clone(), shape.map_scalars(f)?)))
                    .collect::<Result<Vec<_>, QueryPlannerError>>()?,
            ),
            ProjectionShape::Grouping { key, element } => ProjectionShape::Grouping {
                key: Box::new(key.map_scalars(f)?),
                element: Box::new(element.map_scalars(f)?),
            },
            ProjectionShape::Collection(collection) => {
                ProjectionShape::Collection(CollectionProjection {
                    parent_key: collection
                        .parent_key
                        .iter()
                        .map(|k| f(k.clone()))
                        .collect::<Result<Vec<_>, _>>()?,
                    element: Box::new(collection.element.map_scalars(f)?),
                    element_key: collection
                        .element_key
                        .iter()
                        .map(|k| f(k.clone()))
                        .collect::<Result<Vec<_>, _>>()?,
                    single: collection.single,
                })
            }
            ProjectionShape::Client(client) => ProjectionShape::Client(ClientProjection {
                function: client.function.clone(),
                args: client
                    .args
                    .iter()
                    .map(|a| a.map_scalars(f))
                    .collect::<Result<Vec<_>, _>>()?,
                description: client.description.clone(),
            }),
        })
    }

    /// Same shape read through the optional side of an outer join.
    pub fn make_nullable(&self) -> ProjectionShape {
        let mut mark = |e: LogicalExpr| -> Result<LogicalExpr, QueryPlannerError> { Ok(e.into_nullable()) };
        let mapped = self.map_scalars(&mut mark).unwrap_or_else(|_| self.clone());
        mark_entities_nullable(mapped)
    }

    pub fn contains_client(&self) -> bool {
        match self {
            ProjectionShape::Client(_) => true,
            ProjectionShape::Entity(entity) => {
                entity.includes.iter().any(|(_, s)| s.contains_client())
            }
            ProjectionShape::Composite(members) => members.iter().any(|(_, s)| s.contains_client()),
            ProjectionShape::Grouping { key, element } => {
                key.contains_client() || element.contains_client()
            }
            ProjectionShape::Collection(c) => c.element.contains_client(),
            ProjectionShape::Scalar(_) => false,
        }
    }

    pub fn contains_collection(&self) -> bool {
        match self {
            ProjectionShape::Collection(_) => true,
            ProjectionShape::Entity(entity) => {
                entity.includes.iter().any(|(_, s)| s.contains_collection())
            }
            ProjectionShape::Composite(members) => {
                members.iter().any(|(_, s)| s.contains_collection())
            }
            ProjectionShape::Grouping { key, element } => {
                key.contains_collection() || element.contains_collection()
            }
            ProjectionShape::Client(c) => c.args.iter().any(|a| a.contains_collection()),
            ProjectionShape::Scalar(_) => false,
        }
    }

    /// Whether two shapes can be combined by a set operation: same structure
    /// and the same leaf types position by position.
    pub fn is_compatible_with(&self, other: &ProjectionShape) -> bool {
        match (self, other) {
            (ProjectionShape::Entity(a), ProjectionShape::Entity(b)) => {
                a.entity == b.entity && a.includes.len() == b.includes.len()
            }
            (ProjectionShape::Scalar(a), ProjectionShape::Scalar(b)) => {
                a.type_mapping().clr == b.type_mapping().clr
            }
            (ProjectionShape::Composite(a), ProjectionShape::Composite(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((na, sa), (nb, sb))| na == nb && sa.is_compatible_with(sb))
            }
            _ => false,
        }
    }

    /// Converts to the materialization contract, asking `slot` for the result
    /// column of every leaf.
    pub fn to_query_shape(
        &self,
        slot: &mut dyn FnMut(&LogicalExpr) -> Option<usize>,
    ) -> Result<QueryShape, QueryPlannerError> {
        let mut column = |e: &LogicalExpr| -> Result<ColumnSlot, QueryPlannerError> {
            let ordinal = slot(e).ok_or_else(|| {
                QueryPlannerError::unsupported(format!("expression {} is not projected", e))
            })?;
            Ok(ColumnSlot {
                ordinal,
                type_mapping: e.type_mapping(),
            })
        };
        self.query_shape_with(&mut column)
    }

    fn query_shape_with(
        &self,
        column: &mut dyn FnMut(&LogicalExpr) -> Result<ColumnSlot, QueryPlannerError>,
    ) -> Result<QueryShape, QueryPlannerError> {
        Ok(match self {
            ProjectionShape::Entity(entity) => {
                let mut properties = Vec::with_capacity(entity.columns.len());
                for c in &entity.columns {
                    properties.push(PropertySlot {
                        name: c.property.clone(),
                        slot: column(&c.expr)?,
                    });
                }
                let key = entity
                    .key
                    .iter()
                    .filter_map(|k| properties.iter().position(|p| &p.name == k))
                    .collect();
                let mut includes = Vec::with_capacity(entity.includes.len());
                for (name, shape) in &entity.includes {
                    includes.push((name.clone(), shape.query_shape_with(column)?));
                }
                let discriminator = entity.discriminator.as_ref().and_then(|d| {
                    properties
                        .iter()
                        .position(|p| p.name == d.property)
                        .map(|property| DiscriminatorSlot {
                            property,
                            types: d.types.clone(),
                        })
                });
                QueryShape::Entity(EntityShape {
                    entity: entity.entity.clone(),
                    properties,
                    key,
                    nullable: entity.nullable,
                    keyless: entity.keyless,
                    includes,
                    discriminator,
                })
            }
            ProjectionShape::Scalar(expr) => QueryShape::Scalar(column(expr)?),
            ProjectionShape::Composite(members) => {
                let mut out = Vec::with_capacity(members.len());
                for (name, shape) in members {
                    out.push((name.clone(), shape.query_shape_with(column)?));
                }
                QueryShape::Composite(out)
            }
            ProjectionShape::Grouping { key, element } => QueryShape::Grouping {
                key: Box::new(key.query_shape_with(column)?),
                element: Box::new(element.query_shape_with(column)?),
            },
            ProjectionShape::Collection(collection) => {
                let mut parent_key = Vec::new();
                for k in &collection.parent_key {
                    parent_key.push(column(k)?.ordinal);
                }
                let mut element_key = Vec::new();
                for k in &collection.element_key {
                    element_key.push(column(k)?.ordinal);
                }
                QueryShape::Collection(CollectionShape {
                    parent_key,
                    element_key,
                    element: Box::new(collection.element.query_shape_with(column)?),
                    single: collection.single,
                })
            }
            ProjectionShape::Client(client) => {
                let mut args = Vec::with_capacity(client.args.len());
                for arg in &client.args {
                    args.push(arg.query_shape_with(column)?);
                }
                QueryShape::Client(ClientShape {
                    function: client.function.clone(),
                    args,
                    description: client.description.clone(),
                })
            }
        })
    }
}

fn mark_entities_nullable(shape: ProjectionShape) -> ProjectionShape {
    match shape {
        ProjectionShape::Entity(mut entity) => {
            entity.nullable = true;
            entity.includes = entity
                .includes
                .into_iter()
                .map(|(n, s)| (n, mark_entities_nullable(s)))
                .collect();
            ProjectionShape::Entity(entity)
        }
        ProjectionShape::Composite(members) => ProjectionShape::Composite(
            members
                .into_iter()
                .map(|(n, s)| (n, mark_entities_nullable(s)))
                .collect(),
        ),
        other => other,
    }
}

/// Shape of the rows a plan produces.
pub fn shape_for(plan: &LogicalPlan) -> ProjectionShape {
    match plan {
        LogicalPlan::Empty => ProjectionShape::Composite(vec![]),
        LogicalPlan::Scan(scan) => scan.shape.clone(),
        LogicalPlan::Projection(p) => p.shape.clone(),
        LogicalPlan::Join(j) => j.shape.clone(),
        LogicalPlan::CollectionJoin(c) => c.shape.clone(),
        LogicalPlan::GroupBy(g) => g.shape.clone(),
        LogicalPlan::Aggregate(a) => a.shape.clone(),
        LogicalPlan::SetOperation(s) => s.shape.clone(),
        LogicalPlan::Filter(f) => shape_for(&f.input),
        LogicalPlan::OrderBy(o) => shape_for(&o.input),
        LogicalPlan::Skip(s) => shape_for(&s.input),
        LogicalPlan::Limit(l) => shape_for(&l.input),
        LogicalPlan::Distinct(d) => shape_for(&d.input),
    }
}

/// A result column and the type it is read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSlot {
    pub ordinal: usize,
    pub type_mapping: TypeMapping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySlot {
    pub name: String,
    pub slot: ColumnSlot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityShape {
    pub entity: String,
    pub properties: Vec<PropertySlot>,
    /// Indexes into `properties` of the key.
    pub key: Vec<usize>,
    pub nullable: bool,
    pub keyless: bool,
    pub includes: Vec<(String, QueryShape)>,
    pub discriminator: Option<DiscriminatorSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscriminatorSlot {
    /// Index into `properties`.
    pub property: usize,
    pub types: Vec<(String, String)>,
}

impl EntityShape {
    /// Concrete entity type named by the row's discriminator value.
    pub fn concrete_type(&self, discriminator_value: Option<&str>) -> &str {
        match (&self.discriminator, discriminator_value) {
            (Some(d), Some(value)) => d
                .types
                .iter()
                .find(|(v, _)| v == value)
                .map(|(_, entity)| entity.as_str())
                .unwrap_or(&self.entity),
            _ => &self.entity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionShape {
    pub parent_key: Vec<usize>,
    pub element_key: Vec<usize>,
    pub element: Box<QueryShape>,
    pub single: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientShape {
    pub function: String,
    pub args: Vec<QueryShape>,
    pub description: String,
}

/// What one result row (or row group) materializes into, by column ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    Entity(EntityShape),
    Scalar(ColumnSlot),
    Composite(Vec<(String, QueryShape)>),
    Grouping {
        key: Box<QueryShape>,
        element: Box<QueryShape>,
    },
    Collection(CollectionShape),
    Client(ClientShape),
}

impl QueryShape {
    /// True when a result spans several consecutive rows.
    pub fn spans_rows(&self) -> bool {
        match self {
            QueryShape::Grouping { .. } | QueryShape::Collection(_) => true,
            QueryShape::Entity(e) => e.includes.iter().any(|(_, s)| s.spans_rows()),
            QueryShape::Composite(members) => members.iter().any(|(_, s)| s.spans_rows()),
            QueryShape::Client(c) => c.args.iter().any(|a| a.spans_rows()),
            QueryShape::Scalar(_) => false,
        }
    }

    /// Client functions this shape calls.
    pub fn client_functions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_client_functions(&mut out);
        out
    }

    fn collect_client_functions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            QueryShape::Client(c) => {
                out.push(&c.function);
                for arg in &c.args {
                    arg.collect_client_functions(out);
                }
            }
            QueryShape::Entity(e) => {
                for (_, s) in &e.includes {
                    s.collect_client_functions(out);
                }
            }
            QueryShape::Composite(members) => {
                for (_, s) in members {
                    s.collect_client_functions(out);
                }
            }
            QueryShape::Grouping { key, element } => {
                key.collect_client_functions(out);
                element.collect_client_functions(out);
            }
            QueryShape::Collection(c) => c.element.collect_client_functions(out),
            QueryShape::Scalar(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ClrType;
    use crate::query_planner::logical_expr::ColumnRef;

    fn column(name: &str) -> LogicalExpr {
        LogicalExpr::Column(ColumnRef {
            source: SourceId(0),
            column: name.to_string(),
            path: vec![name.to_string()],
            type_mapping: TypeMapping::non_null(ClrType::Int32),
        })
    }

    fn entity() -> ProjectionShape {
        ProjectionShape::Entity(EntityProjection {
            source: SourceId(0),
            entity: "Order".to_string(),
            columns: vec![
                PropertyColumn {
                    property: "OrderID".to_string(),
                    expr: column("OrderID"),
                },
                PropertyColumn {
                    property: "EmployeeID".to_string(),
                    expr: column("EmployeeID"),
                },
            ],
            key: vec!["OrderID".to_string()],
            nullable: false,
            keyless: false,
            includes: vec![],
            discriminator: None,
        })
    }

    #[test]
    fn test_leaves_follow_member_order() {
        let shape = ProjectionShape::Composite(vec![
            ("Id".to_string(), ProjectionShape::Scalar(column("OrderID"))),
            ("Order".to_string(), entity()),
        ]);
        let leaves = shape.scalar_leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0], &column("OrderID"));
        assert_eq!(shape.named_leaves()[0].0.as_deref(), Some("Id"));
    }

    #[test]
    fn test_make_nullable_marks_entity_and_columns() {
        match entity().make_nullable() {
            ProjectionShape::Entity(e) => {
                assert!(e.nullable);
                assert!(e.columns.iter().all(|c| c.expr.is_nullable()));
            }
            other => panic!("Expected entity shape, got {:?}", other),
        }
    }

    #[test]
    fn test_query_shape_uses_slots() {
        let shape = entity();
        let mut next = 0;
        let qs = shape
            .to_query_shape(&mut |_| {
                next += 1;
                Some(next - 1)
            })
            .unwrap();
        match qs {
            QueryShape::Entity(e) => {
                assert_eq!(e.key, vec![0]);
                assert_eq!(e.properties[1].slot.ordinal, 1);
            }
            other => panic!("Expected entity shape, got {:?}", other),
        }
    }

    #[test]
    fn test_set_operation_compatibility() {
        let a = ProjectionShape::Composite(vec![("A".to_string(), ProjectionShape::Scalar(column("X")))]);
        let b = ProjectionShape::Composite(vec![("B".to_string(), ProjectionShape::Scalar(column("X")))]);
        assert!(a.is_compatible_with(&a.clone()));
        assert!(!a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&entity()));
    }
}
