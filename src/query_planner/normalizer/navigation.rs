//! Entity roots, navigation expansion and `Include`.

use std::sync::Arc;

use super::{with_joins, Correlation, Env, Normalizer, PendingCollection, Translated};
use crate::model::{EntityType, ModelError, Navigation, Property};
use crate::query::{ClrType, TypeMapping, Value};
use crate::query_planner::errors::{Pass, QueryPlannerError};
use crate::query_planner::logical_expr::{ColumnRef, LogicalExpr, SourceId};
use crate::query_planner::logical_plan::{Filter, JoinType, LogicalPlan, Projection, Scan, ScanSource};
use crate::query_planner::plan_ctx::PendingJoin;
use crate::query_planner::shape::{DiscriminatorMap, EntityProjection, ProjectionShape, PropertyColumn};

const DOCUMENT_DISCRIMINATOR: &str = "Discriminator";

fn property_column(source: SourceId, property: &Property, nullable: bool) -> PropertyColumn {
    PropertyColumn {
        property: property.name.clone(),
        expr: LogicalExpr::Column(ColumnRef {
            source,
            column: property.column.clone(),
            path: vec![property.name.clone()],
            type_mapping: TypeMapping::new(property.clr_type, property.nullable || nullable),
        }),
    }
}

/// Include paths grouped by their first navigation, in first-seen order.
fn group_paths(paths: &[Vec<String>]) -> Vec<(String, Vec<Vec<String>>)> {
    let mut groups: Vec<(String, Vec<Vec<String>>)> = Vec::new();
    for path in paths {
        let Some((first, rest)) = path.split_first() else {
            continue;
        };
        let index = match groups.iter().position(|(name, _)| name == first) {
            Some(index) => index,
            None => {
                groups.push((first.clone(), Vec::new()));
                groups.len() - 1
            }
        };
        if !rest.is_empty() {
            groups[index].1.push(rest.to_vec());
        }
    }
    groups
}

impl<'a> Normalizer<'a> {
    /// Scan of an entity set with its discriminator and query filter applied.
    pub(super) fn entity_root(
        &mut self,
        entity_name: &str,
        raw_sql: Option<&str>,
        nullable: bool,
        nav_target: bool,
    ) -> Result<Translated, QueryPlannerError> {
        let model = self.model;
        let entity = model.entity(entity_name)?;
        if entity.owned {
            return Err(QueryPlannerError::unsupported(format!(
                "owned type `{}` can only be reached through its owner",
                entity.name
            )));
        }
        let source = self.ctx.add_source(&entity.name, nullable, nav_target);
        let projection = self.entity_projection(entity, source, nullable)?;
        let table = match (raw_sql, &entity.defining_query) {
            (Some(sql), _) => ScanSource::Sql {
                sql: sql.to_string(),
                verbatim: true,
            },
            (None, Some(sql)) => ScanSource::Sql {
                sql: sql.clone(),
                verbatim: false,
            },
            (None, None) => ScanSource::Table {
                name: entity.table.clone(),
                schema: entity.schema.clone(),
            },
        };
        let discriminator = self.discriminator_predicate(entity, &projection)?;
        let shape = ProjectionShape::Entity(projection);
        let mut plan = Arc::new(LogicalPlan::Scan(Scan {
            source,
            entity: entity.name.clone(),
            table,
            alias_hint: if self.document_store {
                "c".to_string()
            } else {
                entity.alias_hint()
            },
            shape: shape.clone(),
        }));
        if let Some(predicate) = discriminator {
            plan = Arc::new(LogicalPlan::Filter(Filter {
                input: plan,
                predicate,
                correlation: false,
            }));
        }
        if let Some(filter) = &entity.query_filter {
            if self.ctx.ignore_query_filters() {
                log::debug!("Normalizer: query filter of {} ignored", entity.name);
            } else {
                let mark = self.ctx.pending_mark();
                let bound = self.bind_lambda(filter, &[shape], &Env::new())?;
                let predicate = self.to_scalar(bound, &filter.body)?;
                let joins = self.ctx.take_pending_joins_from(mark);
                plan = Arc::new(LogicalPlan::Filter(Filter {
                    input: with_joins(plan, joins),
                    predicate,
                    correlation: false,
                }));
            }
        }
        Ok(Translated::new(plan))
    }

    /// Projection of every mapped property of `entity` and its derived types,
    /// plus owned types inlined into the same row.
    pub(super) fn entity_projection(
        &self,
        entity: &EntityType,
        source: SourceId,
        nullable: bool,
    ) -> Result<EntityProjection, QueryPlannerError> {
        let model = self.model;
        let mut columns: Vec<PropertyColumn> = entity
            .projection_order()
            .into_iter()
            .map(|p| property_column(source, p, nullable))
            .collect();
        let derived = model.derived_types(&entity.name);
        for derived_type in &derived {
            for p in derived_type.projection_order() {
                if !columns.iter().any(|c| c.property == p.name) {
                    columns.push(property_column(source, p, true));
                }
            }
        }

        let discriminator = match &entity.discriminator {
            Some(d) => {
                if !columns.iter().any(|c| c.property == d.column) {
                    columns.push(PropertyColumn {
                        property: d.column.clone(),
                        expr: LogicalExpr::Column(ColumnRef {
                            source,
                            column: d.column.clone(),
                            path: vec![d.column.clone()],
                            type_mapping: TypeMapping::new(ClrType::String, nullable),
                        }),
                    });
                }
                let mut types = vec![(d.value.clone(), entity.name.clone())];
                for derived_type in &derived {
                    if let Some(dd) = &derived_type.discriminator {
                        types.push((dd.value.clone(), derived_type.name.clone()));
                    }
                }
                Some(DiscriminatorMap {
                    property: d.column.clone(),
                    types,
                })
            }
            None => None,
        };

        let mut includes = Vec::new();
        for nav in entity.navigations.iter().filter(|n| n.owned) {
            let target = model.entity(&nav.target)?;
            let owned = self.owned_projection(target, source, &[nav.name.clone()])?;
            includes.push((nav.name.clone(), ProjectionShape::Entity(owned)));
        }

        Ok(EntityProjection {
            source,
            entity: entity.name.clone(),
            columns,
            key: entity.key.clone(),
            nullable,
            keyless: entity.is_keyless(),
            includes,
            discriminator,
        })
    }

    /// Owned type stored in its owner's row as `Nav_Column` columns.
    fn owned_projection(
        &self,
        target: &EntityType,
        source: SourceId,
        path: &[String],
    ) -> Result<EntityProjection, QueryPlannerError> {
        let prefix = path.join("_");
        let columns = target
            .projection_order()
            .into_iter()
            .map(|p| {
                let mut property_path = path.to_vec();
                property_path.push(p.name.clone());
                PropertyColumn {
                    property: p.name.clone(),
                    expr: LogicalExpr::Column(ColumnRef {
                        source,
                        column: format!("{}_{}", prefix, p.column),
                        path: property_path,
                        type_mapping: TypeMapping::new(p.clr_type, true),
                    }),
                }
            })
            .collect();
        let mut includes = Vec::new();
        for nav in target.navigations.iter().filter(|n| n.owned) {
            let nested = self.model.entity(&nav.target)?;
            let mut nested_path = path.to_vec();
            nested_path.push(nav.name.clone());
            includes.push((
                nav.name.clone(),
                ProjectionShape::Entity(self.owned_projection(nested, source, &nested_path)?),
            ));
        }
        Ok(EntityProjection {
            source,
            entity: target.name.clone(),
            columns,
            key: Vec::new(),
            nullable: true,
            keyless: true,
            includes,
            discriminator: None,
        })
    }

    fn discriminator_predicate(
        &self,
        entity: &EntityType,
        projection: &EntityProjection,
    ) -> Result<Option<LogicalExpr>, QueryPlannerError> {
        let Some(d) = &entity.discriminator else {
            if !self.document_store {
                return Ok(None);
            }
            // Documents of every type share the container; without a declared
            // discriminator the entity name is the stored value.
            let column = LogicalExpr::Column(ColumnRef {
                source: projection.source,
                column: DOCUMENT_DISCRIMINATOR.to_string(),
                path: vec![DOCUMENT_DISCRIMINATOR.to_string()],
                type_mapping: TypeMapping::new(ClrType::String, false),
            });
            return Ok(Some(LogicalExpr::equal(
                column,
                LogicalExpr::literal(Value::String(entity.name.clone())),
            )));
        };
        let column = projection
            .column(&d.column)
            .cloned()
            .ok_or_else(|| ModelError::unknown_property(&entity.name, &d.column))?;
        let mut values = self.model.discriminator_values(&entity.name)?;
        let predicate = if values.len() == 1 {
            let value = values.remove(0);
            LogicalExpr::equal(column, LogicalExpr::literal(Value::String(value)))
        } else {
            LogicalExpr::InList {
                expr: Box::new(column),
                values: values
                    .into_iter()
                    .map(|v| LogicalExpr::literal(Value::String(v)))
                    .collect(),
                negated: false,
            }
        };
        Ok(Some(predicate))
    }

    /// Navigation declared on `entity` or one of its derived types.
    pub(super) fn find_navigation(&self, entity: &str, name: &str) -> Option<&'a Navigation> {
        let model = self.model;
        let declared = model.entity(entity).ok()?;
        declared.navigation(name).or_else(|| {
            model
                .derived_types(entity)
                .into_iter()
                .find_map(|d| d.navigation(name))
        })
    }

    /// Joins the target of a to-one navigation, reusing an earlier join of
    /// the same navigation from the same source.
    pub(super) fn expand_reference(
        &mut self,
        owner: &EntityProjection,
        nav: &Navigation,
    ) -> Result<ProjectionShape, QueryPlannerError> {
        if let Some(target) = self.ctx.nav_join(owner.source, &nav.name) {
            if let Some(shape) = self.nav_shapes.get(&target) {
                return Ok(shape.clone());
            }
        }
        let nullable = !nav.required || owner.nullable || self.ctx.is_nullable(owner.source);
        let target = self.entity_root(&nav.target, None, nullable, true)?;
        let shape = target.shape();
        let ProjectionShape::Entity(target_entity) = &shape else {
            return Err(QueryPlannerError::internal(
                Pass::Normalizer,
                format!("navigation target {} is not an entity", nav.target),
            ));
        };
        let condition = key_condition(owner, &nav.source_key, target_entity, &nav.target_key)?;
        let join_type = if nullable { JoinType::Left } else { JoinType::Inner };
        let target_source = target_entity.source;
        log::debug!(
            "Normalizer: {} join for {}.{}",
            if nullable { "LEFT" } else { "INNER" },
            owner.entity,
            nav.name
        );
        self.ctx.add_pending_join(
            owner.source,
            PendingJoin {
                target: target_source,
                right: target.plan,
                join_type,
                condition,
            },
        )?;
        self.ctx.register_nav_join(owner.source, &nav.name, target_source);
        self.nav_shapes.insert(target_source, shape.clone());
        Ok(shape)
    }

    /// Correlated query over the target of a to-many navigation.
    pub(super) fn expand_collection(
        &mut self,
        owner: &EntityProjection,
        nav: &Navigation,
    ) -> Result<Translated, QueryPlannerError> {
        let target = self.entity_root(&nav.target, None, false, false)?;
        let ProjectionShape::Entity(target_entity) = target.shape() else {
            return Err(QueryPlannerError::internal(
                Pass::Normalizer,
                format!("navigation target {} is not an entity", nav.target),
            ));
        };
        let outer_key = key_columns(owner, &nav.source_key)?;
        let inner_key = key_columns(&target_entity, &nav.target_key)?;
        let predicate = key_condition(owner, &nav.source_key, &target_entity, &nav.target_key)?;
        let plan = Arc::new(LogicalPlan::Filter(Filter {
            input: target.plan,
            predicate,
            correlation: true,
        }));
        Ok(Translated {
            plan,
            correlation: Some(Correlation {
                outer_key,
                inner_key,
            }),
            ordering: Vec::new(),
            includes: Vec::new(),
            element: None,
        })
    }

    /// Applies the `Include` paths collected on `t` to its entity shape.
    pub(super) fn apply_includes(&mut self, mut t: Translated) -> Result<Translated, QueryPlannerError> {
        if t.includes.is_empty() {
            return Ok(t);
        }
        let includes = std::mem::take(&mut t.includes);
        let ProjectionShape::Entity(entity) = t.shape() else {
            log::warn!("Include ignored: the query does not return entities");
            return Ok(t);
        };
        let parent_key = self.identifying_keys(&t.plan).unwrap_or_default();
        let mut collections = Vec::new();
        let entity = self.include_paths(entity, &includes, &parent_key, &mut collections)?;
        let joins = self.ctx.take_pending_joins();
        let mut plan = with_joins(t.plan, joins);
        for collection in collections {
            plan = collection.attach(plan);
        }
        t.plan = Arc::new(LogicalPlan::Projection(Projection {
            input: plan,
            shape: ProjectionShape::Entity(entity),
        }));
        Ok(t)
    }

    fn include_paths(
        &mut self,
        mut entity: EntityProjection,
        paths: &[Vec<String>],
        parent_key: &[LogicalExpr],
        collections: &mut Vec<PendingCollection>,
    ) -> Result<EntityProjection, QueryPlannerError> {
        for (name, rest) in group_paths(paths) {
            let nav = self.find_navigation(&entity.entity, &name).ok_or_else(|| {
                ModelError::UnknownNavigation {
                    entity: entity.entity.clone(),
                    navigation: name.clone(),
                }
            })?;
            if nav.owned {
                let Some(index) = entity.includes.iter().position(|(n, _)| *n == name) else {
                    continue;
                };
                if let ProjectionShape::Entity(owned) = entity.includes[index].1.clone() {
                    let owned = self.include_paths(owned, &rest, parent_key, collections)?;
                    entity.includes[index].1 = ProjectionShape::Entity(owned);
                }
            } else if nav.is_collection() {
                let mut key = parent_key.to_vec();
                if self.ctx.is_nav_target(entity.source) {
                    for k in entity.key_exprs() {
                        if !key.contains(&k) {
                            key.push(k);
                        }
                    }
                }
                if key.is_empty() {
                    return Err(QueryPlannerError::unsupported(format!(
                        "cannot include collection `{}` of keyless rows",
                        name
                    )));
                }
                self.ctx.push_scope();
                let included = self.expand_collection(&entity, nav).and_then(|mut ct| {
                    ct.includes = rest.clone();
                    self.apply_includes(ct)
                });
                let leftovers = self.ctx.pop_scope()?;
                let mut included = included?;
                included.plan = with_joins(included.plan, leftovers);
                let (pending, shape) = self.collection_projection(included, &key)?;
                collections.push(pending);
                entity.includes.push((name, shape));
            } else {
                let shape = self.expand_reference(&entity, nav)?;
                let ProjectionShape::Entity(target) = shape else {
                    return Err(QueryPlannerError::internal(
                        Pass::Normalizer,
                        format!("navigation target {} is not an entity", nav.target),
                    ));
                };
                let target = self.include_paths(target, &rest, parent_key, collections)?;
                entity.includes.push((name, ProjectionShape::Entity(target)));
            }
        }
        Ok(entity)
    }
}

fn key_columns(entity: &EntityProjection, properties: &[String]) -> Result<Vec<LogicalExpr>, QueryPlannerError> {
    properties
        .iter()
        .map(|p| {
            entity
                .column(p)
                .cloned()
                .ok_or_else(|| QueryPlannerError::from(ModelError::unknown_property(&entity.entity, p)))
        })
        .collect()
}

/// `owner.k1 = target.t1 AND ...` for a navigation's key pairs.
fn key_condition(
    owner: &EntityProjection,
    source_key: &[String],
    target: &EntityProjection,
    target_key: &[String],
) -> Result<LogicalExpr, QueryPlannerError> {
    let left = key_columns(owner, source_key)?;
    let right = key_columns(target, target_key)?;
    LogicalExpr::conjunction(
        left.into_iter()
            .zip(right)
            .map(|(l, r)| LogicalExpr::equal(l, r))
            .collect(),
    )
    .ok_or_else(|| {
        QueryPlannerError::internal(
            Pass::Normalizer,
            format!("navigation from {} has no key columns", owner.entity),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_paths_merges_shared_prefixes() {
        let paths = vec![
            vec!["Orders".to_string()],
            vec!["Orders".to_string(), "OrderDetails".to_string()],
            vec!["Manager".to_string()],
        ];
        let groups = group_paths(&paths);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Orders");
        assert_eq!(groups[0].1, vec![vec!["OrderDetails".to_string()]]);
        assert!(groups[1].1.is_empty());
    }
}
