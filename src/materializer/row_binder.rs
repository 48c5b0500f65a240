//! Binding of row groups to [`QueryShape`]s.
//!
//! A group is the run of rows that make up one result. It is a single row
//! unless the shape carries collections or groupings.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use uuid::Uuid;

use super::client_functions::ClientFunctions;
use super::errors::MaterializeError;
use super::identity_map::IdentityMap;
use super::{EntityObject, Materialized};
use crate::query::{ClrType, Value};
use crate::query_planner::shape::{
    ClientShape, CollectionShape, ColumnSlot, EntityShape, QueryShape,
};

pub(super) type RowRef<'r> = &'r [Value];

pub(super) struct RowBinder<'a> {
    pub functions: &'a ClientFunctions,
    pub identity: Option<&'a mut IdentityMap>,
}

impl RowBinder<'_> {
    pub fn bind(
        &mut self,
        shape: &QueryShape,
        rows: &[RowRef<'_>],
    ) -> Result<Materialized, MaterializeError> {
        let Some(first) = rows.first() else {
            return Ok(Materialized::Null);
        };
        match shape {
            QueryShape::Scalar(slot) => Ok(Materialized::from_value(read_column(first, *slot)?)),
            QueryShape::Entity(entity) => self.entity(entity, rows),
            QueryShape::Composite(members) => {
                let mut object = Vec::with_capacity(members.len());
                for (name, member) in members {
                    object.push((name.clone(), self.bind(member, rows)?));
                }
                Ok(Materialized::Object(object))
            }
            QueryShape::Grouping { key, element } => {
                let key = self.bind(key, &rows[..1])?;
                let mut elements = Vec::with_capacity(rows.len());
                for row in rows {
                    elements.push(self.bind(element, std::slice::from_ref(row))?);
                }
                Ok(Materialized::Grouping {
                    key: Box::new(key),
                    elements,
                })
            }
            QueryShape::Collection(collection) => self.collection(collection, rows),
            QueryShape::Client(client) => self.client(client, rows),
        }
    }

    fn entity(
        &mut self,
        shape: &EntityShape,
        rows: &[RowRef<'_>],
    ) -> Result<Materialized, MaterializeError> {
        let row = rows[0];
        let key = shape
            .key
            .iter()
            .map(|&i| read_lenient(row, shape.properties[i].slot))
            .collect::<Result<Vec<_>, _>>()?;

        if shape.nullable {
            let absent = if key.is_empty() {
                shape
                    .properties
                    .iter()
                    .map(|p| read_lenient(row, p.slot))
                    .collect::<Result<Vec<_>, _>>()?
                    .iter()
                    .all(Value::is_null)
            } else {
                key.iter().all(Value::is_null)
            };
            if absent {
                return Ok(Materialized::Null);
            }
        }

        let tracked = !shape.keyless && !key.is_empty();
        if tracked {
            if let Some(existing) = self
                .identity
                .as_deref_mut()
                .and_then(|map| map.resolve(&shape.entity, &key))
            {
                return Ok(Materialized::Entity(existing));
            }
        }

        let mut properties = Vec::with_capacity(shape.properties.len());
        for property in &shape.properties {
            properties.push((property.name.clone(), read_column(row, property.slot)?));
        }
        let discriminator = shape
            .discriminator
            .as_ref()
            .and_then(|d| properties.get(d.property))
            .and_then(|(_, v)| v.as_str());
        let entity_type = shape.concrete_type(discriminator).to_string();

        let mut navigations = Vec::with_capacity(shape.includes.len());
        for (name, include) in &shape.includes {
            navigations.push((name.clone(), self.bind(include, rows)?));
        }

        let instance = EntityObject {
            entity_type,
            properties,
            navigations,
        };
        Ok(Materialized::Entity(match self.identity.as_deref_mut() {
            Some(map) if tracked => map.track(&shape.entity, &key, instance),
            _ => std::sync::Arc::new(instance),
        }))
    }

    /// Splits the parent's rows by element key, in order of first appearance.
    /// Rows whose element key is all null come from an outer join with no match.
    fn collection(
        &mut self,
        shape: &CollectionShape,
        rows: &[RowRef<'_>],
    ) -> Result<Materialized, MaterializeError> {
        let mut groups: Vec<Vec<RowRef<'_>>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for &row in rows {
            let key = raw_values(row, &shape.element_key)?;
            if key.iter().all(Value::is_null) {
                continue;
            }
            let identity = Value::identity_key(&key);
            match index.get(&identity) {
                Some(&i) => groups[i].push(row),
                None => {
                    index.insert(identity, groups.len());
                    groups.push(vec![row]);
                }
            }
        }

        if shape.single {
            return match groups.first() {
                Some(group) => self.bind(&shape.element, group),
                None => Ok(Materialized::Null),
            };
        }
        let mut elements = Vec::with_capacity(groups.len());
        for group in &groups {
            elements.push(self.bind(&shape.element, group)?);
        }
        Ok(Materialized::List(elements))
    }

    fn client(
        &mut self,
        shape: &ClientShape,
        rows: &[RowRef<'_>],
    ) -> Result<Materialized, MaterializeError> {
        let mut args = Vec::with_capacity(shape.args.len());
        for arg in &shape.args {
            args.push(self.bind(arg, rows)?);
        }
        let function =
            self.functions
                .get(&shape.function)
                .ok_or_else(|| MaterializeError::UnknownClientFunction {
                    function: shape.function.clone(),
                    description: shape.description.clone(),
                })?;
        function(&args).map_err(|message| MaterializeError::ClientFunction {
            function: shape.function.clone(),
            message,
        })
    }
}

/// Columns that identify the row group of one top-level result, if the
/// shape spans rows at all.
pub(super) fn group_ordinals(shape: &QueryShape) -> Option<Vec<usize>> {
    match shape {
        QueryShape::Grouping { key, .. } => {
            let mut ordinals = Vec::new();
            leaf_ordinals(key, &mut ordinals);
            Some(ordinals)
        }
        QueryShape::Collection(c) => Some(c.parent_key.clone()),
        QueryShape::Entity(e) => e.includes.iter().find_map(|(_, s)| group_ordinals(s)),
        QueryShape::Composite(members) => members.iter().find_map(|(_, s)| group_ordinals(s)),
        QueryShape::Client(c) => c.args.iter().find_map(group_ordinals),
        QueryShape::Scalar(_) => None,
    }
}

fn leaf_ordinals(shape: &QueryShape, out: &mut Vec<usize>) {
    match shape {
        QueryShape::Scalar(slot) => out.push(slot.ordinal),
        QueryShape::Entity(e) if !e.key.is_empty() => {
            out.extend(e.key.iter().map(|&i| e.properties[i].slot.ordinal))
        }
        QueryShape::Entity(e) => out.extend(e.properties.iter().map(|p| p.slot.ordinal)),
        QueryShape::Composite(members) => {
            for (_, member) in members {
                leaf_ordinals(member, out);
            }
        }
        QueryShape::Client(c) => {
            for arg in &c.args {
                leaf_ordinals(arg, out);
            }
        }
        QueryShape::Grouping { .. } | QueryShape::Collection(_) => {}
    }
}

pub(super) fn raw_values(row: RowRef<'_>, ordinals: &[usize]) -> Result<Vec<Value>, MaterializeError> {
    ordinals
        .iter()
        .map(|&ordinal| {
            row.get(ordinal)
                .cloned()
                .ok_or(MaterializeError::MissingColumn {
                    ordinal,
                    width: row.len(),
                })
        })
        .collect()
}

fn read_lenient(row: RowRef<'_>, slot: ColumnSlot) -> Result<Value, MaterializeError> {
    read_column(
        row,
        ColumnSlot {
            type_mapping: slot.type_mapping.with_nullable(true),
            ..slot
        },
    )
}

/// Reads one cell as the slot's type. Providers hand back the storage type
/// (`INTEGER` for a SQLite bool, `TEXT` for a decimal), so cells are converted.
pub fn read_column(row: RowRef<'_>, slot: ColumnSlot) -> Result<Value, MaterializeError> {
    let value = row.get(slot.ordinal).ok_or(MaterializeError::MissingColumn {
        ordinal: slot.ordinal,
        width: row.len(),
    })?;
    let clr = slot.type_mapping.clr;
    if value.is_null() {
        return if slot.type_mapping.nullable {
            Ok(Value::Null)
        } else {
            Err(MaterializeError::UnexpectedNull {
                ordinal: slot.ordinal,
                clr,
            })
        };
    }
    convert(value, clr).ok_or_else(|| MaterializeError::InvalidCast {
        ordinal: slot.ordinal,
        value: value.to_string(),
        clr,
    })
}

pub(crate) fn convert(value: &Value, clr: ClrType) -> Option<Value> {
    if value.clr_type() == Some(clr) {
        return Some(value.clone());
    }
    match clr {
        ClrType::Bool => value.as_i64().map(|v| Value::Bool(v != 0)),
        ClrType::Byte => value.as_i64().and_then(|v| u8::try_from(v).ok()).map(Value::Byte),
        ClrType::Int16 => value.as_i64().and_then(|v| i16::try_from(v).ok()).map(Value::Short),
        ClrType::Int32 => value.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::Int),
        ClrType::Int64 => value.as_i64().map(Value::Long),
        ClrType::Single => value.as_f64().map(|v| Value::Single(v as f32)),
        ClrType::Double => value.as_f64().map(Value::Double),
        ClrType::Decimal => match value {
            Value::String(s) => s.trim().parse().ok().map(Value::Decimal),
            other => other.as_f64().map(Value::Decimal),
        },
        ClrType::String => match value {
            Value::Guid(g) => Some(Value::String(g.to_string())),
            _ => None,
        },
        ClrType::DateTime => value.as_str().and_then(parse_datetime).map(Value::DateTime),
        ClrType::Guid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Value::Guid),
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}
