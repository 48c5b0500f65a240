//! Result objects from rows.
//!
//! A [`Materializer`] is fed rows one at a time in result order and hands
//! back a finished [`Materialized`] value whenever a result is complete.
//! Shapes without collections or groupings complete on every row; shapes with
//! them complete when the identifying columns of the current row group change
//! (and on [`Materializer::finish`]).

use std::sync::Arc;

use crate::query::Value;
use crate::query_planner::shape::QueryShape;

pub mod client_functions;
pub mod errors;
pub mod identity_map;
pub mod row_binder;

pub use client_functions::ClientFunctions;
pub use errors::MaterializeError;
pub use identity_map::IdentityMap;

use row_binder::{group_ordinals, raw_values, RowBinder, RowRef};

/// One result row as read from the provider, cells in select-list order.
pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    Null,
    Value(Value),
    Entity(Arc<EntityObject>),
    /// Anonymous object, members in projection order.
    Object(Vec<(String, Materialized)>),
    Grouping {
        key: Box<Materialized>,
        elements: Vec<Materialized>,
    },
    List(Vec<Materialized>),
}

impl Materialized {
    pub fn from_value(value: Value) -> Self {
        if value.is_null() {
            Materialized::Null
        } else {
            Materialized::Value(value)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Materialized::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Materialized::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Arc<EntityObject>> {
        match self {
            Materialized::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Materialized]> {
        match self {
            Materialized::List(items) => Some(items),
            Materialized::Grouping { elements, .. } => Some(elements),
            _ => None,
        }
    }

    /// Member of an anonymous object, or navigation/property of an entity.
    pub fn member(&self, name: &str) -> Option<Materialized> {
        match self {
            Materialized::Object(members) => members
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, m)| m.clone()),
            Materialized::Entity(e) => e
                .navigation(name)
                .cloned()
                .or_else(|| e.get(name).cloned().map(Materialized::from_value)),
            Materialized::Grouping { key, .. } if name == "Key" => Some((**key).clone()),
            _ => None,
        }
    }
}

/// A materialized entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityObject {
    /// Concrete type, after discriminator resolution.
    pub entity_type: String,
    pub properties: Vec<(String, Value)>,
    /// Included navigations: an entity, `Null`, or a list.
    pub navigations: Vec<(String, Materialized)>,
}

impl EntityObject {
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, v)| v)
    }

    pub fn navigation(&self, name: &str) -> Option<&Materialized> {
        self.navigations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }
}

pub struct Materializer {
    shape: QueryShape,
    group_by: Option<Vec<usize>>,
    functions: Arc<ClientFunctions>,
    identity: Option<IdentityMap>,
    pending: Vec<Row>,
    pending_key: Option<String>,
}

impl Materializer {
    /// `tracking` turns on identity resolution for entity shapes.
    pub fn new(shape: QueryShape, tracking: bool, functions: Arc<ClientFunctions>) -> Self {
        let group_by = group_ordinals(&shape);
        Materializer {
            shape,
            group_by,
            functions,
            identity: tracking.then(IdentityMap::new),
            pending: Vec::new(),
            pending_key: None,
        }
    }

    pub fn shape(&self) -> &QueryShape {
        &self.shape
    }

    pub fn identity_map(&self) -> Option<&IdentityMap> {
        self.identity.as_ref()
    }

    /// Adds a row; returns the result it completes, if any.
    pub fn push_row(&mut self, row: Row) -> Result<Option<Materialized>, MaterializeError> {
        let Some(ordinals) = &self.group_by else {
            return self.bind(&[row]).map(Some);
        };
        let key = Value::identity_key(&raw_values(&row, ordinals)?);
        let completed = match &self.pending_key {
            Some(current) if *current != key => self.flush()?,
            _ => None,
        };
        self.pending_key = Some(key);
        self.pending.push(row);
        Ok(completed)
    }

    /// Completes the last row group.
    pub fn finish(&mut self) -> Result<Option<Materialized>, MaterializeError> {
        self.flush()
    }

    pub fn materialize_all(
        &mut self,
        rows: impl IntoIterator<Item = Row>,
    ) -> Result<Vec<Materialized>, MaterializeError> {
        let mut results = Vec::new();
        for row in rows {
            if let Some(result) = self.push_row(row)? {
                results.push(result);
            }
        }
        if let Some(result) = self.finish()? {
            results.push(result);
        }
        Ok(results)
    }

    fn flush(&mut self) -> Result<Option<Materialized>, MaterializeError> {
        self.pending_key = None;
        if self.pending.is_empty() {
            return Ok(None);
        }
        let rows = std::mem::take(&mut self.pending);
        self.bind(&rows).map(Some)
    }

    fn bind(&mut self, rows: &[Row]) -> Result<Materialized, MaterializeError> {
        let refs: Vec<RowRef<'_>> = rows.iter().map(Vec::as_slice).collect();
        let mut binder = RowBinder {
            functions: &self.functions,
            identity: self.identity.as_mut(),
        };
        binder.bind(&self.shape, &refs)
    }
}

#[cfg(test)]
mod tests;
