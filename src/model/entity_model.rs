use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::ModelError;
use crate::query::{ClrType, Lambda, TypeMapping};

lazy_static::lazy_static! {
    /// Entity and property names: plain identifiers.
    static ref NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();

    /// Store names may contain spaces (`Order Details`) but never quoting or
    /// statement characters.
    static ref STORE_NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_ ]*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub column: String,
    pub clr_type: ClrType,
    pub nullable: bool,
}

impl Property {
    pub fn type_mapping(&self) -> TypeMapping {
        TypeMapping::new(self.clr_type, self.nullable)
    }
}

/// Relationship from one entity to another. `source_key` columns live on the
/// declaring entity, `target_key` columns on the target; they pair up
/// positionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub source_key: Vec<String>,
    pub target_key: Vec<String>,
    pub required: bool,
    pub owned: bool,
}

impl Navigation {
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discriminator {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    /// Empty for keyless entities.
    pub key: Vec<String>,
    pub properties: Vec<Property>,
    pub navigations: Vec<Navigation>,
    pub discriminator: Option<Discriminator>,
    pub base_type: Option<String>,
    /// Raw SQL backing the entity instead of a table.
    pub defining_query: Option<String>,
    /// Global filter applied to every query root of this entity.
    pub query_filter: Option<Lambda>,
    /// Owned entities are stored inside their owner and have no table of their own.
    pub owned: bool,
}

impl EntityType {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations.iter().find(|n| n.name == name)
    }

    pub fn is_keyless(&self) -> bool {
        self.key.is_empty()
    }

    pub fn key_properties(&self) -> Vec<&Property> {
        self.key.iter().filter_map(|k| self.property(k)).collect()
    }

    /// Properties in projection order: key columns first, then the rest in
    /// declaration order.
    pub fn projection_order(&self) -> Vec<&Property> {
        let mut ordered = self.key_properties();
        ordered.extend(self.properties.iter().filter(|p| !self.key.contains(&p.name)));
        ordered
    }

    /// Table alias hint: first letter of the table, lowercased.
    pub fn alias_hint(&self) -> String {
        let source = if self.defining_query.is_some() {
            &self.name
        } else {
            &self.table
        };
        source
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| "t".to_string())
    }
}

/// Read-only mapped model consumed by the translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    entities: BTreeMap<String, EntityType>,
}

impl Model {
    /// Builds and validates a model from fully resolved entity types.
    pub fn new(entities: Vec<EntityType>) -> Result<Self, ModelError> {
        let mut map = BTreeMap::new();
        for entity in entities {
            if map.contains_key(&entity.name) {
                return Err(ModelError::invalid(format!(
                    "entity `{}` is defined more than once",
                    entity.name
                )));
            }
            map.insert(entity.name.clone(), entity);
        }
        let model = Model { entities: map };
        model.validate()?;
        Ok(model)
    }

    pub fn entity(&self, name: &str) -> Result<&EntityType, ModelError> {
        self.entities.get(name).ok_or_else(|| ModelError::UnknownEntity {
            entity: name.to_string(),
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }

    pub fn navigation(&self, entity: &str, navigation: &str) -> Result<&Navigation, ModelError> {
        self.entity(entity)?
            .navigation(navigation)
            .ok_or_else(|| ModelError::UnknownNavigation {
                entity: entity.to_string(),
                navigation: navigation.to_string(),
            })
    }

    /// Entity types deriving (directly or transitively) from `entity`.
    pub fn derived_types(&self, entity: &str) -> Vec<&EntityType> {
        let mut result = Vec::new();
        let mut frontier = vec![entity.to_string()];
        while let Some(current) = frontier.pop() {
            for candidate in self.entities.values() {
                if candidate.base_type.as_deref() == Some(current.as_str()) {
                    frontier.push(candidate.name.clone());
                    result.push(candidate);
                }
            }
        }
        result
    }

    /// Discriminator values that select `entity` and its derived types, in
    /// hierarchy order.
    pub fn discriminator_values(&self, entity: &str) -> Result<Vec<String>, ModelError> {
        let root = self.entity(entity)?;
        let mut values = Vec::new();
        if let Some(d) = &root.discriminator {
            values.push(d.value.clone());
        }
        for derived in self.derived_types(entity) {
            if let Some(d) = &derived.discriminator {
                values.push(d.value.clone());
            }
        }
        Ok(values)
    }

    fn validate(&self) -> Result<(), ModelError> {
        for entity in self.entities.values() {
            check_identifier(&NAME_PATTERN, &entity.name, "entity name")?;
            if !entity.owned && entity.defining_query.is_none() {
                check_identifier(&STORE_NAME_PATTERN, &entity.table, &format!("table of `{}`", entity.name))?;
            }
            for property in &entity.properties {
                check_identifier(&NAME_PATTERN, &property.name, &format!("property of `{}`", entity.name))?;
                check_identifier(
                    &STORE_NAME_PATTERN,
                    &property.column,
                    &format!("column of `{}.{}`", entity.name, property.name),
                )?;
            }
            for key in &entity.key {
                if entity.property(key).is_none() {
                    return Err(ModelError::unknown_property(&entity.name, key));
                }
            }
            if let Some(base) = &entity.base_type {
                self.entity(base)?;
            }
            if let Some(d) = &entity.discriminator {
                check_identifier(&STORE_NAME_PATTERN, &d.column, "discriminator column")?;
            }
            for nav in &entity.navigations {
                check_identifier(&NAME_PATTERN, &nav.name, &format!("navigation of `{}`", entity.name))?;
                let target = self.entity(&nav.target)?;
                if nav.owned {
                    if !target.owned {
                        return Err(ModelError::invalid(format!(
                            "navigation `{}.{}` is owned but `{}` is not an owned type",
                            entity.name, nav.name, target.name
                        )));
                    }
                    continue;
                }
                if nav.source_key.len() != nav.target_key.len() || nav.source_key.is_empty() {
                    return Err(ModelError::KeyArityMismatch {
                        entity: entity.name.clone(),
                        navigation: nav.name.clone(),
                        source_len: nav.source_key.len(),
                        target_len: nav.target_key.len(),
                    });
                }
                for key in &nav.source_key {
                    if entity.property(key).is_none() {
                        return Err(ModelError::unknown_property(&entity.name, key));
                    }
                }
                for key in &nav.target_key {
                    if target.property(key).is_none() {
                        return Err(ModelError::unknown_property(&target.name, key));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_identifier(pattern: &Regex, value: &str, context: &str) -> Result<(), ModelError> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(ModelError::InvalidIdentifier {
            value: value.to_string(),
            context: context.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(name: &str, clr_type: ClrType, nullable: bool) -> Property {
        Property {
            name: name.to_string(),
            column: name.to_string(),
            clr_type,
            nullable,
        }
    }

    fn entity(name: &str, table: &str, key: &[&str], properties: Vec<Property>) -> EntityType {
        EntityType {
            name: name.to_string(),
            table: table.to_string(),
            schema: None,
            key: key.iter().map(|k| k.to_string()).collect(),
            properties,
            navigations: vec![],
            discriminator: None,
            base_type: None,
            defining_query: None,
            query_filter: None,
            owned: false,
        }
    }

    #[test]
    fn test_projection_order_puts_key_first() {
        let e = entity(
            "Order",
            "Orders",
            &["OrderID"],
            vec![
                property("CustomerID", ClrType::String, true),
                property("OrderID", ClrType::Int32, false),
            ],
        );
        let names: Vec<&str> = e.projection_order().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["OrderID", "CustomerID"]);
    }

    #[test]
    fn test_rejects_quote_in_table_name() {
        let e = entity(
            "Order",
            "Orders]; DROP TABLE x; --",
            &["OrderID"],
            vec![property("OrderID", ClrType::Int32, false)],
        );
        let err = Model::new(vec![e]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_missing_key_property() {
        let e = entity("Order", "Orders", &["Id"], vec![property("OrderID", ClrType::Int32, false)]);
        assert_eq!(
            Model::new(vec![e]).unwrap_err(),
            ModelError::unknown_property("Order", "Id")
        );
    }

    #[test]
    fn test_alias_hint_uses_table_initial() {
        let e = entity("OrderDetail", "Order Details", &[], vec![]);
        assert_eq!(e.alias_hint(), "o");
    }
}
