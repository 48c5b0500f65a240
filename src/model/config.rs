/// Model definition files.
///
/// Models are described in YAML (or JSON) and resolved into a validated
/// [`Model`]: column names default to property names, derived entity types
/// inherit the table, key, properties and navigations of their base type.
///
/// ```yaml
/// entities:
///   - name: Customer
///     table: Customers
///     key: [CustomerID]
///     properties:
///       - { name: CustomerID, type: string }
///       - { name: City, type: string, nullable: true }
///     navigations:
///       - name: Orders
///         target: Order
///         cardinality: many
///         source_key: [CustomerID]
///         target_key: [CustomerID]
/// ```
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::entity_model::{Cardinality, Discriminator, EntityType, Model, Navigation, Property};
use super::errors::ModelError;
use crate::query::{ClrType, Lambda};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub entities: Vec<EntityDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub navigations: Vec<NavigationDefinition>,
    #[serde(default)]
    pub discriminator: Option<DiscriminatorDefinition>,
    #[serde(default)]
    pub base_type: Option<String>,
    #[serde(default)]
    pub defining_query: Option<String>,
    /// Expression nodes are written as single-key maps (`binary: {...}`).
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub query_filter: Option<Lambda>,
    #[serde(default)]
    pub owned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub clr_type: ClrType,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationDefinition {
    pub name: String,
    pub target: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub source_key: Vec<String>,
    #[serde(default)]
    pub target_key: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub owned: bool,
}

fn default_cardinality() -> Cardinality {
    Cardinality::One
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminatorDefinition {
    #[serde(default = "default_discriminator_column")]
    pub column: String,
    pub value: String,
}

fn default_discriminator_column() -> String {
    "Discriminator".to_string()
}

impl ModelConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModelError::ConfigReadError {
                error: format!("{}: {}", path.as_ref().display(), e),
            }
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ModelError> {
        serde_yaml::from_str(yaml).map_err(|e| ModelError::ConfigParseError {
            error: e.to_string(),
        })
    }

    /// Resolves inheritance and defaults, then validates the result.
    pub fn to_model(&self) -> Result<Model, ModelError> {
        let by_name: HashMap<&str, &EntityDefinition> =
            self.entities.iter().map(|e| (e.name.as_str(), e)).collect();

        let mut resolved = Vec::with_capacity(self.entities.len());
        for definition in &self.entities {
            resolved.push(resolve_entity(definition, &by_name)?);
        }
        let model = Model::new(resolved)?;
        log::debug!(
            "Loaded model '{}' with {} entity types",
            self.name.as_deref().unwrap_or("default"),
            model.entities().count()
        );
        Ok(model)
    }
}

/// Chain from the root base type down to `definition`.
fn hierarchy<'a>(
    definition: &'a EntityDefinition,
    by_name: &HashMap<&str, &'a EntityDefinition>,
) -> Result<Vec<&'a EntityDefinition>, ModelError> {
    let mut chain = vec![definition];
    let mut current = definition;
    while let Some(base) = &current.base_type {
        let parent = by_name
            .get(base.as_str())
            .copied()
            .ok_or_else(|| ModelError::UnknownEntity {
                entity: base.clone(),
            })?;
        if chain.iter().any(|d| d.name == parent.name) {
            return Err(ModelError::invalid(format!(
                "inheritance cycle through `{}`",
                parent.name
            )));
        }
        chain.push(parent);
        current = parent;
    }
    chain.reverse();
    Ok(chain)
}

fn resolve_entity(
    definition: &EntityDefinition,
    by_name: &HashMap<&str, &EntityDefinition>,
) -> Result<EntityType, ModelError> {
    let chain = hierarchy(definition, by_name)?;
    let root = chain[0];

    let mut properties = Vec::new();
    let mut navigations = Vec::new();
    for level in &chain {
        for p in &level.properties {
            properties.push(Property {
                name: p.name.clone(),
                column: p.column.clone().unwrap_or_else(|| p.name.clone()),
                clr_type: p.clr_type,
                nullable: p.nullable,
            });
        }
        for n in &level.navigations {
            navigations.push(Navigation {
                name: n.name.clone(),
                target: n.target.clone(),
                cardinality: n.cardinality,
                source_key: n.source_key.clone(),
                target_key: n.target_key.clone(),
                required: n.required,
                owned: n.owned,
            });
        }
    }

    let discriminator = definition.discriminator.as_ref().map(|d| {
        // Derived types share the column of their root unless they name one.
        let column = root
            .discriminator
            .as_ref()
            .map(|r| r.column.clone())
            .unwrap_or_else(|| d.column.clone());
        Discriminator {
            column,
            value: d.value.clone(),
        }
    });

    Ok(EntityType {
        name: definition.name.clone(),
        table: root
            .table
            .clone()
            .unwrap_or_else(|| root.name.clone()),
        schema: root.schema.clone(),
        key: root.key.clone(),
        properties,
        navigations,
        discriminator,
        base_type: definition.base_type.clone(),
        defining_query: definition
            .defining_query
            .clone()
            .or_else(|| root.defining_query.clone()),
        query_filter: definition
            .query_filter
            .clone()
            .or_else(|| root.query_filter.clone()),
        owned: definition.owned,
    })
}
