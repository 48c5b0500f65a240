//! # Model Error Types
//!
//! Errors raised while loading, validating or querying the mapped model.
//! Lookups made during translation surface these through the planner errors.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("No entity type named `{entity}` is mapped.")]
    UnknownEntity { entity: String },
    #[error("Property `{property}` is not mapped on entity `{entity}`.")]
    UnknownProperty { entity: String, property: String },
    #[error("Navigation `{navigation}` is not defined on entity `{entity}`.")]
    UnknownNavigation { entity: String, navigation: String },
    #[error("Invalid identifier '{value}' in {context}")]
    InvalidIdentifier { value: String, context: String },
    #[error("Navigation `{entity}.{navigation}` has {source_len} source key columns but {target_len} target key columns")]
    KeyArityMismatch {
        entity: String,
        navigation: String,
        source_len: usize,
        target_len: usize,
    },
    #[error("Failed to read model file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse model: {error}")]
    ConfigParseError { error: String },
    #[error("Invalid model: {message}")]
    InvalidModel { message: String },
}

impl ModelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ModelError::InvalidModel {
            message: message.into(),
        }
    }

    pub fn unknown_property(entity: &str, property: &str) -> Self {
        ModelError::UnknownProperty {
            entity: entity.to_string(),
            property: property.to_string(),
        }
    }
}
