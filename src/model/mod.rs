//! Mapped model metadata: entity shapes, keys, navigations and their store
//! mappings. Read-only once built.

pub mod config;
pub mod entity_model;
pub mod errors;

pub use config::ModelConfig;
pub use entity_model::{Cardinality, Discriminator, EntityType, Model, Navigation, Property};
pub use errors::ModelError;
