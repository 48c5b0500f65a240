//! Identity resolution for tracked entities.
//!
//! Within one materialization pass an entity is built once per key; later
//! rows carrying the same key get the already built instance back.

use std::collections::HashMap;
use std::sync::Arc;

use super::EntityObject;
use crate::query::Value;

#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<String, Arc<EntityObject>>,
    hits: u64,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn identity(entity: &str, key: &[Value]) -> String {
        format!("{}:{}", entity, Value::identity_key(key))
    }

    pub fn resolve(&mut self, entity: &str, key: &[Value]) -> Option<Arc<EntityObject>> {
        let found = self.entries.get(&Self::identity(entity, key)).cloned();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    /// Registers `instance`, or returns the one already tracked under the key.
    pub fn track(&mut self, entity: &str, key: &[Value], instance: EntityObject) -> Arc<EntityObject> {
        self.entries
            .entry(Self::identity(entity, key))
            .or_insert_with(|| Arc::new(instance))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered from the map.
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str) -> EntityObject {
        EntityObject {
            entity_type: "Customer".to_string(),
            properties: vec![("CustomerID".to_string(), Value::from(id))],
            navigations: vec![],
        }
    }

    #[test]
    fn test_same_key_resolves_to_same_instance() {
        let mut map = IdentityMap::new();
        let key = [Value::from("ALFKI")];
        let first = map.track("Customer", &key, customer("ALFKI"));
        let again = map.resolve("Customer", &key).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(map.hits(), 1);
    }

    #[test]
    fn test_entity_type_is_part_of_identity() {
        let mut map = IdentityMap::new();
        map.track("Customer", &[Value::Int(1)], customer("1"));
        assert!(map.resolve("Order", &[Value::Int(1)]).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_track_keeps_first_instance() {
        let mut map = IdentityMap::new();
        let key = [Value::from("ANATR")];
        let first = map.track("Customer", &key, customer("ANATR"));
        let second = map.track("Customer", &key, customer("changed"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get("CustomerID"), Some(&Value::from("ANATR")));
    }
}
