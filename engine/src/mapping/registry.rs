//! Schema registry: which schema maps a given object type.
//!
//! Lookups try the exact type first, then walk the supertype chain from the
//! most derived ancestor upwards. Fallback resolutions are memoized under the
//! requested type name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::RegistryError;
use crate::mapping::schema::MappingSchema;
use crate::models::ObjectType;

/// Thread-safe registry of schemas, by type name and by schema name.
#[derive(Default)]
pub struct SchemaRegistry {
    by_type: RwLock<HashMap<String, Arc<MappingSchema>>>,
    by_name: RwLock<HashMap<String, Arc<MappingSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `schema` maps objects of type `ty`.
    pub fn maps(&self, ty: &ObjectType, schema: Arc<MappingSchema>) {
        debug!(ty = ty.name(), schema = schema.name(), "schema registered for type");
        self.register(schema.clone());
        write(&self.by_type).insert(ty.name().to_string(), schema);
    }

    /// Register a schema by its own name only.
    pub fn register(&self, schema: Arc<MappingSchema>) {
        write(&self.by_name).insert(schema.name().to_string(), schema);
    }

    /// Schema registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<MappingSchema>> {
        read(&self.by_name).get(name).cloned()
    }

    /// Schema for `ty`: exact match, else nearest ancestor.
    pub fn locate(&self, ty: &ObjectType) -> Result<Arc<MappingSchema>, RegistryError> {
        if let Some(schema) = read(&self.by_type).get(ty.name()) {
            return Ok(schema.clone());
        }

        let found = {
            let by_type = read(&self.by_type);
            ty.ancestors()
                .skip(1)
                .find_map(|ancestor| by_type.get(ancestor.name()).cloned())
        };

        match found {
            Some(schema) => {
                debug!(ty = ty.name(), schema = schema.name(), "schema resolved through ancestor");
                write(&self.by_type).insert(ty.name().to_string(), schema.clone());
                Ok(schema)
            }
            None => Err(RegistryError::NotFound(ty.name().to_string())),
        }
    }

    /// Registered schema names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.by_name).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read(&self.by_name).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.names())
            .finish()
    }
}

// Writes are single inserts; a poisoned lock is recovered as is.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::field::FieldRule;

    fn schema(name: &str, ty: &ObjectType) -> Arc<MappingSchema> {
        MappingSchema::builder(name)
            .target(ty)
            .rule("id", FieldRule::preserve())
            .build()
            .unwrap()
    }

    #[test]
    fn test_exact_match() {
        let work = ObjectType::new("Work", ["id"]);
        let registry = SchemaRegistry::new();
        registry.maps(&work, schema("WorkMapping", &work));

        assert_eq!(registry.locate(&work).unwrap().name(), "WorkMapping");
        assert!(registry.get("WorkMapping").is_some());
    }

    #[test]
    fn test_most_derived_ancestor_wins() {
        let base = ObjectType::new("Base", ["id"]);
        let middle = ObjectType::builder("Middle").extends(&base).build();
        let leaf = ObjectType::builder("Leaf").extends(&middle).build();

        let registry = SchemaRegistry::new();
        registry.maps(&base, schema("BaseMapping", &base));
        registry.maps(&middle, schema("MiddleMapping", &middle));

        assert_eq!(registry.locate(&leaf).unwrap().name(), "MiddleMapping");
        // memoized under the leaf's name
        assert!(read(&registry.by_type).contains_key("Leaf"));
    }

    #[test]
    fn test_miss_is_not_found() {
        let registry = SchemaRegistry::new();
        let err = registry.locate(&ObjectType::new("Orphan", ["x"])).unwrap_err();
        assert_eq!(err.to_string(), "Mapping for Orphan not found");
        assert!(registry.is_empty());
    }
}
