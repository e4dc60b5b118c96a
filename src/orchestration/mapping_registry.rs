//! Compiled read mappings, shared across jobs and scheduler cycles.
//!
//! Mappings are immutable once stored, so a compiled entry stays valid until
//! the mapping is deleted.

use crate::constants::entities;
use crate::database::Store;
use crate::error::{OrderflowError, Result};
use crate::models::ReadMapping;
use crate::template::PreparedMapping;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MappingRegistry {
    prepared: DashMap<String, Arc<PreparedMapping>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `mapping` and cache it under its id
    pub fn register(&self, mapping: &ReadMapping) -> Result<Arc<PreparedMapping>> {
        let prepared = PreparedMapping::from_read_mapping(mapping)?;
        Ok(self.insert(&mapping.id, prepared))
    }

    /// Cache an already compiled mapping
    pub fn insert(&self, read_mapping_id: &str, prepared: PreparedMapping) -> Arc<PreparedMapping> {
        let prepared = Arc::new(prepared);
        self.prepared
            .insert(read_mapping_id.to_string(), Arc::clone(&prepared));
        prepared
    }

    /// Compiled mapping for `read_mapping_id`, loading and compiling it on first use
    pub async fn get_or_load(
        &self,
        store: &dyn Store,
        read_mapping_id: &str,
    ) -> Result<Arc<PreparedMapping>> {
        if let Some(prepared) = self.prepared.get(read_mapping_id) {
            return Ok(Arc::clone(prepared.value()));
        }

        let mapping = store
            .find_read_mapping(read_mapping_id)
            .await?
            .ok_or_else(|| OrderflowError::not_found(entities::READ_MAPPING, read_mapping_id))?;

        debug!(read_mapping_id = %read_mapping_id, keys = mapping.body.len(), "Compiling read mapping");
        self.register(&mapping)
    }

    pub fn evict(&self, read_mapping_id: &str) {
        self.prepared.remove(read_mapping_id);
    }

    pub fn contains(&self, read_mapping_id: &str) -> bool {
        self.prepared.contains_key(read_mapping_id)
    }

    pub fn len(&self) -> usize {
        self.prepared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InMemoryStore, Store};
    use serde_json::json;

    #[tokio::test]
    async fn test_loads_once_and_reuses() {
        let store = InMemoryStore::new();
        let mapping = store
            .create_read_mapping(ReadMapping::new([("x", "$.id")]))
            .await
            .unwrap();
        let registry = MappingRegistry::new();

        let first = registry.get_or_load(&store, &mapping.id).await.unwrap();
        let second = registry.get_or_load(&store, &mapping.id).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.evaluate(&json!({"id": 5})).unwrap(), json!({"x": 5}));
    }

    #[tokio::test]
    async fn test_unknown_mapping_is_not_found() {
        let registry = MappingRegistry::new();
        let error = registry
            .get_or_load(&InMemoryStore::new(), "missing")
            .await
            .unwrap_err();
        assert!(error.is_not_found());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_evict_drops_entry() {
        let registry = MappingRegistry::new();
        let mut mapping = ReadMapping::new([("x", "$.id")]);
        mapping.id = "m-1".to_string();

        registry.register(&mapping).unwrap();
        assert!(registry.contains("m-1"));
        registry.evict("m-1");
        assert!(!registry.contains("m-1"));
    }
}
