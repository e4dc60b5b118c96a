//! Read mapping management.
//!
//! Mappings are compiled before they are stored, so an invalid expression is
//! rejected up front and nothing is persisted. The compiled form is handed to
//! the shared [`MappingRegistry`] for the scheduler to reuse.

use super::mapping_registry::MappingRegistry;
use crate::constants::entities;
use crate::database::Store;
use crate::error::{OrderflowError, Result, ResultExt};
use crate::models::ReadMapping;
use crate::template::PreparedMapping;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct ReadMappingService {
    store: Arc<dyn Store>,
    registry: Arc<MappingRegistry>,
}

impl std::fmt::Debug for ReadMappingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadMappingService")
            .field("compiled", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ReadMappingService {
    pub fn new(store: Arc<dyn Store>, registry: Arc<MappingRegistry>) -> Self {
        Self { store, registry }
    }

    #[instrument(skip(self, mapping), fields(keys = mapping.body.len()))]
    pub async fn create_read_mapping(&self, mapping: ReadMapping) -> Result<ReadMapping> {
        const OP: &str = "ReadMappingService.CreateReadMapping";

        let prepared = PreparedMapping::from_read_mapping(&mapping).op(OP)?;
        let created = self.store.create_read_mapping(mapping).await.op(OP)?;
        self.registry.insert(&created.id, prepared);

        info!(read_mapping_id = %created.id, "Read mapping created");
        Ok(created)
    }

    pub async fn get_read_mappings(&self) -> Result<Vec<ReadMapping>> {
        self.store
            .list_read_mappings()
            .await
            .op("ReadMappingService.GetReadMappings")
    }

    /// Fetch a mapping, compiling it into the registry if it is not there yet
    pub async fn get_read_mapping_by_id(&self, read_mapping_id: &str) -> Result<ReadMapping> {
        const OP: &str = "ReadMappingService.GetReadMappingById";

        let mapping = self
            .store
            .find_read_mapping(read_mapping_id)
            .await
            .op(OP)?
            .ok_or_else(|| {
                OrderflowError::not_found(entities::READ_MAPPING, read_mapping_id).with_op(OP)
            })?;

        if !self.registry.contains(&mapping.id) {
            self.registry.register(&mapping).op(OP)?;
        }
        Ok(mapping)
    }

    #[instrument(skip(self))]
    pub async fn delete_read_mapping_by_id(&self, read_mapping_id: &str) -> Result<()> {
        self.store
            .delete_read_mapping(read_mapping_id)
            .await
            .op("ReadMappingService.DeleteReadMappingById")?;
        self.registry.evict(read_mapping_id);

        info!(read_mapping_id = %read_mapping_id, "Read mapping deleted");
        Ok(())
    }
}
