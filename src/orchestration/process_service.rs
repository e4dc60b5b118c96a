//! Process graph management.
//!
//! A process is written together with all of its tasks and relations in one
//! transaction, so a partially stored graph is never visible.

use crate::constants::entities;
use crate::database::{execute_in_transaction, Store};
use crate::error::{OrderflowError, Result, ResultExt};
use crate::models::Process;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct ProcessService {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for ProcessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessService").finish_non_exhaustive()
    }
}

impl ProcessService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, process), fields(name = %process.name, tasks = process.tasks.len()))]
    pub async fn create_process(&self, process: Process) -> Result<Process> {
        let created = execute_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.create_process(process).await })
        })
        .await
        .op("ProcessService.CreateProcess")?;

        info!(
            process_id = %created.id,
            tasks = created.tasks.len(),
            relations = created.task_relations.len(),
            "Process created"
        );
        Ok(created)
    }

    pub async fn get_processes(&self) -> Result<Vec<Process>> {
        self.store
            .list_processes()
            .await
            .op("ProcessService.GetProcesses")
    }

    pub async fn get_process_by_id(&self, process_id: &str) -> Result<Process> {
        const OP: &str = "ProcessService.GetProcessById";
        self.store
            .find_process(process_id)
            .await
            .op(OP)?
            .ok_or_else(|| OrderflowError::not_found(entities::PROCESS, process_id).with_op(OP))
    }

    /// Remove a process with its tasks and relations; orders already submitted keep their jobs
    #[instrument(skip(self))]
    pub async fn delete_process_by_id(&self, process_id: &str) -> Result<()> {
        let id = process_id.to_string();
        execute_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.delete_process(&id).await })
        })
        .await
        .op("ProcessService.DeleteProcessById")?;

        info!(process_id = %process_id, "Process deleted");
        Ok(())
    }
}
