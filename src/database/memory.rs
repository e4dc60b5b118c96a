//! Process-local store.
//!
//! All state sits behind one async mutex. A transaction takes the lock for its
//! whole lifetime and works on a copy of the state, which replaces the shared
//! state on commit; rollback or drop simply discards the copy. Transactions are
//! therefore fully serialized, and reads issued while one is open wait for it.

use super::{generate_id, job_not_found, Store, StoreTransaction};
use crate::constants::entities;
use crate::error::{OrderflowError, Result};
use crate::models::{Job, Order, Process, ReadMapping};
use crate::telemetry::TraceContext;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    processes: Vec<Process>,
    orders: Vec<Order>,
    jobs: Vec<Job>,
    read_mappings: Vec<ReadMapping>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted orders
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Number of persisted jobs across all orders
    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_processes(&self) -> Result<Vec<Process>> {
        Ok(self.state.lock().await.processes.clone())
    }

    async fn find_process(&self, process_id: &str) -> Result<Option<Process>> {
        let state = self.state.lock().await;
        Ok(state.processes.iter().find(|p| p.id == process_id).cloned())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.state.lock().await.orders.clone())
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn find_jobs_by_order(&self, order_id: &str) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|job| job.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_read_mappings(&self) -> Result<Vec<ReadMapping>> {
        Ok(self.state.lock().await.read_mappings.clone())
    }

    async fn find_read_mapping(&self, read_mapping_id: &str) -> Result<Option<ReadMapping>> {
        let state = self.state.lock().await;
        Ok(state
            .read_mappings
            .iter()
            .find(|m| m.id == read_mapping_id)
            .cloned())
    }

    async fn create_read_mapping(&self, mut mapping: ReadMapping) -> Result<ReadMapping> {
        mapping.id = generate_id();
        self.state.lock().await.read_mappings.push(mapping.clone());
        Ok(mapping)
    }

    async fn delete_read_mapping(&self, read_mapping_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.read_mappings.len();
        state.read_mappings.retain(|m| m.id != read_mapping_id);
        if state.read_mappings.len() == before {
            return Err(OrderflowError::not_found(
                entities::READ_MAPPING,
                read_mapping_id,
            ));
        }
        Ok(())
    }

    async fn claim_ready_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut state = self.state.lock().await;

        let claimed: Vec<Job> = state
            .jobs
            .iter_mut()
            .filter(|job| job.is_claimable())
            .take(limit)
            .map(|job| {
                job.started = true;
                job.clone()
            })
            .collect();

        debug!(claimed = claimed.len(), limit, "Claimed ready jobs");
        Ok(claimed)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            active: Some(ActiveTransaction { guard, working }),
        }))
    }
}

struct ActiveTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

pub struct MemoryTransaction {
    active: Option<ActiveTransaction>,
}

impl MemoryTransaction {
    fn state(&mut self, op: &str) -> Result<&mut MemoryState> {
        self.active
            .as_mut()
            .map(|active| &mut active.working)
            .ok_or_else(|| OrderflowError::no_active_transaction(op))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn create_process(&mut self, mut process: Process) -> Result<Process> {
        let state = self.state("create_process")?;
        process.id = generate_id();
        state.processes.push(process.clone());
        Ok(process)
    }

    async fn delete_process(&mut self, process_id: &str) -> Result<()> {
        let state = self.state("delete_process")?;
        let before = state.processes.len();
        state.processes.retain(|p| p.id != process_id);
        if state.processes.len() == before {
            return Err(OrderflowError::not_found(entities::PROCESS, process_id));
        }
        Ok(())
    }

    async fn create_order(&mut self, mut order: Order) -> Result<Order> {
        let state = self.state("create_order")?;
        order.id = generate_id();
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn delete_order(&mut self, order_id: &str) -> Result<()> {
        let state = self.state("delete_order")?;
        let before = state.orders.len();
        state.orders.retain(|o| o.id != order_id);
        if state.orders.len() == before {
            return Err(OrderflowError::not_found(entities::ORDER, order_id));
        }
        state.jobs.retain(|job| job.order_id != order_id);
        Ok(())
    }

    async fn create_jobs(
        &mut self,
        order_id: &str,
        process: &Process,
        trace: &TraceContext,
    ) -> Result<usize> {
        let state = self.state("create_jobs")?;
        let token = trace.to_token();

        for task in &process.tasks {
            if state
                .jobs
                .iter()
                .any(|job| job.task_id == task.id && job.order_id == order_id)
            {
                return Err(OrderflowError::DatabaseError(format!(
                    "duplicate job ({}, {order_id})",
                    task.id
                )));
            }
            state.jobs.push(Job {
                task_id: task.id.clone(),
                order_id: order_id.to_string(),
                process_id: process.id.clone(),
                category: task.category,
                action: task.action.clone(),
                read_mapping_id: task.read_mapping_id.clone(),
                ready_num: 0,
                ready_req: process.required_parents(&task.id),
                started: false,
                completed: false,
                trace: Some(token.clone()),
            });
        }

        Ok(process.tasks.len())
    }

    async fn complete_job(&mut self, task_id: &str, order_id: &str) -> Result<u64> {
        let state = self.state("complete_job")?;

        let job = state
            .jobs
            .iter_mut()
            .find(|job| job.task_id == task_id && job.order_id == order_id && !job.completed)
            .ok_or_else(|| job_not_found(task_id, order_id))?;
        job.completed = true;
        let process_id = job.process_id.clone();

        let children: HashSet<String> = state
            .processes
            .iter()
            .find(|p| p.id == process_id)
            .map(|process| process.children_of(task_id).map(str::to_string).collect())
            .unwrap_or_default();

        let mut advanced = 0;
        for child in state.jobs.iter_mut().filter(|job| {
            job.order_id == order_id && !job.completed && children.contains(&job.task_id)
        }) {
            child.ready_num += 1;
            advanced += 1;
        }

        Ok(advanced)
    }

    async fn commit(&mut self) -> Result<()> {
        let ActiveTransaction { mut guard, working } = self
            .active
            .take()
            .ok_or_else(|| OrderflowError::no_active_transaction("commit"))?;
        *guard = working;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.active
            .take()
            .map(|_| ())
            .ok_or_else(|| OrderflowError::no_active_transaction("rollback"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{Task, TaskCategory};

    fn chain() -> Process {
        Process::new("chain")
            .with_task(Task::new("a", TaskCategory::Http, "http://a", "m"))
            .with_task(Task::new("b", TaskCategory::Http, "http://b", "m"))
            .with_relation("a", "b")
    }

    async fn seeded(store: &InMemoryStore) -> (Process, Order) {
        let mut tx = store.begin().await.unwrap();
        let process = tx.create_process(chain()).await.unwrap();
        let order = tx
            .create_order(Order::new(serde_json::json!({"id": 1})))
            .await
            .unwrap();
        tx.create_jobs(&order.id, &process, &TraceContext::new_root())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (process, order)
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_order(Order::new(serde_json::json!({})))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_drop_discards_changes() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.create_order(Order::new(serde_json::json!({})))
                .await
                .unwrap();
        }
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_finished_transaction_rejects_calls() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();

        let error = tx
            .create_order(Order::new(serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NoActiveTransaction);
        assert_eq!(
            tx.commit().await.unwrap_err().kind(),
            ErrorKind::NoActiveTransaction
        );
    }

    #[tokio::test]
    async fn test_claim_then_complete_advances_child() {
        let store = InMemoryStore::new();
        let (_, order) = seeded(&store).await;

        let first = store.claim_ready_jobs(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].task_id, "a");
        assert!(first[0].started);
        assert!(store.claim_ready_jobs(10).await.unwrap().is_empty());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.complete_job("a", &order.id).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let second = store.claim_ready_jobs(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].task_id, "b");
        assert_eq!(second[0].ready_num, 1);
    }

    #[tokio::test]
    async fn test_claim_respects_limit() {
        let store = InMemoryStore::new();
        seeded(&store).await;
        seeded(&store).await;
        seeded(&store).await;

        assert_eq!(store.claim_ready_jobs(2).await.unwrap().len(), 2);
        assert_eq!(store.claim_ready_jobs(2).await.unwrap().len(), 1);
        assert!(store.claim_ready_jobs(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_order_removes_jobs() {
        let store = InMemoryStore::new();
        let (_, order) = seeded(&store).await;
        assert_eq!(store.job_count().await, 2);

        let mut tx = store.begin().await.unwrap();
        tx.delete_order(&order.id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.job_count().await, 0);
        assert!(store.find_order(&order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_read_mapping_reports_missing() {
        let store = InMemoryStore::new();
        let error = store.delete_read_mapping("missing").await.unwrap_err();
        assert!(error.is_not_found());
    }
}
