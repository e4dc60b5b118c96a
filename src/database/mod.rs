//! # Order/Job Store
//!
//! Persistence for processes, orders, jobs and read mappings, and the readiness
//! bookkeeping that drives the graph forward.
//!
//! ## Key Components
//!
//! - [`Store`] - reads, read-mapping writes, the atomic claim, and `begin()`
//! - [`StoreTransaction`] - every multi-row mutation, committed or rolled back as a unit
//! - [`execute_in_transaction`] - begin / run / commit-or-rollback helper
//! - [`PgStore`] - PostgreSQL implementation
//! - [`InMemoryStore`] - process-local implementation with identical semantics
//! - [`migrations`] - schema migration runner
//!
//! ## Readiness
//!
//! Each job carries `ready_req` (its task's in-degree, fixed at creation) and
//! `ready_num` (parents completed so far). Completing a job bumps `ready_num` on
//! the job's direct children within the same order, and
//! [`Store::claim_ready_jobs`] flips `started` on jobs with
//! `ready_num >= ready_req` in a single atomic step.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use orderflow::database::{execute_in_transaction, InMemoryStore, Store};
//! use orderflow::models::Order;
//!
//! # async fn example() -> orderflow::error::Result<()> {
//! let store = InMemoryStore::new();
//! let order = Order::new(serde_json::json!({"id": "42"}));
//! let saved = execute_in_transaction(&store, move |tx| {
//!     Box::pin(async move { tx.create_order(order).await })
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;

pub use connection::DatabaseConnection;
pub use memory::InMemoryStore;
pub use migrations::DatabaseMigrations;
pub use postgres::PgStore;

use crate::error::{OrderflowError, Result};
use crate::models::{Job, Order, Process, ReadMapping};
use crate::telemetry::TraceContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_processes(&self) -> Result<Vec<Process>>;

    async fn find_process(&self, process_id: &str) -> Result<Option<Process>>;

    async fn list_orders(&self) -> Result<Vec<Order>>;

    async fn find_order(&self, order_id: &str) -> Result<Option<Order>>;

    async fn find_jobs_by_order(&self, order_id: &str) -> Result<Vec<Job>>;

    async fn list_read_mappings(&self) -> Result<Vec<ReadMapping>>;

    async fn find_read_mapping(&self, read_mapping_id: &str) -> Result<Option<ReadMapping>>;

    /// Persist a mapping under a freshly generated id
    async fn create_read_mapping(&self, mapping: ReadMapping) -> Result<ReadMapping>;

    /// Fails with `NotFound` when no mapping has this id
    async fn delete_read_mapping(&self, read_mapping_id: &str) -> Result<()>;

    /// Atomically mark up to `limit` ready, unstarted jobs as started and return them.
    ///
    /// A job is returned by at most one call, however many callers race.
    async fn claim_ready_jobs(&self, limit: i64) -> Result<Vec<Job>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Mutations that must become visible together.
///
/// After `commit` or `rollback` every method fails with `NoActiveTransaction`.
/// Dropping an unfinished transaction discards its changes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Persist a process with its tasks and relations under a freshly generated id
    async fn create_process(&mut self, process: Process) -> Result<Process>;

    /// Remove a process with its tasks and relations; `NotFound` when absent
    async fn delete_process(&mut self, process_id: &str) -> Result<()>;

    /// Persist an order under a freshly generated id
    async fn create_order(&mut self, order: Order) -> Result<Order>;

    /// Remove an order and all of its jobs; `NotFound` when absent
    async fn delete_order(&mut self, order_id: &str) -> Result<()>;

    /// Create one job per task of `process` for `order_id`, stamped with `trace`.
    ///
    /// Returns the number of jobs created.
    async fn create_jobs(
        &mut self,
        order_id: &str,
        process: &Process,
        trace: &TraceContext,
    ) -> Result<usize>;

    /// Mark a job completed and advance its direct children in the same order.
    ///
    /// Fails with `NotFound` when the job does not exist or is already completed.
    /// Returns the number of child jobs advanced.
    async fn complete_job(&mut self, task_id: &str, order_id: &str) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Run `f` inside a store transaction: commit when it succeeds, roll back when it fails.
///
/// A rollback failure is logged and the error from `f` is returned.
pub async fn execute_in_transaction<T, F>(store: &dyn Store, f: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = store.begin().await?;

    match f(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(
                    error = %error,
                    rollback_error = %rollback_error,
                    "Rollback failed after transaction error"
                );
            }
            Err(error)
        }
    }
}

/// `NotFound` error for a job key
pub(crate) fn job_not_found(task_id: &str, order_id: &str) -> OrderflowError {
    OrderflowError::not_found(
        crate::constants::entities::JOB,
        format!("({task_id}, {order_id})"),
    )
}

/// Fresh entity identifier
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
