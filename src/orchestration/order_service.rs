//! # Order Service
//!
//! Entry points that move an order through its graph: submission creates the
//! order and every job in one transaction, and job completion (the only
//! external trigger for progress) advances the completed job's children.

use crate::constants::entities;
use crate::database::{execute_in_transaction, Store};
use crate::error::{OrderflowError, Result, ResultExt};
use crate::logging::{log_job_operation, log_order_operation};
use crate::models::{Job, Order};
use crate::telemetry::TraceContext;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService").finish_non_exhaustive()
    }
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create `order` against `process_id` together with one job per task.
    ///
    /// Every job is stamped with `ctx` so the scheduler can continue the trace
    /// when it dispatches them.
    #[instrument(skip(self, ctx, order), fields(trace_id = %ctx.trace_id_hex()))]
    pub async fn submit_order(
        &self,
        ctx: &TraceContext,
        mut order: Order,
        process_id: &str,
    ) -> Result<Order> {
        const OP: &str = "OrderService.SubmitOrder";

        let process = self
            .store
            .find_process(process_id)
            .await
            .op(OP)?
            .ok_or_else(|| OrderflowError::not_found(entities::PROCESS, process_id).with_op(OP))?;

        order.process_id = process.id.clone();
        let trace = *ctx;

        let (saved, job_count) = execute_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                let saved = tx.create_order(order).await?;
                let job_count = tx.create_jobs(&saved.id, &process, &trace).await?;
                Ok((saved, job_count))
            })
        })
        .await
        .op(OP)?;

        log_order_operation(
            "submit",
            Some(&saved.id),
            Some(process_id),
            "created",
            Some(&format!("{job_count} jobs")),
        );
        Ok(saved)
    }

    /// Mark `(task_id, order_id)` completed and advance its children.
    ///
    /// Completing an unknown or already completed job is `NotFound` and changes nothing.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id_hex()))]
    pub async fn complete_job(
        &self,
        ctx: &TraceContext,
        task_id: &str,
        order_id: &str,
    ) -> Result<()> {
        let (task, order) = (task_id.to_string(), order_id.to_string());

        let advanced = execute_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.complete_job(&task, &order).await })
        })
        .await
        .op("OrderService.CompleteJob")?;

        log_job_operation(
            "complete",
            task_id,
            order_id,
            "completed",
            Some(&format!("{advanced} child jobs advanced")),
        );
        Ok(())
    }

    pub async fn get_orders(&self) -> Result<Vec<Order>> {
        self.store.list_orders().await.op("OrderService.GetOrders")
    }

    pub async fn get_order_by_id(&self, order_id: &str) -> Result<Order> {
        const OP: &str = "OrderService.GetOrderById";
        self.store
            .find_order(order_id)
            .await
            .op(OP)?
            .ok_or_else(|| OrderflowError::not_found(entities::ORDER, order_id).with_op(OP))
    }

    /// Jobs of an existing order, with their readiness state
    pub async fn get_order_jobs(&self, order_id: &str) -> Result<Vec<Job>> {
        const OP: &str = "OrderService.GetOrderJobs";
        if self.store.find_order(order_id).await.op(OP)?.is_none() {
            return Err(OrderflowError::not_found(entities::ORDER, order_id).with_op(OP));
        }
        self.store.find_jobs_by_order(order_id).await.op(OP)
    }

    /// Remove an order and all of its jobs
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: &str) -> Result<()> {
        let id = order_id.to_string();
        execute_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.delete_order(&id).await })
        })
        .await
        .op("OrderService.DeleteOrderById")?;

        debug!(order_id = %order_id, "Order deleted");
        log_order_operation("delete", Some(order_id), None, "deleted", None);
        Ok(())
    }
}
