//! PostgreSQL store.
//!
//! Queries are checked at runtime (`query_as` with `FromRow` rows) so the crate
//! builds without a live database.

use super::{generate_id, job_not_found, Store, StoreTransaction};
use crate::constants::entities;
use crate::error::{OrderflowError, Result, ResultExt};
use crate::models::{Job, Order, Process, ReadMapping, Task, TaskCategory, TaskRelation};
use crate::telemetry::TraceContext;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const JOB_COLUMNS: &str = "task_id, order_id, process_id, category, action, read_mapping_id, \
                           ready_num, ready_req, started, completed, trace";

const CLAIM_READY_JOBS: &str = "UPDATE orderflow_jobs SET started = TRUE
WHERE (task_id, order_id) IN (
  SELECT task_id, order_id FROM orderflow_jobs
  WHERE ready_num >= ready_req AND started = FALSE
  ORDER BY created_at
  LIMIT $1
  FOR UPDATE SKIP LOCKED
) RETURNING task_id, order_id, process_id, category, action, read_mapping_id, \
            ready_num, ready_req, started, completed, trace";

const COMPLETE_JOB: &str = "UPDATE orderflow_jobs SET completed = TRUE
WHERE completed = FALSE AND task_id = $1 AND order_id = $2
RETURNING process_id";

const ADVANCE_CHILD_JOBS: &str = "UPDATE orderflow_jobs j
SET ready_num = j.ready_num + 1
WHERE j.order_id = $2 AND j.completed = FALSE AND j.task_id IN (
  SELECT r.child_id FROM orderflow_task_relations r
  WHERE r.process_id = $3 AND r.parent_id = $1
)";

const INSERT_JOB: &str = "INSERT INTO orderflow_jobs
(task_id, order_id, process_id, category, action, read_mapping_id, ready_num, ready_req, started, completed, trace)
VALUES ($1, $2, $3, $4, $5, $6, 0, $7, FALSE, FALSE, $8)";

#[derive(Debug, sqlx::FromRow)]
struct ProcessRow {
    process_id: String,
    name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    process_id: String,
    task_id: String,
    name: String,
    category: i32,
    action: String,
    read_mapping_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRelationRow {
    process_id: String,
    parent_id: String,
    child_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    process_id: String,
    body: serde_json::Value,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    task_id: String,
    order_id: String,
    process_id: String,
    category: i32,
    action: String,
    read_mapping_id: String,
    ready_num: i32,
    ready_req: i32,
    started: bool,
    completed: bool,
    trace: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReadMappingRow {
    read_mapping_id: String,
    body: Json<BTreeMap<String, String>>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.task_id,
            name: row.name,
            category: TaskCategory::from(row.category),
            action: row.action,
            read_mapping_id: row.read_mapping_id,
        }
    }
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.order_id,
            process_id: row.process_id,
            body: row.body,
        }
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            task_id: row.task_id,
            order_id: row.order_id,
            process_id: row.process_id,
            category: TaskCategory::from(row.category),
            action: row.action,
            read_mapping_id: row.read_mapping_id,
            ready_num: row.ready_num,
            ready_req: row.ready_req,
            started: row.started,
            completed: row.completed,
            trace: row.trace,
        }
    }
}

impl From<ReadMappingRow> for ReadMapping {
    fn from(row: ReadMappingRow) -> Self {
        ReadMapping {
            id: row.read_mapping_id,
            body: row.body.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_graph(&self, process: ProcessRow) -> Result<Process> {
        let tasks = sqlx::query_as::<_, TaskRow>(
            "SELECT process_id, task_id, name, category, action, read_mapping_id
             FROM orderflow_tasks WHERE process_id = $1 ORDER BY task_id",
        )
        .bind(&process.process_id)
        .fetch_all(&self.pool)
        .await?;

        let relations = sqlx::query_as::<_, TaskRelationRow>(
            "SELECT process_id, parent_id, child_id
             FROM orderflow_task_relations WHERE process_id = $1",
        )
        .bind(&process.process_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Process {
            id: process.process_id,
            name: process.name,
            tasks: tasks.into_iter().map(Task::from).collect(),
            task_relations: relations
                .into_iter()
                .map(|r| TaskRelation::new(r.parent_id, r.child_id))
                .collect(),
        })
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn list_processes(&self) -> Result<Vec<Process>> {
        let rows = sqlx::query_as::<_, ProcessRow>(
            "SELECT process_id, name FROM orderflow_processes ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .op("PgStore.ListProcesses")?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let tasks = sqlx::query_as::<_, TaskRow>(
            "SELECT process_id, task_id, name, category, action, read_mapping_id
             FROM orderflow_tasks ORDER BY task_id",
        )
        .fetch_all(&self.pool)
        .await
        .op("PgStore.ListProcesses")?;

        let relations = sqlx::query_as::<_, TaskRelationRow>(
            "SELECT process_id, parent_id, child_id FROM orderflow_task_relations",
        )
        .fetch_all(&self.pool)
        .await
        .op("PgStore.ListProcesses")?;

        let mut processes: Vec<Process> = rows
            .into_iter()
            .map(|row| Process {
                id: row.process_id,
                name: row.name,
                ..Default::default()
            })
            .collect();

        for task in tasks {
            if let Some(process) = processes.iter_mut().find(|p| p.id == task.process_id) {
                process.add_task(task.into());
            }
        }
        for relation in relations {
            if let Some(process) = processes.iter_mut().find(|p| p.id == relation.process_id) {
                process.add_task_relation(TaskRelation::new(relation.parent_id, relation.child_id));
            }
        }

        Ok(processes)
    }

    #[instrument(skip(self))]
    async fn find_process(&self, process_id: &str) -> Result<Option<Process>> {
        let row = sqlx::query_as::<_, ProcessRow>(
            "SELECT process_id, name FROM orderflow_processes WHERE process_id = $1",
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await
        .op("PgStore.FindProcess")?;

        match row {
            Some(row) => self.load_graph(row).await.op("PgStore.FindProcess").map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT order_id, process_id, body FROM orderflow_orders ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .op("PgStore.ListOrders")?;

        Ok(rows.into_iter().map(Order::from).collect())
    }

    #[instrument(skip(self))]
    async fn find_order(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT order_id, process_id, body FROM orderflow_orders WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .op("PgStore.FindOrder")?;

        Ok(row.map(Order::from))
    }

    #[instrument(skip(self))]
    async fn find_jobs_by_order(&self, order_id: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM orderflow_jobs WHERE order_id = $1 ORDER BY created_at, task_id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .op("PgStore.FindJobsByOrder")?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_read_mappings(&self) -> Result<Vec<ReadMapping>> {
        let rows = sqlx::query_as::<_, ReadMappingRow>(
            "SELECT read_mapping_id, body FROM orderflow_read_mappings ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .op("PgStore.ListReadMappings")?;

        Ok(rows.into_iter().map(ReadMapping::from).collect())
    }

    #[instrument(skip(self))]
    async fn find_read_mapping(&self, read_mapping_id: &str) -> Result<Option<ReadMapping>> {
        let row = sqlx::query_as::<_, ReadMappingRow>(
            "SELECT read_mapping_id, body FROM orderflow_read_mappings WHERE read_mapping_id = $1",
        )
        .bind(read_mapping_id)
        .fetch_optional(&self.pool)
        .await
        .op("PgStore.FindReadMapping")?;

        Ok(row.map(ReadMapping::from))
    }

    #[instrument(skip(self, mapping))]
    async fn create_read_mapping(&self, mut mapping: ReadMapping) -> Result<ReadMapping> {
        mapping.id = generate_id();
        sqlx::query("INSERT INTO orderflow_read_mappings (read_mapping_id, body) VALUES ($1, $2)")
            .bind(&mapping.id)
            .bind(Json(&mapping.body))
            .execute(&self.pool)
            .await
            .op("PgStore.CreateReadMapping")?;

        Ok(mapping)
    }

    #[instrument(skip(self))]
    async fn delete_read_mapping(&self, read_mapping_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM orderflow_read_mappings WHERE read_mapping_id = $1")
            .bind(read_mapping_id)
            .execute(&self.pool)
            .await
            .op("PgStore.DeleteReadMapping")?;

        if result.rows_affected() == 0 {
            return Err(
                OrderflowError::not_found(entities::READ_MAPPING, read_mapping_id)
                    .with_op("PgStore.DeleteReadMapping"),
            );
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_ready_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(CLAIM_READY_JOBS)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .op("PgStore.ClaimReadyJobs")?;

        debug!(claimed = rows.len(), limit, "Claimed ready jobs");
        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrderflowError::TransactionFailure(format!("begin: {e}")))?;
        Ok(Box::new(PgStoreTransaction { tx: Some(tx) }))
    }
}

pub struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStoreTransaction {
    fn conn(&mut self, op: &str) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| OrderflowError::no_active_transaction(op))
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    #[instrument(skip(self, process), fields(name = %process.name))]
    async fn create_process(&mut self, mut process: Process) -> Result<Process> {
        let conn = self.conn("create_process")?;
        process.id = generate_id();

        sqlx::query("INSERT INTO orderflow_processes (process_id, name) VALUES ($1, $2)")
            .bind(&process.id)
            .bind(&process.name)
            .execute(&mut *conn)
            .await
            .op("PgStore.CreateProcess")?;

        for task in &process.tasks {
            sqlx::query(
                "INSERT INTO orderflow_tasks (process_id, task_id, name, category, action, read_mapping_id)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&process.id)
            .bind(&task.id)
            .bind(&task.name)
            .bind(i32::from(task.category))
            .bind(&task.action)
            .bind(&task.read_mapping_id)
            .execute(&mut *conn)
            .await
            .op("PgStore.CreateTask")?;
        }

        for relation in &process.task_relations {
            sqlx::query(
                "INSERT INTO orderflow_task_relations (process_id, parent_id, child_id) VALUES ($1, $2, $3)",
            )
            .bind(&process.id)
            .bind(&relation.parent_id)
            .bind(&relation.child_id)
            .execute(&mut *conn)
            .await
            .op("PgStore.CreateTaskRelation")?;
        }

        Ok(process)
    }

    #[instrument(skip(self))]
    async fn delete_process(&mut self, process_id: &str) -> Result<()> {
        let conn = self.conn("delete_process")?;

        // tasks and relations go with the process row via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM orderflow_processes WHERE process_id = $1")
            .bind(process_id)
            .execute(&mut *conn)
            .await
            .op("PgStore.DeleteProcess")?;

        if result.rows_affected() == 0 {
            return Err(OrderflowError::not_found(entities::PROCESS, process_id)
                .with_op("PgStore.DeleteProcess"));
        }
        Ok(())
    }

    #[instrument(skip(self, order))]
    async fn create_order(&mut self, mut order: Order) -> Result<Order> {
        let conn = self.conn("create_order")?;
        order.id = generate_id();

        sqlx::query("INSERT INTO orderflow_orders (order_id, process_id, body) VALUES ($1, $2, $3)")
            .bind(&order.id)
            .bind(&order.process_id)
            .bind(&order.body)
            .execute(&mut *conn)
            .await
            .op("PgStore.CreateOrder")?;

        Ok(order)
    }

    #[instrument(skip(self))]
    async fn delete_order(&mut self, order_id: &str) -> Result<()> {
        let conn = self.conn("delete_order")?;

        // jobs go with the order row via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM orderflow_orders WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *conn)
            .await
            .op("PgStore.DeleteOrder")?;

        if result.rows_affected() == 0 {
            return Err(
                OrderflowError::not_found(entities::ORDER, order_id).with_op("PgStore.DeleteOrder")
            );
        }
        Ok(())
    }

    #[instrument(skip(self, process, trace), fields(process_id = %process.id))]
    async fn create_jobs(
        &mut self,
        order_id: &str,
        process: &Process,
        trace: &TraceContext,
    ) -> Result<usize> {
        let conn = self.conn("create_jobs")?;
        let token = trace.to_token();

        for task in &process.tasks {
            sqlx::query(INSERT_JOB)
                .bind(&task.id)
                .bind(order_id)
                .bind(&process.id)
                .bind(i32::from(task.category))
                .bind(&task.action)
                .bind(&task.read_mapping_id)
                .bind(process.required_parents(&task.id))
                .bind(&token)
                .execute(&mut *conn)
                .await
                .op("PgStore.CreateJobs")?;
        }

        Ok(process.tasks.len())
    }

    #[instrument(skip(self))]
    async fn complete_job(&mut self, task_id: &str, order_id: &str) -> Result<u64> {
        let conn = self.conn("complete_job")?;

        let process_id: Option<String> = sqlx::query_scalar(COMPLETE_JOB)
            .bind(task_id)
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await
            .op("PgStore.CompleteJob")?;

        let Some(process_id) = process_id else {
            return Err(job_not_found(task_id, order_id).with_op("PgStore.CompleteJob"));
        };

        let advanced = sqlx::query(ADVANCE_CHILD_JOBS)
            .bind(task_id)
            .bind(order_id)
            .bind(&process_id)
            .execute(&mut *conn)
            .await
            .op("PgStore.CompleteRelatedJobs")?;

        Ok(advanced.rows_affected())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrderflowError::no_active_transaction("commit"))?;
        tx.commit()
            .await
            .map_err(|e| OrderflowError::TransactionFailure(format!("commit: {e}")))
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrderflowError::no_active_transaction("rollback"))?;
        tx.rollback()
            .await
            .map_err(|e| OrderflowError::TransactionFailure(format!("rollback: {e}")))
    }
}
