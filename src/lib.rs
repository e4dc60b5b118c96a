#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, JSONPath in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Orderflow
//!
//! Order-driven workflow orchestration. A **process** is a DAG of tasks; every
//! submitted **order** instantiates one **job** per task. A polling scheduler
//! claims jobs whose parents have all completed, projects the order's data into
//! each job's payload through a compiled **read mapping**, and POSTs it to the
//! task's worker. Workers report back through the completion callback, which
//! advances the job's children.
//!
//! ## Module Organization
//!
//! - [`models`] - processes, tasks, orders, jobs, read mappings
//! - [`template`] - read mapping compile / evaluate
//! - [`database`] - store contract, PostgreSQL and in-memory stores, migrations
//! - [`orchestration`] - order, process and mapping services, dispatch, scheduler
//! - [`telemetry`] - trace context carried from submission to dispatch
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup
//! - [`error`] - error taxonomy with operation tags
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use orderflow::database::{InMemoryStore, Store};
//! use orderflow::models::{Order, Process, Task, TaskCategory};
//! use orderflow::orchestration::{OrderService, ProcessService};
//! use orderflow::telemetry::TraceContext;
//!
//! # async fn example() -> orderflow::Result<()> {
//! let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
//! let processes = ProcessService::new(store.clone());
//! let orders = OrderService::new(store.clone());
//!
//! let process = processes
//!     .create_process(
//!         Process::new("fulfilment")
//!             .with_task(Task::new("reserve", TaskCategory::Http, "http://stock/reserve", "m1"))
//!             .with_task(Task::new("ship", TaskCategory::Http, "http://ship/start", "m1"))
//!             .with_relation("reserve", "ship"),
//!     )
//!     .await?;
//!
//! let ctx = TraceContext::new_root();
//! let order = orders
//!     .submit_order(&ctx, Order::new(serde_json::json!({"id": "42"})), &process.id)
//!     .await?;
//! orders.complete_job(&ctx, "reserve", &order.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod telemetry;
pub mod template;

pub use config::{ConfigManager, OrderflowConfig};
pub use error::{ErrorKind, OrderflowError, Result, ResultExt};
pub use models::{Job, Order, Process, ReadMapping, Task, TaskCategory, TaskRelation};
pub use telemetry::TraceContext;
