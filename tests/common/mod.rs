//! Shared fixtures for integration tests
#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use orderflow::config::SchedulerConfig;
use orderflow::database::{InMemoryStore, Store};
use orderflow::error::{OrderflowError, Result};
use orderflow::models::{JobStartMessage, Process, ReadMapping, Task, TaskCategory};
use orderflow::orchestration::{
    JobDispatcher, JobScheduler, MappingRegistry, OrderService, ProcessService,
    ReadMappingService,
};
use orderflow::telemetry::TraceContext;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// One recorded dispatch
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub destination: String,
    pub message: JobStartMessage,
    pub trace: TraceContext,
}

/// Dispatcher that records every call and fails for configured destinations
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Dispatched>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingDispatcher {
    pub fn fail_destination(&self, destination: &str) {
        self.failing.lock().insert(destination.to_string());
    }

    pub fn sent(&self) -> Vec<Dispatched> {
        self.sent.lock().clone()
    }

    pub fn sent_task_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|d| d.message.task_id.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        destination: &str,
        message: &JobStartMessage,
        trace: &TraceContext,
    ) -> Result<()> {
        if self.failing.lock().contains(destination) {
            return Err(OrderflowError::DispatchFailure {
                destination: destination.to_string(),
                reason: "HTTP 503 Service Unavailable: worker down".to_string(),
            });
        }
        self.sent.lock().push(Dispatched {
            destination: destination.to_string(),
            message: message.clone(),
            trace: *trace,
        });
        Ok(())
    }
}

/// Services, scheduler and recording dispatcher wired over one in-memory store
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<MappingRegistry>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub processes: ProcessService,
    pub orders: OrderService,
    pub mappings: ReadMappingService,
    pub scheduler: JobScheduler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_job_limit(10)
    }

    pub fn with_job_limit(job_limit: i64) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let shared: Arc<dyn Store> = store.clone();
        let registry = Arc::new(MappingRegistry::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let scheduler = JobScheduler::new(
            SchedulerConfig {
                job_limit,
                period_ms: 20,
                ..Default::default()
            },
            shared.clone(),
            registry.clone(),
            dispatcher.clone(),
        );

        Self {
            processes: ProcessService::new(shared.clone()),
            orders: OrderService::new(shared.clone()),
            mappings: ReadMappingService::new(shared, registry.clone()),
            store,
            registry,
            dispatcher,
            scheduler,
        }
    }

    /// Mapping projecting the order's `id` field to `x`
    pub async fn id_mapping(&self) -> ReadMapping {
        self.mappings
            .create_read_mapping(ReadMapping::new([("x", "$.id")]))
            .await
            .expect("create mapping")
    }
}

pub fn http_task(id: &str, mapping_id: &str) -> Task {
    Task::new(id, TaskCategory::Http, format!("http://workers/{id}"), mapping_id)
}

/// `a -> b`, `a -> c`, `b -> c`: c waits for both a and b
pub fn triangle_process(mapping_id: &str) -> Process {
    Process::new("triangle")
        .with_task(http_task("a", mapping_id))
        .with_task(http_task("b", mapping_id))
        .with_task(http_task("c", mapping_id))
        .with_relation("a", "b")
        .with_relation("a", "c")
        .with_relation("b", "c")
}
