//! # Job Scheduler
//!
//! Polls the store on a fixed period, claims a bounded batch of ready jobs and
//! dispatches each one.
//!
//! One poll cycle is an explicit state machine so it can be driven step by step
//! without a timer:
//!
//! ```text
//! Idle -> Claiming -> Dispatching(job 1) -> ... -> Dispatching(job n) -> Idle
//!            |
//!            +-- claim failed / nothing ready ------------------------> Idle
//! ```
//!
//! A failure on one job (missing order, mapping that does not evaluate,
//! transport error) is logged and counted; the cycle moves on. The job stays
//! started and uncompleted, and is not claimed again. Only a failed claim ends
//! a cycle early, and the next tick simply tries again.
//!
//! Shutdown is checked between cycles, never in the middle of one.

use super::dispatcher::JobDispatcher;
use super::mapping_registry::MappingRegistry;
use crate::config::SchedulerConfig;
use crate::constants::entities;
use crate::database::Store;
use crate::error::{OrderflowError, Result, ResultExt};
use crate::logging::{log_error, log_job_operation};
use crate::models::{Job, JobStartMessage};
use crate::telemetry::TraceContext;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Counters for one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub dispatched: usize,
    /// Claimed jobs whose category has no dispatch transport
    pub skipped: usize,
    pub failed: usize,
    pub claim_failed: bool,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0 && !self.claim_failed
    }
}

/// Claimed jobs still waiting for dispatch in the current cycle
#[derive(Debug, Clone, Default)]
pub struct DispatchQueue {
    pending: VecDeque<Job>,
    report: CycleReport,
}

impl DispatchQueue {
    fn new(jobs: Vec<Job>) -> Self {
        Self {
            report: CycleReport {
                claimed: jobs.len(),
                ..Default::default()
            },
            pending: jobs.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn report(&self) -> &CycleReport {
        &self.report
    }
}

#[derive(Debug, Clone)]
pub enum CycleState {
    Idle,
    Claiming,
    Dispatching(DispatchQueue),
}

#[derive(Debug, Clone)]
pub enum Transition {
    Next(CycleState),
    Finished(CycleReport),
}

/// What happened to a single claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    Skipped,
}

pub struct JobScheduler {
    scheduler_id: Uuid,
    config: SchedulerConfig,
    store: Arc<dyn Store>,
    registry: Arc<MappingRegistry>,
    dispatcher: Arc<dyn JobDispatcher>,
    last_report: RwLock<Option<CycleReport>>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("scheduler_id", &self.scheduler_id)
            .field("config", &self.config)
            .field("last_report", &*self.last_report.read())
            .finish()
    }
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn Store>,
        registry: Arc<MappingRegistry>,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        let scheduler_id = Uuid::new_v4();

        info!(
            scheduler_id = %scheduler_id,
            period_ms = config.period_ms,
            job_limit = config.job_limit,
            "Creating JobScheduler"
        );

        Self {
            scheduler_id,
            config,
            store,
            registry,
            dispatcher,
            last_report: RwLock::new(None),
        }
    }

    pub fn scheduler_id(&self) -> Uuid {
        self.scheduler_id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Report of the most recently finished cycle
    pub fn last_report(&self) -> Option<CycleReport> {
        *self.last_report.read()
    }

    /// Advance one cycle by a single transition
    pub async fn step(&self, state: CycleState) -> Transition {
        match state {
            CycleState::Idle => Transition::Next(CycleState::Claiming),
            CycleState::Claiming => match self.store.claim_ready_jobs(self.config.job_limit).await
            {
                Ok(jobs) if jobs.is_empty() => Transition::Finished(CycleReport::default()),
                Ok(jobs) => {
                    debug!(
                        scheduler_id = %self.scheduler_id,
                        claimed = jobs.len(),
                        "Claimed ready jobs"
                    );
                    Transition::Next(CycleState::Dispatching(DispatchQueue::new(jobs)))
                }
                Err(e) => {
                    error!(
                        scheduler_id = %self.scheduler_id,
                        error = %e,
                        "Failed to claim ready jobs"
                    );
                    Transition::Finished(CycleReport {
                        claim_failed: true,
                        ..Default::default()
                    })
                }
            },
            CycleState::Dispatching(mut queue) => {
                let Some(job) = queue.pending.pop_front() else {
                    return Transition::Finished(queue.report);
                };

                match self.dispatch_job(&job).await {
                    Ok(DispatchOutcome::Dispatched) => queue.report.dispatched += 1,
                    Ok(DispatchOutcome::Skipped) => queue.report.skipped += 1,
                    Err(e) => {
                        queue.report.failed += 1;
                        log_error(
                            "JobScheduler",
                            "dispatch",
                            &e.to_string(),
                            Some(&format!("task_id={} order_id={}", job.task_id, job.order_id)),
                        );
                    }
                }
                Transition::Next(CycleState::Dispatching(queue))
            }
        }
    }

    /// Run one full cycle from `Idle` back to `Idle`
    pub async fn run_cycle(&self) -> CycleReport {
        let mut state = CycleState::Idle;
        let report = loop {
            match self.step(state).await {
                Transition::Next(next) => state = next,
                Transition::Finished(report) => break report,
            }
        };

        *self.last_report.write() = Some(report);
        report
    }

    /// Build the payload for `job` and hand it to the dispatcher
    pub async fn dispatch_job(&self, job: &Job) -> Result<DispatchOutcome> {
        let trace = self.restore_trace(job);
        let span = tracing::info_span!(
            "dispatch_job",
            task_id = %job.task_id,
            order_id = %job.order_id,
            trace_id = %trace.trace_id_hex(),
        );

        self.build_and_send(job, &trace).instrument(span).await
    }

    async fn build_and_send(&self, job: &Job, trace: &TraceContext) -> Result<DispatchOutcome> {
        let order = self
            .store
            .find_order(&job.order_id)
            .await?
            .ok_or_else(|| OrderflowError::not_found(entities::ORDER, &job.order_id))?;
        let mapping = self
            .registry
            .get_or_load(self.store.as_ref(), &job.read_mapping_id)
            .await?;
        let message = JobStartMessage::for_job(job, mapping.evaluate(&order.body)?);

        if !job.category.is_http() {
            debug!(category = ?job.category, "No transport for task category, skipping dispatch");
            return Ok(DispatchOutcome::Skipped);
        }

        self.dispatcher.dispatch(&job.action, &message, trace).await?;
        log_job_operation(
            "dispatch",
            &job.task_id,
            &job.order_id,
            "dispatched",
            Some(&job.action),
        );
        Ok(DispatchOutcome::Dispatched)
    }

    /// Continue the submission trace stored on the job, or start a new one
    fn restore_trace(&self, job: &Job) -> TraceContext {
        match job.trace.as_deref() {
            Some(token) => TraceContext::resume(token).unwrap_or_else(|e| {
                warn!(
                    task_id = %job.task_id,
                    order_id = %job.order_id,
                    error = %e,
                    "Stored trace token unusable, starting a new trace"
                );
                TraceContext::new_root()
            }),
            None => TraceContext::new_root(),
        }
    }

    /// Poll until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            scheduler_id = %self.scheduler_id,
            period_ms = self.config.period_ms,
            "Starting scheduler polling loop"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.is_idle() {
                        debug!(scheduler_id = %self.scheduler_id, "No ready jobs found");
                    } else {
                        info!(
                            scheduler_id = %self.scheduler_id,
                            claimed = report.claimed,
                            dispatched = report.dispatched,
                            skipped = report.skipped,
                            failed = report.failed,
                            claim_failed = report.claim_failed,
                            "Scheduler cycle finished"
                        );
                    }
                }
            }
        }

        info!(scheduler_id = %self.scheduler_id, "Scheduler stopped");
    }

    /// Spawn the polling loop onto the runtime
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = Arc::clone(&self);
        let join = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        SchedulerHandle {
            scheduler: self,
            shutdown_tx,
            join,
        }
    }
}

/// Running scheduler loop
#[derive(Debug)]
pub struct SchedulerHandle {
    scheduler: Arc<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the loop to stop and wait for the cycle in progress to finish
    pub async fn shutdown(self) -> Result<()> {
        info!(scheduler_id = %self.scheduler.scheduler_id(), "Stopping scheduler");
        // The loop may already have exited; a closed channel is fine
        let _ = self.shutdown_tx.send(());
        self.join.await.op("SchedulerHandle.Shutdown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{execute_in_transaction, InMemoryStore};
    use crate::error::ErrorKind;
    use crate::models::{Order, Process, ReadMapping, Task, TaskCategory};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(String, JobStartMessage)>>,
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn dispatch(
            &self,
            destination: &str,
            message: &JobStartMessage,
            _trace: &TraceContext,
        ) -> Result<()> {
            self.sent
                .lock()
                .push((destination.to_string(), message.clone()));
            Ok(())
        }
    }

    async fn scheduler_with_order(
        category: TaskCategory,
    ) -> (JobScheduler, Arc<RecordingDispatcher>) {
        let store = Arc::new(InMemoryStore::new());
        let mapping = store
            .create_read_mapping(ReadMapping::new([("x", "$.id")]))
            .await
            .unwrap();
        let process = Process::new("single").with_task(Task::new(
            "a",
            category,
            "http://worker/a",
            mapping.id,
        ));

        execute_in_transaction(&*store, move |tx| {
            Box::pin(async move {
                let process = tx.create_process(process).await?;
                let mut order = Order::new(serde_json::json!({"id": "42"}));
                order.process_id = process.id.clone();
                let order = tx.create_order(order).await?;
                tx.create_jobs(&order.id, &process, &TraceContext::new_root())
                    .await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let scheduler = JobScheduler::new(
            SchedulerConfig::default(),
            store,
            Arc::new(MappingRegistry::new()),
            dispatcher.clone(),
        );
        (scheduler, dispatcher)
    }

    #[tokio::test]
    async fn test_step_walks_states() {
        let (scheduler, dispatcher) = scheduler_with_order(TaskCategory::Http).await;

        let Transition::Next(claiming) = scheduler.step(CycleState::Idle).await else {
            panic!("idle must move to claiming");
        };
        assert!(matches!(claiming, CycleState::Claiming));

        let Transition::Next(CycleState::Dispatching(queue)) = scheduler.step(claiming).await
        else {
            panic!("a ready job must be claimed");
        };
        assert_eq!(queue.remaining(), 1);

        let Transition::Next(CycleState::Dispatching(queue)) =
            scheduler.step(CycleState::Dispatching(queue)).await
        else {
            panic!("dispatching continues until the queue is drained");
        };
        assert_eq!(queue.remaining(), 0);
        assert_eq!(queue.report().dispatched, 1);

        let Transition::Finished(report) = scheduler.step(CycleState::Dispatching(queue)).await
        else {
            panic!("drained queue finishes the cycle");
        };
        assert_eq!(report.claimed, 1);

        let sent = dispatcher.sent.lock();
        assert_eq!(sent[0].0, "http://worker/a");
        assert_eq!(sent[0].1.body, serde_json::json!({"x": "42"}));
    }

    #[tokio::test]
    async fn test_non_http_jobs_are_skipped() {
        let (scheduler, dispatcher) = scheduler_with_order(TaskCategory::Other(7)).await;

        let report = scheduler.run_cycle().await;
        assert_eq!(report.claimed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dispatched, 0);
        assert!(dispatcher.sent.lock().is_empty());
        assert_eq!(scheduler.last_report(), Some(report));
    }

    #[tokio::test]
    async fn test_empty_store_cycle_is_idle() {
        let scheduler = JobScheduler::new(
            SchedulerConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(MappingRegistry::new()),
            Arc::new(RecordingDispatcher::default()),
        );
        let report = scheduler.run_cycle().await;
        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn test_restore_trace_falls_back_to_new_root() {
        let (scheduler, _) = scheduler_with_order(TaskCategory::Http).await;
        let root = TraceContext::new_root();
        let job = Job {
            task_id: "a".to_string(),
            order_id: "o".to_string(),
            process_id: "p".to_string(),
            category: TaskCategory::Http,
            action: "http://worker/a".to_string(),
            read_mapping_id: "m".to_string(),
            ready_num: 0,
            ready_req: 0,
            started: true,
            completed: false,
            trace: Some(root.to_token()),
        };

        assert_eq!(scheduler.restore_trace(&job).trace_id_hex(), root.trace_id_hex());

        let broken = Job {
            trace: Some("garbage".to_string()),
            ..job
        };
        assert_ne!(scheduler.restore_trace(&broken).trace_id_hex(), root.trace_id_hex());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (scheduler, dispatcher) = scheduler_with_order(TaskCategory::Http).await;
        let handle = Arc::new(scheduler).start();

        for _ in 0..50 {
            if !dispatcher.sent.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        handle.shutdown().await.unwrap();
        assert_eq!(dispatcher.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_panicked_loop_is_reported_as_scheduler_failure() {
        let (scheduler, _) = scheduler_with_order(TaskCategory::Http).await;
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = SchedulerHandle {
            scheduler: Arc::new(scheduler),
            shutdown_tx,
            join: tokio::spawn(async {
                panic!("cycle blew up");
            }),
        };

        let error = handle.shutdown().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Scheduler);
        assert_eq!(error.operations(), vec!["SchedulerHandle.Shutdown"]);
    }
}
