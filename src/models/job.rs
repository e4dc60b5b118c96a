use super::process::TaskCategory;
use serde::{Deserialize, Serialize};

/// Job is one task instance scoped to one order, keyed by `(task_id, order_id)`.
///
/// `ready_req` is the task's in-degree, fixed when the job is created.
/// `ready_num` counts completed parents. The job is eligible for claiming once
/// `ready_num >= ready_req` while `started` is still false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub task_id: String,
    pub order_id: String,
    pub process_id: String,
    pub category: TaskCategory,
    pub action: String,
    pub read_mapping_id: String,
    pub ready_num: i32,
    pub ready_req: i32,
    pub started: bool,
    pub completed: bool,
    /// Serialized trace context of the submission that created this job
    pub trace: Option<String>,
}

impl Job {
    pub fn is_ready(&self) -> bool {
        self.ready_num >= self.ready_req
    }

    pub fn is_claimable(&self) -> bool {
        self.is_ready() && !self.started
    }
}

/// Payload POSTed to a task's action when its job is dispatched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStartMessage {
    pub task_id: String,
    pub order_id: String,
    pub body: serde_json::Value,
}

/// Payload a worker sends back once it has finished a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompleteMessage {
    pub task_id: String,
    pub order_id: String,
}

impl JobStartMessage {
    pub fn for_job(job: &Job, body: serde_json::Value) -> Self {
        Self {
            task_id: job.task_id.clone(),
            order_id: job.order_id.clone(),
            body,
        }
    }
}
