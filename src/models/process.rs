use crate::constants::HTTP_TASK_CATEGORY;
use serde::{Deserialize, Serialize};

/// Process is the reusable task graph template orders are submitted against.
/// Maps to `orderflow_processes`, with its nodes in `orderflow_tasks` and its edges
/// in `orderflow_task_relations`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub task_relations: Vec<TaskRelation>,
}

/// One node of a process graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub category: TaskCategory,
    /// Dispatch destination, a URL for HTTP tasks
    pub action: String,
    pub read_mapping_id: String,
}

/// Directed edge: `parent_id` must complete before `child_id` becomes eligible
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRelation {
    pub parent_id: String,
    pub child_id: String,
}

/// How a task's jobs are dispatched. Only HTTP is dispatched; every other
/// category is carried through storage untouched and skipped by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum TaskCategory {
    Http,
    Other(i32),
}

impl TaskCategory {
    pub fn is_http(&self) -> bool {
        matches!(self, TaskCategory::Http)
    }
}

impl From<i32> for TaskCategory {
    fn from(value: i32) -> Self {
        if value == HTTP_TASK_CATEGORY {
            TaskCategory::Http
        } else {
            TaskCategory::Other(value)
        }
    }
}

impl From<TaskCategory> for i32 {
    fn from(category: TaskCategory) -> Self {
        match category {
            TaskCategory::Http => HTTP_TASK_CATEGORY,
            TaskCategory::Other(value) => value,
        }
    }
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        category: TaskCategory,
        action: impl Into<String>,
        read_mapping_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category,
            action: action.into(),
            read_mapping_id: read_mapping_id.into(),
        }
    }
}

impl TaskRelation {
    pub fn new(parent_id: impl Into<String>, child_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            child_id: child_id.into(),
        }
    }
}

impl Process {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn add_task_relation(&mut self, relation: TaskRelation) {
        self.task_relations.push(relation);
    }

    /// Builder form of [`Process::add_task`]
    pub fn with_task(mut self, task: Task) -> Self {
        self.add_task(task);
        self
    }

    /// Builder form of [`Process::add_task_relation`]
    pub fn with_relation(mut self, parent_id: &str, child_id: &str) -> Self {
        self.add_task_relation(TaskRelation::new(parent_id, child_id));
        self
    }

    /// Number of parents `task_id` waits for: its in-degree in the relation set
    pub fn required_parents(&self, task_id: &str) -> i32 {
        self.task_relations
            .iter()
            .filter(|relation| relation.child_id == task_id)
            .count() as i32
    }

    /// Direct children of `task_id`
    pub fn children_of<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.task_relations
            .iter()
            .filter(move |relation| relation.parent_id == task_id)
            .map(|relation| relation.child_id.as_str())
    }
}
