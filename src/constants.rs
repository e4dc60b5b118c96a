//! # System Constants
//!
//! Table names, error labels and wire values shared by the store, the dispatcher and
//! the scheduler.

/// Tables owned by the migration runner
pub mod tables {
    pub const SCHEMA_MIGRATIONS: &str = "orderflow_schema_migrations";
}

/// Entity names used in `NotFound` errors
pub mod entities {
    pub const PROCESS: &str = "process";
    pub const ORDER: &str = "order";
    pub const JOB: &str = "job";
    pub const READ_MAPPING: &str = "read mapping";
}

/// HTTP surface shared with external workers
pub mod http {
    /// Path the completion callback is posted to, relative to the orchestration base URL
    pub const JOB_COMPLETE_PATH: &str = "/job/complete";
}

/// Wire value of the HTTP task category
pub const HTTP_TASK_CATEGORY: i32 = 0;
