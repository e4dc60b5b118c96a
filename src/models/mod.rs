//! # Graph Model
//!
//! Plain data for processes, orders, jobs and read mappings. Nothing here talks
//! to storage; well-formedness of a process graph (acyclicity, relations that
//! point at real tasks) is the caller's responsibility.

pub mod job;
pub mod order;
pub mod process;
pub mod read_mapping;

pub use job::{Job, JobCompleteMessage, JobStartMessage};
pub use order::Order;
pub use process::{Process, Task, TaskCategory, TaskRelation};
pub use read_mapping::ReadMapping;
