//! # Orchestration
//!
//! Services the REST layer calls, and the scheduler that moves ready work out
//! to external workers.
//!
//! - [`OrderService`] - submit orders, complete jobs, order queries
//! - [`ProcessService`] - process graph management
//! - [`ReadMappingService`] - read mapping management
//! - [`MappingRegistry`] - compiled read mappings shared with the scheduler
//! - [`JobDispatcher`] / [`HttpDispatcher`] - dispatch transport
//! - [`JobCompletionClient`] - worker-side completion callback client
//! - [`JobScheduler`] - the poll / claim / dispatch loop

pub mod dispatcher;
pub mod mapping_registry;
pub mod order_service;
pub mod process_service;
pub mod read_mapping_service;
pub mod scheduler;

pub use dispatcher::{HttpDispatcher, JobCompletionClient, JobDispatcher};
pub use mapping_registry::MappingRegistry;
pub use order_service::OrderService;
pub use process_service::ProcessService;
pub use read_mapping_service::ReadMappingService;
pub use scheduler::{
    CycleReport, CycleState, DispatchOutcome, DispatchQueue, JobScheduler, SchedulerHandle,
    Transition,
};
