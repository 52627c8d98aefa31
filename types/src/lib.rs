//! Shared data structures and utilities for the operator task scheduler.
//!
//! This crate contains the types common to the scheduler engine and the
//! daemon binary that wires it up: task identity and cadence types, the
//! closed error enum, snapshot DTOs, license-gate input types, and small
//! file-persistence helpers used by both the per-task and the registry
//! persistence layers.

pub mod error;
pub mod license;
pub mod snapshot;
pub mod task;
pub mod utils;

pub use error::{SchedulerError, SchedulerResult};
pub use license::LicenseConfig;
pub use snapshot::{DispatcherStatusSnapshot, ExecuteNowOutcome, ListFilter, TaskSnapshot};
pub use task::{
    AgentParams, BeginLoginOutcome, CadenceSpec, ExecutionMode, LoginStatus, SocialOperatorParams,
    TaskIdentity, TaskStatus, TaskType, ValidHourRange,
};
