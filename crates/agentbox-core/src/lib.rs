//! agentbox core - generation task registry
//!
//! A [`TaskManager`] maps a conversation thread to its in-flight generation
//! task. A separate request can ask that task to stop cooperatively, or
//! abort it outright when it never checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod task_manager;

pub use error::{Error, Result};
pub use task_manager::{GenerationOutcome, Registration, StopOutcome, TaskGuard, TaskManager};
