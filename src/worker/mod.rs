//! The consumed worker execution interface.
//!
//! The engine starts, observes, and abandons executions through
//! [`WorkerConnector`]; how a worker actually runs a job is its own
//! business. Handles are opaque tokens the engine stores for provenance and
//! never inspects.

pub mod registry;
pub mod tmux;

use crate::types::{Task, WorkerHealth};
use anyhow::Result;
use async_trait::async_trait;

pub use registry::{HealthSnapshot, WorkerRegistry};
pub use tmux::TmuxConnector;

/// Opaque token for a running execution.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub worker: String,
    pub token: String,
}

/// Connection to a single worker.
///
/// Both calls may fail or hang; the registry wraps them in short timeouts
/// and treats any trouble as unreachability rather than a fatal error.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    /// Begin executing a task's prompt. Returns immediately with a handle;
    /// the job itself runs asynchronously on the worker.
    async fn start(&self, task: &Task) -> Result<ExecutionHandle>;

    /// Current reachability and concurrent-task load.
    async fn health(&self) -> Result<WorkerHealth>;
}
