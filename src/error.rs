//! Caller-visible error taxonomy for engine operations.
//!
//! Validation errors are synchronous and never leave partial state behind.
//! Transient worker trouble is absorbed at the registry boundary and never
//! surfaces here; the store layer reports genuine database faults through
//! the `Db` variant.

use crate::types::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("task {parent_id} is at depth {depth}; a child would exceed the maximum tree depth")]
    DepthExceeded { parent_id: i64, depth: u32 },

    #[error("invalid gate task {gate_id}: {reason}")]
    InvalidGate { gate_id: i64, reason: String },

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("task {task_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        task_id: i64,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("worker {worker} does not own task {task_id}")]
    NotOwner { task_id: i64, worker: String },

    #[error("task {0} is not in a terminal state")]
    NotTerminal(i64),

    #[error("concurrent update lost for task {task_id}")]
    ConcurrencyConflict { task_id: i64 },

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid_gate(gate_id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidGate {
            gate_id,
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
