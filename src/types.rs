//! Core types for the task-warden delegation engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Maximum distance from a root task to any descendant.
pub const MAX_DEPTH: u32 = 5;

/// Maximum number of automatic re-delegations for a single lineage.
pub const MAX_RETRIES: i32 = 2;

/// Lifecycle state of a task.
///
/// `completed` and `failed` are terminal but re-delegatable (subject to the
/// retry ceiling). `killed` is terminal and never re-delegated; it is only
/// ever entered through explicit operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Launched,
    InProgress,
    Completed,
    Failed,
    Killed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Launched => "launched",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Killed => "killed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "launched" => Some(TaskStatus::Launched),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "killed" => Some(TaskStatus::Killed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Killed
        )
    }

    /// Whether a gate in this state releases its dependents.
    ///
    /// Both `completed` and `failed` satisfy a gate: a blocked review task
    /// must still run when the implementation failed. `killed` never
    /// satisfies a gate; it propagates instead.
    pub fn satisfies_gate(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Legal transitions of the state machine.
    ///
    /// `launched -> failed` covers the staleness policy, where the tick
    /// driver declares a lost execution handle as an implicit failure.
    /// `killed` is reachable from any non-terminal state.
    pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (from, to) {
            (Pending, Launched) => true,
            (Launched, InProgress) => true,
            (Launched, Failed) => true,
            (InProgress, Completed) | (InProgress, Failed) => true,
            (f, Killed) if !f.is_terminal() => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub creator: String,
    /// Worker that owns the task once it leaves `pending`. Always a name,
    /// never a connection handle.
    pub assignee: Option<String>,
    pub subject: String,
    /// Full instructions, opaque to the engine.
    pub prompt: String,
    pub status: TaskStatus,
    pub parent_task_id: Option<i64>,
    /// Id of the tree's root; equals `id` for roots.
    pub root_task_id: i64,
    /// Single gating task; the task is not placeable while the gate is
    /// non-terminal.
    pub blocked_by_task_id: Option<i64>,
    pub card_id: Option<String>,
    pub retry_count: i32,
    /// Creator-declared follow-up instructions, carried opaquely and handed
    /// back to the invoking context when the task reaches a terminal state.
    pub follow_up: Option<String>,
    pub output: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Optimistic-lock version; bumped on every mutation.
    pub version: i64,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub creator: String,
    pub subject: String,
    pub prompt: String,
    pub assignee: Option<String>,
    pub parent_task_id: Option<i64>,
    pub blocked_by_task_id: Option<i64>,
    pub card_id: Option<String>,
    pub follow_up: Option<String>,
}

/// A task with its children, for tree views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTree>,
}

/// Compact task representation for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: i64,
    pub subject: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub retry_count: i32,
}

impl From<&Task> for TaskSummary {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id,
            subject: t.subject.clone(),
            status: t.status,
            assignee: t.assignee.clone(),
            retry_count: t.retry_count,
        }
    }
}

/// One recorded status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSequenceEvent {
    pub id: i64,
    pub task_id: i64,
    pub worker: Option<String>,
    pub status: TaskStatus,
    pub reason: Option<String>,
    pub timestamp: i64,
}

/// Health report for a single worker, refreshed on demand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub reachable: bool,
    pub active_count: i32,
}

impl WorkerHealth {
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            active_count: 0,
        }
    }
}

/// Aggregate task statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total_tasks: i64,
    pub tasks_by_status: HashMap<String, i64>,
}

/// An agent-to-agent mail message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: String,
    pub created_at: i64,
    pub read_at: Option<i64>,
}

/// A kanban card on the external board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub title: Option<String>,
    pub lane: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An audit-log entry linked to the tasks it concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Morsel {
    pub id: i64,
    pub tag: String,
    pub body: String,
    pub links: Vec<i64>,
    pub created_at: i64,
}
