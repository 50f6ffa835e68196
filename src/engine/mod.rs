//! The delegation engine: task creation, placement, stuck-task
//! reconciliation, and terminal-state orchestration.
//!
//! All policy lives here; the store underneath only offers raw, versioned
//! operations. Every mutation goes through a compare-and-swap on the task's
//! version column, so concurrent coordinators can never both win the same
//! transition.

use crate::collab::{AuditSink, Board};
use crate::config::EngineConfig;
use crate::db::{Database, now_ms};
use crate::error::{EngineError, EngineResult};
use crate::types::{MAX_DEPTH, MAX_RETRIES, NewTask, Task, TaskStatus};
use crate::worker::WorkerRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Worker-reported terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
}

impl TaskOutcome {
    fn status(self) -> TaskStatus {
        match self {
            TaskOutcome::Completed => TaskStatus::Completed,
            TaskOutcome::Failed => TaskStatus::Failed,
        }
    }
}

/// Result of one placement pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlacementReport {
    /// (task id, worker) pairs launched this pass.
    pub placed: Vec<(i64, String)>,
    /// Tasks left `pending` for a later tick: no acceptable worker, or a
    /// lost update race.
    pub deferred: Vec<i64>,
}

/// How one stuck task was resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StuckResolution {
    /// Worker reachable; replacement created, original failed with a
    /// provenance note.
    Redelegated {
        original: i64,
        replacement: i64,
    },
    /// Worker unreachable; failed without retry to avoid hammering a
    /// partitioned worker.
    WorkerUnreachable { task: i64 },
    /// Lineage already at the retry ceiling; failed with no replacement.
    RetriesExhausted { task: i64 },
}

impl StuckResolution {
    /// Id of the task that reached `failed` during reconciliation.
    pub fn failed_task(&self) -> i64 {
        match self {
            StuckResolution::Redelegated { original, .. } => *original,
            StuckResolution::WorkerUnreachable { task } => *task,
            StuckResolution::RetriesExhausted { task } => *task,
        }
    }
}

/// Creator-declared follow-up instructions, handed back to the invoking
/// context. The engine never interprets the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUp {
    pub task_id: i64,
    pub creator: String,
    pub instructions: String,
}

/// Effects of a task reaching a terminal state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TerminalEffects {
    /// Dependents whose gate is now satisfied.
    pub unblocked: Vec<i64>,
    /// Dependents killed by propagation from a killed gate.
    pub killed: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUp>,
}

pub struct DelegationEngine {
    db: Database,
    registry: Arc<WorkerRegistry>,
    board: Arc<dyn Board>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl DelegationEngine {
    pub fn new(
        db: Database,
        registry: Arc<WorkerRegistry>,
        board: Arc<dyn Board>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            registry,
            board,
            audit,
            config,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Create a task in `pending`.
    ///
    /// Validation failures are synchronous and leave no partial state: a
    /// preset assignee must be a registered worker, the parent (if any) must
    /// exist and sit above the depth ceiling, and the gate (if any) must
    /// exist and not be killed. A killed *parent* is accepted; killing does
    /// not retroactively forbid externally requested children.
    pub async fn create_task(&self, new: NewTask) -> EngineResult<Task> {
        if let Some(worker) = &new.assignee
            && !self.registry.contains(worker)
        {
            return Err(EngineError::UnknownWorker(worker.clone()));
        }

        if let Some(parent_id) = new.parent_task_id {
            if self.db.get_task(parent_id)?.is_none() {
                return Err(EngineError::TaskNotFound(parent_id));
            }
            let depth = self.db.task_depth(parent_id)?;
            if depth >= MAX_DEPTH {
                return Err(EngineError::DepthExceeded {
                    parent_id,
                    depth,
                });
            }
        }

        if let Some(gate_id) = new.blocked_by_task_id {
            match self.db.get_task(gate_id)? {
                None => {
                    return Err(EngineError::invalid_gate(gate_id, "gate task does not exist"));
                }
                Some(gate) if gate.status == TaskStatus::Killed => {
                    return Err(EngineError::invalid_gate(gate_id, "gate task was killed"));
                }
                Some(_) => {}
            }
        }

        let task = self.db.insert_task(&new)?;
        info!(task = task.id, creator = %task.creator, subject = %task.subject, "task created");

        if let Some(card_id) = &task.card_id
            && let Err(e) = self.board.link_task_to_card(task.id, card_id).await
        {
            warn!(task = task.id, card = %card_id, error = %e, "board link failed");
        }

        Ok(task)
    }

    /// Place every eligible pending task on an acceptable worker.
    ///
    /// One health snapshot serves the whole pass; placements are folded back
    /// into it so load comparisons stay current. Tasks with no acceptable
    /// worker stay `pending` and are retried next tick. Idempotent: a second
    /// pass with no state change places nothing.
    pub async fn place_eligible_tasks(&self) -> EngineResult<PlacementReport> {
        let mut snapshot = self.registry.health_snapshot().await;
        let mut report = PlacementReport::default();

        for task in self.db.list_placeable()? {
            let Some(worker) = snapshot.pick(self.config.max_active_tasks, task.assignee.as_deref())
            else {
                report.deferred.push(task.id);
                continue;
            };

            let Some(connector) = self.registry.connector(&worker) else {
                report.deferred.push(task.id);
                continue;
            };

            match connector.start(&task).await {
                Ok(handle) => {
                    info!(task = task.id, worker = %worker, handle = %handle.token, "execution started");
                }
                Err(e) => {
                    warn!(task = task.id, worker = %worker, error = %e, "start failed, deferring");
                    snapshot.mark_unreachable(&worker);
                    report.deferred.push(task.id);
                    continue;
                }
            }

            match self.cas_status(&task, TaskStatus::Launched, Some(&worker), None, None) {
                Ok(_) => {
                    snapshot.note_placement(&worker);
                    report.placed.push((task.id, worker));
                }
                Err(EngineError::ConcurrencyConflict { task_id }) => {
                    warn!(task = task_id, "placement lost an update race, deferring");
                    report.deferred.push(task_id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Apply the staleness policy to every task stuck in `launched`.
    ///
    /// Reachable worker: the execution handle is presumed lost, so a
    /// replacement is created (identical prompt, retry count + 1) unless the
    /// lineage already hit the retry ceiling. Unreachable worker: failed
    /// without retry.
    pub async fn reconcile_stuck_tasks(&self) -> EngineResult<Vec<StuckResolution>> {
        let cutoff = now_ms() - self.config.staleness_ms;
        let stale = self.db.list_stale_launched(cutoff)?;
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.registry.health_snapshot().await;
        let mut resolutions = Vec::new();

        for task in stale {
            let health = task
                .assignee
                .as_deref()
                .and_then(|w| snapshot.get(w))
                .unwrap_or_else(crate::types::WorkerHealth::unreachable);

            if !health.reachable {
                match self.cas_status(
                    &task,
                    TaskStatus::Failed,
                    None,
                    Some("worker unreachable"),
                    Some("worker unreachable"),
                ) {
                    Ok(_) => {
                        warn!(task = task.id, worker = ?task.assignee, "stuck task failed: worker unreachable");
                        resolutions.push(StuckResolution::WorkerUnreachable { task: task.id });
                    }
                    Err(EngineError::ConcurrencyConflict { .. }) => continue,
                    Err(e) => return Err(e),
                }
                continue;
            }

            if task.retry_count >= MAX_RETRIES {
                match self.cas_status(
                    &task,
                    TaskStatus::Failed,
                    None,
                    Some("tmux session died; retry limit reached"),
                    Some("tmux session died; retry limit reached"),
                ) {
                    Ok(_) => {
                        warn!(task = task.id, retries = task.retry_count, "stuck task failed: retry limit reached");
                        resolutions.push(StuckResolution::RetriesExhausted { task: task.id });
                    }
                    Err(EngineError::ConcurrencyConflict { .. }) => continue,
                    Err(e) => return Err(e),
                }
                continue;
            }

            match self.db.redelegate_task(&task)? {
                Some((failed, replacement)) => {
                    info!(
                        original = failed.id,
                        replacement = replacement.id,
                        retry = replacement.retry_count,
                        "stuck task re-delegated"
                    );
                    resolutions.push(StuckResolution::Redelegated {
                        original: failed.id,
                        replacement: replacement.id,
                    });
                }
                // Version moved underneath us: another actor already
                // reconciled or killed it this instant. Leave it be.
                None => continue,
            }
        }

        Ok(resolutions)
    }

    /// Orchestrate the effects of a task reaching a terminal state:
    /// dependency resolution (or kill propagation), audit emission, and
    /// follow-up retrieval.
    ///
    /// The follow-up annotation is returned to the calling context for
    /// action; a killed task never yields one.
    pub async fn on_task_terminal(&self, task_id: i64) -> EngineResult<TerminalEffects> {
        let task = self
            .db
            .get_task(task_id)?
            .ok_or(EngineError::TaskNotFound(task_id))?;

        if !task.status.is_terminal() {
            return Err(EngineError::NotTerminal(task_id));
        }

        let mut effects = TerminalEffects::default();

        if task.status == TaskStatus::Killed {
            effects.killed = self.db.propagate_kill(task.id)?;
        } else {
            effects.unblocked = self
                .db
                .resolve_unblocked(&task)?
                .iter()
                .map(|t| t.id)
                .collect();
            effects.follow_up = task.follow_up.clone().map(|instructions| FollowUp {
                task_id: task.id,
                creator: task.creator.clone(),
                instructions,
            });
        }

        let mut links = vec![task.id];
        links.extend(&effects.unblocked);
        links.extend(&effects.killed);
        let body = serde_json::json!({
            "task": task.id,
            "status": task.status,
            "unblocked": &effects.unblocked,
            "killed": &effects.killed,
        });
        self.audit
            .append("task-terminal", &body.to_string(), &links)
            .await;

        Ok(effects)
    }

    /// Worker signal: execution has begun.
    pub fn record_task_started(&self, task_id: i64, worker: &str) -> EngineResult<Task> {
        let task = self
            .db
            .get_task(task_id)?
            .ok_or(EngineError::TaskNotFound(task_id))?;

        if task.assignee.as_deref() != Some(worker) {
            return Err(EngineError::NotOwner {
                task_id,
                worker: worker.to_string(),
            });
        }

        self.cas_status(&task, TaskStatus::InProgress, None, None, None)
    }

    /// Worker signal: execution finished.
    pub fn record_task_outcome(
        &self,
        task_id: i64,
        worker: &str,
        outcome: TaskOutcome,
        output: Option<&str>,
    ) -> EngineResult<Task> {
        let task = self
            .db
            .get_task(task_id)?
            .ok_or(EngineError::TaskNotFound(task_id))?;

        if task.assignee.as_deref() != Some(worker) {
            return Err(EngineError::NotOwner {
                task_id,
                worker: worker.to_string(),
            });
        }

        self.cas_status(&task, outcome.status(), None, None, output)
    }

    /// Operator action: kill a task and propagate to its gated dependents.
    /// Returns the transitively killed dependent ids. External execution is
    /// not cancelled; that stays with the worker or operator.
    pub async fn kill_task(&self, task_id: i64, reason: Option<&str>) -> EngineResult<Vec<i64>> {
        let task = self
            .db
            .get_task(task_id)?
            .ok_or(EngineError::TaskNotFound(task_id))?;

        let reason = reason.unwrap_or("killed by operator");
        self.cas_status(&task, TaskStatus::Killed, None, Some(reason), None)?;
        let propagated = self.db.propagate_kill(task_id)?;

        let mut links = vec![task_id];
        links.extend(&propagated);
        let body = serde_json::json!({
            "task": task_id,
            "reason": reason,
            "propagated": &propagated,
        });
        self.audit.append("task-killed", &body.to_string(), &links).await;

        Ok(propagated)
    }

    /// Versioned status update with a single in-tick retry on a lost race,
    /// per the concurrency-conflict policy. A retry only proceeds when the
    /// re-read row still allows the same transition.
    fn cas_status(
        &self,
        task: &Task,
        to: TaskStatus,
        worker: Option<&str>,
        reason: Option<&str>,
        output: Option<&str>,
    ) -> EngineResult<Task> {
        if !TaskStatus::can_transition(task.status, to) {
            return Err(EngineError::InvalidTransition {
                task_id: task.id,
                from: task.status,
                to,
            });
        }

        if let Some(updated) =
            self.db
                .update_task_status(task.id, task.version, to, worker, reason, output)?
        {
            return Ok(updated);
        }

        let fresh = self
            .db
            .get_task(task.id)?
            .ok_or(EngineError::TaskNotFound(task.id))?;

        if fresh.status == task.status
            && let Some(updated) =
                self.db
                    .update_task_status(fresh.id, fresh.version, to, worker, reason, output)?
        {
            return Ok(updated);
        }

        Err(EngineError::ConcurrencyConflict { task_id: task.id })
    }
}
