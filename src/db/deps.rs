//! Dependency resolution over the single-gate blocking relation.
//!
//! Each task has at most one gate (`blocked_by_task_id`); a task may gate
//! many dependents. This is a one-hop relation, not a general DAG.

use super::sequence::record_transition;
use super::{Database, now_ms};
use crate::types::{Task, TaskStatus};
use anyhow::Result;
use rusqlite::params;
use std::collections::VecDeque;

impl Database {
    /// Tasks gated on the given task, in creation order.
    pub fn list_dependents(&self, gate_id: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE blocked_by_task_id = ?1 ORDER BY created_at, id",
            )?;

            let tasks = stmt
                .query_map(params![gate_id], super::tasks::parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Dependents released by a gate reaching a terminal state.
    ///
    /// Only `completed` and `failed` release dependents; callers handle a
    /// killed gate through [`Database::propagate_kill`]. Returns the pending
    /// dependents in creation order.
    pub fn resolve_unblocked(&self, gate: &Task) -> Result<Vec<Task>> {
        if !gate.status.satisfies_gate() {
            return Ok(Vec::new());
        }

        Ok(self
            .list_dependents(gate.id)?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect())
    }

    /// Kill every non-terminal dependent of a killed task, transitively over
    /// the gate relation. Returns the ids killed, in propagation order.
    ///
    /// A dependent of a killed gate has lost its premise; it is never
    /// unblocked, and its own dependents fall with it.
    pub fn propagate_kill(&self, origin_id: i64) -> Result<Vec<i64>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut killed = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back(origin_id);

            while let Some(current) = queue.pop_front() {
                let mut stmt = tx.prepare(
                    "SELECT id FROM tasks
                     WHERE blocked_by_task_id = ?1
                     AND status NOT IN ('completed', 'failed', 'killed')
                     ORDER BY created_at, id",
                )?;

                let dependents = stmt
                    .query_map(params![current], |row| row.get::<_, i64>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                drop(stmt);

                for dep_id in dependents {
                    let now = now_ms();
                    tx.execute(
                        "UPDATE tasks SET
                            status = 'killed',
                            completed_at = ?1,
                            updated_at = ?1,
                            version = version + 1
                         WHERE id = ?2",
                        params![now, dep_id],
                    )?;
                    record_transition(
                        &tx,
                        dep_id,
                        TaskStatus::Killed,
                        None,
                        Some(&format!("gate task #{} was killed", current)),
                    )?;
                    killed.push(dep_id);
                    queue.push_back(dep_id);
                }
            }

            tx.commit()?;
            Ok(killed)
        })
    }
}
