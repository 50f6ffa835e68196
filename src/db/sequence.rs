//! Append-only status transition history.

use super::{Database, now_ms};
use crate::types::{TaskSequenceEvent, TaskStatus};
use anyhow::Result;
use rusqlite::{Connection, params};

/// Record one status transition. Called inside the same transaction that
/// mutates the task row, so history never disagrees with the store.
pub(crate) fn record_transition(
    conn: &Connection,
    task_id: i64,
    status: TaskStatus,
    worker: Option<&str>,
    reason: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO task_sequence (task_id, worker, status, reason, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![task_id, worker, status.as_str(), reason, now_ms()],
    )?;
    Ok(())
}

impl Database {
    /// Full transition history for a task, oldest first.
    pub fn get_task_history(&self, task_id: i64) -> Result<Vec<TaskSequenceEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, worker, status, reason, timestamp
                 FROM task_sequence
                 WHERE task_id = ?1
                 ORDER BY id ASC",
            )?;

            let events = stmt
                .query_map(params![task_id], |row| {
                    let status: String = row.get(3)?;
                    Ok(TaskSequenceEvent {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        worker: row.get(2)?,
                        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
                        reason: row.get(4)?,
                        timestamp: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(events)
        })
    }
}
