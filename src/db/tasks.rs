//! Task CRUD, versioned status updates, and tree views.

use super::sequence::record_transition;
use super::{Database, now_ms};
use crate::types::{MAX_DEPTH, NewTask, Stats, Task, TaskStatus, TaskTree};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;

    Ok(Task {
        id: row.get("id")?,
        creator: row.get("creator")?,
        assignee: row.get("assignee")?,
        subject: row.get("subject")?,
        prompt: row.get("prompt")?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        parent_task_id: row.get("parent_task_id")?,
        root_task_id: row.get("root_task_id")?,
        blocked_by_task_id: row.get("blocked_by_task_id")?,
        card_id: row.get("card_id")?,
        retry_count: row.get("retry_count")?,
        follow_up: row.get("follow_up")?,
        output: row.get("output")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        version: row.get("version")?,
    })
}

/// Parent-chain walk with an existing connection. Parents always predate
/// children, so a chain longer than any plausible tree is a corrupted
/// store, not a loop to follow forever.
pub(crate) fn task_depth_internal(conn: &Connection, task_id: i64) -> Result<u32> {
    let mut depth = 0u32;
    let mut current = task_id;

    loop {
        let parent: Option<i64> = conn
            .query_row(
                "SELECT parent_task_id FROM tasks WHERE id = ?1",
                params![current],
                |row| row.get(0),
            )
            .map_err(|_| anyhow!("task {} not found", current))?;

        match parent {
            Some(p) => {
                depth += 1;
                if depth > 64 {
                    return Err(anyhow!("parent chain of task {} is cyclic", task_id));
                }
                current = p;
            }
            None => return Ok(depth),
        }
    }
}

/// Fetch a task with an existing connection (usable inside transactions).
pub(crate) fn get_task_internal(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;

    match stmt.query_row(params![task_id], parse_task_row) {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert a task row in `pending`, fixing up `root_task_id` for roots.
/// Runs inside the caller's transaction.
pub(crate) fn insert_task_internal(
    conn: &Connection,
    new: &NewTask,
    retry_count: i32,
) -> Result<Task> {
    let now = now_ms();

    let root_of_parent: Option<i64> = match new.parent_task_id {
        Some(parent_id) => {
            let root = conn
                .query_row(
                    "SELECT root_task_id FROM tasks WHERE id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )
                .map_err(|_| anyhow!("parent task {} not found", parent_id))?;
            Some(root)
        }
        None => None,
    };

    conn.execute(
        "INSERT INTO tasks (
            creator, assignee, subject, prompt, status,
            parent_task_id, root_task_id, blocked_by_task_id, card_id,
            retry_count, follow_up, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            new.creator,
            new.assignee,
            new.subject,
            new.prompt,
            new.parent_task_id,
            root_of_parent.unwrap_or(0),
            new.blocked_by_task_id,
            new.card_id,
            retry_count,
            new.follow_up,
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();

    if root_of_parent.is_none() {
        conn.execute(
            "UPDATE tasks SET root_task_id = ?1 WHERE id = ?1",
            params![id],
        )?;
    }

    record_transition(conn, id, TaskStatus::Pending, None, None)?;

    get_task_internal(conn, id)?.ok_or_else(|| anyhow!("task {} vanished after insert", id))
}

impl Database {
    /// Create a task in `pending`. Policy validation (depth, gate, worker)
    /// belongs to the engine; this is the raw store operation.
    pub fn insert_task(&self, new: &NewTask) -> Result<Task> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let task = insert_task_internal(&tx, new, 0)?;
            tx.commit()?;
            Ok(task)
        })
    }

    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    pub fn require_task(&self, task_id: i64) -> Result<Task> {
        self.get_task(task_id)?
            .ok_or_else(|| anyhow!("task {} not found", task_id))
    }

    /// List tasks, optionally filtered by status, in creation order.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let tasks = match status {
                Some(s) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM tasks WHERE status = ?1 ORDER BY created_at, id",
                    )?;
                    let rows = stmt.query_map(params![s.as_str()], parse_task_row)?;
                    rows.collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY created_at, id")?;
                    let rows = stmt.query_map([], parse_task_row)?;
                    rows.collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(tasks)
        })
    }

    /// Pending tasks whose gate is absent or satisfied, in creation order.
    /// A gate satisfies only from `completed` or `failed`; `killed` gates
    /// never release dependents (kill propagation handles those).
    pub fn list_placeable(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.* FROM tasks t
                 WHERE t.status = 'pending'
                 AND (
                     t.blocked_by_task_id IS NULL
                     OR EXISTS (
                         SELECT 1 FROM tasks gate
                         WHERE gate.id = t.blocked_by_task_id
                         AND gate.status IN ('completed', 'failed')
                     )
                 )
                 ORDER BY t.created_at, t.id",
            )?;

            let tasks = stmt
                .query_map([], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Tasks sitting in `launched` since before `cutoff_ms`.
    pub fn list_stale_launched(&self, cutoff_ms: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks
                 WHERE status = 'launched' AND started_at IS NOT NULL AND started_at <= ?1
                 ORDER BY started_at, id",
            )?;

            let tasks = stmt
                .query_map(params![cutoff_ms], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Distance from the root (0 for roots), following parent pointers.
    pub fn task_depth(&self, task_id: i64) -> Result<u32> {
        self.with_conn(|conn| task_depth_internal(conn, task_id))
    }

    /// Compare-and-swap status update. Returns `None` when the version no
    /// longer matches, i.e. another writer got there first.
    ///
    /// `worker` sets the assignee (placement); `output` records result text.
    /// `started_at` and `completed_at` are stamped on entry to `launched`
    /// and to any terminal state respectively.
    pub fn update_task_status(
        &self,
        task_id: i64,
        expected_version: i64,
        to: TaskStatus,
        worker: Option<&str>,
        reason: Option<&str>,
        output: Option<&str>,
    ) -> Result<Option<Task>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_ms();

            let updated = tx.execute(
                "UPDATE tasks SET
                    status = ?1,
                    assignee = COALESCE(?2, assignee),
                    output = COALESCE(?3, output),
                    started_at = CASE WHEN ?1 = 'launched' THEN ?4 ELSE started_at END,
                    completed_at = CASE WHEN ?1 IN ('completed', 'failed', 'killed')
                                        THEN ?4 ELSE completed_at END,
                    updated_at = ?4,
                    version = version + 1
                 WHERE id = ?5 AND version = ?6",
                params![to.as_str(), worker, output, now, task_id, expected_version],
            )?;

            if updated == 0 {
                return Ok(None);
            }

            record_transition(&tx, task_id, to, worker, reason)?;

            let task = get_task_internal(&tx, task_id)?
                .ok_or_else(|| anyhow!("task {} vanished during update", task_id))?;
            tx.commit()?;
            Ok(Some(task))
        })
    }

    /// Atomically fail a stuck task and create its replacement.
    ///
    /// The replacement is a child of the original carrying the identical
    /// prompt, the incremented retry count, and the original's follow-up
    /// annotation; at the depth ceiling it shares the original's parent
    /// instead, so the depth bound holds unconditionally. The original's
    /// provenance note names the replacement id. Returns `None` when the
    /// original's version moved, which means another tick already
    /// reconciled it.
    pub fn redelegate_task(&self, original: &Task) -> Result<Option<(Task, Task)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let parent = if task_depth_internal(&tx, original.id)? < MAX_DEPTH {
                Some(original.id)
            } else {
                original.parent_task_id
            };

            let replacement = insert_task_internal(
                &tx,
                &NewTask {
                    creator: original.creator.clone(),
                    subject: original.subject.clone(),
                    prompt: original.prompt.clone(),
                    assignee: None,
                    parent_task_id: parent,
                    blocked_by_task_id: None,
                    card_id: original.card_id.clone(),
                    follow_up: original.follow_up.clone(),
                },
                original.retry_count + 1,
            )?;

            let reason = format!(
                "tmux session died; re-delegated as task #{}",
                replacement.id
            );
            let now = now_ms();

            let updated = tx.execute(
                "UPDATE tasks SET
                    status = 'failed',
                    output = ?1,
                    follow_up = NULL,
                    completed_at = ?2,
                    updated_at = ?2,
                    version = version + 1
                 WHERE id = ?3 AND version = ?4 AND status = 'launched'",
                params![reason, now, original.id, original.version],
            )?;

            if updated == 0 {
                // Lost the race; roll the replacement back with the tx.
                return Ok(None);
            }

            record_transition(
                &tx,
                original.id,
                TaskStatus::Failed,
                original.assignee.as_deref(),
                Some(&reason),
            )?;

            let failed = get_task_internal(&tx, original.id)?
                .ok_or_else(|| anyhow!("task {} vanished during redelegation", original.id))?;
            tx.commit()?;
            Ok(Some((failed, replacement)))
        })
    }

    /// Derived tree view: the task and all descendants, nested.
    pub fn get_task_tree(&self, task_id: i64) -> Result<Option<TaskTree>> {
        let root = match self.get_task(task_id)? {
            Some(t) => t,
            None => return Ok(None),
        };

        let members = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE root_task_id = ?1 ORDER BY created_at, id",
            )?;
            let tasks = stmt
                .query_map(params![root.root_task_id], parse_task_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })?;

        let mut by_parent: HashMap<Option<i64>, Vec<Task>> = HashMap::new();
        for t in members {
            by_parent.entry(t.parent_task_id).or_default().push(t);
        }

        fn build(task: Task, by_parent: &mut HashMap<Option<i64>, Vec<Task>>) -> TaskTree {
            let children = by_parent
                .remove(&Some(task.id))
                .unwrap_or_default()
                .into_iter()
                .map(|c| build(c, by_parent))
                .collect();
            TaskTree { task, children }
        }

        Ok(Some(build(root, &mut by_parent)))
    }

    /// Task counts by status.
    pub fn stats(&self) -> Result<Stats> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;

            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let counts = stmt
                .query_map([], |row| {
                    let status: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((status, count))
                })?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;

            Ok(Stats {
                total_tasks: total,
                tasks_by_status: counts,
            })
        })
    }
}
