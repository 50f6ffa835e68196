//! tmux-backed worker connector.
//!
//! Each worker is a tmux session on the worker host; every delegated task
//! runs in its own window named after the task id. Reachability is probed by
//! listing the session's windows, and the live window count doubles as the
//! worker's active-task load.

use super::{ExecutionHandle, WorkerConnector};
use crate::types::{Task, WorkerHealth};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;

const WINDOW_PREFIX: &str = "task-";

pub struct TmuxConnector {
    session: String,
    command: Vec<String>,
}

impl TmuxConnector {
    pub fn new(session: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            session: session.into(),
            command,
        }
    }

    fn window_name(task_id: i64) -> String {
        format!("{}{}", WINDOW_PREFIX, task_id)
    }
}

#[async_trait]
impl WorkerConnector for TmuxConnector {
    async fn start(&self, task: &Task) -> Result<ExecutionHandle> {
        if self.command.is_empty() {
            return Err(anyhow!("worker command is empty"));
        }

        let window = Self::window_name(task.id);

        let output = Command::new("tmux")
            .arg("new-window")
            .arg("-d")
            .arg("-t")
            .arg(format!("{}:", self.session))
            .arg("-n")
            .arg(&window)
            .arg("--")
            .args(&self.command)
            .arg(&task.prompt)
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow!(
                "tmux new-window failed for session {}: {}",
                self.session,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(ExecutionHandle {
            worker: self.session.clone(),
            token: format!("{}:{}", self.session, window),
        })
    }

    async fn health(&self) -> Result<WorkerHealth> {
        let output = Command::new("tmux")
            .arg("list-windows")
            .arg("-t")
            .arg(format!("{}:", self.session))
            .arg("-F")
            .arg("#{window_name}")
            .output()
            .await?;

        if !output.status.success() {
            return Err(anyhow!(
                "tmux session {} not reachable: {}",
                self.session,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let active = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|name| name.starts_with(WINDOW_PREFIX))
            .count() as i32;

        Ok(WorkerHealth {
            reachable: true,
            active_count: active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_names_follow_task_ids() {
        assert_eq!(TmuxConnector::window_name(7), "task-7");
        assert_eq!(TmuxConnector::window_name(1234), "task-1234");
    }
}
