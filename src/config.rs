//! Configuration loading.
//!
//! Config is a single YAML file. Every section and field has a default, so
//! an absent file yields a working local setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub tick: TickConfig,

    /// Declared fleet. Each entry becomes a tmux-backed worker connector;
    /// tests register their own connectors programmatically instead.
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database. Defaults to
    /// `<data dir>/task-warden/warden.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Delegation engine policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a task may sit in `launched` before the tick driver treats
    /// its execution handle as lost (default: 10 minutes).
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: i64,

    /// Per-worker concurrent task ceiling. Workers at or above this load are
    /// not placement candidates (default: 3).
    #[serde(default = "default_max_active_tasks")]
    pub max_active_tasks: i32,

    /// Timeout for a single worker health probe (default: 3 seconds).
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staleness_ms: default_staleness_ms(),
            max_active_tasks: default_max_active_tasks(),
            health_timeout_ms: default_health_timeout_ms(),
        }
    }
}

fn default_staleness_ms() -> i64 {
    600_000 // 10 minutes
}

fn default_max_active_tasks() -> i32 {
    3
}

fn default_health_timeout_ms() -> u64 {
    3_000
}

/// Tick driver scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Periodic tick interval (default: 60 seconds).
    #[serde(default = "default_tick_interval_ms")]
    pub interval_ms: u64,

    /// How long a tick waits for the coordinator lock before abandoning
    /// itself (default: 10 minutes).
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_tick_interval_ms(),
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    60_000
}

fn default_lock_wait_ms() -> u64 {
    600_000 // 10 minutes
}

/// One declared worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker name; the identifier tasks carry in `assignee`.
    pub name: String,

    /// tmux session the worker's jobs run in.
    pub session: String,

    /// Command that executes a prompt; the prompt is appended as the final
    /// argument.
    #[serde(default = "default_worker_command")]
    pub command: Vec<String>,
}

fn default_worker_command() -> Vec<String> {
    vec!["agent-run".to_string()]
}

impl Config {
    /// Load from an explicit path, or from the default location if absent.
    /// A missing file is not an error; defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("task-warden")
        .join("config.yaml")
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("task-warden")
        .join("warden.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.engine.staleness_ms, 600_000);
        assert_eq!(cfg.engine.max_active_tasks, 3);
        assert_eq!(cfg.tick.lock_wait_ms, 600_000);
        assert!(cfg.workers.is_empty());
    }

    #[test]
    fn parses_partial_yaml() {
        let cfg: Config = serde_yaml::from_str(
            "engine:\n  staleness_ms: 5000\nworkers:\n  - name: alpha\n    session: fleet-alpha\n",
        )
        .unwrap();
        assert_eq!(cfg.engine.staleness_ms, 5_000);
        assert_eq!(cfg.engine.max_active_tasks, 3);
        assert_eq!(cfg.workers.len(), 1);
        assert_eq!(cfg.workers[0].name, "alpha");
        assert_eq!(cfg.workers[0].command, vec!["agent-run".to_string()]);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Some(Path::new("/nonexistent/task-warden.yaml"))).unwrap();
        assert_eq!(cfg.tick.interval_ms, 60_000);
    }
}
