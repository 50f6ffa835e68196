//! Worker registry: known workers, on-demand health, placement candidates.

use super::WorkerConnector;
use crate::types::WorkerHealth;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

/// Tracks the fleet. Workers are owned here; everything else refers to them
/// by name only.
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn WorkerConnector>>,
    health_timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(health_timeout: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            health_timeout,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, connector: Arc<dyn WorkerConnector>) {
        self.workers.insert(name.into(), connector);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn connector(&self, name: &str) -> Option<Arc<dyn WorkerConnector>> {
        self.workers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Probe one worker. Timeouts and probe errors read as unreachable; a
    /// slow worker must not stall the tick.
    pub async fn health(&self, name: &str) -> WorkerHealth {
        let Some(connector) = self.connector(name) else {
            return WorkerHealth::unreachable();
        };

        match tokio::time::timeout(self.health_timeout, connector.health()).await {
            Ok(Ok(health)) => health,
            Ok(Err(e)) => {
                debug!(worker = name, error = %e, "health probe failed");
                WorkerHealth::unreachable()
            }
            Err(_) => {
                debug!(worker = name, "health probe timed out");
                WorkerHealth::unreachable()
            }
        }
    }

    /// Probe the whole fleet concurrently and collect one snapshot.
    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let mut probes = JoinSet::new();

        for (name, connector) in &self.workers {
            let name = name.clone();
            let connector = Arc::clone(connector);
            let timeout = self.health_timeout;
            probes.spawn(async move {
                let health = match tokio::time::timeout(timeout, connector.health()).await {
                    Ok(Ok(h)) => h,
                    Ok(Err(e)) => {
                        debug!(worker = %name, error = %e, "health probe failed");
                        WorkerHealth::unreachable()
                    }
                    Err(_) => {
                        debug!(worker = %name, "health probe timed out");
                        WorkerHealth::unreachable()
                    }
                };
                (name, health)
            });
        }

        let mut entries = HashMap::new();
        while let Some(joined) = probes.join_next().await {
            if let Ok((name, health)) = joined {
                entries.insert(name, health);
            }
        }

        HealthSnapshot { entries }
    }
}

/// One point-in-time view of fleet health, consumed by a single placement
/// pass. Placements performed against the snapshot are folded back into it
/// so load comparisons stay honest within the pass.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    entries: HashMap<String, WorkerHealth>,
}

impl HealthSnapshot {
    pub fn get(&self, name: &str) -> Option<WorkerHealth> {
        self.entries.get(name).copied()
    }

    /// Placement policy: the reachable worker with the lowest active count,
    /// excluding workers at or above `ceiling`. A preset assignee restricts
    /// the choice to that worker alone. Returns `None` when placement must
    /// defer.
    pub fn pick(&self, ceiling: i32, preset: Option<&str>) -> Option<String> {
        let acceptable =
            |h: &WorkerHealth| h.reachable && h.active_count < ceiling;

        if let Some(name) = preset {
            return match self.entries.get(name) {
                Some(h) if acceptable(h) => Some(name.to_string()),
                _ => None,
            };
        }

        self.entries
            .iter()
            .filter(|(_, h)| acceptable(h))
            // Tie-break by name so placement order is deterministic.
            .min_by_key(|(name, h)| (h.active_count, name.as_str()))
            .map(|(name, _)| name.clone())
    }

    /// Account for a placement made against this snapshot.
    pub fn note_placement(&mut self, name: &str) {
        if let Some(h) = self.entries.get_mut(name) {
            h.active_count += 1;
        }
    }

    /// Mark a worker unreachable for the remainder of the pass, used when a
    /// start call fails after a healthy probe.
    pub fn mark_unreachable(&mut self, name: &str) {
        if let Some(h) = self.entries.get_mut(name) {
            h.reachable = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, bool, i32)]) -> HealthSnapshot {
        HealthSnapshot {
            entries: entries
                .iter()
                .map(|(n, r, a)| {
                    (
                        n.to_string(),
                        WorkerHealth {
                            reachable: *r,
                            active_count: *a,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn pick_prefers_lowest_load() {
        let snap = snapshot(&[("alpha", true, 2), ("beta", true, 0), ("gamma", true, 1)]);
        assert_eq!(snap.pick(3, None), Some("beta".to_string()));
    }

    #[test]
    fn pick_excludes_unreachable() {
        let snap = snapshot(&[("alpha", false, 0), ("beta", true, 2)]);
        assert_eq!(snap.pick(3, None), Some("beta".to_string()));
    }

    #[test]
    fn pick_defers_when_all_overloaded() {
        let snap = snapshot(&[("alpha", true, 3), ("beta", true, 5)]);
        assert_eq!(snap.pick(3, None), None);
    }

    #[test]
    fn preset_assignee_restricts_choice() {
        let snap = snapshot(&[("alpha", true, 0), ("beta", true, 2)]);
        assert_eq!(snap.pick(3, Some("beta")), Some("beta".to_string()));
        assert_eq!(snap.pick(3, Some("ghost")), None);
    }

    #[test]
    fn note_placement_shifts_subsequent_picks() {
        let mut snap = snapshot(&[("alpha", true, 0), ("beta", true, 1)]);
        assert_eq!(snap.pick(3, None), Some("alpha".to_string()));
        snap.note_placement("alpha");
        snap.note_placement("alpha");
        assert_eq!(snap.pick(3, None), Some("beta".to_string()));
    }
}
