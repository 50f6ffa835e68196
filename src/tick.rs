//! The tick driver: the single-threaded scheduling loop.
//!
//! Ticks are periodic (timer), event-driven (a task reached a terminal
//! state), or message-driven. All three funnel into the same engine
//! operations; only the opening move differs. Every tick ends with one
//! placement pass and emits exactly one audit morsel summarizing what
//! happened, even when that is nothing.

use crate::collab::{AuditSink, Mailbox};
use crate::engine::{DelegationEngine, FollowUp, PlacementReport, StuckResolution};
use crate::error::EngineResult;
use crate::types::Message;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What triggered a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Periodic,
    /// A task reached a terminal state.
    TaskEvent(i64),
    /// An inbound message arrived.
    Message(i64),
}

impl TickKind {
    fn label(&self) -> &'static str {
        match self {
            TickKind::Periodic => "periodic",
            TickKind::TaskEvent(_) => "task_event",
            TickKind::Message(_) => "message",
        }
    }
}

/// Summary of one tick, serialized into its audit morsel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickOutcome {
    pub kind: String,
    /// True when the tick could not take the coordinator lock and gave up.
    pub abandoned: bool,
    pub reconciled: Vec<StuckResolution>,
    pub unblocked: Vec<i64>,
    pub killed: Vec<i64>,
    pub placed: Vec<(i64, String)>,
    pub deferred: Vec<i64>,
    /// Follow-up annotations surfaced this tick, for the invoking context
    /// to act on. The driver does not interpret them.
    pub follow_ups: Vec<FollowUp>,
    /// Message handled by a message tick, handed back to the caller; the
    /// content stays with the messaging collaborator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

pub struct TickDriver {
    engine: Arc<DelegationEngine>,
    mailbox: Arc<dyn Mailbox>,
    audit: Arc<dyn AuditSink>,
    /// Coordinator lock: one tick at a time.
    gate: tokio::sync::Mutex<()>,
    lock_wait: Duration,
}

impl TickDriver {
    pub fn new(
        engine: Arc<DelegationEngine>,
        mailbox: Arc<dyn Mailbox>,
        audit: Arc<dyn AuditSink>,
        lock_wait: Duration,
    ) -> Self {
        Self {
            engine,
            mailbox,
            audit,
            gate: tokio::sync::Mutex::new(()),
            lock_wait,
        }
    }

    /// Run one tick. A tick that cannot take the coordinator lock within
    /// the configured window abandons itself rather than queueing behind a
    /// wedged predecessor; the next scheduled tick retries.
    pub async fn run(&self, kind: TickKind) -> EngineResult<TickOutcome> {
        let mut outcome = TickOutcome {
            kind: kind.label().to_string(),
            ..TickOutcome::default()
        };

        let guard = match tokio::time::timeout(self.lock_wait, self.gate.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(kind = kind.label(), "tick abandoned: coordinator lock busy");
                outcome.abandoned = true;
                self.emit_summary(&outcome).await;
                return Ok(outcome);
            }
        };

        match kind {
            TickKind::Periodic => {
                match self.engine.reconcile_stuck_tasks().await {
                    Ok(resolutions) => {
                        // Originals failed during reconciliation get their
                        // terminal effects handled within the same tick.
                        for resolution in &resolutions {
                            self.absorb_terminal(resolution.failed_task(), &mut outcome)
                                .await;
                        }
                        outcome.reconciled = resolutions;
                    }
                    Err(e) => warn!(error = %e, "stuck-task reconciliation failed"),
                }
            }
            TickKind::TaskEvent(task_id) => {
                self.absorb_terminal(task_id, &mut outcome).await;
            }
            TickKind::Message(message_id) => {
                // Reading and responding is fully delegated to the
                // messaging collaborator; the driver only marks the message
                // consumed and hands it back to the caller.
                match self.mailbox.get_message(message_id).await {
                    Ok(Some(msg)) => {
                        if let Err(e) = self.mailbox.mark_read(message_id).await {
                            warn!(message = message_id, error = %e, "mark-read failed");
                        }
                        outcome.message = Some(msg);
                    }
                    Ok(None) => warn!(message = message_id, "message tick for unknown message"),
                    Err(e) => warn!(message = message_id, error = %e, "message fetch failed"),
                }
            }
        }

        match self.engine.place_eligible_tasks().await {
            Ok(PlacementReport { placed, deferred }) => {
                outcome.placed = placed;
                outcome.deferred = deferred;
            }
            Err(e) => warn!(error = %e, "placement pass failed"),
        }

        self.emit_summary(&outcome).await;
        drop(guard);

        info!(
            kind = %outcome.kind,
            placed = outcome.placed.len(),
            deferred = outcome.deferred.len(),
            reconciled = outcome.reconciled.len(),
            "tick complete"
        );

        Ok(outcome)
    }

    /// Fold one terminal task's effects into the tick outcome. Failures are
    /// logged, never propagated: a malformed follow-up or a vanished task
    /// must not crash the tick.
    async fn absorb_terminal(&self, task_id: i64, outcome: &mut TickOutcome) {
        match self.engine.on_task_terminal(task_id).await {
            Ok(effects) => {
                outcome.unblocked.extend(effects.unblocked);
                outcome.killed.extend(effects.killed);
                if let Some(follow_up) = effects.follow_up {
                    outcome.follow_ups.push(follow_up);
                }
            }
            Err(e) => {
                warn!(task = task_id, error = %e, "terminal handling failed");
                self.audit
                    .append(
                        "tick-error",
                        &format!("terminal handling for task {} failed: {}", task_id, e),
                        &[task_id],
                    )
                    .await;
            }
        }
    }

    /// The tick's single summary morsel.
    async fn emit_summary(&self, outcome: &TickOutcome) {
        let body = serde_json::to_string(outcome)
            .unwrap_or_else(|_| format!("tick {} (unserializable outcome)", outcome.kind));
        let mut links: Vec<i64> = outcome.placed.iter().map(|(id, _)| *id).collect();
        links.extend(&outcome.unblocked);
        links.extend(&outcome.killed);
        self.audit.append("tick", &body, &links).await;
    }
}
