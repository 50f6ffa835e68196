//! External collaborator interfaces: mailbox, board, and audit sink.
//!
//! The engine consumes these through narrow traits and never owns the
//! underlying stores. The SQLite implementations here share the engine's
//! database file, which keeps a single-node deployment self-contained; a
//! different deployment can swap in remote-backed implementations.

use crate::db::Database;
use crate::types::{Card, Message};
use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

/// Agent-to-agent mail store.
#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn get_message(&self, message_id: i64) -> Result<Option<Message>>;
    async fn send_message(&self, sender: &str, recipients: &[String], body: &str) -> Result<i64>;
    async fn list_unread(&self) -> Result<Vec<Message>>;
    async fn mark_read(&self, message_id: i64) -> Result<bool>;
}

/// Kanban board store.
#[async_trait]
pub trait Board: Send + Sync {
    async fn link_task_to_card(&self, task_id: i64, card_id: &str) -> Result<()>;
    async fn get_card(&self, card_id: &str) -> Result<Option<Card>>;
    async fn move_card(&self, card_id: &str, lane: &str) -> Result<Card>;
}

/// Audit-log sink. Appends are fire-and-forget: a failing sink must never
/// fail the tick, so the trait surface is infallible and implementations
/// log their own trouble.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, tag: &str, body: &str, links: &[i64]);
}

#[derive(Clone)]
pub struct SqliteMailbox {
    db: Database,
}

impl SqliteMailbox {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Mailbox for SqliteMailbox {
    async fn get_message(&self, message_id: i64) -> Result<Option<Message>> {
        self.db.get_message(message_id)
    }

    async fn send_message(&self, sender: &str, recipients: &[String], body: &str) -> Result<i64> {
        self.db.insert_message(sender, recipients, body)
    }

    async fn list_unread(&self) -> Result<Vec<Message>> {
        self.db.list_unread_messages()
    }

    async fn mark_read(&self, message_id: i64) -> Result<bool> {
        self.db.mark_message_read(message_id)
    }
}

#[derive(Clone)]
pub struct SqliteBoard {
    db: Database,
}

impl SqliteBoard {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Board for SqliteBoard {
    async fn link_task_to_card(&self, task_id: i64, card_id: &str) -> Result<()> {
        self.db.link_task_to_card(task_id, card_id)
    }

    async fn get_card(&self, card_id: &str) -> Result<Option<Card>> {
        self.db.get_card(card_id)
    }

    async fn move_card(&self, card_id: &str, lane: &str) -> Result<Card> {
        self.db.move_card(card_id, lane)
    }
}

#[derive(Clone)]
pub struct SqliteAuditSink {
    db: Database,
}

impl SqliteAuditSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, tag: &str, body: &str, links: &[i64]) {
        if let Err(e) = self.db.append_morsel(tag, body, links) {
            warn!(tag, error = %e, "dropping audit morsel");
        }
    }
}
