//! Mailbox tables backing the SQLite mailbox adapter.

use super::{Database, now_ms};
use crate::types::Message;
use anyhow::Result;
use rusqlite::{Row, params};

fn parse_message_row(row: &Row) -> rusqlite::Result<Message> {
    let recipients_json: String = row.get("recipients")?;
    Ok(Message {
        id: row.get("id")?,
        sender: row.get("sender")?,
        recipients: serde_json::from_str(&recipients_json).unwrap_or_default(),
        body: row.get("body")?,
        created_at: row.get("created_at")?,
        read_at: row.get("read_at")?,
    })
}

impl Database {
    pub fn insert_message(&self, sender: &str, recipients: &[String], body: &str) -> Result<i64> {
        let recipients_json = serde_json::to_string(recipients)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender, recipients, body, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![sender, recipients_json, body, now_ms()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, message_id: i64) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM messages WHERE id = ?1")?;
            match stmt.query_row(params![message_id], parse_message_row) {
                Ok(msg) => Ok(Some(msg)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn list_unread_messages(&self) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM messages WHERE read_at IS NULL ORDER BY created_at, id")?;
            let msgs = stmt
                .query_map([], parse_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(msgs)
        })
    }

    pub fn mark_message_read(&self, message_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
                params![now_ms(), message_id],
            )?;
            Ok(updated > 0)
        })
    }
}
