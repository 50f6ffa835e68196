//! Kanban card tables backing the SQLite board adapter.

use super::{Database, now_ms};
use crate::types::Card;
use anyhow::{Result, anyhow};
use rusqlite::{Row, params};

fn parse_card_row(row: &Row) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get("id")?,
        title: row.get("title")?,
        lane: row.get("lane")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Database {
    /// Record a task-to-card link, creating the card row if the board has
    /// not seen it yet.
    pub fn link_task_to_card(&self, task_id: i64, card_id: &str) -> Result<()> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cards (id, lane, created_at, updated_at)
                 VALUES (?1, 'backlog', ?2, ?2)",
                params![card_id, now],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO card_links (card_id, task_id, linked_at)
                 VALUES (?1, ?2, ?3)",
                params![card_id, task_id, now],
            )?;
            Ok(())
        })
    }

    pub fn get_card(&self, card_id: &str) -> Result<Option<Card>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM cards WHERE id = ?1")?;
            match stmt.query_row(params![card_id], parse_card_row) {
                Ok(card) => Ok(Some(card)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn move_card(&self, card_id: &str, lane: &str) -> Result<Card> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE cards SET lane = ?1, updated_at = ?2 WHERE id = ?3",
                params![lane, now_ms(), card_id],
            )?;
            if updated == 0 {
                return Err(anyhow!("card {} not found", card_id));
            }
            let mut stmt = conn.prepare("SELECT * FROM cards WHERE id = ?1")?;
            Ok(stmt.query_row(params![card_id], parse_card_row)?)
        })
    }

    /// Tasks linked to a card.
    pub fn card_tasks(&self, card_id: &str) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id FROM card_links WHERE card_id = ?1 ORDER BY linked_at",
            )?;
            let ids = stmt
                .query_map(params![card_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}
