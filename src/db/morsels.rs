//! Audit morsel table backing the SQLite audit sink.

use super::{Database, now_ms};
use crate::types::Morsel;
use anyhow::Result;
use rusqlite::params;

impl Database {
    pub fn append_morsel(&self, tag: &str, body: &str, links: &[i64]) -> Result<i64> {
        let links_json = serde_json::to_string(links)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO morsels (tag, body, links, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![tag, body, links_json, now_ms()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent morsels first, optionally filtered by tag.
    pub fn list_morsels(&self, tag: Option<&str>, limit: i64) -> Result<Vec<Morsel>> {
        self.with_conn(|conn| {
            let parse = |row: &rusqlite::Row| -> rusqlite::Result<Morsel> {
                let links_json: String = row.get("links")?;
                Ok(Morsel {
                    id: row.get("id")?,
                    tag: row.get("tag")?,
                    body: row.get("body")?,
                    links: serde_json::from_str(&links_json).unwrap_or_default(),
                    created_at: row.get("created_at")?,
                })
            };

            let morsels = match tag {
                Some(t) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM morsels WHERE tag = ?1 ORDER BY id DESC LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![t, limit], parse)?;
                    rows.collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt =
                        conn.prepare("SELECT * FROM morsels ORDER BY id DESC LIMIT ?1")?;
                    let rows = stmt.query_map(params![limit], parse)?;
                    rows.collect::<std::result::Result<Vec<_>, _>>()?
                }
            };

            Ok(morsels)
        })
    }
}
