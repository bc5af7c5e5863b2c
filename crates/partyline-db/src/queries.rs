use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use partyline_core::{Channel, Store};
use partyline_types::models::{Reason, Record, Target, TargetKey};

use crate::Database;
use crate::models::{ChannelRow, ReasonRow};

impl Store for Database {
    // -- Channels --

    fn load_channel(&self, name: &str) -> Result<Option<Channel>> {
        let row = self.with_conn(|conn| query_channel(conn, name))?;
        match row {
            Some(row) => {
                debug!("Loaded channel {} (saved {})", row.name, row.updated_at);
                Ok(Some(serde_json::from_str(&row.body)?))
            }
            None => Ok(None),
        }
    }

    fn put_channel(&self, channel: &Channel) -> Result<()> {
        let body = serde_json::to_string(channel)?;
        self.with_conn(|conn| upsert_channel(conn, channel.name(), &body))
    }

    /// Targets and reasons outlive the channel row.
    fn delete_channel(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM channels WHERE name = ?1", [name])?;
            Ok(())
        })
    }

    // -- Ledger --

    fn get_or_create_target(&self, key: &TargetKey) -> Result<Target> {
        let score = self.with_conn(|conn| {
            conn.query_row(
                "SELECT score FROM targets WHERE channel = ?1 AND name = ?2",
                (&key.channel, &key.name),
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })?;

        Ok(Target {
            key: key.clone(),
            score: score.unwrap_or(0),
        })
    }

    fn put_all(&self, records: &[Record]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_records(&tx, records)?;
            // Dropping an uncommitted transaction rolls it back
            tx.commit()?;
            Ok(())
        })
    }

    fn commit(&self, channel: &Channel, records: &[Record]) -> Result<()> {
        let body = serde_json::to_string(channel)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            upsert_channel(&tx, channel.name(), &body)?;
            insert_records(&tx, records)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn recent_reasons(&self, key: &TargetKey, limit: usize) -> Result<Vec<Reason>> {
        let rows = self.with_conn(|conn| query_reasons(conn, key, limit))?;
        rows.into_iter().map(ReasonRow::into_reason).collect()
    }
}

fn upsert_channel(conn: &Connection, name: &str, body: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO channels (name, body, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        (name, body, Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

/// Targets are upserted; reasons are appended in the given order.
fn insert_records(conn: &Connection, records: &[Record]) -> Result<()> {
    for record in records {
        match record {
            Record::Target(target) => {
                conn.execute(
                    "INSERT INTO targets (channel, name, score) VALUES (?1, ?2, ?3)
                     ON CONFLICT(channel, name) DO UPDATE SET score = excluded.score",
                    (&target.key.channel, &target.key.name, target.score),
                )?;
            }
            Record::Reason(reason) => {
                let row = ReasonRow::from_reason(reason);
                conn.execute(
                    "INSERT INTO reasons (id, channel, target, actor, action, message, score, reverses, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        row.id,
                        row.channel,
                        row.target,
                        row.actor,
                        row.action,
                        row.message,
                        row.score,
                        row.reverses,
                        row.created_at,
                    ],
                )?;
            }
        }
    }
    Ok(())
}

fn query_channel(conn: &Connection, name: &str) -> Result<Option<ChannelRow>> {
    let mut stmt = conn.prepare("SELECT name, body, updated_at FROM channels WHERE name = ?1")?;

    let row = stmt
        .query_row([name], |row| {
            Ok(ChannelRow {
                name: row.get(0)?,
                body: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_reasons(conn: &Connection, key: &TargetKey, limit: usize) -> Result<Vec<ReasonRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, channel, target, actor, action, message, score, reverses, created_at
         FROM reasons
         WHERE channel = ?1 AND target = ?2
         ORDER BY seq DESC
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![key.channel, key.name, limit as i64], |row| {
            Ok(ReasonRow {
                id: row.get(0)?,
                channel: row.get(1)?,
                target: row.get(2)?,
                actor: row.get(3)?,
                action: row.get(4)?,
                message: row.get(5)?,
                score: row.get(6)?,
                reverses: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
