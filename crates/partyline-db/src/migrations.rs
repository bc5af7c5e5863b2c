use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channels (
            name        TEXT PRIMARY KEY,
            body        TEXT NOT NULL,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS targets (
            channel     TEXT NOT NULL,
            name        TEXT NOT NULL,
            score       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (channel, name)
        );

        -- seq keeps insertion order; created_at can tie within one batch
        CREATE TABLE IF NOT EXISTS reasons (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            channel     TEXT NOT NULL,
            target      TEXT NOT NULL,
            actor       TEXT NOT NULL,
            action      TEXT NOT NULL,
            message     TEXT NOT NULL,
            score       INTEGER NOT NULL,
            reverses    TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reasons_target
            ON reasons(channel, target, seq);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
