use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

/// Embedded store for telemetry snapshots and ingested forwarding events.
/// Opened per process; the read-only dashboard consumes the same file.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // WAL mode for crash safety
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
-- One row per collector tick
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    taken_at INTEGER NOT NULL,
    confirmed_sats INTEGER NOT NULL DEFAULT 0,
    unconfirmed_sats INTEGER NOT NULL DEFAULT 0,
    local_sats INTEGER NOT NULL DEFAULT 0,
    remote_sats INTEGER NOT NULL DEFAULT 0,
    pending_open INTEGER NOT NULL DEFAULT 0,
    pending_closing INTEGER NOT NULL DEFAULT 0,
    pending_force_closing INTEGER NOT NULL DEFAULT 0,
    waiting_close INTEGER NOT NULL DEFAULT 0,
    invoice_count INTEGER NOT NULL DEFAULT 0,
    active_channels INTEGER NOT NULL DEFAULT 0,
    inactive_channels INTEGER NOT NULL DEFAULT 0,
    total_capacity_sats INTEGER NOT NULL DEFAULT 0,
    day_fee_sum_sats INTEGER NOT NULL DEFAULT 0,
    week_fee_sum_sats INTEGER NOT NULL DEFAULT 0,
    month_fee_sum_sats INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_snapshots_taken_at ON snapshots(taken_at);

-- Forwarding events ingested from the node, append-only
CREATE TABLE IF NOT EXISTS forwarding_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_time INTEGER NOT NULL,
    chan_id_in TEXT NOT NULL,
    chan_id_out TEXT NOT NULL,
    amt_in_sats INTEGER NOT NULL DEFAULT 0,
    amt_out_sats INTEGER NOT NULL DEFAULT 0,
    fee_msat INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_forwarding_events_time
    ON forwarding_events(event_time);
CREATE INDEX IF NOT EXISTS idx_forwarding_events_out
    ON forwarding_events(chan_id_out, event_time);

-- Ingestion cursor and other sync state
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
