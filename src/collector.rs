//! Background telemetry collector: a timer-driven loop that snapshots node
//! state into the store and ingests new forwarding events. Each tick runs to
//! completion before the next can begin; a termination signal drains the
//! current tick and exits.

use log::{debug, error, info};
use rusqlite::Connection;
use tokio::signal;
use tokio::sync::watch;

use crate::client::NodeClient;
use crate::config::Config;
use crate::db::Database;
use crate::notify::Notifier;

/// Backfill window for the very first forwarding ingest.
const INITIAL_BACKFILL_DAYS: i64 = 30;

/// Notify the operator after this many consecutive failed ticks.
const FAILURE_NOTIFY_THRESHOLD: u32 = 3;

const CURSOR_KEY: &str = "forwarding_cursor";

pub async fn run(
    config: &Config,
    client: &(impl NodeClient + Sync),
    db: &Database,
    notifier: &Notifier,
) -> anyhow::Result<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("received shutdown signal, finishing current tick");
        let _ = shutdown_tx.send(true);
    });

    let interval = std::time::Duration::from_secs(config.collector.interval_secs);
    info!(
        "collector: entering loop (interval: {}s)",
        config.collector.interval_secs
    );

    let mut consecutive_failures = 0u32;
    loop {
        if *shutdown_rx.borrow() {
            info!("collector: shutting down");
            break;
        }

        match tick(client, db).await {
            Ok(()) => consecutive_failures = 0,
            Err(e) => {
                error!("collector tick failed: {:#}", e);
                consecutive_failures += 1;
                if consecutive_failures == FAILURE_NOTIFY_THRESHOLD {
                    notifier
                        .send(&format!(
                            "collector: {FAILURE_NOTIFY_THRESHOLD} consecutive ticks failed, \
                             last error: {e:#}"
                        ))
                        .await;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown_rx.changed() => {
                info!("collector: shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// One collection pass: snapshot row plus incremental forwarding ingest.
pub async fn tick(client: &(impl NodeClient + Sync), db: &Database) -> anyhow::Result<()> {
    let channels = client.list_channels().await?;
    let wallet = client.wallet_balance().await?;
    let liquidity = client.channel_balance().await?;
    let pending = client.pending_channels().await?;
    let invoice_count = client.list_invoices().await?;
    let report = client.fee_report().await?;

    let now = chrono::Utc::now().timestamp();
    let active = channels.iter().filter(|c| c.active).count();
    let inactive = channels.len() - active;
    let total_capacity: i64 = channels.iter().map(|c| c.capacity_sats).sum();

    db.conn().execute(
        "INSERT INTO snapshots (taken_at, confirmed_sats, unconfirmed_sats, \
         local_sats, remote_sats, pending_open, pending_closing, \
         pending_force_closing, waiting_close, invoice_count, active_channels, \
         inactive_channels, total_capacity_sats, day_fee_sum_sats, \
         week_fee_sum_sats, month_fee_sum_sats) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        rusqlite::params![
            now,
            wallet.confirmed_sats,
            wallet.unconfirmed_sats,
            liquidity.local_sats,
            liquidity.remote_sats,
            pending.pending_open as i64,
            pending.pending_closing as i64,
            pending.pending_force_closing as i64,
            pending.waiting_close as i64,
            invoice_count as i64,
            active as i64,
            inactive as i64,
            total_capacity,
            report.day_fee_sum_sats,
            report.week_fee_sum_sats,
            report.month_fee_sum_sats,
        ],
    )?;

    let ingested = ingest_forwards(client, db, now).await?;
    debug!(
        "collector: snapshot at {now} ({active} active channels), {ingested} new forwards"
    );
    Ok(())
}

/// Pull forwarding events newer than the stored cursor into the store.
async fn ingest_forwards(
    client: &(impl NodeClient + Sync),
    db: &Database,
    now: i64,
) -> anyhow::Result<usize> {
    let conn = db.conn();
    let cursor = load_cursor(conn)?;
    let start = cursor
        .map(|t| t + 1)
        .unwrap_or(now - INITIAL_BACKFILL_DAYS * 86_400);

    let events = client.forwarding_history(start, Some(now)).await?;
    if events.is_empty() {
        return Ok(0);
    }

    let mut newest = cursor.unwrap_or(0);
    for ev in &events {
        conn.execute(
            "INSERT INTO forwarding_events \
             (event_time, chan_id_in, chan_id_out, amt_in_sats, amt_out_sats, fee_msat) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                ev.timestamp_unix,
                ev.chan_id_in,
                ev.chan_id_out,
                ev.amt_in_sats,
                ev.amt_out_sats,
                ev.fee_msat,
            ],
        )?;
        newest = newest.max(ev.timestamp_unix);
    }
    save_cursor(conn, newest)?;

    info!("collector: ingested {} forwarding events", events.len());
    Ok(events.len())
}

fn load_cursor(conn: &Connection) -> anyhow::Result<Option<i64>> {
    let result = conn.query_row(
        "SELECT value FROM sync_state WHERE key = ?1",
        [CURSOR_KEY],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(value) => Ok(value.parse::<i64>().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn save_cursor(conn: &Connection, timestamp: i64) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
        rusqlite::params![CURSOR_KEY, timestamp.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockNodeClient;
    use crate::client::{ChannelLiquidity, FeeReport, WalletBalance};
    use crate::model::{Channel, ForwardingEvent};

    fn make_mock() -> MockNodeClient {
        let mut mock = MockNodeClient::new();
        mock.channels = vec![
            Channel {
                channel_id: "C1".to_string(),
                remote_pubkey: "02peer".to_string(),
                capacity_sats: 1_000_000,
                local_balance_sats: 400_000,
                remote_balance_sats: 600_000,
                active: true,
                private: false,
                channel_point: "txid:0".to_string(),
            },
            Channel {
                channel_id: "C2".to_string(),
                active: false,
                capacity_sats: 500_000,
                ..Default::default()
            },
        ];
        mock.wallet = WalletBalance {
            confirmed_sats: 50_000,
            unconfirmed_sats: 1_000,
            total_sats: 51_000,
        };
        mock.liquidity = ChannelLiquidity {
            local_sats: 400_000,
            remote_sats: 600_000,
            pending_open_local_sats: 0,
            pending_open_remote_sats: 0,
        };
        mock.invoice_count = 7;
        mock.report = FeeReport {
            channel_fees: Vec::new(),
            day_fee_sum_sats: 3,
            week_fee_sum_sats: 21,
            month_fee_sum_sats: 90,
        };
        let now = chrono::Utc::now().timestamp();
        mock.forwards = vec![ForwardingEvent {
            timestamp_unix: now - 3_600,
            chan_id_in: "C1".to_string(),
            chan_id_out: "C2".to_string(),
            amt_in_sats: 10_010,
            amt_out_sats: 10_000,
            fee_msat: 10_000,
        }];
        mock
    }

    #[tokio::test]
    async fn tick_writes_snapshot_and_ingests_forwards() {
        let db = Database::open_in_memory().unwrap();
        let mock = make_mock();

        tick(&mock, &db).await.unwrap();

        let (active, inactive, invoices): (i64, i64, i64) = db
            .conn()
            .query_row(
                "SELECT active_channels, inactive_channels, invoice_count \
                 FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(active, 1);
        assert_eq!(inactive, 1);
        assert_eq!(invoices, 7);

        let forwards: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM forwarding_events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(forwards, 1);
    }

    #[tokio::test]
    async fn second_tick_does_not_reingest_forwards() {
        let db = Database::open_in_memory().unwrap();
        let mock = make_mock();

        tick(&mock, &db).await.unwrap();
        tick(&mock, &db).await.unwrap();

        let snapshots: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM snapshots", [], |r| r.get(0))
            .unwrap();
        assert_eq!(snapshots, 2);

        // Cursor advanced past the only event: still a single row.
        let forwards: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM forwarding_events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(forwards, 1);
    }

    #[test]
    fn cursor_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(load_cursor(db.conn()).unwrap(), None);
        save_cursor(db.conn(), 1_722_470_400).unwrap();
        assert_eq!(load_cursor(db.conn()).unwrap(), Some(1_722_470_400));
        save_cursor(db.conn(), 1_722_470_500).unwrap();
        assert_eq!(load_cursor(db.conn()).unwrap(), Some(1_722_470_500));
    }
}
