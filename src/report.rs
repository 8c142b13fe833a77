//! Terminal reports: channel liquidity, fee policies, and fee earnings.

use std::collections::HashMap;

use anyhow::Context;

use crate::client::{resolve_aliases, NodeClient};
use crate::model::{Channel, ForwardingEvent};

const EARNINGS_WINDOW_DAYS: i64 = 30;

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max.saturating_sub(1)).chain(['~']).collect()
    } else {
        s.to_string()
    }
}

/// A ten-cell gauge of the local share of a channel.
fn ratio_gauge(ratio: f64) -> String {
    let filled = (ratio.clamp(0.0, 1.0) * 10.0).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(10 - filled))
}

/// `balance`: the channel liquidity table plus node-wide totals.
pub async fn print_balance(client: &(impl NodeClient + Sync)) -> anyhow::Result<()> {
    let channels = client.list_channels().await.context("listing channels")?;
    let liquidity = client.channel_balance().await.context("fetching channel balance")?;
    let wallet = client.wallet_balance().await.context("fetching wallet balance")?;
    let pending = client.pending_channels().await.context("fetching pending channels")?;
    let aliases = resolve_aliases(client, &channels).await;

    if channels.is_empty() {
        println!("no channels");
    } else {
        println!(
            "{:<24} {:>12} {:>12} {:>12} {:^12} {}",
            "ALIAS", "CAPACITY", "LOCAL", "REMOTE", "LOCAL%", "STATE"
        );
        for ch in &channels {
            let alias = aliases
                .get(&ch.remote_pubkey)
                .cloned()
                .unwrap_or_else(|| crate::client::pubkey_prefix(&ch.remote_pubkey));
            println!(
                "{:<24} {:>12} {:>12} {:>12} {} {}{}",
                truncate(&alias, 24),
                ch.capacity_sats,
                ch.local_balance_sats,
                ch.remote_balance_sats,
                ratio_gauge(ch.local_ratio()),
                if ch.active { "active" } else { "inactive" },
                if ch.private { " (private)" } else { "" },
            );
        }
    }

    println!();
    println!(
        "channel liquidity: {} sats local / {} sats remote",
        liquidity.local_sats, liquidity.remote_sats
    );
    println!(
        "on-chain wallet:   {} sats confirmed, {} sats unconfirmed ({} total)",
        wallet.confirmed_sats, wallet.unconfirmed_sats, wallet.total_sats
    );
    if liquidity.pending_open_local_sats > 0 || liquidity.pending_open_remote_sats > 0 {
        println!(
            "pending opens:     {} sats local / {} sats remote",
            liquidity.pending_open_local_sats, liquidity.pending_open_remote_sats
        );
    }
    if pending.total() > 0 {
        println!(
            "pending channels:  {} opening, {} closing, {} force-closing, {} waiting close",
            pending.pending_open,
            pending.pending_closing,
            pending.pending_force_closing,
            pending.waiting_close
        );
    }
    Ok(())
}

/// `fees`: current per-channel policy table plus earned-fee sums.
pub async fn print_fees(client: &(impl NodeClient + Sync)) -> anyhow::Result<()> {
    let channels = client.list_channels().await.context("listing channels")?;
    let report = client.fee_report().await.context("fetching fee report")?;
    let aliases = resolve_aliases(client, &channels).await;

    let by_point: HashMap<&str, &Channel> = channels
        .iter()
        .map(|c| (c.channel_point.as_str(), c))
        .collect();

    if report.channel_fees.is_empty() {
        println!("no channel fee policies");
    } else {
        println!(
            "{:<24} {:>20} {:>10} {:>8}",
            "ALIAS", "CHANNEL", "BASE msat", "PPM"
        );
        for policy in &report.channel_fees {
            let alias = by_point
                .get(policy.channel_point.as_str())
                .map(|ch| {
                    aliases
                        .get(&ch.remote_pubkey)
                        .cloned()
                        .unwrap_or_else(|| crate::client::pubkey_prefix(&ch.remote_pubkey))
                })
                .unwrap_or_else(|| "?".to_string());
            println!(
                "{:<24} {:>20} {:>10} {:>8}",
                truncate(&alias, 24),
                truncate(&policy.channel_id, 20),
                policy.base_fee_msat,
                policy.fee_rate_ppm,
            );
        }
    }

    println!();
    println!(
        "earned: {} sats today, {} sats this week, {} sats this month",
        report.day_fee_sum_sats, report.week_fee_sum_sats, report.month_fee_sum_sats
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarningsDetail {
    Summary,
    Detailed,
    SuperDetailed,
}

/// Per-channel earnings over a window. Fees are recorded on both sides of a
/// forward, mirroring how activity is scored, so the two directions are kept
/// separate rather than summed across channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelEarnings {
    pub channel_id: String,
    pub alias: String,
    pub forwards_in: u64,
    pub forwards_out: u64,
    pub earned_in_msat: i64,
    pub earned_out_msat: i64,
    pub volume_out_sats: i64,
    pub last_forward_unix: Option<i64>,
}

impl ChannelEarnings {
    pub fn forwards(&self) -> u64 {
        self.forwards_in + self.forwards_out
    }

    pub fn earned_out_sats(&self) -> i64 {
        self.earned_out_msat / 1000
    }
}

/// Aggregate a forwarding window per channel, most-earning first.
pub fn aggregate_by_channel(
    events: &[ForwardingEvent],
    channels: &[Channel],
    aliases: &HashMap<String, String>,
) -> Vec<ChannelEarnings> {
    let mut rows: Vec<ChannelEarnings> = channels
        .iter()
        .map(|ch| {
            let mut row = ChannelEarnings {
                channel_id: ch.channel_id.clone(),
                alias: aliases
                    .get(&ch.remote_pubkey)
                    .cloned()
                    .unwrap_or_else(|| crate::client::pubkey_prefix(&ch.remote_pubkey)),
                ..Default::default()
            };
            for ev in events {
                accumulate(&mut row, ev);
            }
            row
        })
        .collect();

    rows.sort_by(|a, b| {
        b.earned_out_msat
            .cmp(&a.earned_out_msat)
            .then_with(|| b.forwards().cmp(&a.forwards()))
    });
    rows
}

fn accumulate(row: &mut ChannelEarnings, ev: &ForwardingEvent) {
    let mut touched = false;
    if ev.chan_id_in == row.channel_id {
        row.forwards_in += 1;
        row.earned_in_msat += ev.fee_msat;
        touched = true;
    }
    if ev.chan_id_out == row.channel_id {
        row.forwards_out += 1;
        row.earned_out_msat += ev.fee_msat;
        row.volume_out_sats += ev.amt_out_sats;
        touched = true;
    }
    if touched {
        row.last_forward_unix = Some(
            row.last_forward_unix
                .map_or(ev.timestamp_unix, |t| t.max(ev.timestamp_unix)),
        );
    }
}

/// `earnings`: fee income at three levels of detail.
pub async fn print_earnings(
    client: &(impl NodeClient + Sync),
    detail: EarningsDetail,
) -> anyhow::Result<()> {
    let report = client.fee_report().await.context("fetching fee report")?;
    println!(
        "earned: {} sats today, {} sats this week, {} sats this month",
        report.day_fee_sum_sats, report.week_fee_sum_sats, report.month_fee_sum_sats
    );

    if detail == EarningsDetail::Summary {
        return Ok(());
    }

    let channels = client.list_channels().await.context("listing channels")?;
    let now = chrono::Utc::now().timestamp();
    let events = client
        .forwarding_history(now - EARNINGS_WINDOW_DAYS * 86_400, None)
        .await
        .context("fetching forwarding history")?;
    let aliases = resolve_aliases(client, &channels).await;
    let rows = aggregate_by_channel(&events, &channels, &aliases);

    println!();
    match detail {
        EarningsDetail::Summary => unreachable!(),
        EarningsDetail::Detailed => {
            println!(
                "{:<24} {:>9} {:>12}",
                "ALIAS", "FORWARDS", "EARNED sats"
            );
            for row in &rows {
                println!(
                    "{:<24} {:>9} {:>12}",
                    truncate(&row.alias, 24),
                    row.forwards(),
                    row.earned_out_sats(),
                );
            }
        }
        EarningsDetail::SuperDetailed => {
            println!(
                "{:<24} {:>6} {:>6} {:>12} {:>12} {:>14} {:>9}",
                "ALIAS", "IN", "OUT", "EARNED-IN", "EARNED-OUT", "VOLUME-OUT", "LAST"
            );
            for row in &rows {
                let last = row
                    .last_forward_unix
                    .map(|t| format!("{}d ago", ((now - t) / 86_400).max(0)))
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<24} {:>6} {:>6} {:>9}msat {:>9}msat {:>10}sats {:>9}",
                    truncate(&row.alias, 24),
                    row.forwards_in,
                    row.forwards_out,
                    row.earned_in_msat,
                    row.earned_out_msat,
                    row.volume_out_sats,
                    last,
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_channel(id: &str) -> Channel {
        Channel {
            channel_id: id.to_string(),
            remote_pubkey: format!("02peer_{id}"),
            capacity_sats: 1_000_000,
            local_balance_sats: 500_000,
            remote_balance_sats: 500_000,
            active: true,
            private: false,
            channel_point: format!("txid_{id}:0"),
        }
    }

    fn forward(ts: i64, chan_in: &str, chan_out: &str, fee_msat: i64) -> ForwardingEvent {
        ForwardingEvent {
            timestamp_unix: ts,
            chan_id_in: chan_in.to_string(),
            chan_id_out: chan_out.to_string(),
            amt_in_sats: 10_010,
            amt_out_sats: 10_000,
            fee_msat,
        }
    }

    #[test]
    fn truncate_marks_cut_strings() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly_10", 10), "exactly_10");
        assert_eq!(truncate("definitely_too_long", 10), "definitel~");
    }

    #[test]
    fn ratio_gauge_ends() {
        assert_eq!(ratio_gauge(0.0), "[----------]");
        assert_eq!(ratio_gauge(1.0), "[##########]");
        assert_eq!(ratio_gauge(0.5), "[#####-----]");
    }

    #[test]
    fn aggregation_splits_directions() {
        let channels = vec![make_channel("A"), make_channel("B")];
        let events = vec![
            forward(1_000, "A", "B", 2_000),
            forward(2_000, "B", "A", 3_000),
            forward(3_000, "A", "B", 1_000),
        ];
        let rows = aggregate_by_channel(&events, &channels, &HashMap::new());

        let a = rows.iter().find(|r| r.channel_id == "A").unwrap();
        assert_eq!(a.forwards_in, 2);
        assert_eq!(a.forwards_out, 1);
        assert_eq!(a.earned_in_msat, 3_000);
        assert_eq!(a.earned_out_msat, 3_000);
        assert_eq!(a.volume_out_sats, 10_000);
        assert_eq!(a.last_forward_unix, Some(3_000));

        let b = rows.iter().find(|r| r.channel_id == "B").unwrap();
        assert_eq!(b.forwards_in, 1);
        assert_eq!(b.forwards_out, 2);
        assert_eq!(b.earned_out_msat, 3_000);
    }

    #[test]
    fn aggregation_sorts_by_out_earnings() {
        let channels = vec![make_channel("quiet"), make_channel("busy")];
        let events = vec![
            forward(1_000, "x", "busy", 9_000),
            forward(2_000, "x", "quiet", 1_000),
        ];
        let rows = aggregate_by_channel(&events, &channels, &HashMap::new());
        assert_eq!(rows[0].channel_id, "busy");
        assert_eq!(rows[1].channel_id, "quiet");
    }

    #[test]
    fn channel_with_no_forwards_reports_never() {
        let channels = vec![make_channel("idle")];
        let rows = aggregate_by_channel(&[], &channels, &HashMap::new());
        assert_eq!(rows[0].forwards(), 0);
        assert_eq!(rows[0].last_forward_unix, None);
    }
}
