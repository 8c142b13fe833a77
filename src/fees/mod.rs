pub mod optimizer;
pub mod setter;

use std::collections::HashMap;

use anyhow::Context;
use log::{error, info, warn};

use crate::client::{resolve_aliases, NodeClient};
use crate::config::Config;
use crate::fees::optimizer::{FeeRecommendation, ForwardStats};
use crate::model::FeePolicy;
use crate::report::truncate;
use crate::scoring::{self, Category, ChannelScore};

/// Forwarding window feeding fee analysis.
const ANALYSIS_WINDOW_DAYS: i64 = 30;

/// Hard rail for operator-supplied rates; matches the node's own sanity cap.
const ABS_MAX_MANUAL_PPM: i64 = 50_000;

/// One channel's scored state plus its current and recommended policy.
pub struct ChannelAnalysis {
    pub score: ChannelScore,
    pub category: Category,
    pub current_ppm: Option<i64>,
    pub current_base_fee_msat: Option<i64>,
    pub recommended: FeeRecommendation,
}

/// Score every active channel and derive a fee recommendation for each.
///
/// The returned list is in apply order: priority first (high to low), then
/// capacity descending.
pub async fn analyze(
    client: &(impl NodeClient + Sync),
    config: &Config,
) -> anyhow::Result<Vec<ChannelAnalysis>> {
    let channels = client.list_channels().await.context("listing channels")?;
    let now = chrono::Utc::now().timestamp();
    let events = client
        .forwarding_history(now - ANALYSIS_WINDOW_DAYS * 86_400, None)
        .await
        .context("fetching forwarding history")?;
    let report = client.fee_report().await.context("fetching fee report")?;
    let aliases = resolve_aliases(client, &channels).await;

    let current: HashMap<String, &FeePolicy> = report
        .channel_fees
        .iter()
        .map(|p| (p.channel_point.clone(), p))
        .collect();

    let scoring_cfg = config.scoring_config();
    let rules = config.fee_rules();
    let scores = scoring::score_channels(&channels, &events, &aliases, &scoring_cfg);

    let mut analyses: Vec<ChannelAnalysis> = scores
        .into_iter()
        .map(|score| {
            let category = scoring::categorize(&score.channel, score.local_ratio, &scoring_cfg);
            let stats = ForwardStats::from_events(&events, &score.channel.channel_id, now);
            let recommended = optimizer::recommend(category, &stats, &rules);
            let policy = current.get(&score.channel.channel_point);
            ChannelAnalysis {
                category,
                current_ppm: policy.map(|p| p.fee_rate_ppm),
                current_base_fee_msat: policy.map(|p| p.base_fee_msat),
                recommended,
                score,
            }
        })
        .collect();

    analyses.sort_by(|a, b| {
        a.recommended
            .priority
            .cmp(&b.recommended.priority)
            .then_with(|| {
                b.score
                    .channel
                    .capacity_sats
                    .cmp(&a.score.channel.capacity_sats)
            })
    });

    Ok(analyses)
}

/// `suggest-fees`: print recommendations without touching the node.
pub async fn suggest(client: &(impl NodeClient + Sync), config: &Config) -> anyhow::Result<()> {
    let analyses = analyze(client, config).await?;
    if analyses.is_empty() {
        println!("no active channels to analyze");
        return Ok(());
    }

    println!(
        "{:<24} {:>7} {:>15} {:>8} {:>8} {:>7}  {}",
        "ALIAS", "RATIO", "CATEGORY", "CURRENT", "NEW", "PRIO", "REASON"
    );
    for a in &analyses {
        println!(
            "{:<24} {:>6.1}% {:>15} {:>8} {:>8} {:>7}  {}",
            truncate(&a.score.alias, 24),
            a.score.local_ratio * 100.0,
            a.category.label(),
            a.current_ppm
                .map_or_else(|| "-".to_string(), |p| p.to_string()),
            a.recommended.ppm,
            a.recommended.priority.label(),
            a.recommended.reasoning,
        );
    }
    Ok(())
}

/// `fee-optimizer`: apply recommendations that clear the update filter.
/// Per-channel failures are logged and counted; the batch continues.
pub async fn optimize(
    client: &(impl NodeClient + Sync),
    config: &Config,
    dry_run: bool,
) -> anyhow::Result<()> {
    let dry_run = dry_run || config.general.dry_run;
    let analyses = analyze(client, config).await?;
    let due: Vec<&ChannelAnalysis> = analyses.iter().filter(|a| setter::due_for_update(a)).collect();

    if due.is_empty() {
        println!("all channel policies already within range");
        return Ok(());
    }

    let own_pubkey = client.get_node_pubkey().await.context("resolving own pubkey")?;
    let mut updated = 0usize;
    for a in &due {
        let tld = resolve_time_lock_delta(client, &a.score.channel.channel_id, &own_pubkey, config).await;
        match setter::apply_one(client, a, tld, dry_run).await {
            Ok(()) => updated += 1,
            Err(e) => error!(
                "fee optimizer: update for {} failed: {}",
                a.score.channel.channel_id, e
            ),
        }
    }

    println!("{}/{}", updated, due.len());
    Ok(())
}

/// `set-fees`: manual policy for one channel.
pub async fn set_one(
    client: &(impl NodeClient + Sync),
    config: &Config,
    channel_id: &str,
    ppm: i64,
    base_fee_msat: Option<i64>,
) -> anyhow::Result<()> {
    validate_manual_ppm(ppm)?;
    let channels = client.list_channels().await.context("listing channels")?;
    let channel = channels
        .iter()
        .find(|c| c.channel_id == channel_id)
        .ok_or_else(|| anyhow::anyhow!("channel {channel_id} not found"))?;

    let own_pubkey = client.get_node_pubkey().await.context("resolving own pubkey")?;
    let base = base_fee_msat.unwrap_or(config.fees.base_fee_msat);
    let tld = resolve_time_lock_delta(client, channel_id, &own_pubkey, config).await;

    if config.general.dry_run {
        info!("set-fees: {} -> {} ppm (dry-run)", channel_id, ppm);
        return Ok(());
    }

    client
        .update_channel_policy(&channel.channel_point, base, ppm, tld)
        .await?;
    println!("updated {}: {} ppm, base {} msat", channel_id, ppm, base);
    Ok(())
}

/// `bulk-set-fees`: one policy for every active channel. Failures do not
/// abort the batch.
pub async fn bulk_set(
    client: &(impl NodeClient + Sync),
    config: &Config,
    ppm: i64,
    base_fee_msat: Option<i64>,
) -> anyhow::Result<()> {
    validate_manual_ppm(ppm)?;
    let channels = client.list_channels().await.context("listing channels")?;
    let active: Vec<_> = channels.iter().filter(|c| c.active).collect();
    if active.is_empty() {
        println!("no active channels");
        return Ok(());
    }

    let own_pubkey = client.get_node_pubkey().await.context("resolving own pubkey")?;
    let base = base_fee_msat.unwrap_or(config.fees.base_fee_msat);
    let mut updated = 0usize;

    for ch in &active {
        let tld = resolve_time_lock_delta(client, &ch.channel_id, &own_pubkey, config).await;
        if config.general.dry_run {
            info!("bulk-set-fees: {} -> {} ppm (dry-run)", ch.channel_id, ppm);
            updated += 1;
            continue;
        }
        match client
            .update_channel_policy(&ch.channel_point, base, ppm, tld)
            .await
        {
            Ok(()) => updated += 1,
            Err(e) => error!("bulk-set-fees: {}: {}", ch.channel_id, e),
        }
    }

    println!("{}/{}", updated, active.len());
    Ok(())
}

fn validate_manual_ppm(ppm: i64) -> anyhow::Result<()> {
    if !(0..=ABS_MAX_MANUAL_PPM).contains(&ppm) {
        anyhow::bail!("--ppm must be between 0 and {ABS_MAX_MANUAL_PPM}");
    }
    Ok(())
}

/// The node wants a time lock delta on every policy update; reuse our
/// current advertised one, falling back to the configured default.
async fn resolve_time_lock_delta(
    client: &(impl NodeClient + Sync),
    channel_id: &str,
    own_pubkey: &str,
    config: &Config,
) -> u32 {
    match client.get_channel_info(channel_id).await {
        Ok(edge) => edge
            .policy_of(own_pubkey)
            .map(|p| p.time_lock_delta)
            .filter(|d| *d > 0)
            .unwrap_or(config.fees.default_time_lock_delta),
        Err(e) => {
            warn!("could not resolve edge policy for {channel_id}: {e}");
            config.fees.default_time_lock_delta
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockNodeClient;
    use crate::client::{ChannelEdge, FeeReport, RoutingPolicy};
    use crate::model::Channel;

    fn make_channel(id: &str, capacity: i64, local: i64) -> Channel {
        Channel {
            channel_id: id.to_string(),
            remote_pubkey: format!("02peer_{id}"),
            capacity_sats: capacity,
            local_balance_sats: local,
            remote_balance_sats: capacity - local,
            active: true,
            private: false,
            channel_point: format!("txid_{id}:0"),
        }
    }

    fn policy(id: &str, ppm: i64) -> FeePolicy {
        FeePolicy {
            channel_id: id.to_string(),
            channel_point: format!("txid_{id}:0"),
            base_fee_msat: 1000,
            fee_rate_ppm: ppm,
            time_lock_delta: 0,
        }
    }

    fn edge_for(own_pubkey: &str, peer: &str, tld: u32) -> ChannelEdge {
        ChannelEdge {
            node1_pub: own_pubkey.to_string(),
            node2_pub: peer.to_string(),
            node1_policy: Some(RoutingPolicy {
                fee_base_msat: 1000,
                fee_rate_ppm: 100,
                time_lock_delta: tld,
                disabled: false,
            }),
            node2_policy: None,
        }
    }

    fn two_channel_mock() -> MockNodeClient {
        let mut mock = MockNodeClient::new();
        // Two balanced channels with a forward yesterday: recommendation is
        // 100 * 0.8 = 80 at high priority, so both clear the update filter
        // against currents of 100 and 400.
        mock.channels = vec![
            make_channel("C1", 1_000_000, 500_000),
            make_channel("C2", 2_000_000, 1_000_000),
        ];
        mock.report = FeeReport {
            channel_fees: vec![policy("C1", 100), policy("C2", 400)],
            day_fee_sum_sats: 0,
            week_fee_sum_sats: 0,
            month_fee_sum_sats: 0,
        };
        let now = chrono::Utc::now().timestamp();
        mock.forwards = vec![crate::model::ForwardingEvent {
            timestamp_unix: now - 86_400,
            chan_id_in: "C2".to_string(),
            chan_id_out: "C1".to_string(),
            amt_in_sats: 10_000,
            amt_out_sats: 10_000,
            fee_msat: 5_000,
        }];
        for id in ["C1", "C2"] {
            mock.edges.insert(
                id.to_string(),
                edge_for("mock_node_pubkey", &format!("02peer_{id}"), 80),
            );
        }
        mock
    }

    #[tokio::test]
    async fn analyze_orders_by_priority_then_capacity() {
        let mock = two_channel_mock();
        let config = Config::default();
        let analyses = analyze(&mock, &config).await.unwrap();
        assert_eq!(analyses.len(), 2);
        // Both channels saw the same forward (one in, one out), so both are
        // high priority; the larger capacity sorts first.
        assert_eq!(analyses[0].score.channel.channel_id, "C2");
        assert!(analyses
            .windows(2)
            .all(|w| w[0].recommended.priority <= w[1].recommended.priority));
    }

    #[tokio::test]
    async fn optimize_applies_due_updates_with_edge_tld() {
        let mock = two_channel_mock();
        let config = Config::default();
        optimize(&mock, &config, false).await.unwrap();

        let calls = mock.policy_update_calls.lock().unwrap();
        // Balanced + recent activity: 100 * 0.8 = 80. C1 current is 100
        // (delta 20, due); C2 current is 400 (delta 320, due).
        assert_eq!(calls.len(), 2);
        for call in calls.iter() {
            assert_eq!(call.fee_rate_ppm, 80);
            assert_eq!(call.time_lock_delta, 80);
        }
    }

    #[tokio::test]
    async fn optimize_continues_past_single_failure() {
        let mut mock = two_channel_mock();
        mock.fail_policy_update_for = vec!["txid_C2:0".to_string()];
        let config = Config::default();
        optimize(&mock, &config, false).await.unwrap();

        // Both updates attempted despite the first (C2, larger) failing.
        let calls = mock.policy_update_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn optimize_dry_run_mutates_nothing() {
        let mock = two_channel_mock();
        let config = Config::default();
        optimize(&mock, &config, true).await.unwrap();
        assert!(mock.policy_update_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_one_unknown_channel_fails() {
        let mock = two_channel_mock();
        let config = Config::default();
        let err = set_one(&mock, &config, "nope", 250, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(mock.policy_update_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_one_rejects_absurd_ppm() {
        let mock = two_channel_mock();
        let config = Config::default();
        assert!(set_one(&mock, &config, "C1", 60_000, None).await.is_err());
        assert!(set_one(&mock, &config, "C1", -1, None).await.is_err());
    }

    #[tokio::test]
    async fn bulk_set_updates_every_active_channel() {
        let mut mock = two_channel_mock();
        mock.channels.push(Channel {
            active: false,
            ..make_channel("C3", 700_000, 100_000)
        });
        let config = Config::default();
        bulk_set(&mock, &config, 200, Some(500)).await.unwrap();

        let calls = mock.policy_update_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.fee_rate_ppm == 200 && c.base_fee_msat == 500));
        assert!(calls.iter().all(|c| c.channel_point != "txid_C3:0"));
    }
}
