pub mod executor;
pub mod planner;

use std::time::Duration;

use anyhow::Context;
use log::{error, info};

use crate::client::{resolve_aliases, NodeClient};
use crate::config::Config;
use crate::notify::Notifier;
use crate::report::truncate;
use crate::scoring;
use planner::RebalanceProposal;

/// Forwarding window feeding rebalance scoring.
const SCORING_WINDOW_DAYS: i64 = 7;

/// Pause between proposals in batch mode.
const BATCH_PAUSE: Duration = Duration::from_secs(2);

/// Keysend self-test parameters.
const SELF_TEST_AMOUNT_SATS: i64 = 1;
const SELF_TEST_FEE_LIMIT_SATS: i64 = 5;
const SELF_TEST_TIMEOUT_SECS: u32 = 10;

/// Score the node's channels over a 7-day window and plan proposals.
pub async fn plan_from_node(
    client: &(impl NodeClient + Sync),
    config: &Config,
) -> anyhow::Result<Vec<RebalanceProposal>> {
    let channels = client.list_channels().await.context("listing channels")?;
    let now = chrono::Utc::now().timestamp();
    let events = client
        .forwarding_history(now - SCORING_WINDOW_DAYS * 86_400, None)
        .await
        .context("fetching forwarding history")?;
    let aliases = resolve_aliases(client, &channels).await;
    let scores = scoring::score_channels(&channels, &events, &aliases, &config.scoring_config());
    Ok(planner::plan(&scores, &config.rebalance_config()))
}

/// `suggest-rebalance`: print ranked proposals.
pub async fn suggest(client: &(impl NodeClient + Sync), config: &Config) -> anyhow::Result<()> {
    let proposals = plan_from_node(client, config).await?;
    if proposals.is_empty() {
        println!("no rebalance needed");
        return Ok(());
    }

    println!(
        "{:>4} {:<20} {:<20} {:>12} {:>9} {:>7}  {}",
        "PRIO", "FROM", "TO", "AMOUNT", "EST FEE", "RATE", "REASON"
    );
    for p in &proposals {
        println!(
            "{:>4} {:<20} {:<20} {:>12} {:>9} {:>6.3}%  {}",
            p.priority,
            truncate(&p.from.alias, 20),
            truncate(&p.to.alias, 20),
            p.amount_sats,
            p.estimated_fee_sats,
            p.fee_rate_pct,
            p.reason,
        );
    }
    Ok(())
}

/// `rebalance`: execute one manual triple.
pub async fn run_one(
    client: &(impl NodeClient + Sync),
    config: &Config,
    from_channel_id: &str,
    to_channel_id: &str,
    amount_sats: i64,
) -> anyhow::Result<()> {
    if config.general.dry_run {
        info!(
            "rebalance: {amount_sats} sats {from_channel_id} -> {to_channel_id} (dry-run)"
        );
        return Ok(());
    }
    let report = executor::execute(client, from_channel_id, to_channel_id, amount_sats).await?;
    println!(
        "rebalanced {} sats from {} to {}{}",
        report.amount_sats,
        from_channel_id,
        to_channel_id,
        if report.via_fallback {
            " (via fallback route)"
        } else {
            ""
        },
    );
    Ok(())
}

/// `auto-rebalance`: run every priority-1 proposal sequentially. A failed
/// proposal never aborts the batch; the summary line reports
/// `successes/total`.
pub async fn run_auto(
    client: &(impl NodeClient + Sync),
    config: &Config,
    notifier: &Notifier,
) -> anyhow::Result<()> {
    let proposals = plan_from_node(client, config).await?;
    let urgent: Vec<RebalanceProposal> = proposals
        .into_iter()
        .filter(|p| p.priority == 1)
        .collect();

    if urgent.is_empty() {
        println!("no priority-1 proposals");
        return Ok(());
    }

    if config.general.dry_run {
        for p in &urgent {
            info!(
                "auto-rebalance: {} sats {} -> {} (dry-run)",
                p.amount_sats, p.from.channel_id, p.to.channel_id
            );
        }
        println!("0/{} (dry-run)", urgent.len());
        return Ok(());
    }

    let (successes, total) = execute_batch(client, &urgent, BATCH_PAUSE).await;
    println!("{successes}/{total}");
    notifier
        .send(&format!(
            "auto-rebalance finished: {successes}/{total} proposals succeeded"
        ))
        .await;
    Ok(())
}

async fn execute_batch(
    client: &(impl NodeClient + Sync),
    proposals: &[RebalanceProposal],
    pause: Duration,
) -> (usize, usize) {
    let total = proposals.len();
    let mut successes = 0usize;

    for (i, p) in proposals.iter().enumerate() {
        match executor::execute(client, &p.from.channel_id, &p.to.channel_id, p.amount_sats).await
        {
            Ok(report) => {
                successes += 1;
                info!(
                    "auto-rebalance: {} sats {} -> {} ok{}",
                    report.amount_sats,
                    p.from.channel_id,
                    p.to.channel_id,
                    if report.via_fallback { " (fallback)" } else { "" },
                );
            }
            Err(e) => error!(
                "auto-rebalance: {} -> {}: {e}",
                p.from.channel_id, p.to.channel_id
            ),
        }
        if i + 1 < total {
            tokio::time::sleep(pause).await;
        }
    }

    (successes, total)
}

/// `test-keysend`: probe the first active peer with a 1-sat push payment and
/// report the node's verdict verbatim. Never mutates policy.
pub async fn self_test(client: &(impl NodeClient + Sync)) -> anyhow::Result<()> {
    let channels = client.list_channels().await.context("listing channels")?;
    let peer = channels
        .iter()
        .find(|c| c.active)
        .map(|c| c.remote_pubkey.clone())
        .ok_or_else(|| anyhow::anyhow!("no active channels to probe"))?;

    let result = client
        .send_keysend(
            &peer,
            SELF_TEST_AMOUNT_SATS,
            SELF_TEST_FEE_LIMIT_SATS,
            SELF_TEST_TIMEOUT_SECS,
        )
        .await?;

    if result.succeeded() {
        println!("keysend probe to {peer}: SUCCEEDED");
    } else {
        println!(
            "keysend probe to {peer}: FAILED ({})",
            result.failure_reason.as_deref().unwrap_or("no reason given")
        );
    }
    Ok(())
}
