//! Pure rebalance planning: pair channels holding excess local balance with
//! channels short of it, size the shift, estimate its cost, and rank.

use crate::scoring::ChannelScore;

/// At most this many proposals are emitted per pass.
pub const MAX_PROPOSALS: usize = 10;

/// Cost model for a circular self-payment: ~0.1% of the amount plus a flat
/// 5 sats of base fees along the route.
const EST_FEE_RATE: f64 = 0.001;
const EST_FEE_BASE_SATS: i64 = 5;

#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    pub max_fee_rate_pct: f64,
    pub max_fee_abs_sats: i64,
    pub min_amount_sats: i64,
    pub max_amount_sats: i64,
    pub target_ratio: f64,
    pub tolerance_ratio: f64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            max_fee_rate_pct: 0.5,
            max_fee_abs_sats: 1000,
            min_amount_sats: 10_000,
            max_amount_sats: 1_000_000,
            target_ratio: 0.5,
            tolerance_ratio: 0.1,
        }
    }
}

/// One side of a proposal, detached from the scored set for display.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub channel_id: String,
    pub alias: String,
    pub local_ratio: f64,
}

impl Endpoint {
    fn from_score(score: &ChannelScore) -> Self {
        Self {
            channel_id: score.channel.channel_id.clone(),
            alias: score.alias.clone(),
            local_ratio: score.local_ratio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebalanceProposal {
    /// Channel paying out (excess local balance).
    pub from: Endpoint,
    /// Channel receiving (short of local balance).
    pub to: Endpoint,
    pub amount_sats: i64,
    pub estimated_fee_sats: i64,
    pub fee_rate_pct: f64,
    pub reason: String,
    /// 1 (urgent) to 3 (opportunistic).
    pub priority: u8,
}

/// Pair every source with every sink and keep the pairs worth paying for.
///
/// Sorted by priority ascending, then amount descending; truncated to
/// [`MAX_PROPOSALS`].
pub fn plan(scores: &[ChannelScore], cfg: &RebalanceConfig) -> Vec<RebalanceProposal> {
    let sources: Vec<&ChannelScore> = scores.iter().filter(|s| s.needs_inbound).collect();
    let sinks: Vec<&ChannelScore> = scores.iter().filter(|s| s.needs_outbound).collect();

    let mut proposals = Vec::new();
    for from in &sources {
        for to in &sinks {
            if from.channel.channel_id == to.channel.channel_id {
                continue;
            }

            let from_target = (from.channel.capacity_sats as f64 * cfg.target_ratio).floor() as i64;
            let to_target = (to.channel.capacity_sats as f64 * cfg.target_ratio).floor() as i64;
            let from_excess = from.channel.local_balance_sats - from_target;
            let to_deficit = to_target - to.channel.local_balance_sats;

            let amount = from_excess.min(to_deficit).min(cfg.max_amount_sats);
            if amount < cfg.min_amount_sats {
                continue;
            }

            let estimated_fee =
                (amount as f64 * EST_FEE_RATE).ceil() as i64 + EST_FEE_BASE_SATS;
            let fee_rate_pct = 100.0 * estimated_fee as f64 / amount as f64;
            if fee_rate_pct > cfg.max_fee_rate_pct || estimated_fee > cfg.max_fee_abs_sats {
                continue;
            }

            let combined = from.overall_score + to.overall_score;
            let priority = if combined > 150.0 {
                1
            } else if combined > 75.0 {
                2
            } else {
                3
            };

            proposals.push(RebalanceProposal {
                reason: format!(
                    "{} is {:.0}% local, {} is {:.0}% local",
                    from.alias,
                    from.local_ratio * 100.0,
                    to.alias,
                    to.local_ratio * 100.0,
                ),
                from: Endpoint::from_score(from),
                to: Endpoint::from_score(to),
                amount_sats: amount,
                estimated_fee_sats: estimated_fee,
                fee_rate_pct,
                priority,
            });
        }
    }

    proposals.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.amount_sats.cmp(&a.amount_sats))
    });
    proposals.truncate(MAX_PROPOSALS);
    proposals
}
