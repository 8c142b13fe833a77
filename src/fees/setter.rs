use log::{debug, info};

use crate::client::{NodeClient, NodeError};
use crate::fees::optimizer::Priority;
use crate::fees::ChannelAnalysis;

/// Minimum PPM delta before a recommendation is worth a policy update.
pub const MIN_PPM_DELTA: i64 = 10;

/// Whether an analysis should be pushed to the node: the recommendation has
/// to move the rate meaningfully and carry at least medium priority.
pub fn due_for_update(analysis: &ChannelAnalysis) -> bool {
    let current = analysis.current_ppm.unwrap_or(0);
    (analysis.recommended.ppm - current).abs() >= MIN_PPM_DELTA
        && analysis.recommended.priority != Priority::Low
}

/// Push one recommended policy to the node.
pub async fn apply_one(
    client: &(impl NodeClient + Sync),
    analysis: &ChannelAnalysis,
    time_lock_delta: u32,
    dry_run: bool,
) -> Result<(), NodeError> {
    let ch = &analysis.score.channel;
    info!(
        "fee setter: {} ({}) ppm {} -> {}, base {} -> {} msat [{}]",
        ch.channel_id,
        analysis.score.alias,
        analysis
            .current_ppm
            .map_or_else(|| "?".to_string(), |p| p.to_string()),
        analysis.recommended.ppm,
        analysis
            .current_base_fee_msat
            .map_or_else(|| "?".to_string(), |b| b.to_string()),
        analysis.recommended.base_fee_msat,
        analysis.recommended.reasoning,
    );

    if dry_run {
        debug!("  (dry-run: not applying)");
        return Ok(());
    }

    client
        .update_channel_policy(
            &ch.channel_point,
            analysis.recommended.base_fee_msat,
            analysis.recommended.ppm,
            time_lock_delta,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::optimizer::FeeRecommendation;
    use crate::model::Channel;
    use crate::scoring::{Category, ChannelScore};

    fn analysis(current_ppm: Option<i64>, rec_ppm: i64, priority: Priority) -> ChannelAnalysis {
        let channel = Channel {
            channel_id: "C1".to_string(),
            capacity_sats: 1_000_000,
            local_balance_sats: 500_000,
            remote_balance_sats: 500_000,
            active: true,
            channel_point: "txid:0".to_string(),
            ..Default::default()
        };
        ChannelAnalysis {
            score: ChannelScore {
                channel,
                alias: "peer".to_string(),
                local_ratio: 0.5,
                capacity_share: 100.0,
                activity_score: 0.0,
                imbalance_score: 0.0,
                overall_score: 30.0,
                needs_inbound: false,
                needs_outbound: false,
            },
            category: Category::Balanced,
            current_ppm,
            current_base_fee_msat: Some(1000),
            recommended: FeeRecommendation {
                ppm: rec_ppm,
                base_fee_msat: 1000,
                priority,
                reasoning: "balanced".to_string(),
            },
        }
    }

    #[test]
    fn small_delta_is_skipped() {
        assert!(!due_for_update(&analysis(Some(100), 105, Priority::Medium)));
        assert!(due_for_update(&analysis(Some(100), 110, Priority::Medium)));
    }

    #[test]
    fn low_priority_is_skipped_regardless_of_delta() {
        assert!(!due_for_update(&analysis(Some(100), 400, Priority::Low)));
    }

    #[test]
    fn unknown_current_policy_counts_as_zero() {
        assert!(due_for_update(&analysis(None, 100, Priority::Medium)));
    }
}
