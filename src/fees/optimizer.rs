//! Fee recommendation rules: a base PPM per liquidity category, then ordered
//! compounding adjustments from the channel's 30-day forwarding record.

use crate::model::ForwardingEvent;
use crate::scoring::Category;

/// Channels whose recommendation never leaves this band.
pub const MIN_VIABLE_PPM: i64 = 10;
pub const MAX_REASONABLE_PPM: i64 = 1000;

/// Sentinel for "never forwarded in the window".
pub const NO_FORWARD_DAYS: i64 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// 30-day per-channel forwarding metrics feeding the adjustment rules.
#[derive(Debug, Clone)]
pub struct ForwardStats {
    pub count: u64,
    pub earned_sats: i64,
    pub days_since_last: i64,
}

impl ForwardStats {
    pub fn from_events(events: &[ForwardingEvent], channel_id: &str, now_unix: i64) -> Self {
        let mut count = 0u64;
        let mut earned_msat = 0i64;
        let mut last_seen: Option<i64> = None;
        for ev in events.iter().filter(|e| e.touches(channel_id)) {
            count += 1;
            earned_msat += ev.fee_msat;
            last_seen = Some(last_seen.map_or(ev.timestamp_unix, |t| t.max(ev.timestamp_unix)));
        }
        let days_since_last = match last_seen {
            Some(ts) => ((now_unix - ts) / 86_400).max(0),
            None => NO_FORWARD_DAYS,
        };
        Self {
            count,
            earned_sats: earned_msat / 1000,
            days_since_last,
        }
    }
}

/// Tunable base rates; defaults match the categories' intent (cheap where we
/// push liquidity out, expensive where it is scarce).
#[derive(Debug, Clone)]
pub struct FeeRules {
    pub low_liquidity_ppm: i64,
    pub inbound_ppm: i64,
    pub balanced_ppm: i64,
    pub outbound_ppm: i64,
    pub base_fee_msat: i64,
    pub min_ppm: i64,
    pub max_ppm: i64,
}

impl Default for FeeRules {
    fn default() -> Self {
        Self {
            low_liquidity_ppm: 500,
            inbound_ppm: 300,
            balanced_ppm: 100,
            outbound_ppm: 25,
            base_fee_msat: 1000,
            min_ppm: MIN_VIABLE_PPM,
            max_ppm: MAX_REASONABLE_PPM,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeeRecommendation {
    pub ppm: i64,
    pub base_fee_msat: i64,
    pub priority: Priority,
    pub reasoning: String,
}

/// Derive the recommended policy for one channel.
///
/// Adjustments compound in a fixed order: recency first, then earnings, then
/// the clamp.
pub fn recommend(category: Category, stats: &ForwardStats, rules: &FeeRules) -> FeeRecommendation {
    let (base_ppm, base_reason) = match category {
        Category::LowLiquidity => (rules.low_liquidity_ppm, "small channel, price for scarcity"),
        Category::HighCapInbound => (rules.inbound_ppm, "inbound-heavy, discourage outflow"),
        Category::Balanced => (rules.balanced_ppm, "balanced"),
        Category::HighCapOutbound => (rules.outbound_ppm, "outbound-heavy, attract flow"),
    };

    let mut ppm = base_ppm as f64;
    let mut priority = Priority::Medium;
    let mut reasons = vec![base_reason.to_string()];

    if stats.days_since_last <= 7 && stats.count > 0 {
        ppm *= 0.8;
        priority = Priority::High;
        reasons.push("recent activity".to_string());
    } else if stats.days_since_last > 30 {
        ppm *= 1.5;
        priority = Priority::Low;
        reasons.push("inactivity".to_string());
    }

    if stats.earned_sats as f64 / 30.0 > 10.0 {
        ppm *= 1.25;
        priority = Priority::High;
        reasons.push("high earnings".to_string());
    }

    FeeRecommendation {
        ppm: (ppm.round() as i64).clamp(rules.min_ppm, rules.max_ppm),
        base_fee_msat: rules.base_fee_msat,
        priority,
        reasoning: reasons.join(", "),
    }
}
