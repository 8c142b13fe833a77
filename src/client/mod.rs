pub mod lncli;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Channel, FeePolicy, ForwardingEvent};

/// Failure taxonomy of the node control binary facade.
///
/// Everything the rest of the engine sees from the node goes through these
/// four shapes; callers decide per-command whether a failure aborts the
/// command path or just the current batch item.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("node control binary unavailable: {0}")]
    BinaryUnavailable(String),
    #[error("`{command}` exited with status {code}: {stderr}")]
    NonzeroExit {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("could not parse `{command}` output: {detail} (raw: {excerpt})")]
    ParseFailure {
        command: String,
        detail: String,
        excerpt: String,
    },
    #[error("node reported failure: {reason}")]
    RemoteFailure { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct PendingSummary {
    pub pending_open: usize,
    pub pending_closing: usize,
    pub pending_force_closing: usize,
    pub waiting_close: usize,
}

impl PendingSummary {
    pub fn total(&self) -> usize {
        self.pending_open + self.pending_closing + self.pending_force_closing + self.waiting_close
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalletBalance {
    pub confirmed_sats: i64,
    pub unconfirmed_sats: i64,
    pub total_sats: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelLiquidity {
    pub local_sats: i64,
    pub remote_sats: i64,
    pub pending_open_local_sats: i64,
    pub pending_open_remote_sats: i64,
}

#[derive(Debug, Clone, Default)]
pub struct FeeReport {
    pub channel_fees: Vec<FeePolicy>,
    pub day_fee_sum_sats: i64,
    pub week_fee_sum_sats: i64,
    pub month_fee_sum_sats: i64,
}

/// One side's routing policy on a public channel edge.
#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    pub fee_base_msat: i64,
    pub fee_rate_ppm: i64,
    pub time_lock_delta: u32,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelEdge {
    pub node1_pub: String,
    pub node2_pub: String,
    pub node1_policy: Option<RoutingPolicy>,
    pub node2_policy: Option<RoutingPolicy>,
}

impl ChannelEdge {
    /// The policy advertised by `pubkey`, if it is one of the edge's endpoints.
    pub fn policy_of(&self, pubkey: &str) -> Option<&RoutingPolicy> {
        if self.node1_pub == pubkey {
            self.node1_policy.as_ref()
        } else if self.node2_pub == pubkey {
            self.node2_policy.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Invoice {
    pub payment_request: String,
    pub r_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PaymentResult {
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
}

impl PaymentResult {
    pub fn succeeded(&self) -> bool {
        self.status == PaymentStatus::Succeeded
    }
}

/// Trait abstracting the node control binary surface used by the engine.
///
/// This enables mock-based testing without a live node. The gateway is
/// stateless; the engine serializes mutating operations at the caller.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<Channel>, NodeError>;
    async fn pending_channels(&self) -> Result<PendingSummary, NodeError>;
    /// Number of invoices known to the node.
    async fn list_invoices(&self) -> Result<usize, NodeError>;
    async fn wallet_balance(&self) -> Result<WalletBalance, NodeError>;
    async fn channel_balance(&self) -> Result<ChannelLiquidity, NodeError>;
    async fn forwarding_history(
        &self,
        start_unix: i64,
        end_unix: Option<i64>,
    ) -> Result<Vec<ForwardingEvent>, NodeError>;
    async fn fee_report(&self) -> Result<FeeReport, NodeError>;
    async fn get_channel_info(&self, channel_id: &str) -> Result<ChannelEdge, NodeError>;
    async fn get_node_pubkey(&self) -> Result<String, NodeError>;
    /// Alias of `pubkey`, falling back to a pubkey prefix when the node
    /// does not know one. Never fails the calling command.
    async fn get_node_alias(&self, pubkey: &str) -> String;
    async fn update_channel_policy(
        &self,
        channel_point: &str,
        base_fee_msat: i64,
        fee_rate_ppm: i64,
        time_lock_delta: u32,
    ) -> Result<(), NodeError>;
    async fn add_invoice(
        &self,
        amount_msat: i64,
        memo: &str,
        expiry_secs: u32,
    ) -> Result<Invoice, NodeError>;
    async fn pay_invoice(
        &self,
        payment_request: &str,
        outgoing_chan_id: Option<&str>,
        fee_limit_sats: i64,
        timeout_secs: u32,
    ) -> Result<PaymentResult, NodeError>;
    async fn cancel_invoice(&self, r_hash: &str) -> Result<(), NodeError>;
    async fn send_keysend(
        &self,
        dest_pubkey: &str,
        amount_sats: i64,
        fee_limit_sats: i64,
        timeout_secs: u32,
    ) -> Result<PaymentResult, NodeError>;
}

/// Display fallback when a peer has no alias: the leading hex of its pubkey.
pub fn pubkey_prefix(pubkey: &str) -> String {
    pubkey.chars().take(10).collect()
}

/// Resolve aliases for every distinct peer in `channels`.
pub async fn resolve_aliases(
    client: &(impl NodeClient + Sync),
    channels: &[Channel],
) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for ch in channels {
        if !aliases.contains_key(&ch.remote_pubkey) {
            let alias = client.get_node_alias(&ch.remote_pubkey).await;
            aliases.insert(ch.remote_pubkey.clone(), alias);
        }
    }
    aliases
}

// ---------------------------------------------------------------------------
// Mock client for testing
// ---------------------------------------------------------------------------
