//! Production gateway: shells out to the node's command-line client and
//! parses its JSON stdout into typed responses.
//!
//! The binary takes a positional subcommand plus `--key value` flags and
//! prints newline-terminated JSON; a nonzero exit indicates failure. Payment
//! subcommands stream progress objects, so those are parsed from the LAST
//! JSON document on stdout.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use tokio::process::Command;

use super::{
    ChannelEdge, ChannelLiquidity, FeeReport, Invoice, NodeClient, NodeError, PaymentResult,
    PaymentStatus, PendingSummary, RoutingPolicy, WalletBalance,
};
use crate::config::NodeConfig;
use crate::model::{Channel, FeePolicy, ForwardingEvent};

/// Page size for forwarding history pagination.
const FWDING_PAGE_SIZE: u32 = 5000;

pub struct LncliClient {
    binary: PathBuf,
    base_args: Vec<String>,
}

impl LncliClient {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            binary: config.cli_path.clone(),
            base_args: config.extra_args.clone(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, NodeError> {
        let command = args.first().cloned().unwrap_or_default();
        debug!("invoking {} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary)
            .args(&self.base_args)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    NodeError::BinaryUnavailable(format!("{}: {}", self.binary.display(), e))
                }
                _ => NodeError::BinaryUnavailable(e.to_string()),
            })?;

        if !output.status.success() {
            return Err(NodeError::NonzeroExit {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    async fn call<T: DeserializeOwned>(&self, args: &[String]) -> Result<T, NodeError> {
        let command = args.first().cloned().unwrap_or_default();
        let raw = self.run(args).await?;
        parse_json(&command, &raw)
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parse_json<T: DeserializeOwned>(command: &str, raw: &[u8]) -> Result<T, NodeError> {
    serde_json::from_slice(raw).map_err(|e| NodeError::ParseFailure {
        command: command.to_string(),
        detail: e.to_string(),
        excerpt: excerpt(raw),
    })
}

/// Parse the last JSON document in a possibly-streamed stdout capture.
fn parse_last_json<T: DeserializeOwned>(command: &str, raw: &[u8]) -> Result<T, NodeError> {
    let mut last: Option<serde_json::Value> = None;
    let mut stream = serde_json::Deserializer::from_slice(raw).into_iter::<serde_json::Value>();
    while let Some(Ok(doc)) = stream.next() {
        last = Some(doc);
    }
    let doc = last.ok_or_else(|| NodeError::ParseFailure {
        command: command.to_string(),
        detail: "no JSON documents on stdout".to_string(),
        excerpt: excerpt(raw),
    })?;
    serde_json::from_value(doc).map_err(|e| NodeError::ParseFailure {
        command: command.to_string(),
        detail: e.to_string(),
        excerpt: excerpt(raw),
    })
}

fn excerpt(raw: &[u8]) -> String {
    const MAX_CHARS: usize = 200;
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.chars().count() > MAX_CHARS {
        let mut cut: String = trimmed.chars().take(MAX_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        trimmed.to_string()
    }
}

fn payment_result(payment: wire::Payment) -> PaymentResult {
    if payment.status == "SUCCEEDED" {
        return PaymentResult {
            status: PaymentStatus::Succeeded,
            failure_reason: None,
        };
    }
    // FAILED, or a non-terminal status left behind when the timeout hit.
    let reason = match payment.failure_reason.as_str() {
        "" | "FAILURE_REASON_NONE" => format!("terminal status {}", payment.status),
        other => other.to_string(),
    };
    PaymentResult {
        status: PaymentStatus::Failed,
        failure_reason: Some(reason),
    }
}

#[async_trait]
impl NodeClient for LncliClient {
    async fn list_channels(&self) -> Result<Vec<Channel>, NodeError> {
        let resp: wire::ListChannels = self.call(&args(&["listchannels"])).await?;
        Ok(resp
            .channels
            .into_iter()
            .map(|ch| Channel {
                channel_id: ch.chan_id,
                remote_pubkey: ch.remote_pubkey,
                capacity_sats: ch.capacity,
                local_balance_sats: ch.local_balance,
                remote_balance_sats: ch.remote_balance,
                active: ch.active,
                private: ch.private,
                channel_point: ch.channel_point,
            })
            .collect())
    }

    async fn pending_channels(&self) -> Result<PendingSummary, NodeError> {
        let resp: wire::PendingChannels = self.call(&args(&["pendingchannels"])).await?;
        Ok(PendingSummary {
            pending_open: resp.pending_open_channels.len(),
            pending_closing: resp.pending_closing_channels.len(),
            pending_force_closing: resp.pending_force_closing_channels.len(),
            waiting_close: resp.waiting_close_channels.len(),
        })
    }

    async fn list_invoices(&self) -> Result<usize, NodeError> {
        let resp: wire::ListInvoices = self.call(&args(&["listinvoices"])).await?;
        Ok(resp.invoices.len())
    }

    async fn wallet_balance(&self) -> Result<WalletBalance, NodeError> {
        let resp: wire::WalletBalance = self.call(&args(&["walletbalance"])).await?;
        Ok(WalletBalance {
            confirmed_sats: resp.confirmed_balance,
            unconfirmed_sats: resp.unconfirmed_balance,
            total_sats: resp.total_balance,
        })
    }

    async fn channel_balance(&self) -> Result<ChannelLiquidity, NodeError> {
        let resp: wire::ChannelBalance = self.call(&args(&["channelbalance"])).await?;
        Ok(ChannelLiquidity {
            local_sats: resp.local_balance.sat,
            remote_sats: resp.remote_balance.sat,
            pending_open_local_sats: resp.pending_open_local_balance.sat,
            pending_open_remote_sats: resp.pending_open_remote_balance.sat,
        })
    }

    async fn forwarding_history(
        &self,
        start_unix: i64,
        end_unix: Option<i64>,
    ) -> Result<Vec<ForwardingEvent>, NodeError> {
        let mut events = Vec::new();
        let mut index_offset: i64 = 0;

        loop {
            let mut call_args = args(&["fwdinghistory", "--start_time"]);
            call_args.push(start_unix.to_string());
            if let Some(end) = end_unix {
                call_args.push("--end_time".to_string());
                call_args.push(end.to_string());
            }
            call_args.push("--max_events".to_string());
            call_args.push(FWDING_PAGE_SIZE.to_string());
            call_args.push("--index_offset".to_string());
            call_args.push(index_offset.to_string());

            let resp: wire::FwdingHistory = self.call(&call_args).await?;
            let page_len = resp.forwarding_events.len();

            events.extend(resp.forwarding_events.into_iter().map(|f| ForwardingEvent {
                timestamp_unix: f.timestamp,
                chan_id_in: f.chan_id_in,
                chan_id_out: f.chan_id_out,
                amt_in_sats: f.amt_in,
                amt_out_sats: f.amt_out,
                fee_msat: f.fee_msat,
            }));

            if page_len < FWDING_PAGE_SIZE as usize {
                break;
            }
            index_offset = resp.last_offset_index;
        }

        Ok(events)
    }

    async fn fee_report(&self) -> Result<FeeReport, NodeError> {
        let resp: wire::FeeReport = self.call(&args(&["feereport"])).await?;
        Ok(FeeReport {
            channel_fees: resp
                .channel_fees
                .into_iter()
                .map(|f| FeePolicy {
                    channel_id: f.chan_id,
                    channel_point: f.channel_point,
                    base_fee_msat: f.base_fee_msat,
                    fee_rate_ppm: f.fee_per_mil,
                    // feereport does not expose the time lock delta; callers
                    // needing it resolve the edge policy instead.
                    time_lock_delta: 0,
                })
                .collect(),
            day_fee_sum_sats: resp.day_fee_sum,
            week_fee_sum_sats: resp.week_fee_sum,
            month_fee_sum_sats: resp.month_fee_sum,
        })
    }

    async fn get_channel_info(&self, channel_id: &str) -> Result<ChannelEdge, NodeError> {
        let resp: wire::ChanInfo = self
            .call(&args(&["getchaninfo", channel_id]))
            .await?;
        Ok(ChannelEdge {
            node1_pub: resp.node1_pub,
            node2_pub: resp.node2_pub,
            node1_policy: resp.node1_policy.map(RoutingPolicy::from),
            node2_policy: resp.node2_policy.map(RoutingPolicy::from),
        })
    }

    async fn get_node_pubkey(&self) -> Result<String, NodeError> {
        let resp: wire::GetInfo = self.call(&args(&["getinfo"])).await?;
        Ok(resp.identity_pubkey)
    }

    async fn get_node_alias(&self, pubkey: &str) -> String {
        let result: Result<wire::NodeInfo, NodeError> =
            self.call(&args(&["getnodeinfo", pubkey])).await;
        match result {
            Ok(info) if !info.node.alias.trim().is_empty() => info.node.alias,
            Ok(_) => super::pubkey_prefix(pubkey),
            Err(e) => {
                debug!("alias lookup for {pubkey} failed: {e}");
                super::pubkey_prefix(pubkey)
            }
        }
    }

    async fn update_channel_policy(
        &self,
        channel_point: &str,
        base_fee_msat: i64,
        fee_rate_ppm: i64,
        time_lock_delta: u32,
    ) -> Result<(), NodeError> {
        // --fee_rate_ppm exclusively; the float --fee_rate flag loses
        // precision below 1000 ppm.
        let call_args = args(&[
            "updatechanpolicy",
            "--base_fee_msat",
            &base_fee_msat.to_string(),
            "--fee_rate_ppm",
            &fee_rate_ppm.to_string(),
            "--time_lock_delta",
            &time_lock_delta.to_string(),
            "--chan_point",
            channel_point,
        ]);
        let resp: wire::PolicyUpdate = self.call(&call_args).await?;
        if let Some(failed) = resp.failed_updates.first() {
            return Err(NodeError::RemoteFailure {
                reason: format!("policy update rejected: {failed}"),
            });
        }
        Ok(())
    }

    async fn add_invoice(
        &self,
        amount_msat: i64,
        memo: &str,
        expiry_secs: u32,
    ) -> Result<Invoice, NodeError> {
        let call_args = args(&[
            "addinvoice",
            "--amt_msat",
            &amount_msat.to_string(),
            "--memo",
            memo,
            "--expiry",
            &expiry_secs.to_string(),
        ]);
        let resp: wire::AddInvoice = self.call(&call_args).await?;
        Ok(Invoice {
            payment_request: resp.payment_request,
            r_hash: resp.r_hash,
        })
    }

    async fn pay_invoice(
        &self,
        payment_request: &str,
        outgoing_chan_id: Option<&str>,
        fee_limit_sats: i64,
        timeout_secs: u32,
    ) -> Result<PaymentResult, NodeError> {
        let mut call_args = args(&["payinvoice", "--pay_req", payment_request]);
        if let Some(chan_id) = outgoing_chan_id {
            call_args.push("--outgoing_chan_id".to_string());
            call_args.push(chan_id.to_string());
        }
        call_args.extend(args(&[
            "--fee_limit",
            &fee_limit_sats.to_string(),
            "--timeout",
            &format!("{timeout_secs}s"),
            "--force",
            "--json",
        ]));

        let raw = self.run(&call_args).await?;
        let payment: wire::Payment = parse_last_json("payinvoice", &raw)?;
        Ok(payment_result(payment))
    }

    async fn cancel_invoice(&self, r_hash: &str) -> Result<(), NodeError> {
        self.run(&args(&["cancelinvoice", "--rhash", r_hash])).await?;
        Ok(())
    }

    async fn send_keysend(
        &self,
        dest_pubkey: &str,
        amount_sats: i64,
        fee_limit_sats: i64,
        timeout_secs: u32,
    ) -> Result<PaymentResult, NodeError> {
        let call_args = args(&[
            "sendpayment",
            "--dest",
            dest_pubkey,
            "--amt",
            &amount_sats.to_string(),
            "--keysend",
            "--fee_limit",
            &fee_limit_sats.to_string(),
            "--timeout",
            &format!("{timeout_secs}s"),
            "--json",
        ]);
        let raw = self.run(&call_args).await?;
        let payment: wire::Payment = parse_last_json("sendpayment", &raw)?;
        if payment.status != "SUCCEEDED" {
            warn!("keysend probe did not succeed: {}", payment.status);
        }
        Ok(payment_result(payment))
    }
}

impl From<wire::Policy> for RoutingPolicy {
    fn from(p: wire::Policy) -> Self {
        RoutingPolicy {
            fee_base_msat: p.fee_base_msat,
            fee_rate_ppm: p.fee_rate_milli_msat,
            time_lock_delta: p.time_lock_delta,
            disabled: p.disabled,
        }
    }
}

/// Serde shapes of the control binary's JSON output. The binary encodes
/// 64-bit integers as JSON strings, hence the field-level deserializer.
mod wire {
    use serde::{Deserialize, Deserializer};

    pub fn int_from_str<'de, D>(d: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }
        match Raw::deserialize(d)? {
            Raw::Int(v) => Ok(v),
            Raw::Str(s) => s.parse::<i64>().map_err(serde::de::Error::custom),
        }
    }

    #[derive(Deserialize, Default)]
    pub struct Amount {
        #[serde(default, deserialize_with = "int_from_str")]
        pub sat: i64,
    }

    #[derive(Deserialize, Default)]
    pub struct ListChannels {
        #[serde(default)]
        pub channels: Vec<ChannelEntry>,
    }

    #[derive(Deserialize, Default)]
    pub struct ChannelEntry {
        #[serde(default)]
        pub active: bool,
        #[serde(default)]
        pub remote_pubkey: String,
        #[serde(default)]
        pub channel_point: String,
        #[serde(default)]
        pub chan_id: String,
        #[serde(default, deserialize_with = "int_from_str")]
        pub capacity: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub local_balance: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub remote_balance: i64,
        #[serde(default)]
        pub private: bool,
    }

    #[derive(Deserialize, Default)]
    pub struct PendingChannels {
        #[serde(default)]
        pub pending_open_channels: Vec<serde_json::Value>,
        #[serde(default)]
        pub pending_closing_channels: Vec<serde_json::Value>,
        #[serde(default)]
        pub pending_force_closing_channels: Vec<serde_json::Value>,
        #[serde(default)]
        pub waiting_close_channels: Vec<serde_json::Value>,
    }

    #[derive(Deserialize, Default)]
    pub struct ListInvoices {
        #[serde(default)]
        pub invoices: Vec<serde_json::Value>,
    }

    #[derive(Deserialize, Default)]
    pub struct WalletBalance {
        #[serde(default, deserialize_with = "int_from_str")]
        pub confirmed_balance: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub unconfirmed_balance: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub total_balance: i64,
    }

    #[derive(Deserialize, Default)]
    pub struct ChannelBalance {
        #[serde(default)]
        pub local_balance: Amount,
        #[serde(default)]
        pub remote_balance: Amount,
        #[serde(default)]
        pub pending_open_local_balance: Amount,
        #[serde(default)]
        pub pending_open_remote_balance: Amount,
    }

    #[derive(Deserialize, Default)]
    pub struct FwdingHistory {
        #[serde(default)]
        pub forwarding_events: Vec<ForwardEntry>,
        #[serde(default, deserialize_with = "int_from_str")]
        pub last_offset_index: i64,
    }

    #[derive(Deserialize, Default)]
    pub struct ForwardEntry {
        #[serde(default, deserialize_with = "int_from_str")]
        pub timestamp: i64,
        #[serde(default)]
        pub chan_id_in: String,
        #[serde(default)]
        pub chan_id_out: String,
        #[serde(default, deserialize_with = "int_from_str")]
        pub amt_in: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub amt_out: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub fee_msat: i64,
    }

    #[derive(Deserialize, Default)]
    pub struct FeeReport {
        #[serde(default)]
        pub channel_fees: Vec<ChannelFee>,
        #[serde(default, deserialize_with = "int_from_str")]
        pub day_fee_sum: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub week_fee_sum: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub month_fee_sum: i64,
    }

    #[derive(Deserialize, Default)]
    pub struct ChannelFee {
        #[serde(default)]
        pub chan_id: String,
        #[serde(default)]
        pub channel_point: String,
        #[serde(default, deserialize_with = "int_from_str")]
        pub base_fee_msat: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub fee_per_mil: i64,
    }

    #[derive(Deserialize, Default)]
    pub struct ChanInfo {
        #[serde(default)]
        pub node1_pub: String,
        #[serde(default)]
        pub node2_pub: String,
        #[serde(default)]
        pub node1_policy: Option<Policy>,
        #[serde(default)]
        pub node2_policy: Option<Policy>,
    }

    #[derive(Deserialize, Default)]
    pub struct Policy {
        #[serde(default, deserialize_with = "int_from_str")]
        pub fee_base_msat: i64,
        #[serde(default, deserialize_with = "int_from_str")]
        pub fee_rate_milli_msat: i64,
        #[serde(default)]
        pub time_lock_delta: u32,
        #[serde(default)]
        pub disabled: bool,
    }

    #[derive(Deserialize, Default)]
    pub struct GetInfo {
        #[serde(default)]
        pub identity_pubkey: String,
    }

    #[derive(Deserialize, Default)]
    pub struct NodeInfo {
        #[serde(default)]
        pub node: NodeInfoNode,
    }

    #[derive(Deserialize, Default)]
    pub struct NodeInfoNode {
        #[serde(default)]
        pub alias: String,
    }

    #[derive(Deserialize, Default)]
    pub struct PolicyUpdate {
        #[serde(default)]
        pub failed_updates: Vec<serde_json::Value>,
    }

    #[derive(Deserialize, Default)]
    pub struct AddInvoice {
        #[serde(default)]
        pub r_hash: String,
        #[serde(default)]
        pub payment_request: String,
    }

    #[derive(Deserialize, Default, Debug)]
    pub struct Payment {
        #[serde(default)]
        pub status: String,
        #[serde(default)]
        pub failure_reason: String,
    }
}
