//! Circular rebalance execution: pay a self-issued invoice out of a chosen
//! channel so the funds return through another.
//!
//! The flow is an explicit state machine rather than nested conditionals so
//! that one invariant is easy to see and test: after the invoice is issued,
//! every non-success path cancels it exactly once. (A settled invoice is
//! never cancelled.)

use log::{info, warn};
use thiserror::Error;

use crate::client::{NodeClient, NodeError, PaymentStatus};

pub const PINNED_TIMEOUT_SECS: u32 = 60;
pub const UNPINNED_TIMEOUT_SECS: u32 = 30;
pub const INVOICE_EXPIRY_SECS: u32 = 300;
pub const MIN_FEE_LIMIT_SATS: i64 = 5;

/// Fee budget for the pinned attempt: 0.5% of the amount.
const FEE_LIMIT_RATE: f64 = 0.005;

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("rebalance amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("source and destination channel must differ")]
    SameChannel,
    #[error("destination channel {0} not found")]
    DestinationNotFound(String),
    #[error("could not issue rebalance invoice: {0}")]
    InvoiceIssueFailed(#[source] NodeError),
    #[error("both payment attempts failed: {last_reason}")]
    BothAttemptsFailed { last_reason: String },
    #[error(transparent)]
    Node(#[from] NodeError),
}

#[derive(Debug, Clone)]
pub struct RebalanceReport {
    pub amount_sats: i64,
    pub fee_limit_sats: i64,
    /// True when the unpinned fallback attempt carried the payment.
    pub via_fallback: bool,
}

/// Fee ceiling for a pinned attempt: 0.5% of the amount, floor of 5 sats.
pub fn fee_limit_for(amount_sats: i64) -> i64 {
    ((amount_sats as f64 * FEE_LIMIT_RATE).ceil() as i64).max(MIN_FEE_LIMIT_SATS)
}

enum Step {
    AttemptPinned,
    AttemptUnpinned { last_reason: String },
    Cleanup { last_reason: String },
}

/// Run one circular rebalance to completion.
pub async fn execute(
    client: &(impl NodeClient + Sync),
    from_channel_id: &str,
    to_channel_id: &str,
    amount_sats: i64,
) -> Result<RebalanceReport, RebalanceError> {
    if amount_sats <= 0 {
        return Err(RebalanceError::InvalidAmount(amount_sats));
    }
    if from_channel_id == to_channel_id {
        return Err(RebalanceError::SameChannel);
    }

    let channels = client.list_channels().await?;
    if !channels.iter().any(|c| c.channel_id == to_channel_id) {
        return Err(RebalanceError::DestinationNotFound(
            to_channel_id.to_string(),
        ));
    }

    let fee_limit = fee_limit_for(amount_sats);
    let invoice = client
        .add_invoice(
            amount_sats * 1000,
            &format!("Rebalance {amount_sats}"),
            INVOICE_EXPIRY_SECS,
        )
        .await
        .map_err(RebalanceError::InvoiceIssueFailed)?;

    let mut step = Step::AttemptPinned;
    loop {
        step = match step {
            Step::AttemptPinned => {
                info!(
                    "rebalance: {amount_sats} sats out of {from_channel_id} \
                     (fee limit {fee_limit} sats, {PINNED_TIMEOUT_SECS}s)"
                );
                match attempt(
                    client,
                    &invoice.payment_request,
                    Some(from_channel_id),
                    fee_limit,
                    PINNED_TIMEOUT_SECS,
                )
                .await
                {
                    Ok(()) => {
                        return Ok(RebalanceReport {
                            amount_sats,
                            fee_limit_sats: fee_limit,
                            via_fallback: false,
                        })
                    }
                    Err(last_reason) => Step::AttemptUnpinned { last_reason },
                }
            }
            Step::AttemptUnpinned { last_reason } => {
                info!(
                    "rebalance: pinned attempt failed ({last_reason}), retrying on any \
                     route (fee limit {} sats, {UNPINNED_TIMEOUT_SECS}s)",
                    fee_limit * 2
                );
                match attempt(
                    client,
                    &invoice.payment_request,
                    None,
                    fee_limit * 2,
                    UNPINNED_TIMEOUT_SECS,
                )
                .await
                {
                    Ok(()) => {
                        return Ok(RebalanceReport {
                            amount_sats,
                            fee_limit_sats: fee_limit * 2,
                            via_fallback: true,
                        })
                    }
                    Err(last_reason) => Step::Cleanup { last_reason },
                }
            }
            Step::Cleanup { last_reason } => {
                // The invoice also expires on its own after 300s, so a failed
                // cancel is only worth a warning.
                if let Err(e) = client.cancel_invoice(&invoice.r_hash).await {
                    warn!(
                        "rebalance: could not cancel invoice {}: {e}",
                        invoice.r_hash
                    );
                }
                return Err(RebalanceError::BothAttemptsFailed { last_reason });
            }
        };
    }
}

/// One payment attempt; the error carries the human-readable failure reason.
/// Gateway errors count as a failed attempt too: the control binary exits
/// nonzero on some payment failures, and the invoice still needs cleanup.
async fn attempt(
    client: &(impl NodeClient + Sync),
    payment_request: &str,
    outgoing_chan_id: Option<&str>,
    fee_limit_sats: i64,
    timeout_secs: u32,
) -> Result<(), String> {
    match client
        .pay_invoice(payment_request, outgoing_chan_id, fee_limit_sats, timeout_secs)
        .await
    {
        Ok(result) if result.status == PaymentStatus::Succeeded => Ok(()),
        Ok(result) => Err(result
            .failure_reason
            .unwrap_or_else(|| "payment failed".to_string())),
        Err(e) => Err(e.to_string()),
    }
}
