//! Contact sequencer: sends one claimed batch in message order.
//!
//! Every item ends in exactly one terminal state. A delivery failure marks
//! that item failed and the batch moves on; there is no automatic retry. The
//! per-message delay is applied between items, never after the last one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use super::{pause, DispatchDeps};
use crate::channel::{ChannelAdapter, OutboundMessage, SendReceipt, TransportError};
use crate::error::DispatchError;
use crate::model::{Campaign, ClaimedBatch, DispatchItem, ItemStatus};
use crate::payload::{filename_from_url, MediaKind, Payload};
use crate::store::StoreError;
use crate::template;

/// Error text stored when the gateway declines without a reason.
const DEFAULT_FAILURE_REASON: &str = "delivery failed";

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Items marked sent.
    pub sent: u64,
    /// Items marked failed.
    pub failed: u64,
    /// Whether a stop signal cut the batch short. Unsent items stay in
    /// processing until the revival sweep returns them.
    pub interrupted: bool,
}

/// Turn a decoded payload into a channel message, rendering text templates
/// against `vars`.
pub fn build_message(payload: &Payload, vars: &HashMap<String, String>) -> OutboundMessage {
    match payload {
        Payload::Text { text } => OutboundMessage::Text {
            body: template::render(text, vars),
        },
        Payload::Image { url, caption } => media(MediaKind::Image, url, caption.as_deref()),
        Payload::Video { url, caption } => media(MediaKind::Video, url, caption.as_deref()),
        Payload::Document { url, caption } => media(MediaKind::Document, url, caption.as_deref()),
        Payload::Audio { url } => OutboundMessage::Voice {
            location: url.clone(),
        },
    }
}

fn media(kind: MediaKind, url: &str, caption: Option<&str>) -> OutboundMessage {
    OutboundMessage::Media {
        media: kind,
        location: url.to_owned(),
        filename: filename_from_url(url, kind.default_filename()),
        caption: caption.unwrap_or_default().to_owned(),
    }
}

/// Send every item of `batch` in order and record each outcome.
///
/// # Errors
///
/// Returns a [`StoreError`] if an outcome cannot be written. Items not yet
/// recorded stay in processing and are revived after the TTL.
pub async fn run_batch(
    batch: &ClaimedBatch,
    campaign: &Campaign,
    deps: &DispatchDeps,
    default_delay: Duration,
    stop: &mut watch::Receiver<bool>,
) -> Result<BatchReport, StoreError> {
    let vars = batch
        .profile
        .as_ref()
        .map(|p| p.template_vars())
        .unwrap_or_default();
    let delay = campaign.message_delay(default_delay);

    info!(
        campaign_id = %batch.campaign_id,
        contact = %batch.contact,
        items = batch.len(),
        "processing contact batch"
    );

    let mut report = BatchReport::default();
    let mut items = batch.items.iter().peekable();

    while let Some(item) = items.next() {
        match deliver(item, &vars, deps.channel.as_ref()).await {
            Ok(receipt) => {
                record(deps, item, ItemStatus::Sent, None).await?;
                report.sent = report.sent.saturating_add(1);
                info!(
                    item_id = %item.id,
                    contact = %item.contact,
                    message_id = receipt.id.as_deref().unwrap_or_default(),
                    "item sent"
                );
            }
            Err(e) => {
                let reason = e.to_string();
                record(deps, item, ItemStatus::Failed, Some(&reason)).await?;
                report.failed = report.failed.saturating_add(1);
                warn!(
                    item_id = %item.id,
                    contact = %item.contact,
                    kind = %e.kind(),
                    error = %reason,
                    "item failed"
                );
            }
        }

        if items.peek().is_some() && !pause(delay, stop).await {
            report.interrupted = true;
            warn!(
                campaign_id = %batch.campaign_id,
                contact = %batch.contact,
                "stop requested mid-batch, leaving remaining items to revival"
            );
            break;
        }
    }

    Ok(report)
}

/// Write an item's outcome. An item revived while this batch was still
/// running belongs to whoever claims it next, so its row is left alone.
async fn record(
    deps: &DispatchDeps,
    item: &DispatchItem,
    status: ItemStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    let written = deps.store.update_item_status(&item.id, status, error).await?;
    if !written {
        warn!(
            item_id = %item.id,
            campaign_id = %item.campaign_id,
            status = status.as_str(),
            "item left processing before its outcome was recorded, skipping write"
        );
    }
    Ok(())
}

/// Make exactly one delivery attempt for `item`.
async fn deliver(
    item: &DispatchItem,
    vars: &HashMap<String, String>,
    channel: &dyn ChannelAdapter,
) -> Result<SendReceipt, DispatchError> {
    let payload = item.payload()?;
    let message = build_message(&payload, vars);

    let receipt = channel
        .send_message(&item.session_name, &item.contact, &message)
        .await?;

    if !receipt.success {
        let reason = receipt
            .message
            .clone()
            .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_owned());
        return Err(TransportError::Rejected(reason).into());
    }

    Ok(receipt)
}
