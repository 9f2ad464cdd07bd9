//! Domain types shared by the store, the channel adapter and the orchestrator.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::{Payload, PayloadError};
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Whether a campaign may currently claim work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Claims proceed normally.
    Active,
    /// No claims are made until the status flips back to active.
    Paused,
}

impl CampaignStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(StoreError::InvalidEnum {
                field: "campaigns.status",
                value: other.to_owned(),
            }),
        }
    }
}

/// Lifecycle of a queued item.
///
/// `Pending -> Processing` happens only on claim, `Processing -> Sent | Failed`
/// only in the sequencer, and `Processing -> Pending` only in the revival sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker and in flight.
    Processing,
    /// Delivered by the channel adapter.
    Sent,
    /// Delivery failed; never retried automatically.
    Failed,
}

impl ItemStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidEnum {
                field: "dispatch_items.status",
                value: other.to_owned(),
            }),
        }
    }

    /// Whether the item has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Campaign pacing configuration, as read by a campaign loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign identifier.
    pub id: String,
    /// Milliseconds between two messages to the same contact.
    pub delay_ms: Option<u64>,
    /// Milliseconds between two contacts.
    pub contact_delay_ms: Option<u64>,
    /// Pause switch, owned by the authoring side.
    pub status: CampaignStatus,
}

impl Campaign {
    /// Delay between messages of one batch. Unset or zero falls back to `default`.
    pub fn message_delay(&self, default: Duration) -> Duration {
        match self.delay_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => default,
        }
    }

    /// Delay between two contact batches. Unset means no delay.
    pub fn contact_delay(&self) -> Duration {
        Duration::from_millis(self.contact_delay_ms.unwrap_or(0))
    }

    /// Whether the campaign is paused.
    pub fn is_paused(&self) -> bool {
        self.status == CampaignStatus::Paused
    }
}

/// One queued outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchItem {
    /// Item identifier.
    pub id: String,
    /// Owning campaign.
    pub campaign_id: String,
    /// Phone-like contact identifier.
    pub contact: String,
    /// Channel identity the message is sent from.
    pub session_name: String,
    /// Position within the (campaign, contact) sequence.
    pub message_order: i64,
    /// Raw stored payload, decoded with [`DispatchItem::payload`].
    pub payload: String,
    /// Current lifecycle status.
    pub status: ItemStatus,
    /// Earliest instant the item may be claimed; `None` means immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Last delivery error, if any.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change; doubles as the claim timestamp while processing.
    pub updated_at: DateTime<Utc>,
}

impl DispatchItem {
    /// Decode the stored payload into a typed message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload declares a known type with invalid fields.
    pub fn payload(&self) -> Result<Payload, PayloadError> {
        Payload::parse(&self.payload)
    }

    /// Whether the item is ready at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }
}

/// Contact data used for text templating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactProfile {
    /// Phone number (lookup key).
    pub phone: String,
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Company name.
    pub company: Option<String>,
}

impl ContactProfile {
    /// Template variables exposed by this profile.
    ///
    /// Portuguese aliases (`nome`, `empresa`) are kept for templates written
    /// against the authoring UI.
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("phone".to_owned(), self.phone.clone());
        if let Some(name) = &self.name {
            vars.insert("name".to_owned(), name.clone());
            vars.insert("nome".to_owned(), name.clone());
        }
        if let Some(email) = &self.email {
            vars.insert("email".to_owned(), email.clone());
        }
        if let Some(company) = &self.company {
            vars.insert("company".to_owned(), company.clone());
            vars.insert("empresa".to_owned(), company.clone());
        }
        vars
    }
}

/// A contact batch exclusively owned by one worker after a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedBatch {
    /// Owning campaign.
    pub campaign_id: String,
    /// Contact the batch is addressed to.
    pub contact: String,
    /// Channel identity the batch is sent from.
    pub session_name: String,
    /// Timestamp written to every claimed row.
    pub claimed_at: DateTime<Utc>,
    /// Profile used for templating, when one exists.
    pub profile: Option<ContactProfile>,
    /// Claimed items in ascending `message_order`.
    pub items: Vec<DispatchItem>,
}

impl ClaimedBatch {
    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
