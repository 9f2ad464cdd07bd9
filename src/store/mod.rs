//! Dispatch store: the persistent queue and the only synchronization point.
//!
//! The orchestrator never holds item state in memory between calls. Every
//! ownership decision is made by a conditional update inside the store, which
//! keeps several workers (or processes) sharing one database safe without a
//! lock service.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Campaign, ContactProfile, DispatchItem, ItemStatus};

pub use self::sqlite::{NewItem, SqliteStore};

/// Errors from the dispatch store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which column contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// A stored timestamp is outside the representable range.
    #[error("invalid timestamp in {field}: {millis}")]
    InvalidTimestamp {
        /// Which column contained the bad value.
        field: &'static str,
        /// Raw epoch milliseconds.
        millis: i64,
    },
}

/// The unit of exclusive ownership: one contact's items within one campaign,
/// sent from one channel session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContactGroup {
    /// Owning campaign.
    pub campaign_id: String,
    /// Target contact.
    pub contact: String,
    /// Sending channel session.
    pub session_name: String,
}

impl ContactGroup {
    /// The group an item belongs to.
    pub fn of(item: &DispatchItem) -> Self {
        Self {
            campaign_id: item.campaign_id.clone(),
            contact: item.contact.clone(),
            session_name: item.session_name.clone(),
        }
    }
}

/// Operations the orchestrator needs from persistent storage.
///
/// "Ready" means `status = pending` and `scheduled_at` is unset or not after
/// the evaluation instant.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Earliest ready item of `campaign_id`, ordered by contact, then
    /// message order, then creation time. Groups that already have an item
    /// in flight are skipped.
    async fn find_ready_item(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchItem>, StoreError>;

    /// Move every ready item of `group` to processing, stamping `claimed_at`.
    ///
    /// Affects nothing when another worker already holds items of the group
    /// in flight. Returns the number of rows moved; zero means the race was lost.
    async fn conditional_bulk_claim(
        &self,
        group: &ContactGroup,
        now: DateTime<Utc>,
        claimed_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Items of `group` in processing whose claim stamp is at or after
    /// `claimed_at`, in ascending message order.
    async fn find_claimed_batch(
        &self,
        group: &ContactGroup,
        claimed_at: DateTime<Utc>,
    ) -> Result<Vec<DispatchItem>, StoreError>;

    /// Current pacing and status of a campaign.
    async fn find_campaign_config(&self, campaign_id: &str)
        -> Result<Option<Campaign>, StoreError>;

    /// Templating profile for a contact.
    async fn find_contact_profile(
        &self,
        contact: &str,
    ) -> Result<Option<ContactProfile>, StoreError>;

    /// Distinct campaigns that have at least one ready item in a group with
    /// nothing in flight.
    async fn find_distinct_ready_campaigns(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    /// Record the outcome of an item that is still in processing. `error` is
    /// stored as given, so passing `None` clears a previous error.
    ///
    /// Returns `false` when the item had already left processing (for example
    /// after a revival sweep), in which case nothing is written.
    async fn update_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Return processing items last touched before `cutoff` to pending.
    async fn revert_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
