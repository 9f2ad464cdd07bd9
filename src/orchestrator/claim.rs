//! Claim engine: atomically takes ownership of the next ready contact batch.
//!
//! Ordering by contact, then message order, then creation time makes replay
//! deterministic and FIFO per contact. A contact's ready items are claimed
//! together, so no two workers ever interleave sends to the same contact.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::ClaimedBatch;
use crate::store::{ContactGroup, DispatchStore, StoreError};

/// Claim the next ready contact batch of `campaign_id` as of now.
///
/// Returns `Ok(None)` when nothing is ready or another worker won the race.
///
/// # Errors
///
/// Returns a [`StoreError`] if any store call fails.
pub async fn claim_next_contact_batch(
    store: &dyn DispatchStore,
    campaign_id: &str,
) -> Result<Option<ClaimedBatch>, StoreError> {
    claim_next_contact_batch_at(store, campaign_id, Utc::now()).await
}

/// Claim the next ready contact batch of `campaign_id`, evaluating readiness
/// at `now` and stamping the claimed rows with `now`.
///
/// # Errors
///
/// Returns a [`StoreError`] if any store call fails.
pub async fn claim_next_contact_batch_at(
    store: &dyn DispatchStore,
    campaign_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<ClaimedBatch>, StoreError> {
    let Some(first) = store.find_ready_item(campaign_id, now).await? else {
        return Ok(None);
    };

    let group = ContactGroup::of(&first);
    let claimed_at = now;

    let affected = store.conditional_bulk_claim(&group, now, claimed_at).await?;
    if affected == 0 {
        debug!(
            campaign_id,
            contact = %group.contact,
            session = %group.session_name,
            "claim lost to another worker"
        );
        return Ok(None);
    }

    let items = store.find_claimed_batch(&group, claimed_at).await?;
    if items.is_empty() {
        // Only reachable if a revival sweep with a near-zero TTL ran in between.
        warn!(
            campaign_id,
            contact = %group.contact,
            affected,
            "claimed rows vanished before re-read"
        );
        return Ok(None);
    }

    let profile = store.find_contact_profile(&group.contact).await?;

    debug!(
        campaign_id,
        contact = %group.contact,
        session = %group.session_name,
        items = items.len(),
        "contact batch claimed"
    );

    Ok(Some(ClaimedBatch {
        campaign_id: group.campaign_id,
        contact: group.contact,
        session_name: group.session_name,
        claimed_at,
        profile,
        items,
    }))
}
