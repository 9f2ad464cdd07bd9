//! Stuck-job revival.
//!
//! A processing item whose claim stamp is older than the TTL belongs to a
//! sequencer that crashed or hung. Reverting it to pending makes it claimable
//! again. Staleness is judged from the timestamp alone; there is no heartbeat.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::store::{DispatchStore, StoreError};

/// Revert every processing item last touched more than `ttl` before `now`.
///
/// Returns the number of items reverted.
///
/// # Errors
///
/// Returns a [`StoreError`] if the update fails.
pub async fn revive_stale_items(
    store: &dyn DispatchStore,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let cutoff = stale_cutoff(ttl, now);
    let count = store.revert_stale_processing(cutoff).await?;

    if count > 0 {
        warn!(count, cutoff = %cutoff, "reverted stale processing items to pending");
    } else {
        debug!(cutoff = %cutoff, "no stale processing items");
    }

    Ok(count)
}

/// The instant before which a processing item counts as stale.
///
/// A TTL too large to represent yields the earliest representable instant,
/// so nothing is considered stale.
pub fn stale_cutoff(ttl: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
