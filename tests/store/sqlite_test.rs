//! Tests for `src/store/sqlite.rs`: readiness queries, conditional claims,
//! status updates, and revival at the SQL level.

use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use campaign_dispatch::model::{Campaign, CampaignStatus, ContactProfile, ItemStatus};
use campaign_dispatch::payload::Payload;
use campaign_dispatch::store::{ContactGroup, DispatchStore, NewItem, SqliteStore, StoreError};

async fn setup_store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = SqliteStore::open(&dir.path().join("dispatch.db"), 5)
        .await
        .expect("store should open");
    (store, dir)
}

fn text(campaign: &str, contact: &str, order: i64, body: &str) -> NewItem {
    NewItem::with_payload(
        campaign,
        contact,
        "session-1",
        order,
        &Payload::Text {
            text: body.to_owned(),
        },
    )
    .expect("payload should serialize")
}

fn group(campaign: &str, contact: &str) -> ContactGroup {
    ContactGroup {
        campaign_id: campaign.to_owned(),
        contact: contact.to_owned(),
        session_name: "session-1".to_owned(),
    }
}

#[tokio::test]
async fn fresh_store_has_no_ready_work() {
    let (store, _dir) = setup_store().await;

    let ready = store
        .find_distinct_ready_campaigns(Utc::now())
        .await
        .expect("query should succeed");
    assert!(ready.is_empty());
}

#[tokio::test]
async fn from_pool_applies_schema_to_in_memory_database() {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");

    let store = SqliteStore::from_pool(pool)
        .await
        .expect("schema should apply");
    let id = store
        .enqueue_item(&text("c1", "5511999990000", 1, "hi"))
        .await
        .expect("enqueue should succeed");

    let item = store
        .item(&id)
        .await
        .expect("read should succeed")
        .expect("item should exist");
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.message_order, 1);
    assert!(item.scheduled_at.is_none());
    assert!(item.error.is_none());
}

#[tokio::test]
async fn enqueued_item_round_trips_fields() {
    let (store, _dir) = setup_store().await;
    let at = Utc::now() + Duration::hours(2);

    let id = store
        .enqueue_item(&text("c1", "5511999990000", 3, "later").scheduled_at(at))
        .await
        .expect("enqueue should succeed");
    let item = store
        .item(&id)
        .await
        .expect("read should succeed")
        .expect("item should exist");

    assert_eq!(item.campaign_id, "c1");
    assert_eq!(item.contact, "5511999990000");
    assert_eq!(item.session_name, "session-1");
    assert_eq!(
        item.scheduled_at.map(|t| t.timestamp_millis()),
        Some(at.timestamp_millis())
    );
    assert_eq!(
        item.payload().expect("payload should decode"),
        Payload::Text {
            text: "later".to_owned()
        }
    );
}

#[tokio::test]
async fn duplicate_message_order_is_rejected() {
    let (store, _dir) = setup_store().await;
    store
        .enqueue_item(&text("c1", "a", 1, "first"))
        .await
        .expect("first insert should succeed");

    let dup = store.enqueue_item(&text("c1", "a", 1, "again")).await;
    assert!(matches!(dup, Err(StoreError::Database(_))));
}

#[tokio::test]
async fn find_ready_item_orders_by_contact_then_message_order() {
    let (store, _dir) = setup_store().await;
    store.enqueue_item(&text("c1", "b", 1, "b1")).await.expect("insert");
    store.enqueue_item(&text("c1", "a", 2, "a2")).await.expect("insert");
    store.enqueue_item(&text("c1", "a", 1, "a1")).await.expect("insert");

    let first = store
        .find_ready_item("c1", Utc::now())
        .await
        .expect("query should succeed")
        .expect("an item should be ready");
    assert_eq!(first.contact, "a");
    assert_eq!(first.message_order, 1);
}

#[tokio::test]
async fn future_scheduled_items_are_not_ready() {
    let (store, _dir) = setup_store().await;
    let now = Utc::now();
    store
        .enqueue_item(&text("later", "a", 1, "x").scheduled_at(now + Duration::hours(1)))
        .await
        .expect("insert");
    store
        .enqueue_item(&text("due", "a", 1, "x").scheduled_at(now - Duration::minutes(1)))
        .await
        .expect("insert");

    let ready = store
        .find_distinct_ready_campaigns(now)
        .await
        .expect("query should succeed");
    assert_eq!(ready, vec!["due".to_owned()]);

    let none = store
        .find_ready_item("later", now)
        .await
        .expect("query should succeed");
    assert!(none.is_none());

    let later = store
        .find_ready_item("later", now + Duration::hours(2))
        .await
        .expect("query should succeed");
    assert!(later.is_some());
}

#[tokio::test]
async fn second_conditional_claim_affects_nothing() {
    let (store, _dir) = setup_store().await;
    store.enqueue_item(&text("c1", "a", 1, "one")).await.expect("insert");
    store.enqueue_item(&text("c1", "a", 2, "two")).await.expect("insert");
    let now = Utc::now();

    let first = store
        .conditional_bulk_claim(&group("c1", "a"), now, now)
        .await
        .expect("claim should succeed");
    assert_eq!(first, 2);

    let second = store
        .conditional_bulk_claim(&group("c1", "a"), now, now)
        .await
        .expect("claim should succeed");
    assert_eq!(second, 0);
}

#[tokio::test]
async fn group_in_flight_blocks_late_ready_items() {
    let (store, _dir) = setup_store().await;
    let now = Utc::now();
    store.enqueue_item(&text("c1", "a", 1, "now")).await.expect("insert");
    store
        .enqueue_item(&text("c1", "a", 2, "soon").scheduled_at(now + Duration::seconds(5)))
        .await
        .expect("insert");
    store.enqueue_item(&text("c1", "b", 1, "other")).await.expect("insert");

    let claimed = store
        .conditional_bulk_claim(&group("c1", "a"), now, now)
        .await
        .expect("claim should succeed");
    assert_eq!(claimed, 1);

    // Item a/2 becomes due while a/1 is still in flight.
    let later = now + Duration::seconds(10);
    let next = store
        .find_ready_item("c1", later)
        .await
        .expect("query should succeed")
        .expect("contact b should be ready");
    assert_eq!(next.contact, "b");

    let blocked = store
        .conditional_bulk_claim(&group("c1", "a"), later, later)
        .await
        .expect("claim should succeed");
    assert_eq!(blocked, 0);
}

#[tokio::test]
async fn claimed_batch_is_ordered_by_message_order() {
    let (store, _dir) = setup_store().await;
    for order in [2, 1, 3] {
        store
            .enqueue_item(&text("c1", "a", order, &format!("m{order}")))
            .await
            .expect("insert");
    }
    let now = Utc::now();
    store
        .conditional_bulk_claim(&group("c1", "a"), now, now)
        .await
        .expect("claim should succeed");

    let batch = store
        .find_claimed_batch(&group("c1", "a"), now)
        .await
        .expect("query should succeed");
    let orders: Vec<i64> = batch.iter().map(|i| i.message_order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    assert!(batch.iter().all(|i| i.status == ItemStatus::Processing));
}

#[tokio::test]
async fn update_item_status_records_outcome_of_claimed_items() {
    let (store, _dir) = setup_store().await;
    let failed_id = store.enqueue_item(&text("c1", "a", 1, "x")).await.expect("insert");
    let sent_id = store.enqueue_item(&text("c1", "a", 2, "y")).await.expect("insert");
    let now = Utc::now();
    store
        .conditional_bulk_claim(&group("c1", "a"), now, now)
        .await
        .expect("claim should succeed");

    let written = store
        .update_item_status(&failed_id, ItemStatus::Failed, Some("number blocked"))
        .await
        .expect("update should succeed");
    assert!(written);
    let failed = store.item(&failed_id).await.expect("read").expect("exists");
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("number blocked"));

    let written = store
        .update_item_status(&sent_id, ItemStatus::Sent, None)
        .await
        .expect("update should succeed");
    assert!(written);
    let sent = store.item(&sent_id).await.expect("read").expect("exists");
    assert_eq!(sent.status, ItemStatus::Sent);
    assert!(sent.error.is_none());

    // Terminal rows are never rewritten.
    let rewritten = store
        .update_item_status(&failed_id, ItemStatus::Sent, None)
        .await
        .expect("update should succeed");
    assert!(!rewritten);
    let still_failed = store.item(&failed_id).await.expect("read").expect("exists");
    assert_eq!(still_failed.status, ItemStatus::Failed);
}

#[tokio::test]
async fn update_item_status_skips_items_revived_to_pending() {
    let (store, _dir) = setup_store().await;
    let id = store.enqueue_item(&text("c1", "a", 1, "x")).await.expect("insert");
    let old = Utc::now() - Duration::hours(1);
    store
        .conditional_bulk_claim(&group("c1", "a"), old, old)
        .await
        .expect("claim should succeed");
    store
        .revert_stale_processing(Utc::now() - Duration::minutes(30))
        .await
        .expect("revival should succeed");

    let written = store
        .update_item_status(&id, ItemStatus::Sent, None)
        .await
        .expect("update should succeed");

    assert!(!written);
    let item = store.item(&id).await.expect("read").expect("exists");
    assert_eq!(item.status, ItemStatus::Pending);
}

#[tokio::test]
async fn ready_campaigns_exclude_groups_in_flight() {
    let (store, _dir) = setup_store().await;
    let now = Utc::now();
    store.enqueue_item(&text("stuck", "a", 1, "x")).await.expect("insert");
    store.enqueue_item(&text("stuck", "a", 2, "y")).await.expect("insert");
    store.enqueue_item(&text("open", "a", 1, "z")).await.expect("insert");

    // The claim takes both ready items; a later sibling stays pending behind it.
    store
        .conditional_bulk_claim(&group("stuck", "a"), now, now)
        .await
        .expect("claim should succeed");
    let sibling_due = now + Duration::seconds(1);
    store
        .enqueue_item(&text("stuck", "a", 3, "late").scheduled_at(sibling_due))
        .await
        .expect("insert");

    let ready = store
        .find_distinct_ready_campaigns(sibling_due)
        .await
        .expect("query should succeed");
    assert_eq!(ready, vec!["open".to_owned()]);

    store.enqueue_item(&text("stuck", "b", 1, "other")).await.expect("insert");
    let ready = store
        .find_distinct_ready_campaigns(sibling_due)
        .await
        .expect("query should succeed");
    assert_eq!(ready, vec!["open".to_owned(), "stuck".to_owned()]);
}

#[tokio::test]
async fn revert_stale_processing_only_touches_old_claims() {
    let (store, _dir) = setup_store().await;
    let now = Utc::now();
    let old = now - Duration::hours(1);
    let stale = store.enqueue_item(&text("c1", "a", 1, "x")).await.expect("insert");
    let fresh = store.enqueue_item(&text("c1", "b", 1, "y")).await.expect("insert");
    let done = store.enqueue_item(&text("c1", "c", 1, "z")).await.expect("insert");

    store
        .conditional_bulk_claim(&group("c1", "a"), old, old)
        .await
        .expect("claim should succeed");
    store
        .conditional_bulk_claim(&group("c1", "b"), now, now)
        .await
        .expect("claim should succeed");
    store
        .conditional_bulk_claim(&group("c1", "c"), old, old)
        .await
        .expect("claim should succeed");
    store
        .update_item_status(&done, ItemStatus::Sent, None)
        .await
        .expect("update should succeed");

    let reverted = store
        .revert_stale_processing(now - Duration::minutes(30))
        .await
        .expect("revival should succeed");
    assert_eq!(reverted, 1);

    let status = |id: String| {
        let store = store.clone();
        async move { store.item(&id).await.expect("read").expect("exists").status }
    };
    assert_eq!(status(stale).await, ItemStatus::Pending);
    assert_eq!(status(fresh).await, ItemStatus::Processing);
    assert_eq!(status(done).await, ItemStatus::Sent);
}

#[tokio::test]
async fn campaign_config_round_trips_and_toggles() {
    let (store, _dir) = setup_store().await;
    assert!(store
        .find_campaign_config("c1")
        .await
        .expect("query should succeed")
        .is_none());

    store
        .upsert_campaign(&Campaign {
            id: "c1".to_owned(),
            delay_ms: Some(1500),
            contact_delay_ms: None,
            status: CampaignStatus::Active,
        })
        .await
        .expect("upsert should succeed");
    store
        .set_campaign_status("c1", CampaignStatus::Paused)
        .await
        .expect("status update should succeed");

    let campaign = store
        .find_campaign_config("c1")
        .await
        .expect("query should succeed")
        .expect("campaign should exist");
    assert_eq!(campaign.delay_ms, Some(1500));
    assert_eq!(campaign.contact_delay_ms, None);
    assert!(campaign.is_paused());
}

#[tokio::test]
async fn contact_profile_lookup_by_phone() {
    let (store, _dir) = setup_store().await;
    store
        .upsert_contact_profile(&ContactProfile {
            phone: "5511999990000".to_owned(),
            name: Some("Ana".to_owned()),
            email: None,
            company: Some("Acme".to_owned()),
        })
        .await
        .expect("upsert should succeed");

    let profile = store
        .find_contact_profile("5511999990000")
        .await
        .expect("query should succeed")
        .expect("profile should exist");
    assert_eq!(profile.name.as_deref(), Some("Ana"));
    assert_eq!(profile.company.as_deref(), Some("Acme"));

    let missing = store
        .find_contact_profile("000")
        .await
        .expect("query should succeed");
    assert!(missing.is_none());
}

#[tokio::test]
async fn items_for_campaign_lists_every_item() {
    let (store, _dir) = setup_store().await;
    store.enqueue_item(&text("c1", "a", 1, "x")).await.expect("insert");
    store.enqueue_item(&text("c1", "b", 1, "y")).await.expect("insert");
    store.enqueue_item(&text("c2", "a", 1, "z")).await.expect("insert");

    let items = store
        .items_for_campaign("c1")
        .await
        .expect("query should succeed");
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.campaign_id == "c1"));
}
