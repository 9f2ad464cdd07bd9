//! Tests for `src/orchestrator/sequencer.rs`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use campaign_dispatch::channel::OutboundMessage;
use campaign_dispatch::model::{Campaign, CampaignStatus, ClaimedBatch, ContactProfile, ItemStatus};
use campaign_dispatch::orchestrator::claim::claim_next_contact_batch;
use campaign_dispatch::orchestrator::sequencer::run_batch;
use campaign_dispatch::payload::{MediaKind, Payload};
use campaign_dispatch::store::{DispatchStore, NewItem, SqliteStore};

use crate::support::{deps, enqueue_text, open_store, status_of, RecordingChannel};

fn campaign(delay_ms: u64) -> Campaign {
    Campaign {
        id: "c1".to_owned(),
        delay_ms: Some(delay_ms),
        contact_delay_ms: Some(0),
        status: CampaignStatus::Active,
    }
}

async fn claim(store: &SqliteStore) -> ClaimedBatch {
    claim_next_contact_batch(store, "c1")
        .await
        .expect("claim should succeed")
        .expect("a batch should be claimed")
}

#[tokio::test]
async fn every_item_ends_terminal_in_order() {
    let (store, _dir) = open_store().await;
    let ids = [
        enqueue_text(&store, "c1", "a", 1, "one").await,
        enqueue_text(&store, "c1", "a", 2, "two").await,
        enqueue_text(&store, "c1", "a", 3, "three").await,
    ];
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    let report = run_batch(&batch, &campaign(1), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert_eq!(report.sent, 3);
    assert_eq!(report.failed, 0);
    assert!(!report.interrupted);
    assert_eq!(channel.text_bodies(), vec!["one", "two", "three"]);
    for id in &ids {
        assert_eq!(status_of(&store, id).await, ItemStatus::Sent);
    }

    let calls = channel.calls();
    assert!(calls.iter().all(|c| c.session == "session-1" && c.target == "a"));
}

#[tokio::test]
async fn rejected_item_fails_and_batch_continues() {
    let (store, _dir) = open_store().await;
    let first = enqueue_text(&store, "c1", "a", 1, "blocked").await;
    let second = enqueue_text(&store, "c1", "a", 2, "fine").await;
    let channel = Arc::new(RecordingChannel::new().rejecting("blocked"));
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    let report = run_batch(&batch, &campaign(1), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);

    let failed = store.item(&first).await.expect("read").expect("exists");
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("delivery rejected: number blocked")
    );
    assert_eq!(status_of(&store, &second).await, ItemStatus::Sent);
}

#[tokio::test]
async fn transport_error_fails_only_that_item() {
    let (store, _dir) = open_store().await;
    let first = enqueue_text(&store, "c1", "a", 1, "boom").await;
    let second = enqueue_text(&store, "c1", "a", 2, "fine").await;
    let channel = Arc::new(RecordingChannel::new().failing("boom"));
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    run_batch(&batch, &campaign(1), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    let failed = store.item(&first).await.expect("read").expect("exists");
    assert_eq!(failed.status, ItemStatus::Failed);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|e| e.contains("502")));
    assert_eq!(status_of(&store, &second).await, ItemStatus::Sent);
}

#[tokio::test]
async fn malformed_payload_fails_without_sending() {
    let (store, _dir) = open_store().await;
    let bad = store
        .enqueue_item(&NewItem {
            campaign_id: "c1".to_owned(),
            contact: "a".to_owned(),
            session_name: "session-1".to_owned(),
            message_order: 1,
            payload: r#"{"type":"image"}"#.to_owned(),
            scheduled_at: None,
        })
        .await
        .expect("insert should succeed");
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    let report = run_batch(&batch, &campaign(1), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert_eq!(report.failed, 1);
    assert!(channel.calls().is_empty());
    let item = store.item(&bad).await.expect("read").expect("exists");
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.error.is_some());
}

#[tokio::test]
async fn text_is_rendered_with_contact_profile() {
    let (store, _dir) = open_store().await;
    store
        .upsert_contact_profile(&ContactProfile {
            phone: "a".to_owned(),
            name: Some("Ana".to_owned()),
            email: None,
            company: Some("Acme".to_owned()),
        })
        .await
        .expect("profile upsert should succeed");
    enqueue_text(&store, "c1", "a", 1, "Hello {{nome}}").await;
    enqueue_text(&store, "c1", "a", 2, "{{ company }} / {{email}}!").await;
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    run_batch(&batch, &campaign(1), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert_eq!(channel.text_bodies(), vec!["Hello Ana", "Acme / !"]);
}

#[tokio::test]
async fn media_payload_is_sent_with_derived_filename() {
    let (store, _dir) = open_store().await;
    store
        .enqueue_item(
            &NewItem::with_payload(
                "c1",
                "a",
                "session-1",
                1,
                &Payload::Video {
                    url: "https://cdn.example.com/clips/promo.mp4?sig=1".to_owned(),
                    caption: Some("watch".to_owned()),
                },
            )
            .expect("payload should serialize"),
        )
        .await
        .expect("insert should succeed");
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    run_batch(&batch, &campaign(1), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    let calls = channel.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].message,
        OutboundMessage::Media {
            media: MediaKind::Video,
            location: "https://cdn.example.com/clips/promo.mp4?sig=1".to_owned(),
            filename: "promo.mp4".to_owned(),
            caption: "watch".to_owned(),
        }
    );
}

#[tokio::test]
async fn no_delay_after_the_last_item() {
    let (store, _dir) = open_store().await;
    enqueue_text(&store, "c1", "a", 1, "only").await;
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    let started = Instant::now();
    run_batch(&batch, &campaign(2_000), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[tokio::test]
async fn message_delay_separates_items() {
    let (store, _dir) = open_store().await;
    enqueue_text(&store, "c1", "a", 1, "one").await;
    enqueue_text(&store, "c1", "a", 2, "two").await;
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    let (_stop_tx, mut stop) = watch::channel(false);

    let started = Instant::now();
    run_batch(&batch, &campaign(200), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn stop_mid_batch_leaves_remaining_items_processing() {
    let (store, _dir) = open_store().await;
    let first = enqueue_text(&store, "c1", "a", 1, "one").await;
    let second = enqueue_text(&store, "c1", "a", 2, "two").await;
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    let (stop_tx, mut stop) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = stop_tx.send(true);
        // Keep the sender alive until the batch observes the stop.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let started = Instant::now();
    let report = run_batch(&batch, &campaign(30_000), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert!(report.interrupted);
    assert_eq!(report.sent, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(status_of(&store, &first).await, ItemStatus::Sent);
    assert_eq!(status_of(&store, &second).await, ItemStatus::Processing);
}

#[tokio::test]
async fn outcome_is_not_written_over_a_revived_item() {
    let (store, _dir) = open_store().await;
    let id = enqueue_text(&store, "c1", "a", 1, "late").await;
    let channel = Arc::new(RecordingChannel::new());
    let batch = claim(&store).await;
    store
        .revert_stale_processing(chrono::Utc::now() + chrono::Duration::hours(1))
        .await
        .expect("revival should succeed");
    let (_stop_tx, mut stop) = watch::channel(false);

    let report = run_batch(&batch, &campaign(1), &deps(&store, &channel), Duration::ZERO, &mut stop)
        .await
        .expect("batch should run");

    assert_eq!(report.sent, 1);
    assert_eq!(channel.text_bodies(), vec!["late"]);
    assert_eq!(status_of(&store, &id).await, ItemStatus::Pending);
}
