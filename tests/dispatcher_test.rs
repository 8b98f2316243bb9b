mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use common::{seed_user, seed_workspace, setup_pool, webhook, RecordingChannel, ShipmentSeed};
use shiptrack::db::{self, fmt_ts, Pool};
use shiptrack::dispatcher::{
    spawn_dispatch_worker, Delivery, DispatchOutcome, NotificationDispatcher, SkipReason,
};
use shiptrack::model::{CarrierEventKind, Channel, NotificationType};
use shiptrack::store::SqliteStore;

fn dispatcher(pool: &Pool, channel: &RecordingChannel) -> NotificationDispatcher {
    let store = Arc::new(SqliteStore::new(pool.clone()));
    NotificationDispatcher::new(
        store.clone(),
        store.clone(),
        store,
        Arc::new(channel.clone()),
        Duration::minutes(60),
    )
}

/// Client `owner` in workspace `ws-client`, whose parent `ws-reseller` is owned by `reseller`.
async fn seed_reseller_tree(pool: &Pool, owner_channels: &[&str]) {
    seed_user(pool, "reseller", &["in_app"]).await;
    seed_user(pool, "owner", owner_channels).await;
    seed_workspace(pool, "ws-reseller", None, "reseller").await;
    seed_workspace(pool, "ws-client", Some("ws-reseller"), "owner").await;
    ShipmentSeed::new("s1")
        .owner("owner", Some("ws-client"))
        .insert(pool)
        .await;
}

#[tokio::test]
async fn same_decision_within_window_is_recorded_once() {
    let pool = setup_pool().await;
    seed_user(&pool, "owner", &["in_app"]).await;
    ShipmentSeed::new("s1").owner("owner", None).insert(&pool).await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);
    let payload = webhook(CarrierEventKind::Delivered, "TRK-s1", "Consegnata");

    let first = d.dispatch(&payload, "s1").await;
    assert_eq!(first.sent_count(), 1);
    let second = d.dispatch(&payload, "s1").await;
    assert_eq!(
        second,
        DispatchOutcome::Dispatched {
            recipients: vec![shiptrack::dispatcher::RecipientOutcome {
                user_id: "owner".into(),
                reseller: false,
                delivery: Delivery::Duplicate,
            }]
        }
    );

    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.notification_type, NotificationType::ShipmentDelivered);
    assert_eq!(record.channels, vec![Channel::InApp]);
    assert!(record.message.contains("TRK-s1"));
    assert!(record.message.contains("BRT"));
    assert_eq!(record.metadata["tracking_number"], "TRK-s1");
    assert_eq!(record.metadata["status_normalized"], "delivered");
    assert_eq!(record.metadata["event"], "tracking.delivered");
}

#[tokio::test]
async fn dispatch_after_window_records_again() {
    let pool = setup_pool().await;
    seed_user(&pool, "owner", &["in_app"]).await;
    ShipmentSeed::new("s1").owner("owner", None).insert(&pool).await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);
    let payload = webhook(CarrierEventKind::OutForDelivery, "TRK-s1", "In consegna");

    assert_eq!(d.dispatch(&payload, "s1").await.sent_count(), 1);

    sqlx::query("UPDATE notifications SET created_at = ?, dedup_bucket = dedup_bucket - 2")
        .bind(fmt_ts(Utc::now() - Duration::minutes(90)))
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(d.dispatch(&payload, "s1").await.sent_count(), 1);
    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn giacenza_fans_out_to_reseller_owner() {
    let pool = setup_pool().await;
    seed_reseller_tree(&pool, &["in_app"]).await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);

    let outcome = d
        .dispatch(&webhook(CarrierEventKind::Exception, "TRK-s1", "In giacenza"), "s1")
        .await;
    assert_eq!(outcome.sent_count(), 2);

    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records.len(), 2);
    let owner = records.iter().find(|r| r.user_id == "owner").unwrap();
    let reseller = records.iter().find(|r| r.user_id == "reseller").unwrap();
    assert_eq!(owner.notification_type, NotificationType::GiacenzaDetected);
    assert_eq!(reseller.notification_type, NotificationType::GiacenzaDetected);
    assert!(!owner.message.starts_with("[Client] "));
    assert!(reseller.message.starts_with("[Client] "));
    assert_eq!(reseller.metadata["is_reseller_alert"], true);
    assert!(owner.metadata.get("is_reseller_alert").is_none());
}

#[tokio::test]
async fn reseller_copy_is_deduplicated_independently() {
    let pool = setup_pool().await;
    seed_reseller_tree(&pool, &["in_app"]).await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);
    let payload = webhook(CarrierEventKind::Updated, "TRK-s1", "Non consegnata");

    assert_eq!(d.dispatch(&payload, "s1").await.sent_count(), 2);
    assert_eq!(d.dispatch(&payload, "s1").await.sent_count(), 0);

    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.notification_type == NotificationType::DeliveryFailed));
}

#[tokio::test]
async fn low_severity_types_do_not_fan_out() {
    let pool = setup_pool().await;
    seed_reseller_tree(&pool, &["in_app", "email"]).await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);

    d.dispatch(&webhook(CarrierEventKind::OutForDelivery, "TRK-s1", "In consegna"), "s1")
        .await;
    d.dispatch(&webhook(CarrierEventKind::Delivered, "TRK-s1", "Consegnata"), "s1")
        .await;

    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.user_id == "owner"));
    assert!(records.iter().all(|r| r.channels == vec![Channel::InApp]));
    assert!(channel.sent().await.is_empty());
}

#[tokio::test]
async fn parent_owned_by_same_user_gets_no_copy() {
    let pool = setup_pool().await;
    seed_user(&pool, "owner", &["in_app"]).await;
    seed_workspace(&pool, "ws-parent", None, "owner").await;
    seed_workspace(&pool, "ws-child", Some("ws-parent"), "owner").await;
    ShipmentSeed::new("s1")
        .owner("owner", Some("ws-child"))
        .insert(&pool)
        .await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);

    let outcome = d
        .dispatch(&webhook(CarrierEventKind::Exception, "TRK-s1", "In giacenza"), "s1")
        .await;
    assert_eq!(outcome.sent_count(), 1);
}

#[tokio::test]
async fn high_severity_goes_to_email_when_preferred() {
    let pool = setup_pool().await;
    seed_user(&pool, "owner", &["in_app", "email"]).await;
    ShipmentSeed::new("s1").owner("owner", None).insert(&pool).await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);

    d.dispatch(&webhook(CarrierEventKind::Exception, "TRK-s1", "In giacenza"), "s1")
        .await;

    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records[0].channels, vec![Channel::InApp, Channel::Email]);
    let sent = channel.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, "owner");
    assert_eq!(sent[0].subject, "Shipment held at depot");
    assert!(sent[0].html.contains("TRK-s1"));
}

#[tokio::test]
async fn failed_email_still_records_in_app() {
    let pool = setup_pool().await;
    seed_user(&pool, "owner", &["in_app", "email"]).await;
    ShipmentSeed::new("s1").owner("owner", None).insert(&pool).await;
    let channel = RecordingChannel::new(false);
    let d = dispatcher(&pool, &channel);

    let outcome = d
        .dispatch(&webhook(CarrierEventKind::Updated, "TRK-s1", "Eccezione"), "s1")
        .await;
    assert_eq!(outcome.sent_count(), 1);
    assert_eq!(channel.sent().await.len(), 1);

    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].channels, vec![Channel::InApp]);
}

#[tokio::test]
async fn unmatched_status_and_missing_owner_are_no_ops() {
    let pool = setup_pool().await;
    ShipmentSeed::new("orphan").insert(&pool).await;
    seed_user(&pool, "owner", &["in_app"]).await;
    ShipmentSeed::new("s1").owner("owner", None).insert(&pool).await;
    let channel = RecordingChannel::new(true);
    let d = dispatcher(&pool, &channel);

    let outcome = d
        .dispatch(&webhook(CarrierEventKind::InTransit, "TRK-s1", "In transito"), "s1")
        .await;
    assert_eq!(
        outcome,
        DispatchOutcome::Skipped {
            reason: SkipReason::NoRule
        }
    );

    let outcome = d
        .dispatch(&webhook(CarrierEventKind::Delivered, "TRK-orphan", "Consegnata"), "orphan")
        .await;
    assert_eq!(
        outcome,
        DispatchOutcome::Skipped {
            reason: SkipReason::NoOwner
        }
    );

    let outcome = d
        .dispatch(&webhook(CarrierEventKind::Delivered, "TRK-x", "Consegnata"), "missing")
        .await;
    assert_eq!(outcome.sent_count(), 0);

    for id in ["s1", "orphan"] {
        assert!(db::list_notifications_for_shipment(&pool, id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn queued_jobs_are_dispatched_by_worker() {
    let pool = setup_pool().await;
    seed_user(&pool, "owner", &["in_app"]).await;
    ShipmentSeed::new("s1").owner("owner", None).insert(&pool).await;
    let channel = RecordingChannel::new(true);
    let d = Arc::new(dispatcher(&pool, &channel));

    let (handle, worker) = spawn_dispatch_worker(d);
    assert!(handle.submit(webhook(CarrierEventKind::Delivered, "TRK-s1", "Consegnata"), "s1"));
    assert!(handle.submit(webhook(CarrierEventKind::Delivered, "TRK-s1", "Consegnata"), "s1"));
    drop(handle);
    worker.await.unwrap();

    let records = db::list_notifications_for_shipment(&pool, "s1").await.unwrap();
    assert_eq!(records.len(), 1);
}
