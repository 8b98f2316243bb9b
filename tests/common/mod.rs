#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use shiptrack::carrier::{CarrierError, CarrierTrackingClient, RawTrackingEvent};
use shiptrack::channel::OutboundChannel;
use shiptrack::config;
use shiptrack::db::{
    self, fmt_ts, NewTrackingEvent, Pool, ShipmentOwner, ShipmentPointer, StaleShipment,
};
use shiptrack::model::{
    CarrierEventKind, NormalizedStatus, TrackingEvent, TrackingWebhook, WebhookData,
};
use shiptrack::store::{SqliteStore, TrackingStore};

pub async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// Tracking settings with no pacing so tests run instantly.
pub fn tracking_settings() -> config::Tracking {
    config::Tracking {
        sync_delay_ms: 0,
        ..config::Tracking::default()
    }
}

pub async fn seed_user(pool: &Pool, id: &str, channels: &[&str]) {
    sqlx::query("INSERT INTO users (id, email, notification_channels) VALUES (?, ?, ?)")
        .bind(id)
        .bind(format!("{}@example.com", id))
        .bind(serde_json::to_string(channels).unwrap())
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_workspace(pool: &Pool, id: &str, parent: Option<&str>, owner: &str) {
    sqlx::query("INSERT INTO workspaces (id, parent_workspace_id) VALUES (?, ?)")
        .bind(id)
        .bind(parent)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO workspace_members (workspace_id, user_id, role, status) VALUES (?, ?, 'owner', 'active')",
    )
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await
    .unwrap();
}

#[derive(Debug, Clone)]
pub struct ShipmentSeed {
    pub id: String,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub status: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ShipmentSeed {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            workspace_id: None,
            tracking_number: Some(format!("TRK-{}", id)),
            carrier: Some("brt".into()),
            status: None,
            last_update: None,
            created_at: Utc::now() - Duration::days(1),
        }
    }

    pub fn owner(mut self, user_id: &str, workspace_id: Option<&str>) -> Self {
        self.user_id = Some(user_id.into());
        self.workspace_id = workspace_id.map(String::from);
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn synced_ago(mut self, age: Duration) -> Self {
        self.last_update = Some(Utc::now() - age);
        self
    }

    pub fn created_ago(mut self, age: Duration) -> Self {
        self.created_at = Utc::now() - age;
        self
    }

    pub fn without_tracking_number(mut self) -> Self {
        self.tracking_number = None;
        self
    }

    pub async fn insert(self, pool: &Pool) {
        sqlx::query(
            "INSERT INTO shipments (id, user_id, workspace_id, tracking_number, carrier, \
             tracking_status, tracking_last_update, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.id)
        .bind(&self.user_id)
        .bind(&self.workspace_id)
        .bind(&self.tracking_number)
        .bind(&self.carrier)
        .bind(&self.status)
        .bind(self.last_update.map(fmt_ts))
        .bind(fmt_ts(self.created_at))
        .execute(pool)
        .await
        .unwrap();
    }
}

pub fn raw_event(timestamp: &str, status: &str, location: Option<&str>) -> RawTrackingEvent {
    RawTrackingEvent {
        timestamp: timestamp.into(),
        status: status.into(),
        location: location.map(String::from),
        raw: serde_json::json!({ "Data": timestamp, "Stato": status, "Luogo": location }),
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Events(Vec<RawTrackingEvent>),
    Status(u16),
    Malformed,
}

impl Reply {
    fn into_result(self) -> Result<Vec<RawTrackingEvent>, CarrierError> {
        match self {
            Reply::Events(events) => Ok(events),
            Reply::Status(code) => Err(CarrierError::Status {
                status: StatusCode::from_u16(code).unwrap(),
                body: String::new(),
            }),
            Reply::Malformed => Err(CarrierError::Malformed("not json".into())),
        }
    }
}

/// Scripted carrier. Each tracking number replays its queued replies; the
/// last one repeats. Unknown numbers get an empty event list.
#[derive(Clone, Default)]
pub struct RecordingCarrier {
    replies: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingCarrier {
    pub async fn script(&self, tracking_number: &str, replies: Vec<Reply>) {
        self.replies
            .lock()
            .await
            .insert(tracking_number.to_string(), VecDeque::from(replies));
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_for(&self, tracking_number: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.as_str() == tracking_number)
            .count()
    }
}

#[async_trait]
impl CarrierTrackingClient for RecordingCarrier {
    async fn fetch(&self, tracking_number: &str) -> Result<Vec<RawTrackingEvent>, CarrierError> {
        self.calls.lock().await.push(tracking_number.to_string());
        let mut replies = self.replies.lock().await;
        let reply = match replies.get_mut(tracking_number) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        reply.unwrap_or(Reply::Events(vec![])).into_result()
    }
}

/// SQLite-backed store whose event writes fail for one carrier status, or for
/// every status when none is given.
#[derive(Clone)]
pub struct FailingUpsertStore {
    inner: SqliteStore,
    fail_status: Option<String>,
    attempts: Arc<Mutex<usize>>,
}

impl FailingUpsertStore {
    pub fn new(pool: &Pool, fail_status: Option<&str>) -> Self {
        Self {
            inner: SqliteStore::new(pool.clone()),
            fail_status: fail_status.map(str::to_string),
            attempts: Arc::default(),
        }
    }

    pub async fn upsert_attempts(&self) -> usize {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl TrackingStore for FailingUpsertStore {
    async fn get_shipment_pointer(&self, shipment_id: &str) -> anyhow::Result<Option<ShipmentPointer>> {
        self.inner.get_shipment_pointer(shipment_id).await
    }

    async fn find_shipment_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> anyhow::Result<Option<String>> {
        self.inner.find_shipment_by_tracking_number(tracking_number).await
    }

    async fn upsert_event(&self, event: &NewTrackingEvent) -> anyhow::Result<bool> {
        *self.attempts.lock().await += 1;
        let fails = match self.fail_status.as_deref() {
            Some(status) => event.status == status,
            None => true,
        };
        if fails {
            return Err(anyhow::anyhow!("disk I/O error writing {}", event.status));
        }
        self.inner.upsert_event(event).await
    }

    async fn list_events(&self, shipment_id: &str) -> anyhow::Result<Vec<TrackingEvent>> {
        self.inner.list_events(shipment_id).await
    }

    async fn mark_synced(
        &self,
        shipment_id: &str,
        synced_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<NormalizedStatus>> {
        self.inner.mark_synced(shipment_id, synced_at).await
    }

    async fn select_stale_shipments(
        &self,
        updated_before: DateTime<Utc>,
        created_since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<StaleShipment>> {
        self.inner
            .select_stale_shipments(updated_before, created_since, limit)
            .await
    }

    async fn get_shipment_owner(&self, shipment_id: &str) -> anyhow::Result<Option<ShipmentOwner>> {
        self.inner.get_shipment_owner(shipment_id).await
    }
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub user_id: String,
    pub subject: String,
    pub html: String,
}

#[derive(Clone)]
pub struct RecordingChannel {
    succeed: bool,
    sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl RecordingChannel {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    async fn send_email(&self, user_id: &str, subject: &str, html: &str) -> bool {
        self.sent.lock().await.push(SentEmail {
            user_id: user_id.into(),
            subject: subject.into(),
            html: html.into(),
        });
        self.succeed
    }
}

pub fn webhook(event: CarrierEventKind, tracking_number: &str, status: &str) -> TrackingWebhook {
    TrackingWebhook {
        event,
        data: WebhookData {
            tracking_number: tracking_number.into(),
            carrier: Some("brt".into()),
            status: status.into(),
            status_description: None,
            extra: Default::default(),
        },
    }
}
