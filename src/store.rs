//! Persistence seams used by the sync engine and the dispatcher.
//!
//! The engine and dispatcher only see these traits; [`SqliteStore`] backs all
//! three with the SQL in [`crate::db`].
use crate::db::{
    self, InsertOutcome, NewNotification, NewTrackingEvent, Pool, ShipmentOwner, ShipmentPointer,
    StaleShipment,
};
use crate::model::{Channel, NormalizedStatus, NotificationType, TrackingEvent};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn get_shipment_pointer(&self, shipment_id: &str) -> Result<Option<ShipmentPointer>>;

    async fn find_shipment_by_tracking_number(&self, tracking_number: &str)
        -> Result<Option<String>>;

    /// Idempotent on `(shipment_id, event_date, status)`; `true` when a row was added.
    async fn upsert_event(&self, event: &NewTrackingEvent) -> Result<bool>;

    /// Newest first.
    async fn list_events(&self, shipment_id: &str) -> Result<Vec<TrackingEvent>>;

    async fn mark_synced(
        &self,
        shipment_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<Option<NormalizedStatus>>;

    async fn select_stale_shipments(
        &self,
        updated_before: DateTime<Utc>,
        created_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StaleShipment>>;

    async fn get_shipment_owner(&self, shipment_id: &str) -> Result<Option<ShipmentOwner>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn exists_recent(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        shipment_id: &str,
        window: Duration,
    ) -> Result<bool>;

    async fn insert(&self, notification: &NewNotification) -> Result<InsertOutcome>;

    async fn preferred_channels(&self, user_id: &str) -> Result<Vec<Channel>>;
}

#[async_trait]
pub trait WorkspaceHierarchyResolver: Send + Sync {
    /// Owner of the parent workspace, if `workspace_id` has one.
    async fn get_parent_owner(&self, workspace_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl TrackingStore for SqliteStore {
    async fn get_shipment_pointer(&self, shipment_id: &str) -> Result<Option<ShipmentPointer>> {
        db::get_shipment_pointer(&self.pool, shipment_id).await
    }

    async fn find_shipment_by_tracking_number(
        &self,
        tracking_number: &str,
    ) -> Result<Option<String>> {
        db::find_shipment_id_by_tracking_number(&self.pool, tracking_number).await
    }

    async fn upsert_event(&self, event: &NewTrackingEvent) -> Result<bool> {
        db::upsert_tracking_event(&self.pool, event).await
    }

    async fn list_events(&self, shipment_id: &str) -> Result<Vec<TrackingEvent>> {
        db::list_tracking_events(&self.pool, shipment_id).await
    }

    async fn mark_synced(
        &self,
        shipment_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<Option<NormalizedStatus>> {
        db::refresh_tracking_pointer(&self.pool, shipment_id, synced_at).await
    }

    async fn select_stale_shipments(
        &self,
        updated_before: DateTime<Utc>,
        created_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StaleShipment>> {
        db::select_stale_shipments(&self.pool, updated_before, created_since, limit).await
    }

    async fn get_shipment_owner(&self, shipment_id: &str) -> Result<Option<ShipmentOwner>> {
        db::get_shipment_owner(&self.pool, shipment_id).await
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn exists_recent(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        shipment_id: &str,
        window: Duration,
    ) -> Result<bool> {
        let since = Utc::now() - window;
        db::notification_exists_since(&self.pool, user_id, notification_type, shipment_id, since)
            .await
    }

    async fn insert(&self, notification: &NewNotification) -> Result<InsertOutcome> {
        db::insert_notification(&self.pool, notification).await
    }

    async fn preferred_channels(&self, user_id: &str) -> Result<Vec<Channel>> {
        db::get_preferred_channels(&self.pool, user_id).await
    }
}

#[async_trait]
impl WorkspaceHierarchyResolver for SqliteStore {
    async fn get_parent_owner(&self, workspace_id: &str) -> Result<Option<String>> {
        db::get_parent_workspace_owner(&self.pool, workspace_id).await
    }
}
