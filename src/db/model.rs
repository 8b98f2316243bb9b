//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{Channel, NormalizedStatus, NotificationType};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Tracking columns of a shipment row.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentPointer {
    pub id: String,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub tracking_status: Option<NormalizedStatus>,
    pub tracking_last_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Shipment selected by the batch sync.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleShipment {
    pub id: String,
    pub tracking_number: String,
    pub carrier: Option<String>,
    pub tracking_last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentOwner {
    pub user_id: String,
    pub workspace_id: Option<String>,
}

/// Event row prior to insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackingEvent {
    pub shipment_id: String,
    pub tracking_number: String,
    pub event_date: DateTime<Utc>,
    pub status: String,
    pub status_normalized: NormalizedStatus,
    pub location: Option<String>,
    pub carrier: String,
    pub provider: String,
    pub raw_data: Value,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub shipment_id: String,
    pub message: String,
    pub metadata: Value,
    pub channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
    pub dedup_bucket: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}
