use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical shipment lifecycle stage, independent of carrier wording.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedStatus {
    Created,
    PendingPickup,
    InTransit,
    OutForDelivery,
    AtDestination,
    InGiacenza,
    Delivered,
    Exception,
    Returned,
    Cancelled,
    Unknown,
}

impl NormalizedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedStatus::Created => "created",
            NormalizedStatus::PendingPickup => "pending_pickup",
            NormalizedStatus::InTransit => "in_transit",
            NormalizedStatus::OutForDelivery => "out_for_delivery",
            NormalizedStatus::AtDestination => "at_destination",
            NormalizedStatus::InGiacenza => "in_giacenza",
            NormalizedStatus::Delivered => "delivered",
            NormalizedStatus::Exception => "exception",
            NormalizedStatus::Returned => "returned",
            NormalizedStatus::Cancelled => "cancelled",
            NormalizedStatus::Unknown => "unknown",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "created" => Some(NormalizedStatus::Created),
            "pending_pickup" => Some(NormalizedStatus::PendingPickup),
            "in_transit" => Some(NormalizedStatus::InTransit),
            "out_for_delivery" => Some(NormalizedStatus::OutForDelivery),
            "at_destination" => Some(NormalizedStatus::AtDestination),
            "in_giacenza" => Some(NormalizedStatus::InGiacenza),
            "delivered" => Some(NormalizedStatus::Delivered),
            "exception" => Some(NormalizedStatus::Exception),
            "returned" => Some(NormalizedStatus::Returned),
            "cancelled" => Some(NormalizedStatus::Cancelled),
            "unknown" => Some(NormalizedStatus::Unknown),
            _ => None,
        }
    }

    /// Terminal states stop tracking refreshes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NormalizedStatus::Delivered | NormalizedStatus::Cancelled)
    }
}

/// Kind of event announced by a carrier webhook.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CarrierEventKind {
    #[serde(rename = "tracking.updated")]
    Updated,
    #[serde(rename = "tracking.in_transit")]
    InTransit,
    #[serde(rename = "tracking.out_for_delivery")]
    OutForDelivery,
    #[serde(rename = "tracking.delivered")]
    Delivered,
    #[serde(rename = "tracking.exception")]
    Exception,
    #[serde(other)]
    Other,
}

impl CarrierEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarrierEventKind::Updated => "tracking.updated",
            CarrierEventKind::InTransit => "tracking.in_transit",
            CarrierEventKind::OutForDelivery => "tracking.out_for_delivery",
            CarrierEventKind::Delivered => "tracking.delivered",
            CarrierEventKind::Exception => "tracking.exception",
            CarrierEventKind::Other => "tracking.other",
        }
    }
}

/// Inbound tracking signal: either a carrier webhook body or a status change
/// detected by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingWebhook {
    pub event: CarrierEventKind,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookData {
    pub tracking_number: String,
    #[serde(default)]
    pub carrier: Option<String>,
    pub status: String,
    #[serde(default)]
    pub status_description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ShipmentDelivered,
    GiacenzaDetected,
    DeliveryFailed,
    TrackingOutForDelivery,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ShipmentDelivered => "shipment_delivered",
            NotificationType::GiacenzaDetected => "giacenza_detected",
            NotificationType::DeliveryFailed => "delivery_failed",
            NotificationType::TrackingOutForDelivery => "tracking_out_for_delivery",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "in_app",
            Channel::Email => "email",
        }
    }
}

/// One carrier-reported milestone as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingEvent {
    pub id: i64,
    pub shipment_id: String,
    pub tracking_number: String,
    pub event_date: DateTime<Utc>,
    pub status: String,
    pub status_normalized: NormalizedStatus,
    pub location: Option<String>,
    pub carrier: String,
    pub provider: String,
    pub raw_data: Option<Value>,
    pub fetched_at: DateTime<Utc>,
}

/// Result of a tracking read, always rebuilt from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub shipment_id: String,
    pub tracking_number: String,
    pub carrier: Option<String>,
    pub current_status: String,
    pub current_status_normalized: NormalizedStatus,
    pub last_update: Option<DateTime<Utc>>,
    pub events: Vec<TrackingEvent>,
    pub is_delivered: bool,
    pub refreshed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub shipment_id: String,
    pub message: String,
    pub metadata: Value,
    pub channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
    pub dedup_bucket: i64,
}
