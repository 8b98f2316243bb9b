//! Fixed notification policy: which tracking changes are worth telling a user about.
use crate::model::{CarrierEventKind, NormalizedStatus, NotificationType, Severity, WebhookData};
use crate::templates;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationDecision {
    pub notification_type: NotificationType,
    pub severity: Severity,
}

impl NotificationDecision {
    fn new(notification_type: NotificationType) -> Self {
        Self {
            notification_type,
            severity: severity_of(notification_type),
        }
    }

    /// High-severity decisions go to email and fan out to resellers.
    pub fn is_high_severity(&self) -> bool {
        self.severity >= Severity::High
    }

    pub fn render(&self, data: &WebhookData) -> String {
        templates::render_message(self.notification_type, data)
    }
}

pub fn severity_of(kind: NotificationType) -> Severity {
    match kind {
        NotificationType::GiacenzaDetected => Severity::Critical,
        NotificationType::DeliveryFailed => Severity::High,
        NotificationType::ShipmentDelivered => Severity::Normal,
        NotificationType::TrackingOutForDelivery => Severity::Low,
    }
}

/// First matching rule wins. In-transit, created, pickup and similar
/// progress updates produce no notification.
pub fn decide(event: CarrierEventKind, status: NormalizedStatus) -> Option<NotificationDecision> {
    let kind = if event == CarrierEventKind::Delivered || status == NormalizedStatus::Delivered {
        NotificationType::ShipmentDelivered
    } else if event == CarrierEventKind::Exception || status == NormalizedStatus::InGiacenza {
        NotificationType::GiacenzaDetected
    } else if status == NormalizedStatus::Exception {
        NotificationType::DeliveryFailed
    } else if status == NormalizedStatus::OutForDelivery {
        NotificationType::TrackingOutForDelivery
    } else {
        return None;
    };
    Some(NotificationDecision::new(kind))
}
