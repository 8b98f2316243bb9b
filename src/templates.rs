//! Rendered text for tracking notifications: in-app message, email subject
//! and email body.
use crate::model::{NotificationType, WebhookData};

/// Prefix for copies sent to the reseller that owns the client workspace.
pub const RESELLER_PREFIX: &str = "[Client] ";

fn carrier_label(data: &WebhookData) -> String {
    data.carrier
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_uppercase)
        .unwrap_or_else(|| "N/A".to_string())
}

fn description(data: &WebhookData) -> Option<&str> {
    data.status_description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
}

pub fn render_message(kind: NotificationType, data: &WebhookData) -> String {
    let tn = &data.tracking_number;
    let carrier = carrier_label(data);
    match kind {
        NotificationType::ShipmentDelivered => match description(data) {
            Some(d) => format!("Shipment {} delivered by {}: {}", tn, carrier, d),
            None => format!("Shipment {} delivered by {}.", tn, carrier),
        },
        NotificationType::GiacenzaDetected => format!(
            "Shipment {} is held at the {} depot: {}",
            tn,
            carrier,
            description(data).unwrap_or("check the shipment in the dashboard.")
        ),
        NotificationType::DeliveryFailed => format!(
            "Delivery problem with shipment {} ({}): {}",
            tn,
            carrier,
            description(data).unwrap_or("check the details in the dashboard.")
        ),
        NotificationType::TrackingOutForDelivery => {
            format!("Parcel {} is out for delivery today with {}.", tn, carrier)
        }
    }
}

pub fn email_subject(kind: NotificationType) -> &'static str {
    match kind {
        NotificationType::ShipmentDelivered => "Shipment delivered",
        NotificationType::GiacenzaDetected => "Shipment held at depot",
        NotificationType::DeliveryFailed => "Delivery problem",
        NotificationType::TrackingOutForDelivery => "Parcel out for delivery today",
    }
}

fn accent_color(kind: NotificationType) -> &'static str {
    match kind {
        NotificationType::ShipmentDelivered => "#10b981",
        NotificationType::GiacenzaDetected => "#f59e0b",
        NotificationType::DeliveryFailed => "#ef4444",
        NotificationType::TrackingOutForDelivery => "#3b82f6",
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn email_html(kind: NotificationType, message: &str, data: &WebhookData) -> String {
    let color = accent_color(kind);
    let carrier_line = match data.carrier.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(_) => format!(
            r#"<p style="color:#64748b;font-size:13px;margin:0;">Carrier: {}</p>"#,
            escape_html(&carrier_label(data))
        ),
        None => String::new(),
    };
    format!(
        r#"<div style="font-family:sans-serif;max-width:600px;margin:0 auto;padding:20px;">
  <div style="background:{color};padding:24px;border-radius:12px 12px 0 0;text-align:center;">
    <h1 style="color:white;margin:0;font-size:22px;">{subject}</h1>
  </div>
  <div style="background:#f8fafc;padding:24px;border:1px solid #e2e8f0;border-top:none;">
    <div style="background:white;padding:16px;border-radius:8px;border-left:4px solid {color};margin-bottom:16px;">
      <p style="color:#0f172a;font-size:14px;margin:0 0 8px 0;font-weight:600;">Tracking: <span style="font-family:monospace;">{tracking}</span></p>
      {carrier_line}
    </div>
    <p style="color:#334155;font-size:15px;line-height:1.6;">{message}</p>
  </div>
</div>"#,
        color = color,
        subject = email_subject(kind),
        tracking = escape_html(&data.tracking_number),
        carrier_line = carrier_line,
        message = escape_html(message),
    )
}
