//! Turns tracking signals into deduplicated, per-recipient notifications.
//!
//! [`NotificationDispatcher::dispatch`] never fails: every problem is logged
//! and folded into the returned [`DispatchOutcome`]. Callers that must not wait
//! on delivery submit jobs through a [`DispatchHandle`] instead.
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::OutboundChannel;
use crate::db::{InsertOutcome, NewNotification};
use crate::model::{Channel, NormalizedStatus, TrackingWebhook};
use crate::normalizer::normalize;
use crate::rules::{self, NotificationDecision};
use crate::store::{NotificationStore, TrackingStore, WorkspaceHierarchyResolver};
use crate::templates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoRule,
    NoOwner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Delivery {
    Sent { channels: Vec<Channel> },
    Duplicate,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientOutcome {
    pub user_id: String,
    pub reseller: bool,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Skipped { reason: SkipReason },
    Dispatched { recipients: Vec<RecipientOutcome> },
    Failed { reason: String },
}

impl DispatchOutcome {
    /// Number of notification records written by this dispatch.
    pub fn sent_count(&self) -> usize {
        match self {
            DispatchOutcome::Dispatched { recipients } => recipients
                .iter()
                .filter(|r| matches!(r.delivery, Delivery::Sent { .. }))
                .count(),
            _ => 0,
        }
    }
}

pub struct NotificationDispatcher {
    tracking: Arc<dyn TrackingStore>,
    notifications: Arc<dyn NotificationStore>,
    hierarchy: Arc<dyn WorkspaceHierarchyResolver>,
    email: Arc<dyn OutboundChannel>,
    dedup_window: Duration,
}

struct Notice<'a> {
    payload: &'a TrackingWebhook,
    shipment_id: &'a str,
    status: NormalizedStatus,
    decision: NotificationDecision,
}

impl NotificationDispatcher {
    pub fn new(
        tracking: Arc<dyn TrackingStore>,
        notifications: Arc<dyn NotificationStore>,
        hierarchy: Arc<dyn WorkspaceHierarchyResolver>,
        email: Arc<dyn OutboundChannel>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            tracking,
            notifications,
            hierarchy,
            email,
            dedup_window,
        }
    }

    #[instrument(skip_all, fields(shipment_id = %shipment_id, event = payload.event.as_str()))]
    pub async fn dispatch(&self, payload: &TrackingWebhook, shipment_id: &str) -> DispatchOutcome {
        let status = normalize(&payload.data.status);
        let Some(decision) = rules::decide(payload.event, status) else {
            debug!(status = status.as_str(), "no notification rule matched");
            return DispatchOutcome::Skipped {
                reason: SkipReason::NoRule,
            };
        };

        let owner = match self.tracking.get_shipment_owner(shipment_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                debug!("shipment has no owner; skipping notification");
                return DispatchOutcome::Skipped {
                    reason: SkipReason::NoOwner,
                };
            }
            Err(err) => {
                error!(?err, "failed to resolve shipment owner");
                return DispatchOutcome::Failed {
                    reason: format!("{:#}", err),
                };
            }
        };

        let notice = Notice {
            payload,
            shipment_id,
            status,
            decision,
        };

        let mut recipients = vec![RecipientOutcome {
            user_id: owner.user_id.clone(),
            reseller: false,
            delivery: self.deliver(&notice, &owner.user_id, false).await,
        }];

        if decision.is_high_severity() {
            if let Some(workspace_id) = owner.workspace_id.as_deref() {
                match self.hierarchy.get_parent_owner(workspace_id).await {
                    Ok(Some(parent)) if parent != owner.user_id => {
                        let delivery = self.deliver(&notice, &parent, true).await;
                        recipients.push(RecipientOutcome {
                            user_id: parent,
                            reseller: true,
                            delivery,
                        });
                    }
                    Ok(_) => {}
                    Err(err) => warn!(?err, workspace_id, "failed to resolve parent workspace owner"),
                }
            }
        }

        info!(
            notification_type = decision.notification_type.as_str(),
            recipients = recipients.len(),
            "tracking notification dispatched"
        );
        DispatchOutcome::Dispatched { recipients }
    }

    async fn deliver(&self, notice: &Notice<'_>, user_id: &str, reseller: bool) -> Delivery {
        match self.try_deliver(notice, user_id, reseller).await {
            Ok(delivery) => delivery,
            Err(err) => {
                error!(?err, user_id, reseller, "failed to record notification");
                Delivery::Failed {
                    reason: format!("{:#}", err),
                }
            }
        }
    }

    async fn try_deliver(
        &self,
        notice: &Notice<'_>,
        user_id: &str,
        reseller: bool,
    ) -> anyhow::Result<Delivery> {
        let kind = notice.decision.notification_type;
        if self
            .notifications
            .exists_recent(user_id, kind, notice.shipment_id, self.dedup_window)
            .await?
        {
            debug!(user_id, notification_type = kind.as_str(), "duplicate within window");
            return Ok(Delivery::Duplicate);
        }

        let mut message = notice.decision.render(&notice.payload.data);
        if reseller {
            message.insert_str(0, templates::RESELLER_PREFIX);
        }

        let preferred = match self.notifications.preferred_channels(user_id).await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(?err, user_id, "failed to load channel preferences; using in-app only");
                vec![Channel::InApp]
            }
        };

        let mut channels = vec![Channel::InApp];
        if notice.decision.is_high_severity() && preferred.contains(&Channel::Email) {
            let subject = templates::email_subject(kind);
            let html = templates::email_html(kind, &message, &notice.payload.data);
            if self.email.send_email(user_id, subject, &html).await {
                channels.push(Channel::Email);
            }
        }

        let created_at = Utc::now();
        let record = NewNotification {
            user_id: user_id.to_string(),
            notification_type: kind,
            shipment_id: notice.shipment_id.to_string(),
            message,
            metadata: metadata(notice, reseller),
            channels,
            created_at,
            dedup_bucket: dedup_bucket(created_at, self.dedup_window),
        };

        match self.notifications.insert(&record).await? {
            InsertOutcome::Inserted => Ok(Delivery::Sent {
                channels: record.channels,
            }),
            InsertOutcome::Duplicate => Ok(Delivery::Duplicate),
        }
    }
}

fn metadata(notice: &Notice<'_>, reseller: bool) -> Value {
    let data = &notice.payload.data;
    let mut meta = json!({
        "tracking_number": data.tracking_number,
        "carrier": data.carrier,
        "status": data.status,
        "status_normalized": notice.status.as_str(),
        "status_description": data.status_description,
        "event": notice.payload.event.as_str(),
        "severity": notice.decision.severity,
    });
    if reseller {
        meta["is_reseller_alert"] = Value::Bool(true);
    }
    meta
}

/// Index of the dedup window containing `at`.
pub fn dedup_bucket(at: DateTime<Utc>, window: Duration) -> i64 {
    let secs = window.num_seconds().max(1);
    at.timestamp().div_euclid(secs)
}

#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub payload: TrackingWebhook,
    pub shipment_id: String,
}

/// Cheap, cloneable submit side of the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchJob>,
}

impl DispatchHandle {
    /// Enqueue and return immediately. `false` if the worker has stopped.
    pub fn submit(&self, payload: TrackingWebhook, shipment_id: impl Into<String>) -> bool {
        let job = DispatchJob {
            payload,
            shipment_id: shipment_id.into(),
        };
        match self.tx.send(job) {
            Ok(()) => true,
            Err(err) => {
                warn!(shipment_id = %err.0.shipment_id, "dispatch worker stopped; dropping job");
                false
            }
        }
    }
}

/// Start the dispatch worker. It drains the queue until every handle is dropped.
pub fn spawn_dispatch_worker(
    dispatcher: Arc<NotificationDispatcher>,
) -> (DispatchHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchJob>();
    let worker = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let outcome = dispatcher.dispatch(&job.payload, &job.shipment_id).await;
            debug!(shipment_id = %job.shipment_id, ?outcome, "dispatch job finished");
        }
        debug!("dispatch queue closed");
    });
    (DispatchHandle { tx }, worker)
}
