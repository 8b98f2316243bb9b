//! Tracking cache: refresh-on-read and the background batch sync.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::carrier::{parse_carrier_timestamp, CarrierTrackingClient, PROVIDER};
use crate::config;
use crate::db::{NewTrackingEvent, ShipmentPointer, StaleShipment};
use crate::dispatcher::DispatchHandle;
use crate::model::{
    CarrierEventKind, NormalizedStatus, TrackingEvent, TrackingSnapshot, TrackingWebhook,
    WebhookData,
};
use crate::normalizer::normalize;
use crate::rate_limit::{backoff_delay, RateLimiter};
use crate::store::TrackingStore;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("shipment {0} not found")]
    ShipmentNotFound(String),
    #[error("shipment {0} has no tracking number")]
    NoTrackingNumber(String),
    #[error("tracking store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Will not succeed on retry.
    Permanent,
    Transient,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub events_fetched: usize,
    pub inserted: usize,
    pub failed_writes: usize,
    pub error: Option<SyncErrorKind>,
    pub status: Option<NormalizedStatus>,
    pub status_changed: bool,
}

impl FetchOutcome {
    fn failed(kind: SyncErrorKind) -> Self {
        Self {
            error: Some(kind),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_age: ChronoDuration,
    pub limit: u32,
    pub delay: Duration,
}

impl SyncOptions {
    pub fn from_config(cfg: &config::Tracking) -> Self {
        Self {
            max_age: cfg.sync_max_age(),
            limit: cfg.sync_batch_limit,
            delay: cfg.sync_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetrics {
    pub total: usize,
    pub synced: usize,
    pub errors: usize,
    pub permanent_errors: usize,
    pub transient_errors: usize,
    pub retries: usize,
    pub events_upserted: usize,
    pub failed_writes: usize,
    pub duration_ms: u64,
}

/// Whether a read should go to the carrier. Delivered is final; cancelled is
/// only refreshed on explicit request.
pub fn should_refresh(
    pointer: &ShipmentPointer,
    force: bool,
    now: DateTime<Utc>,
    ttl: ChronoDuration,
) -> bool {
    match pointer.tracking_status {
        Some(NormalizedStatus::Delivered) => return false,
        Some(NormalizedStatus::Cancelled) => return force,
        _ => {}
    }
    if force {
        return true;
    }
    match pointer.tracking_last_update {
        None => true,
        Some(last) => now - last >= ttl,
    }
}

pub struct TrackingSyncEngine {
    store: Arc<dyn TrackingStore>,
    carrier: Arc<dyn CarrierTrackingClient>,
    settings: config::Tracking,
    dispatch: Option<DispatchHandle>,
}

impl TrackingSyncEngine {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        carrier: Arc<dyn CarrierTrackingClient>,
        settings: config::Tracking,
    ) -> Self {
        Self {
            store,
            carrier,
            settings,
            dispatch: None,
        }
    }

    /// Forward status changes to the notification queue.
    pub fn with_dispatch(mut self, handle: DispatchHandle) -> Self {
        self.dispatch = Some(handle);
        self
    }

    pub fn settings(&self) -> &config::Tracking {
        &self.settings
    }

    #[instrument(skip_all, fields(shipment_id = %shipment_id, force_refresh = force_refresh))]
    pub async fn get_tracking(
        &self,
        shipment_id: &str,
        force_refresh: bool,
    ) -> Result<TrackingSnapshot, TrackingError> {
        let pointer = self
            .store
            .get_shipment_pointer(shipment_id)
            .await?
            .ok_or_else(|| TrackingError::ShipmentNotFound(shipment_id.to_string()))?;
        let tracking_number = pointer
            .tracking_number
            .clone()
            .ok_or_else(|| TrackingError::NoTrackingNumber(shipment_id.to_string()))?;

        let mut refreshed = false;
        if should_refresh(&pointer, force_refresh, Utc::now(), self.settings.cache_ttl()) {
            let outcome = self
                .fetch_and_cache(shipment_id, &tracking_number, pointer.carrier.as_deref())
                .await;
            refreshed = outcome.is_ok();
        } else {
            debug!("serving tracking from cache");
        }

        let pointer = if refreshed {
            self.store
                .get_shipment_pointer(shipment_id)
                .await?
                .ok_or_else(|| TrackingError::ShipmentNotFound(shipment_id.to_string()))?
        } else {
            pointer
        };
        let events = self.store.list_events(shipment_id).await?;
        Ok(snapshot(pointer, tracking_number, events, refreshed))
    }

    pub async fn get_tracking_by_number(
        &self,
        tracking_number: &str,
        force_refresh: bool,
    ) -> Result<TrackingSnapshot, TrackingError> {
        let shipment_id = self
            .store
            .find_shipment_by_tracking_number(tracking_number)
            .await?
            .ok_or_else(|| TrackingError::ShipmentNotFound(tracking_number.to_string()))?;
        self.get_tracking(&shipment_id, force_refresh).await
    }

    /// Fetch from the carrier and merge into the store. Never fails: carrier
    /// and store problems are logged and reported in the outcome.
    #[instrument(skip_all, fields(shipment_id = %shipment_id, tracking_number = %tracking_number))]
    pub async fn fetch_and_cache(
        &self,
        shipment_id: &str,
        tracking_number: &str,
        carrier: Option<&str>,
    ) -> FetchOutcome {
        let previous = match self.store.get_shipment_pointer(shipment_id).await {
            Ok(p) => p.and_then(|p| p.tracking_status),
            Err(err) => {
                warn!(?err, "failed to read shipment pointer");
                return FetchOutcome::failed(SyncErrorKind::Transient);
            }
        };

        let raw_events = match self.carrier.fetch(tracking_number).await {
            Ok(events) => events,
            Err(err) => {
                let kind = if err.is_permanent() {
                    SyncErrorKind::Permanent
                } else {
                    SyncErrorKind::Transient
                };
                warn!(error = %err, ?kind, "carrier fetch failed");
                return FetchOutcome::failed(kind);
            }
        };

        let carrier_id = carrier
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("unknown")
            .to_lowercase();
        let fetched_at = Utc::now();
        let mut outcome = FetchOutcome {
            events_fetched: raw_events.len(),
            ..FetchOutcome::default()
        };

        let mut store_errors = 0usize;
        for raw in raw_events {
            let Some(event_date) = parse_carrier_timestamp(&raw.timestamp) else {
                warn!(timestamp = %raw.timestamp, "unparseable carrier timestamp");
                outcome.failed_writes += 1;
                continue;
            };
            let event = NewTrackingEvent {
                shipment_id: shipment_id.to_string(),
                tracking_number: tracking_number.to_string(),
                event_date,
                status_normalized: normalize(&raw.status),
                status: raw.status,
                location: raw.location,
                carrier: carrier_id.clone(),
                provider: PROVIDER.to_string(),
                raw_data: raw.raw,
                fetched_at,
            };
            match self.store.upsert_event(&event).await {
                Ok(true) => outcome.inserted += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(?err, "failed to store tracking event");
                    outcome.failed_writes += 1;
                    store_errors += 1;
                }
            }
        }

        // Keep the shipment due so the missing events are fetched again.
        if store_errors > 0 {
            warn!(store_errors, "tracking events not stored; watermark left unchanged");
            outcome.error = Some(SyncErrorKind::Transient);
            return outcome;
        }

        let current = match self.store.mark_synced(shipment_id, fetched_at).await {
            Ok(status) => status,
            Err(err) => {
                warn!(?err, "failed to update tracking pointer");
                outcome.error = Some(SyncErrorKind::Transient);
                return outcome;
            }
        };
        outcome.status = current;
        outcome.status_changed = current.is_some() && current != previous;

        if outcome.status_changed {
            self.signal_status_change(shipment_id, tracking_number, carrier)
                .await;
        }

        debug!(
            fetched = outcome.events_fetched,
            inserted = outcome.inserted,
            failed = outcome.failed_writes,
            status = ?outcome.status,
            "tracking cached"
        );
        outcome
    }

    async fn signal_status_change(
        &self,
        shipment_id: &str,
        tracking_number: &str,
        carrier: Option<&str>,
    ) {
        let Some(handle) = self.dispatch.as_ref() else {
            return;
        };
        let latest = match self.store.list_events(shipment_id).await {
            Ok(events) => events.into_iter().next(),
            Err(err) => {
                warn!(?err, "failed to load latest event for notification");
                return;
            }
        };
        let Some(latest) = latest else {
            return;
        };
        handle.submit(status_change_payload(&latest, tracking_number, carrier), shipment_id);
    }

    /// Refresh every due shipment. Carrier calls are paced by one limiter
    /// shared across `sync_concurrency` workers.
    #[instrument(skip_all, fields(limit = options.limit))]
    pub async fn sync_batch(&self, options: SyncOptions) -> SyncMetrics {
        let started = Instant::now();
        let now = Utc::now();
        let mut metrics = SyncMetrics::default();

        let due = match self
            .store
            .select_stale_shipments(
                now - options.max_age,
                now - self.settings.sync_lookback(),
                options.limit,
            )
            .await
        {
            Ok(due) => due,
            Err(err) => {
                warn!(?err, "failed to select shipments for sync");
                metrics.errors += 1;
                metrics.transient_errors += 1;
                metrics.duration_ms = started.elapsed().as_millis() as u64;
                return metrics;
            }
        };
        metrics.total = due.len();
        if due.is_empty() {
            debug!("no shipments due for tracking sync");
            return metrics;
        }

        let limiter = RateLimiter::new(options.delay);
        let concurrency = self.settings.sync_concurrency.max(1);
        let results: Vec<(FetchOutcome, usize)> = stream::iter(due)
            .map(|shipment| self.sync_one(shipment, &limiter, options.delay))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (outcome, retries) in results {
            metrics.retries += retries;
            metrics.events_upserted += outcome.inserted;
            metrics.failed_writes += outcome.failed_writes;
            match outcome.error {
                None => metrics.synced += 1,
                Some(kind) => {
                    metrics.errors += 1;
                    match kind {
                        SyncErrorKind::Permanent => metrics.permanent_errors += 1,
                        SyncErrorKind::Transient => metrics.transient_errors += 1,
                    }
                }
            }
        }
        metrics.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            total = metrics.total,
            synced = metrics.synced,
            errors = metrics.errors,
            retries = metrics.retries,
            events = metrics.events_upserted,
            "tracking sync batch finished"
        );
        metrics
    }

    async fn sync_one(
        &self,
        shipment: StaleShipment,
        limiter: &RateLimiter,
        delay: Duration,
    ) -> (FetchOutcome, usize) {
        let mut attempt: u32 = 0;
        loop {
            limiter.acquire().await;
            let outcome = self
                .fetch_and_cache(
                    &shipment.id,
                    &shipment.tracking_number,
                    shipment.carrier.as_deref(),
                )
                .await;
            let retry = outcome.error == Some(SyncErrorKind::Transient)
                && attempt < self.settings.sync_max_retries;
            if !retry {
                return (outcome, attempt as usize);
            }
            let wait = backoff_delay(delay, attempt, MAX_BACKOFF);
            debug!(shipment_id = %shipment.id, attempt, ?wait, "retrying tracking fetch");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

fn status_change_payload(
    latest: &TrackingEvent,
    tracking_number: &str,
    carrier: Option<&str>,
) -> TrackingWebhook {
    let event = if latest.status_normalized == NormalizedStatus::Delivered {
        CarrierEventKind::Delivered
    } else {
        CarrierEventKind::Updated
    };
    let description = match latest.location.as_deref() {
        Some(loc) => format!("{} ({})", latest.status, loc),
        None => latest.status.clone(),
    };
    TrackingWebhook {
        event,
        data: WebhookData {
            tracking_number: tracking_number.to_string(),
            carrier: carrier.map(str::to_string),
            status: latest.status.clone(),
            status_description: Some(description),
            extra: Default::default(),
        },
    }
}

fn snapshot(
    pointer: ShipmentPointer,
    tracking_number: String,
    events: Vec<TrackingEvent>,
    refreshed: bool,
) -> TrackingSnapshot {
    let newest = events.first();
    let current_status_normalized = pointer
        .tracking_status
        .or_else(|| newest.map(|e| e.status_normalized))
        .unwrap_or(NormalizedStatus::Unknown);
    let current_status = newest
        .map(|e| e.status.clone())
        .unwrap_or_else(|| current_status_normalized.as_str().to_string());
    TrackingSnapshot {
        shipment_id: pointer.id,
        tracking_number,
        carrier: pointer.carrier,
        current_status,
        current_status_normalized,
        last_update: pointer.tracking_last_update,
        is_delivered: current_status_normalized == NormalizedStatus::Delivered,
        events,
        refreshed,
    }
}
