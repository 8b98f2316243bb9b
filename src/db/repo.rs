use super::model::{
    InsertOutcome, NewNotification, NewTrackingEvent, ShipmentOwner, ShipmentPointer,
    StaleShipment,
};
use crate::model::{Channel, NormalizedStatus, NotificationRecord, NotificationType, TrackingEvent};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

/// Timestamps are stored as fixed-width UTC text so that lexical order is
/// chronological order.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid stored timestamp '{}'", s))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.filter(|v| !v.trim().is_empty())
        .map(|v| parse_ts(&v))
        .transpose()
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded_path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn status_column(row: &SqliteRow, column: &str) -> Option<NormalizedStatus> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .and_then(|s| NormalizedStatus::parse_status(&s))
}

#[instrument(skip_all, fields(shipment_id = %shipment_id))]
pub async fn get_shipment_pointer(pool: &Pool, shipment_id: &str) -> Result<Option<ShipmentPointer>> {
    let row = sqlx::query(
        "SELECT id, tracking_number, carrier, tracking_status, tracking_last_update, created_at \
         FROM shipments WHERE id = ?",
    )
    .bind(shipment_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let created_at: String = row.get("created_at");
    Ok(Some(ShipmentPointer {
        id: row.get("id"),
        tracking_number: row
            .try_get::<Option<String>, _>("tracking_number")?
            .filter(|s| !s.trim().is_empty()),
        carrier: row.try_get::<Option<String>, _>("carrier")?,
        tracking_status: status_column(&row, "tracking_status"),
        tracking_last_update: parse_opt_ts(row.try_get("tracking_last_update")?)?,
        created_at: parse_ts(&created_at)?,
    }))
}

#[instrument(skip_all)]
pub async fn find_shipment_id_by_tracking_number(
    pool: &Pool,
    tracking_number: &str,
) -> Result<Option<String>> {
    let id = sqlx::query_scalar::<_, String>(
        "SELECT id FROM shipments WHERE tracking_number = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(tracking_number)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

/// Insert an event unless its `(shipment_id, event_date, status)` key already
/// exists. Returns whether a new row was written.
#[instrument(skip_all)]
pub async fn upsert_tracking_event(pool: &Pool, event: &NewTrackingEvent) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO tracking_events \
            (shipment_id, tracking_number, event_date, status, status_normalized, location, \
             carrier, provider, raw_data, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (shipment_id, event_date, status) DO NOTHING",
    )
    .bind(&event.shipment_id)
    .bind(&event.tracking_number)
    .bind(fmt_ts(event.event_date))
    .bind(&event.status)
    .bind(event.status_normalized.as_str())
    .bind(&event.location)
    .bind(&event.carrier)
    .bind(&event.provider)
    .bind(event.raw_data.to_string())
    .bind(fmt_ts(event.fetched_at))
    .execute(pool)
    .await
    .context("failed to upsert tracking event")?;
    Ok(res.rows_affected() > 0)
}

fn map_event(row: &SqliteRow) -> Result<TrackingEvent> {
    let event_date: String = row.get("event_date");
    let fetched_at: String = row.get("fetched_at");
    let raw: Option<String> = row.try_get("raw_data")?;
    Ok(TrackingEvent {
        id: row.get("id"),
        shipment_id: row.get("shipment_id"),
        tracking_number: row.get("tracking_number"),
        event_date: parse_ts(&event_date)?,
        status: row.get("status"),
        status_normalized: status_column(row, "status_normalized")
            .unwrap_or(NormalizedStatus::Unknown),
        location: row.try_get("location")?,
        carrier: row.get("carrier"),
        provider: row.get("provider"),
        raw_data: raw.and_then(|r| serde_json::from_str(&r).ok()),
        fetched_at: parse_ts(&fetched_at)?,
    })
}

/// Cached events for a shipment, newest first.
#[instrument(skip_all, fields(shipment_id = %shipment_id))]
pub async fn list_tracking_events(pool: &Pool, shipment_id: &str) -> Result<Vec<TrackingEvent>> {
    let rows = sqlx::query(
        "SELECT id, shipment_id, tracking_number, event_date, status, status_normalized, \
                location, carrier, provider, raw_data, fetched_at \
         FROM tracking_events WHERE shipment_id = ? \
         ORDER BY event_date DESC, id DESC",
    )
    .bind(shipment_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_event).collect()
}

/// Recompute the cached status from the newest stored event and move the
/// sync watermark to `synced_at`. Returns the resulting cached status.
#[instrument(skip_all, fields(shipment_id = %shipment_id))]
pub async fn refresh_tracking_pointer(
    pool: &Pool,
    shipment_id: &str,
    synced_at: DateTime<Utc>,
) -> Result<Option<NormalizedStatus>> {
    let mut tx = pool.begin().await?;
    let latest: Option<String> = sqlx::query_scalar(
        "SELECT status_normalized FROM tracking_events WHERE shipment_id = ? \
         ORDER BY event_date DESC, id DESC LIMIT 1",
    )
    .bind(shipment_id)
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE shipments SET tracking_status = COALESCE(?, tracking_status), \
         tracking_last_update = ? WHERE id = ?",
    )
    .bind(latest.as_deref())
    .bind(fmt_ts(synced_at))
    .bind(shipment_id)
    .execute(&mut *tx)
    .await?;

    let status: Option<String> =
        sqlx::query_scalar("SELECT tracking_status FROM shipments WHERE id = ?")
            .bind(shipment_id)
            .fetch_optional(&mut *tx)
            .await?
            .flatten();
    tx.commit().await?;
    Ok(status.and_then(|s| NormalizedStatus::parse_status(&s)))
}

/// Shipments whose tracking is due: non-terminal, stale (or never synced),
/// created since `created_since`, oldest watermark first.
#[instrument(skip_all)]
pub async fn select_stale_shipments(
    pool: &Pool,
    updated_before: DateTime<Utc>,
    created_since: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<StaleShipment>> {
    let rows = sqlx::query(
        "SELECT id, tracking_number, carrier, tracking_last_update FROM shipments \
         WHERE tracking_number IS NOT NULL AND TRIM(tracking_number) <> '' \
           AND (tracking_status IS NULL OR tracking_status NOT IN ('delivered', 'cancelled')) \
           AND (tracking_last_update IS NULL OR tracking_last_update < ?) \
           AND created_at >= ? \
         ORDER BY tracking_last_update IS NOT NULL, tracking_last_update ASC, created_at ASC \
         LIMIT ?",
    )
    .bind(fmt_ts(updated_before))
    .bind(fmt_ts(created_since))
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<StaleShipment> {
            Ok(StaleShipment {
                id: row.get("id"),
                tracking_number: row.get("tracking_number"),
                carrier: row.try_get("carrier")?,
                tracking_last_update: parse_opt_ts(row.try_get("tracking_last_update")?)?,
            })
        })
        .collect()
}

#[instrument(skip_all, fields(shipment_id = %shipment_id))]
pub async fn get_shipment_owner(pool: &Pool, shipment_id: &str) -> Result<Option<ShipmentOwner>> {
    let row = sqlx::query("SELECT user_id, workspace_id FROM shipments WHERE id = ?")
        .bind(shipment_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let user_id: Option<String> = row.try_get("user_id")?;
    Ok(user_id
        .filter(|u| !u.trim().is_empty())
        .map(|user_id| ShipmentOwner {
            user_id,
            workspace_id: row
                .try_get::<Option<String>, _>("workspace_id")
                .ok()
                .flatten(),
        }))
}

#[instrument(skip_all)]
pub async fn notification_exists_since(
    pool: &Pool,
    user_id: &str,
    notification_type: NotificationType,
    shipment_id: &str,
    since: DateTime<Utc>,
) -> Result<bool> {
    let found: Option<String> = sqlx::query_scalar(
        "SELECT id FROM notifications \
         WHERE user_id = ? AND type = ? AND shipment_id = ? AND created_at >= ? LIMIT 1",
    )
    .bind(user_id)
    .bind(notification_type.as_str())
    .bind(shipment_id)
    .bind(fmt_ts(since))
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Insert a notification. A conflict on the dedup bucket is reported as
/// [`InsertOutcome::Duplicate`] rather than an error.
#[instrument(skip_all)]
pub async fn insert_notification(pool: &Pool, n: &NewNotification) -> Result<InsertOutcome> {
    let channels: Vec<&str> = n.channels.iter().map(Channel::as_str).collect();
    let res = sqlx::query(
        "INSERT INTO notifications \
            (id, user_id, type, shipment_id, message, metadata, channels_delivered, created_at, dedup_bucket) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, type, shipment_id, dedup_bucket) DO NOTHING",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&n.user_id)
    .bind(n.notification_type.as_str())
    .bind(&n.shipment_id)
    .bind(&n.message)
    .bind(n.metadata.to_string())
    .bind(serde_json::to_string(&channels)?)
    .bind(fmt_ts(n.created_at))
    .bind(n.dedup_bucket)
    .execute(pool)
    .await
    .context("failed to insert notification")?;
    Ok(if res.rows_affected() > 0 {
        InsertOutcome::Inserted
    } else {
        InsertOutcome::Duplicate
    })
}

fn parse_notification_type(s: &str) -> Result<NotificationType> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow!("unknown notification type {}", s))
}

#[instrument(skip_all, fields(shipment_id = %shipment_id))]
pub async fn list_notifications_for_shipment(
    pool: &Pool,
    shipment_id: &str,
) -> Result<Vec<NotificationRecord>> {
    let rows = sqlx::query(
        "SELECT id, user_id, type, shipment_id, message, metadata, channels_delivered, created_at, dedup_bucket \
         FROM notifications WHERE shipment_id = ? ORDER BY created_at ASC, user_id ASC",
    )
    .bind(shipment_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<NotificationRecord> {
            let kind: String = row.get("type");
            let metadata: String = row.get("metadata");
            let channels: String = row.get("channels_delivered");
            let created_at: String = row.get("created_at");
            Ok(NotificationRecord {
                id: row.get("id"),
                user_id: row.get("user_id"),
                notification_type: parse_notification_type(&kind)?,
                shipment_id: row.get("shipment_id"),
                message: row.get("message"),
                metadata: serde_json::from_str(&metadata)?,
                channels: serde_json::from_str(&channels)?,
                created_at: parse_ts(&created_at)?,
                dedup_bucket: row.get("dedup_bucket"),
            })
        })
        .collect()
}

/// Channels a user opted into; `in_app` when unset or unreadable.
#[instrument(skip_all)]
pub async fn get_preferred_channels(pool: &Pool, user_id: &str) -> Result<Vec<Channel>> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT notification_channels FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .flatten();
    let channels = raw
        .and_then(|r| serde_json::from_str::<Vec<Channel>>(&r).ok())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| vec![Channel::InApp]);
    Ok(channels)
}

/// Active owner of the parent of `workspace_id`, if the workspace has a parent.
#[instrument(skip_all)]
pub async fn get_parent_workspace_owner(pool: &Pool, workspace_id: &str) -> Result<Option<String>> {
    let owner = sqlx::query_scalar::<_, String>(
        "SELECT m.user_id FROM workspaces w \
         JOIN workspace_members m ON m.workspace_id = w.parent_workspace_id \
         WHERE w.id = ? AND m.role = 'owner' AND m.status = 'active' \
         LIMIT 1",
    )
    .bind(workspace_id)
    .fetch_optional(pool)
    .await?;
    Ok(owner)
}
