use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Provider tag stored on every cached event fetched through [`SpedisciOnlineClient`].
pub const PROVIDER: &str = "spediscionline";

/// One milestone as reported by the carrier, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrackingEvent {
    /// Carrier-formatted timestamp, e.g. `22/09/2016 15:22`.
    pub timestamp: String,
    pub status: String,
    pub location: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Error)]
pub enum CarrierError {
    #[error("carrier request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("carrier returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed carrier response: {0}")]
    Malformed(String),
    #[error("invalid carrier request: {0}")]
    InvalidRequest(String),
}

impl CarrierError {
    /// Permanent failures will not succeed on retry (unknown tracking number,
    /// rejected credentials, unparseable body).
    pub fn is_permanent(&self) -> bool {
        match self {
            CarrierError::Status { status, .. } => matches!(
                *status,
                StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
            ),
            CarrierError::Malformed(_) | CarrierError::InvalidRequest(_) => true,
            CarrierError::Transport(_) => false,
        }
    }
}

#[async_trait]
pub trait CarrierTrackingClient: Send + Sync {
    /// Ordered event list for a tracking number.
    async fn fetch(&self, tracking_number: &str) -> Result<Vec<RawTrackingEvent>, CarrierError>;
}

#[derive(Clone)]
pub struct SpedisciOnlineClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for SpedisciOnlineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpedisciOnlineClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SpedisciOnlineClient {
    pub fn new(base_url: Url, api_key: String, timeout: Duration) -> Result<Self, CarrierError> {
        let http = Client::builder()
            .user_agent(concat!("shiptrack/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn from_config(cfg: &crate::config::Config) -> Result<Self, CarrierError> {
        let base_url = Url::parse(&cfg.carrier.base_url)
            .map_err(|e| CarrierError::InvalidRequest(format!("carrier.base_url: {}", e)))?;
        Self::new(
            base_url,
            cfg.carrier.api_key.clone(),
            Duration::from_secs(cfg.carrier.timeout_seconds),
        )
    }

    /// `<base>/tracking/<tracking number>`, with the tracking number
    /// percent-encoded as a single path segment.
    pub fn tracking_url(&self, tracking_number: &str) -> Result<Url, CarrierError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CarrierError::InvalidRequest("base URL cannot hold a path".into()))?
            .pop_if_empty()
            .push("tracking")
            .push(tracking_number);
        Ok(url)
    }

    pub fn build_request(&self, tracking_number: &str) -> Result<reqwest::Request, CarrierError> {
        let url = self.tracking_url(tracking_number)?;
        let request = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .build()?;
        Ok(request)
    }
}

#[async_trait]
impl CarrierTrackingClient for SpedisciOnlineClient {
    async fn fetch(&self, tracking_number: &str) -> Result<Vec<RawTrackingEvent>, CarrierError> {
        let request = self.build_request(tracking_number)?;
        debug!(url = %request.url(), "carrier tracking request");

        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, tracking_number, "carrier tracking API error");
            return Err(CarrierError::Status { status, body });
        }

        let body = res.text().await?;
        parse_tracking_response(&body)
    }
}

#[derive(Deserialize)]
struct TrackingDetail {
    #[serde(rename = "Data")]
    data: String,
    #[serde(rename = "Stato")]
    stato: String,
    #[serde(rename = "Luogo", default)]
    luogo: Option<String>,
}

/// Parse a `{"TrackingDettaglio": [{"Data", "Stato", "Luogo"}, ...]}` body.
/// Each element's JSON is kept verbatim for the audit column.
pub fn parse_tracking_response(body: &str) -> Result<Vec<RawTrackingEvent>, CarrierError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| CarrierError::Malformed(format!("invalid JSON: {}", e)))?;
    let details = payload
        .get("TrackingDettaglio")
        .and_then(Value::as_array)
        .ok_or_else(|| CarrierError::Malformed("missing TrackingDettaglio array".into()))?;

    details
        .iter()
        .map(|item| -> Result<RawTrackingEvent, CarrierError> {
            let detail: TrackingDetail = serde_json::from_value(item.clone())
                .map_err(|e| CarrierError::Malformed(format!("invalid tracking detail: {}", e)))?;
            Ok(RawTrackingEvent {
                timestamp: detail.data,
                status: detail.stato,
                location: detail.luogo.filter(|l| !l.trim().is_empty()),
                raw: item.clone(),
            })
        })
        .collect()
}

/// Parse carrier timestamps: `dd/mm/yyyy hh:mm[:ss]`, `dd/mm/yyyy`, RFC 3339
/// or `yyyy-mm-dd hh:mm:ss`. Wall-clock values are taken as UTC.
pub fn parse_carrier_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    for fmt in ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
