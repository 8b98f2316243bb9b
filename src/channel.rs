//! Outbound delivery channels beyond the in-app record.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;

#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Best effort: `false` on any failure, never an error.
    async fn send_email(&self, user_id: &str, subject: &str, html: &str) -> bool;
}

/// Posts emails to an HTTP relay that resolves the user's address.
#[derive(Clone)]
pub struct RelayEmailChannel {
    http: Client,
    relay_url: Url,
    api_key: Option<String>,
    from: Option<String>,
}

impl fmt::Debug for RelayEmailChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEmailChannel")
            .field("relay_url", &self.relay_url)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl RelayEmailChannel {
    pub fn new(relay_url: Url, api_key: Option<String>, from: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("shiptrack/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build email relay client")?;
        Ok(Self {
            http,
            relay_url,
            api_key,
            from,
        })
    }

    pub fn build_request(&self, user_id: &str, subject: &str, html: &str) -> Result<reqwest::Request> {
        let body = json!({
            "user_id": user_id,
            "from": self.from,
            "subject": subject,
            "html": html,
        });
        let mut req = self.http.post(self.relay_url.clone()).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        req.build().context("failed to build email relay request")
    }

    async fn post(&self, user_id: &str, subject: &str, html: &str) -> Result<()> {
        let request = self.build_request(user_id, subject, html)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("email relay returned {}: {}", status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboundChannel for RelayEmailChannel {
    async fn send_email(&self, user_id: &str, subject: &str, html: &str) -> bool {
        match self.post(user_id, subject, html).await {
            Ok(()) => {
                debug!(user_id, subject, "email sent");
                true
            }
            Err(err) => {
                warn!(?err, user_id, "email delivery failed");
                false
            }
        }
    }
}

/// Used when no relay is configured; every send reports failure.
#[derive(Debug, Clone, Default)]
pub struct DisabledEmailChannel;

#[async_trait]
impl OutboundChannel for DisabledEmailChannel {
    async fn send_email(&self, user_id: &str, _subject: &str, _html: &str) -> bool {
        debug!(user_id, "email relay not configured; skipping");
        false
    }
}

pub fn from_config(cfg: &Config) -> Result<Arc<dyn OutboundChannel>> {
    match cfg.email.relay_url.as_deref() {
        Some(url) => {
            let relay_url = Url::parse(url).context("invalid email.relay_url")?;
            let channel =
                RelayEmailChannel::new(relay_url, cfg.email.api_key.clone(), cfg.email.from.clone())?;
            Ok(Arc::new(channel))
        }
        None => Ok(Arc::new(DisabledEmailChannel)),
    }
}
