//! Release notification webhooks for shipwatch.
//!
//! Notifications are best-effort: callers log a failed delivery and carry
//! on. Two payload formats are supported: a Discord embed, and a generic
//! JSON envelope that can be signed with an HMAC-SHA256 secret.
//!
//! # Example
//!
//! ```ignore
//! use shipwatch_webhook::{ReleaseEvent, WebhookClient, WebhookConfig, WebhookFormat};
//!
//! let config = WebhookConfig {
//!     enabled: true,
//!     url: Some("https://discord.com/api/webhooks/...".to_string()),
//!     format: WebhookFormat::Discord,
//!     ..Default::default()
//! };
//! let client = WebhookClient::new(&config)?;
//! client.send(&ReleaseEvent::new("1.1.104", vec!["1.1.104".into(), "latest".into()]))?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "X-Shipwatch-Signature";

const DEFAULT_TITLE: &str = "Update released";

/// Payload format expected by the receiving endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookFormat {
    /// `{"embeds": [...]}` as accepted by Discord incoming webhooks.
    #[default]
    Discord,
    /// `{"timestamp": ..., "event": {...}}`, optionally signed.
    Json,
}

/// Webhook configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Enable notifications (default: false)
    pub enabled: bool,
    /// Endpoint receiving the POST
    pub url: Option<String>,
    pub format: WebhookFormat,
    /// Embed title for the Discord format
    pub title: String,
    /// HMAC secret for the JSON format
    pub secret: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            format: WebhookFormat::default(),
            title: DEFAULT_TITLE.to_string(),
            secret: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl WebhookConfig {
    /// Enabled with a non-empty URL.
    pub fn is_active(&self) -> bool {
        self.enabled && self.url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// A release that was just published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEvent {
    pub version: String,
    pub tags: Vec<String>,
}

impl ReleaseEvent {
    pub fn new(version: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            version: version.into(),
            tags,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonEnvelope<'a> {
    timestamp: DateTime<Utc>,
    event: &'a ReleaseEvent,
}

/// Synchronous webhook sender with a request timeout.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::blocking::Client,
    url: String,
    format: WebhookFormat,
    title: String,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .context("webhook URL is required when webhooks are enabled")?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build webhook HTTP client")?;

        Ok(Self {
            client,
            url,
            format: config.format,
            title: config.title.clone(),
            secret: config.secret.clone(),
        })
    }

    pub fn send(&self, event: &ReleaseEvent) -> Result<()> {
        let body = match self.format {
            WebhookFormat::Discord => discord_payload(&self.title, event)?,
            WebhookFormat::Json => serde_json::to_string(&JsonEnvelope {
                timestamp: Utc::now(),
                event,
            })
            .context("failed to serialize webhook payload")?,
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json; charset=utf-8");

        if self.format == WebhookFormat::Json
            && let Some(secret) = &self.secret
        {
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, &body)?));
        }

        let response = request
            .body(body)
            .send()
            .context("failed to send webhook request")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            bail!("webhook returned error status {status}: {text}");
        }

        Ok(())
    }
}

fn discord_payload(title: &str, event: &ReleaseEvent) -> Result<String> {
    let mut fields = Vec::new();
    if !event.tags.is_empty() {
        fields.push(json!({
            "name": "Tags",
            "value": event.tags.join(", "),
            "inline": true
        }));
    }

    let payload = json!({
        "embeds": [{
            "title": title,
            "description": event.version,
            "fields": fields
        }]
    });

    serde_json::to_string(&payload).context("failed to serialize discord payload")
}

/// Hex HMAC-SHA256 of `body`.
pub fn sign(secret: &str, body: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("invalid webhook secret")?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
