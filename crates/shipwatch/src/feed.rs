//! Upstream version feed.
//!
//! The feed is a JSON object keyed by release channel; each channel holds a
//! list of transition records:
//!
//! ```json
//! {"core-linux_headless64": [
//!     {"from": "1.1.100", "to": "1.1.101"},
//!     {"stable": "1.1.100"}
//! ]}
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http;

/// One raw transition record. Fields stay unparsed here so that a single bad
/// entry can be skipped by the catalog instead of failing the whole fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable: Option<String>,
}

impl UpstreamRecord {
    pub fn to(version: &str) -> Self {
        Self {
            to: Some(version.to_string()),
            ..Self::default()
        }
    }

    pub fn stable(version: &str) -> Self {
        Self {
            stable: Some(version.to_string()),
            ..Self::default()
        }
    }

    pub fn with_stable(mut self, version: &str) -> Self {
        self.stable = Some(version.to_string());
        self
    }
}

/// Source of upstream transition records.
pub trait VersionFeed {
    fn fetch(&self) -> Result<Vec<UpstreamRecord>>;
}

/// Feed client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    http: Client,
    url: String,
    channel: String,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>, channel: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http::client(timeout)?,
            url: url.into(),
            channel: channel.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl VersionFeed for HttpFeed {
    fn fetch(&self) -> Result<Vec<UpstreamRecord>> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .map_err(|e| Error::fetch("version feed", e))?;
        if !resp.status().is_success() {
            return Err(Error::fetch(
                "version feed",
                format!("unexpected status {}", resp.status()),
            ));
        }
        let body = resp.text().map_err(|e| Error::fetch("version feed", e))?;
        parse_feed(&body, &self.channel)
    }
}

pub(crate) fn parse_feed(body: &str, channel: &str) -> Result<Vec<UpstreamRecord>> {
    let mut channels: BTreeMap<String, Vec<UpstreamRecord>> =
        serde_json::from_str(body).map_err(|e| Error::fetch("version feed", e))?;
    channels.remove(channel).ok_or_else(|| {
        Error::fetch(
            "version feed",
            format!("channel {channel:?} missing from feed"),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tiny_http::{Header, Response, Server, StatusCode};

    use super::*;

    const CHANNEL: &str = "core-linux_headless64";

    fn serve_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base_url = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            let req = server.recv().expect("request");
            let resp = Response::from_string(body)
                .with_status_code(StatusCode(status))
                .with_header(
                    Header::from_bytes("Content-Type", "application/json").expect("header"),
                );
            req.respond(resp).expect("respond");
        });
        (base_url, handle)
    }

    #[test]
    fn parse_feed_selects_channel() {
        let body = r#"{
            "core-linux_headless64": [
                {"from": "1.1.0", "to": "1.1.1"},
                {"stable": "1.1.0"}
            ],
            "core-win64": [{"to": "9.9.9"}]
        }"#;
        let records = parse_feed(body, CHANNEL).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].to.as_deref(), Some("1.1.1"));
        assert_eq!(records[1], UpstreamRecord::stable("1.1.0"));
    }

    #[test]
    fn parse_feed_missing_channel_is_fetch_error() {
        let err = parse_feed(r#"{"other": []}"#, CHANNEL).expect_err("missing channel");
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn parse_feed_garbage_is_fetch_error() {
        let err = parse_feed("<html>", CHANNEL).expect_err("garbage");
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn http_feed_fetches_records() {
        let (base, handle) = serve_once(
            200,
            r#"{"core-linux_headless64": [{"to": "2.0.1", "stable": "2.0.0"}]}"#,
        );
        let feed = HttpFeed::new(format!("{base}/versions"), CHANNEL, Duration::from_secs(5))
            .expect("client");
        let records = feed.fetch().expect("fetch");
        handle.join().expect("join");
        assert_eq!(records, vec![UpstreamRecord::to("2.0.1").with_stable("2.0.0")]);
    }

    #[test]
    fn http_feed_non_success_is_fetch_error() {
        let (base, handle) = serve_once(503, "{}");
        let feed = HttpFeed::new(base, CHANNEL, Duration::from_secs(5)).expect("client");
        let err = feed.fetch().expect_err("503");
        handle.join().expect("join");
        assert!(err.to_string().contains("503"));
    }
}
