//! Pull-request creation for the branch-and-PR publish strategy.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::http;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

pub trait PullRequests {
    /// Open a pull request from `head` into `base`; returns its URL when known.
    fn create(&self, title: &str, head: &str, base: &str) -> Result<Option<String>>;
}

#[derive(Debug, Serialize)]
struct NewPullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    maintainer_can_modify: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedPullRequest {
    html_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(
        api_base: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: http::client(timeout)?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token,
        })
    }

    fn pulls_url(&self) -> String {
        format!("{}/repos/{}/{}/pulls", self.api_base, self.owner, self.repo)
    }
}

impl PullRequests for GitHubClient {
    fn create(&self, title: &str, head: &str, base: &str) -> Result<Option<String>> {
        let url = self.pulls_url();
        let mut req = self
            .http
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .json(&NewPullRequest {
                title,
                head,
                base,
                maintainer_can_modify: true,
            });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let command = format!("POST {url}");
        let resp = req.send().map_err(|e| Error::Command {
            command: command.clone(),
            exit_code: None,
            output: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            let created: CreatedPullRequest = resp.json().unwrap_or(CreatedPullRequest { html_url: None });
            info!(head, base, url = ?created.html_url, "opened pull request");
            return Ok(created.html_url);
        }

        let body = resp.text().unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("already exists") {
            warn!(head, base, "pull request already open; reusing it");
            return Ok(None);
        }

        Err(Error::Command {
            command,
            exit_code: Some(i32::from(status.as_u16())),
            output: body,
        })
    }
}
