//! Registry tag listing: the source of truth for what is already live.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http;
use crate::version::Version;

/// Upper bound on followed `next` links, so a looping registry cannot stall a cycle.
const MAX_PAGES: usize = 100;

/// A tag observed on the target registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedTag {
    pub name: String,
}

impl PublishedTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The tag as a version, when it matches the version-tag grammar.
    pub fn version(&self) -> Option<Version> {
        Version::from_tag(&self.name)
    }
}

/// Source of currently published tags.
pub trait TagSource {
    fn list_tags(&self) -> Result<Vec<PublishedTag>>;
}

/// Legacy listings return a bare array; paginated listings wrap a page of
/// results with a link to the next page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsPage {
    Flat(Vec<PublishedTag>),
    Paged {
        results: Vec<PublishedTag>,
        #[serde(default)]
        next: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    tags_url: String,
}

impl RegistryClient {
    pub fn new(tags_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http::client(timeout)?,
            tags_url: tags_url.into(),
        })
    }

    pub fn tags_url(&self) -> &str {
        &self.tags_url
    }

    fn fetch_page(&self, url: &str) -> Result<TagsPage> {
        let resp = self
            .http
            .get(url)
            .send()
            .map_err(|e| Error::fetch("registry tags", e))?;
        if !resp.status().is_success() {
            return Err(Error::fetch(
                "registry tags",
                format!("unexpected status {} from {url}", resp.status()),
            ));
        }
        resp.json::<TagsPage>()
            .map_err(|e| Error::fetch("registry tags", format!("failed to parse tags JSON: {e}")))
    }
}

impl TagSource for RegistryClient {
    fn list_tags(&self) -> Result<Vec<PublishedTag>> {
        let mut tags = Vec::new();
        let mut next = Some(self.tags_url.clone());
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(Error::fetch(
                    "registry tags",
                    format!("more than {MAX_PAGES} pages of tags"),
                ));
            }
            match self.fetch_page(&url)? {
                TagsPage::Flat(page) => tags.extend(page),
                TagsPage::Paged {
                    results,
                    next: following,
                } => {
                    tags.extend(results);
                    next = following.filter(|u| !u.is_empty());
                }
            }
        }

        Ok(tags)
    }
}
