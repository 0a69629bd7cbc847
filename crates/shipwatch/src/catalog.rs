//! Version catalog and representative selection.
//!
//! A cycle's feed is reduced to one representative per release line (the
//! newest patch of each `major.minor`), plus the global latest version and
//! the upstream stable marker.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::feed::UpstreamRecord;
use crate::version::{BranchKey, Version};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    /// One version per branch, ascending.
    pub representatives: Vec<Version>,
    /// Maximum representative.
    pub latest: Version,
    /// Most recent stable marker in feed order, if any parsed.
    pub stable: Option<Version>,
    /// Records whose `to` or `stable` field failed to parse.
    pub rejected: usize,
}

impl Catalog {
    /// Build the catalog from raw feed records.
    ///
    /// Individual unparsable records are logged and skipped; a feed with no
    /// parsable `to` version at all is a fetch error, because no
    /// representative can be derived from it.
    pub fn from_records(records: &[UpstreamRecord]) -> Result<Self> {
        let mut available = BTreeSet::new();
        let mut stable = None;
        let mut rejected = 0;

        for record in records {
            if let Some(marker) = non_empty(&record.stable) {
                match marker.parse::<Version>() {
                    Ok(v) => stable = Some(v),
                    Err(e) => {
                        warn!(error = %e, "skipping unparsable stable marker");
                        rejected += 1;
                    }
                }
            }
            if let Some(to) = non_empty(&record.to) {
                match to.parse::<Version>() {
                    Ok(v) => {
                        available.insert(v);
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping unparsable feed record");
                        rejected += 1;
                    }
                }
            }
        }

        let representatives = representatives(&available);
        let latest = *representatives.last().ok_or_else(|| {
            Error::fetch(
                "version feed",
                format!(
                    "no parsable versions among {} records ({rejected} rejected)",
                    records.len()
                ),
            )
        })?;

        debug!(
            available = available.len(),
            representatives = ?representatives.iter().map(ToString::to_string).collect::<Vec<_>>(),
            %latest,
            stable = ?stable.map(|v: Version| v.to_string()),
            "catalog built"
        );

        Ok(Self {
            representatives,
            latest,
            stable,
            rejected,
        })
    }

    /// Representative of `branch`, if the feed has that release line.
    pub fn representative(&self, branch: BranchKey) -> Option<Version> {
        self.representatives
            .iter()
            .copied()
            .find(|v| v.branch() == branch)
    }
}

/// Walk the sorted set; the last element of every run of equal branch keys
/// is that branch's representative.
fn representatives(sorted: &BTreeSet<Version>) -> Vec<Version> {
    let mut out: Vec<Version> = Vec::new();
    for &v in sorted {
        match out.last_mut() {
            Some(last) if last.branch() == v.branch() => *last = v,
            _ => out.push(v),
        }
    }
    out
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
