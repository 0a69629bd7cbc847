//! Publish state tracking and reconciliation against the registry.
//!
//! Two signals decide whether a release still needs work:
//!
//! - the registry tag list, which survives restarts and is always trusted;
//! - the in-process memo of what this process already pushed (or found
//!   already present in the repository), which covers the window between a
//!   push and the registry reflecting it.
//!
//! Memory never overrides the registry: a remembered publish that the
//! registry still has not confirmed after the confirmation window is
//! forgotten, and the release becomes eligible again.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::labels::{LabeledRelease, STABLE_TAG};
use crate::registry::PublishedTag;
use crate::version::{BranchKey, Version};

/// Key of the processed-state map: a release line or the stable label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub enum Slot {
    Branch(BranchKey),
    Stable,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Branch(key) => write!(f, "{key}"),
            Slot::Stable => f.write_str(STABLE_TAG),
        }
    }
}

impl From<Slot> for String {
    fn from(slot: Slot) -> Self {
        slot.to_string()
    }
}

/// How the minimum branch itself is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorPolicy {
    /// Keep branches `>= min` (the floor line itself is published).
    #[default]
    Inclusive,
    /// Keep branches `> min`.
    Exclusive,
}

/// Legacy release lines below the floor are never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchFloor {
    pub min: BranchKey,
    pub policy: FloorPolicy,
}

impl BranchFloor {
    pub fn new(min: BranchKey, policy: FloorPolicy) -> Self {
        Self { min, policy }
    }

    pub fn admits(&self, version: &Version) -> bool {
        match self.policy {
            FloorPolicy::Inclusive => version.branch() >= self.min,
            FloorPolicy::Exclusive => version.branch() > self.min,
        }
    }
}

/// What the tracker remembers about one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishRecord {
    pub version: Version,
    pub recorded_at: DateTime<Utc>,
    /// The registry has shown this version's tag since it was recorded.
    pub confirmed: bool,
}

/// Why a labeled release was left out of the work list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The registry already has the version tag.
    Live,
    /// This process already published the version.
    Processed,
    /// A previous workflow found the repository already up to date.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub version: Version,
    pub slot: Slot,
    pub reason: SkipReason,
}

/// Releases requiring action this cycle, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkList {
    pub releases: Vec<LabeledRelease>,
    pub stable_needs_action: bool,
    pub skipped: Vec<Skipped>,
}

impl WorkList {
    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}

/// Outcome of reconciling memory against the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub confirmed: Vec<Slot>,
    pub expired: Vec<Slot>,
}

/// Process-lifetime publish state, owned by the reconciliation loop.
#[derive(Debug, Clone)]
pub struct PublishTracker {
    processed: BTreeMap<Slot, PublishRecord>,
    unchanged: BTreeMap<Slot, PublishRecord>,
    confirm_window: TimeDelta,
}

impl PublishTracker {
    pub fn new(confirm_window: Duration) -> Self {
        Self {
            processed: BTreeMap::new(),
            unchanged: BTreeMap::new(),
            confirm_window: TimeDelta::from_std(confirm_window).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Version last published by this process for `slot`.
    pub fn processed(&self, slot: Slot) -> Option<&PublishRecord> {
        self.processed.get(&slot)
    }

    /// Version last found already present in the repository for `slot`.
    pub fn unchanged(&self, slot: Slot) -> Option<&PublishRecord> {
        self.unchanged.get(&slot)
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty() && self.unchanged.is_empty()
    }

    /// Cross-check remembered publishes against the registry.
    ///
    /// Records whose version tag is live are marked confirmed and kept.
    /// Unconfirmed records older than the confirmation window are dropped so
    /// the release is attempted again.
    pub fn reconcile(&mut self, tags: &[PublishedTag], now: DateTime<Utc>) -> Reconciliation {
        let live = live_names(tags);
        let window = self.confirm_window;
        let mut outcome = Reconciliation::default();

        for (memo, records) in [
            ("processed", &mut self.processed),
            ("unchanged", &mut self.unchanged),
        ] {
            records.retain(|slot, record| {
                if live.contains(record.version.to_string().as_str()) {
                    if !record.confirmed {
                        info!(%slot, version = %record.version, memo, "registry confirmed publish");
                        record.confirmed = true;
                        outcome.confirmed.push(*slot);
                    }
                    return true;
                }
                if record.confirmed {
                    // The tag disappeared after confirmation; the registry wins.
                    warn!(%slot, version = %record.version, memo, "confirmed tag no longer live; forgetting");
                    outcome.expired.push(*slot);
                    return false;
                }
                if now.signed_duration_since(record.recorded_at) > window {
                    warn!(%slot, version = %record.version, memo, "publish still not visible on registry; allowing re-attempt");
                    outcome.expired.push(*slot);
                    return false;
                }
                true
            });
        }

        outcome
    }

    /// Whether the stable label still has to be moved to `stable`.
    pub fn stable_needs_action(&self, stable: Option<Version>) -> bool {
        match stable {
            None => false,
            Some(s) => !self.remembers(Slot::Stable, s),
        }
    }

    /// Filter a cycle's labeled releases down to those requiring action.
    pub fn work_list(
        &self,
        labeled: &[LabeledRelease],
        tags: &[PublishedTag],
        stable: Option<Version>,
    ) -> WorkList {
        let live = live_names(tags);
        let stable_needs_action = self.stable_needs_action(stable);
        let mut work = WorkList {
            stable_needs_action,
            ..WorkList::default()
        };

        for release in labeled {
            if release.is_synthetic_stable() {
                if stable_needs_action {
                    work.releases.push(release.clone());
                } else {
                    let reason = if self.matches(&self.processed, release) {
                        SkipReason::Processed
                    } else {
                        SkipReason::Unchanged
                    };
                    work.skipped.push(self.skip(release, reason));
                }
                continue;
            }

            let reason = if live.contains(release.version.to_string().as_str()) {
                Some(SkipReason::Live)
            } else if self.matches(&self.processed, release) {
                Some(SkipReason::Processed)
            } else if self.matches(&self.unchanged, release) {
                Some(SkipReason::Unchanged)
            } else {
                None
            };

            match reason {
                // Still republish when the stable label has to move onto it.
                Some(_) if stable_needs_action && release.carries(STABLE_TAG) => {
                    debug!(version = %release.version, "republishing to move stable label");
                    work.releases.push(release.clone());
                }
                Some(reason) => {
                    debug!(version = %release.version, ?reason, "no action needed");
                    work.skipped.push(self.skip(release, reason));
                }
                None => work.releases.push(release.clone()),
            }
        }

        work
    }

    /// Record a completed publish. Call strictly after the workflow succeeded.
    pub fn record_published(&mut self, release: &LabeledRelease, now: DateTime<Utc>) {
        for slot in release.slots() {
            self.unchanged.remove(&slot);
            self.processed.insert(slot, record(release.version, now));
        }
    }

    /// Record a workflow that found nothing to commit.
    pub fn record_unchanged(&mut self, release: &LabeledRelease, now: DateTime<Utc>) {
        for slot in release.slots() {
            self.unchanged.insert(slot, record(release.version, now));
        }
    }

    fn remembers(&self, slot: Slot, version: Version) -> bool {
        [&self.processed, &self.unchanged]
            .iter()
            .any(|m| m.get(&slot).is_some_and(|r| r.version == version))
    }

    fn matches(&self, memo: &BTreeMap<Slot, PublishRecord>, release: &LabeledRelease) -> bool {
        memo.get(&release.slot)
            .is_some_and(|r| r.version == release.version)
    }

    fn skip(&self, release: &LabeledRelease, reason: SkipReason) -> Skipped {
        Skipped {
            version: release.version,
            slot: release.slot,
            reason,
        }
    }
}

fn record(version: Version, now: DateTime<Utc>) -> PublishRecord {
    PublishRecord {
        version,
        recorded_at: now,
        confirmed: false,
    }
}

fn live_names(tags: &[PublishedTag]) -> BTreeSet<&str> {
    tags.iter().map(|t| t.name.as_str()).collect()
}
