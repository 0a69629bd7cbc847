//! Tag derivation for representative releases.
//!
//! Every representative carries its own version and its `major.minor` line.
//! The newest representative of a major additionally carries `major`, the
//! global maximum carries `latest`, and the upstream stable release carries
//! `stable`. When the stable release is not any branch's current maximum, a
//! synthetic record for it is emitted so the `stable` tag is never dropped.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::tracker::Slot;
use crate::version::Version;

pub const LATEST_TAG: &str = "latest";
pub const STABLE_TAG: &str = "stable";

/// A release together with every tag it must carry this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledRelease {
    pub version: Version,
    pub tags: Vec<String>,
    /// Which processed-state slot a successful publish is recorded under.
    pub slot: Slot,
}

impl LabeledRelease {
    pub fn carries(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_synthetic_stable(&self) -> bool {
        self.slot == Slot::Stable
    }

    /// Every slot this release settles once published: its own, plus the
    /// stable slot when it carries the stable tag.
    pub fn slots(&self) -> Vec<Slot> {
        let mut slots = vec![self.slot];
        if self.slot != Slot::Stable && self.carries(STABLE_TAG) {
            slots.push(Slot::Stable);
        }
        slots
    }
}

/// Derive the labeled release set for one cycle.
///
/// `representatives` must be ascending with one version per branch, as
/// produced by [`crate::catalog::Catalog`] (after any branch floor).
pub fn derive(representatives: &[Version], stable: Option<Version>) -> Vec<LabeledRelease> {
    let latest = representatives.iter().max().copied();

    let mut newest_per_major: BTreeMap<u64, Version> = BTreeMap::new();
    for &v in representatives {
        newest_per_major
            .entry(v.major)
            .and_modify(|cur| {
                if v > *cur {
                    *cur = v;
                }
            })
            .or_insert(v);
    }

    let mut out = Vec::with_capacity(representatives.len() + 1);
    let mut stable_satisfied = false;

    for &v in representatives {
        if let Some(s) = stable
            && !stable_satisfied
            && s < v
        {
            out.push(synthetic_stable(s));
            stable_satisfied = true;
        }

        let mut tags = vec![v.to_string()];
        if newest_per_major.get(&v.major) == Some(&v) {
            tags.push(v.major.to_string());
        }
        tags.push(v.branch().to_string());
        if Some(v) == latest {
            tags.push(LATEST_TAG.to_string());
        }
        if stable == Some(v) {
            tags.push(STABLE_TAG.to_string());
            stable_satisfied = true;
        }

        out.push(LabeledRelease {
            version: v,
            tags,
            slot: Slot::Branch(v.branch()),
        });
    }

    // Stable newer than every representative (e.g. its line was floored out
    // of the feed): still emit it, last.
    if let Some(s) = stable
        && !stable_satisfied
    {
        out.push(synthetic_stable(s));
    }

    out
}

fn synthetic_stable(stable: Version) -> LabeledRelease {
    LabeledRelease {
        version: stable,
        tags: vec![stable.to_string(), STABLE_TAG.to_string()],
        slot: Slot::Stable,
    }
}
