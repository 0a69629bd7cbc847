//! Build manifest: every published version with its checksum and tags.
//!
//! Serialized as `buildinfo.json`:
//!
//! ```json
//! {
//!   "1.1.104": {
//!     "checksum": "…",
//!     "tags": ["1.1.104", "1", "1.1", "latest"]
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::labels::LabeledRelease;
use crate::version::Version;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub checksum: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildManifest {
    entries: BTreeMap<Version, ManifestEntry>,
}

impl BuildManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, version: Version, checksum: impl Into<String>, tags: Vec<String>) {
        self.entries.insert(
            version,
            ManifestEntry {
                checksum: checksum.into(),
                tags,
            },
        );
    }

    /// Entry for a labeled release; a release seen twice keeps its first checksum.
    pub fn insert_release(&mut self, release: &LabeledRelease, checksum: &str) {
        self.entries
            .entry(release.version)
            .and_modify(|e| {
                for tag in &release.tags {
                    if !e.tags.contains(tag) {
                        e.tags.push(tag.clone());
                    }
                }
            })
            .or_insert_with(|| ManifestEntry {
                checksum: checksum.to_string(),
                tags: release.tags.clone(),
            });
    }

    pub fn get(&self, version: Version) -> Option<&ManifestEntry> {
        self.entries.get(&version)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, newest version first.
    pub fn newest_first(&self) -> impl Iterator<Item = (&Version, &ManifestEntry)> {
        self.entries.iter().rev()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::template("buildinfo.json", format!("failed to serialize manifest: {e}")))
    }

    /// README tag list: one bullet per version, newest first.
    pub fn render_tag_list(&self) -> String {
        let mut out = String::new();
        for (_, entry) in self.newest_first() {
            let tags: Vec<String> = entry.tags.iter().map(|t| format!("`{t}`")).collect();
            out.push_str("* ");
            out.push_str(&tags.join(", "));
            out.push('\n');
        }
        out
    }
}
