//! Checksum cache over downloaded release artifacts.
//!
//! Artifacts are immutable once released, so a non-empty hash recorded for
//! a version is final. The cache is a single pretty-printed JSON object on
//! disk (`{"1.1.104": "<hex>"}`), loaded lazily on first lookup and written
//! through after every newly computed hash.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::http;
use crate::version::Version;

/// Content hash applied to release artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Build-argument name carrying the checksum in a Dockerfile.
    pub fn dockerfile_key(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
        }
    }

    /// Stream `reader` to the end and return the lowercase hex digest.
    pub fn hash_reader(&self, reader: &mut dyn Read) -> io::Result<String> {
        match self {
            HashAlgorithm::Sha1 => digest_reader::<Sha1>(reader),
            HashAlgorithm::Sha256 => digest_reader::<Sha256>(reader),
        }
    }
}

fn digest_reader<D: Digest>(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Downloads release artifacts.
pub trait ArtifactSource {
    /// Open the artifact for `version`; `Ok(None)` when it is not published yet.
    fn open(&self, version: Version) -> Result<Option<Box<dyn Read>>>;
}

/// Artifact download over HTTP from a `{version}` URL template.
#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    http: Client,
    url_template: String,
}

impl HttpArtifactSource {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http::client(timeout)?,
            url_template: url_template.into(),
        })
    }

    pub fn url(&self, version: Version) -> String {
        self.url_template.replace("{version}", &version.to_string())
    }
}

impl ArtifactSource for HttpArtifactSource {
    fn open(&self, version: Version) -> Result<Option<Box<dyn Read>>> {
        let url = self.url(version);
        let resp = self
            .http
            .get(&url)
            .send()
            .map_err(|e| Error::checksum(version, format!("download from {url} failed: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(Box::new(resp))),
            s => Err(Error::checksum(
                version,
                format!("unexpected status {s} from {url}"),
            )),
        }
    }
}

/// Persisted `version -> hex hash` map with lazy load and write-through save.
pub struct ChecksumCache {
    path: PathBuf,
    algorithm: HashAlgorithm,
    source: Box<dyn ArtifactSource + Send>,
    entries: BTreeMap<String, String>,
    loaded: bool,
}

impl ChecksumCache {
    pub fn new(
        path: impl Into<PathBuf>,
        algorithm: HashAlgorithm,
        source: Box<dyn ArtifactSource + Send>,
    ) -> Self {
        Self {
            path: path.into(),
            algorithm,
            source,
            entries: BTreeMap::new(),
            loaded: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Cached hash for `version` without touching the network.
    pub fn cached(&mut self, version: Version) -> Result<Option<String>> {
        self.ensure_loaded()?;
        Ok(self
            .entries
            .get(&version.to_string())
            .filter(|h| !h.is_empty())
            .cloned())
    }

    /// Hash of the artifact for `version`.
    ///
    /// Returns an empty string when the artifact is not downloadable yet;
    /// that result is not remembered, so the next cycle asks again.
    pub fn get_checksum(&mut self, version: Version) -> Result<String> {
        if let Some(hash) = self.cached(version)? {
            debug!(%version, "checksum cache hit");
            return Ok(hash);
        }

        let Some(mut reader) = self.source.open(version)? else {
            info!(%version, "artifact not published yet");
            return Ok(String::new());
        };

        let hash = self
            .algorithm
            .hash_reader(&mut reader)
            .map_err(|e| Error::checksum(version, format!("failed to read artifact: {e}")))?;

        info!(%version, algorithm = ?self.algorithm, %hash, "computed artifact checksum");
        self.entries.insert(version.to_string(), hash.clone());
        self.persist()?;
        Ok(hash)
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(entries) => {
                    debug!(path = %self.path.display(), entries = entries.len(), "loaded checksum cache");
                    self.entries = entries;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "checksum cache is malformed; starting empty");
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checksum cache yet");
            }
            Err(e) => return Err(Error::state(&self.path, format!("failed to read: {e}"))),
        }

        self.loaded = true;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        atomic_write_json(&self.path, &self.entries)
    }
}

/// Best-effort fsync of the parent directory so the rename survives a crash.
/// Not every platform can open a directory for sync; failures are ignored.
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

/// Pretty-printed JSON written to a sibling tmp file, then renamed over `path`.
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::state(path, format!("failed to serialize: {e}")))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| Error::state(path, format!("failed to create parent dir: {e}")))?;
    }

    {
        let mut f = fs::File::create(&tmp)
            .map_err(|e| Error::state(&tmp, format!("failed to create tmp file: {e}")))?;
        f.write_all(&data)
            .map_err(|e| Error::state(&tmp, format!("failed to write tmp file: {e}")))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).map_err(|e| {
        Error::state(
            path,
            format!("failed to rename tmp file {}: {e}", tmp.display()),
        )
    })?;

    fsync_parent_dir(path);
    Ok(())
}
