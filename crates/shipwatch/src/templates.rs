//! In-place edits of the repository files a release touches.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::checksum::HashAlgorithm;
use crate::error::{Error, Result};
use crate::manifest::BuildManifest;
use crate::version::Version;

pub const README_START_MARKER: &str = "<!-- start autogeneration tags -->";
pub const README_END_MARKER: &str = "<!-- end autogeneration tags -->";

/// Rewrites the release files inside a working copy.
pub trait TemplateEditor {
    /// Set the version and checksum build arguments in the branch's Dockerfile.
    fn edit_dockerfile(&self, dir: &Path, version: Version, checksum: &str) -> Result<()>;
    /// Regenerate the tag list between the README markers.
    fn edit_readme(&self, dir: &Path, manifest: &BuildManifest) -> Result<()>;
    /// Overwrite the build manifest.
    fn edit_manifest(&self, dir: &Path, manifest: &BuildManifest) -> Result<()>;
}

/// File paths (relative to the working copy) rewritten for each release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePaths {
    /// Dockerfile path with `{major}` and `{minor}` placeholders.
    pub dockerfile: String,
    pub readme: PathBuf,
    pub manifest: PathBuf,
}

impl Default for TemplatePaths {
    fn default() -> Self {
        Self {
            dockerfile: "{major}.{minor}/Dockerfile".to_string(),
            readme: PathBuf::from("README.md"),
            manifest: PathBuf::from("buildinfo.json"),
        }
    }
}

impl TemplatePaths {
    pub fn dockerfile_for(&self, version: Version) -> PathBuf {
        PathBuf::from(
            self.dockerfile
                .replace("{major}", &version.major.to_string())
                .replace("{minor}", &version.minor.to_string()),
        )
    }
}

/// Regex-driven editor over the local filesystem.
#[derive(Debug, Clone)]
pub struct FsTemplateEditor {
    paths: TemplatePaths,
    version_re: Regex,
    checksum_re: Regex,
}

impl FsTemplateEditor {
    pub fn new(paths: TemplatePaths, algorithm: HashAlgorithm) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("bad pattern {pattern}: {e}")))
        };
        Ok(Self {
            version_re: compile(r"(VERSION=)(\d+\.\d+\.\d+)")?,
            checksum_re: compile(&format!(r"({}=)([a-fA-F0-9]+)", algorithm.dockerfile_key()))?,
            paths,
        })
    }

    pub fn paths(&self) -> &TemplatePaths {
        &self.paths
    }
}

impl TemplateEditor for FsTemplateEditor {
    fn edit_dockerfile(&self, dir: &Path, version: Version, checksum: &str) -> Result<()> {
        let path = dir.join(self.paths.dockerfile_for(version));
        let content = read(&path)?;

        if !self.version_re.is_match(&content) {
            return Err(Error::template(&path, "no VERSION= build argument"));
        }
        if !self.checksum_re.is_match(&content) {
            return Err(Error::template(&path, "no checksum build argument"));
        }

        let version_str = version.to_string();
        let content = self
            .version_re
            .replace_all(&content, |caps: &regex::Captures<'_>| format!("{}{version_str}", &caps[1]));
        let content = self
            .checksum_re
            .replace_all(&content, |caps: &regex::Captures<'_>| format!("{}{checksum}", &caps[1]));

        debug!(path = %path.display(), %version, "rewrote dockerfile");
        write(&path, &content)
    }

    fn edit_readme(&self, dir: &Path, manifest: &BuildManifest) -> Result<()> {
        let path = dir.join(&self.paths.readme);
        let content = read(&path)?;

        let start = content
            .find(README_START_MARKER)
            .ok_or_else(|| Error::template(&path, "start marker missing"))?;
        let body_start = start + README_START_MARKER.len();
        let end = content[body_start..]
            .find(README_END_MARKER)
            .map(|i| body_start + i)
            .ok_or_else(|| Error::template(&path, "end marker missing after start marker"))?;

        let mut out = String::with_capacity(content.len());
        out.push_str(&content[..body_start]);
        out.push('\n');
        out.push_str(&manifest.render_tag_list());
        out.push_str(&content[end..]);

        debug!(path = %path.display(), entries = manifest.len(), "rewrote readme tag list");
        write(&path, &out)
    }

    fn edit_manifest(&self, dir: &Path, manifest: &BuildManifest) -> Result<()> {
        let path = dir.join(&self.paths.manifest);
        let mut json = manifest.to_json_pretty()?;
        json.push('\n');
        write(&path, &json)
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::template(path, format!("failed to read: {e}")))
}

fn write(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| Error::template(path, format!("failed to write: {e}")))
}
