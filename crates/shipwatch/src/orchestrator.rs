//! Per-release publish workflow.
//!
//! ```text
//! Start -> ChecksumReady -> FilesEdited -> Committed -> Pushed -> Tagged -> Notified -> Done
//!                                  \-> Done (nothing to commit)
//! any stage -> Aborted
//! ```
//!
//! Each workflow runs in a freshly cloned, version-scoped directory that is
//! removed when the workflow ends, however it ends. Publish state is updated
//! only after the workflow reached `Done`.

use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shipwatch_webhook::{ReleaseEvent, WebhookClient, WebhookConfig};
use tempfile::TempDir;
use tracing::{debug, error, info, info_span, warn};

use crate::checksum::ChecksumCache;
use crate::error::{Error, Result};
use crate::git::GitRepo;
use crate::github::PullRequests;
use crate::labels::LabeledRelease;
use crate::manifest::BuildManifest;
use crate::templates::TemplateEditor;
use crate::tracker::PublishTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStage {
    Start,
    ChecksumReady,
    FilesEdited,
    Committed,
    Pushed,
    Tagged,
    Notified,
    Done,
    Aborted,
}

impl fmt::Display for ReleaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseStage::Start => "start",
            ReleaseStage::ChecksumReady => "checksum_ready",
            ReleaseStage::FilesEdited => "files_edited",
            ReleaseStage::Committed => "committed",
            ReleaseStage::Pushed => "pushed",
            ReleaseStage::Tagged => "tagged",
            ReleaseStage::Notified => "notified",
            ReleaseStage::Done => "done",
            ReleaseStage::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// How a finished commit reaches the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStrategy {
    /// Push straight to the base branch.
    #[default]
    Direct,
    /// Push an `update-<version>` branch and open a pull request.
    PullRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Published,
    /// The repository already matched; nothing was pushed, tagged or announced.
    Unchanged,
    Aborted {
        /// Last stage reached before the failure.
        stage: ReleaseStage,
        error: String,
    },
}

/// Best-effort release announcement.
pub trait Notifier {
    fn notify(&self, release: &LabeledRelease) -> Result<()>;
}

/// [`Notifier`] over the webhook client.
pub struct WebhookNotifier {
    client: WebhookClient,
}

impl WebhookNotifier {
    /// `None` when notifications are disabled or have no URL.
    pub fn from_config(config: &WebhookConfig) -> Result<Option<Self>> {
        if !config.is_active() {
            return Ok(None);
        }
        let client = WebhookClient::new(config).map_err(|e| Error::Config(format!("{e:#}")))?;
        Ok(Some(Self { client }))
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, release: &LabeledRelease) -> Result<()> {
        let event = ReleaseEvent::new(release.version.to_string(), release.tags.clone());
        self.client
            .send(&event)
            .map_err(|e| Error::Notify(format!("{e:#}")))
    }
}

/// Drives [`ReleaseOutcome`]s for labeled releases.
pub struct Orchestrator {
    git: Box<dyn GitRepo + Send>,
    editor: Box<dyn TemplateEditor + Send>,
    pulls: Option<Box<dyn PullRequests + Send>>,
    notifier: Option<Box<dyn Notifier + Send>>,
    strategy: PublishStrategy,
    base_branch: String,
    workdir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(git: Box<dyn GitRepo + Send>, editor: Box<dyn TemplateEditor + Send>) -> Self {
        Self {
            git,
            editor,
            pulls: None,
            notifier: None,
            strategy: PublishStrategy::Direct,
            base_branch: "master".to_string(),
            workdir: None,
        }
    }

    /// Switch to the branch-and-PR strategy.
    pub fn with_pull_requests(mut self, pulls: Box<dyn PullRequests + Send>) -> Self {
        self.pulls = Some(pulls);
        self.strategy = PublishStrategy::PullRequest;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Box<dyn Notifier + Send>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_base_branch(mut self, base: impl Into<String>) -> Self {
        self.base_branch = base.into();
        self
    }

    /// Parent directory for per-release clones (system temp dir when unset).
    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn strategy(&self) -> PublishStrategy {
        self.strategy
    }

    /// Run the workflow for `release`, recording success in `tracker`.
    ///
    /// `labeled` is the cycle's full labeled set; it feeds the build manifest
    /// and README so both list every current release, not just this one.
    pub fn publish(
        &self,
        cache: &mut ChecksumCache,
        tracker: &mut PublishTracker,
        release: &LabeledRelease,
        labeled: &[LabeledRelease],
    ) -> ReleaseOutcome {
        let span = info_span!("release", version = %release.version, slot = %release.slot);
        let _enter = span.enter();
        info!(tags = ?release.tags, "release workflow started");

        let mut stage = ReleaseStage::Start;
        match self.run(cache, release, labeled, &mut stage) {
            Ok(true) => {
                tracker.record_published(release, Utc::now());
                info!("release published");
                ReleaseOutcome::Published
            }
            Ok(false) => {
                tracker.record_unchanged(release, Utc::now());
                info!("repository already up to date; nothing pushed");
                ReleaseOutcome::Unchanged
            }
            Err(err) => {
                error!(%stage, error = %err, "release aborted");
                ReleaseOutcome::Aborted {
                    stage,
                    error: err.to_string(),
                }
            }
        }
    }

    fn run(
        &self,
        cache: &mut ChecksumCache,
        release: &LabeledRelease,
        labeled: &[LabeledRelease],
        stage: &mut ReleaseStage,
    ) -> Result<bool> {
        let version = release.version;

        let checksum = cache.get_checksum(version)?;
        if checksum.is_empty() {
            return Err(Error::checksum(version, "artifact is not downloadable yet"));
        }
        let manifest = build_manifest(cache, labeled, release, &checksum);
        advance(stage, ReleaseStage::ChecksumReady);

        let workspace = self.workspace(release)?;
        let dir = workspace.path();
        self.git.clone_repo(dir)?;

        let branch = match self.strategy {
            PublishStrategy::Direct => None,
            PublishStrategy::PullRequest => {
                let branch = format!("update-{version}");
                self.git.checkout_branch(dir, &branch)?;
                Some(branch)
            }
        };

        // The stable-only record has no release line of its own to rebuild.
        if !release.is_synthetic_stable() {
            self.editor.edit_dockerfile(dir, version, &checksum)?;
        }
        self.editor.edit_readme(dir, &manifest)?;
        self.editor.edit_manifest(dir, &manifest)?;
        advance(stage, ReleaseStage::FilesEdited);

        if !self.git.commit(dir, &format!("Update to version {version}"))? {
            advance(stage, ReleaseStage::Done);
            return Ok(false);
        }
        advance(stage, ReleaseStage::Committed);

        self.git.push(dir, branch.as_deref())?;
        if let Some(branch) = &branch {
            let pulls = self
                .pulls
                .as_ref()
                .ok_or_else(|| Error::Config("pull_request strategy without a pull-request client".into()))?;
            pulls.create(
                &format!("Updated to version {version}"),
                branch,
                &self.base_branch,
            )?;
        }
        advance(stage, ReleaseStage::Pushed);

        // HEAD builds the line's newest patch, not an older stable version,
        // so a stable-only record must not move that version's tag.
        if !release.is_synthetic_stable() {
            self.git.tag(dir, &version.to_string())?;
        }
        advance(stage, ReleaseStage::Tagged);

        if let Some(notifier) = &self.notifier
            && let Err(err) = notifier.notify(release)
        {
            warn!(error = %err, "release notification failed");
        }
        advance(stage, ReleaseStage::Notified);

        advance(stage, ReleaseStage::Done);
        Ok(true)
    }

    fn workspace(&self, release: &LabeledRelease) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("shipwatch-{}-", release.version);
        builder.prefix(&prefix);
        let created = match &self.workdir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        created.map_err(|e| {
            Error::state(
                self.workdir.clone().unwrap_or_else(std::env::temp_dir),
                format!("failed to create working directory: {e}"),
            )
        })
    }
}

fn advance(stage: &mut ReleaseStage, next: ReleaseStage) {
    debug!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

/// Manifest over every labeled release whose artifact is downloadable.
///
/// A sibling whose checksum cannot be resolved is left out; only the release
/// being published aborts on its own checksum.
fn build_manifest(
    cache: &mut ChecksumCache,
    labeled: &[LabeledRelease],
    current: &LabeledRelease,
    current_checksum: &str,
) -> BuildManifest {
    let mut manifest = BuildManifest::new();
    for release in labeled {
        let checksum = if release.version == current.version {
            current_checksum.to_string()
        } else {
            match cache.get_checksum(release.version) {
                Ok(checksum) => checksum,
                Err(err) => {
                    warn!(version = %release.version, error = %err, "sibling checksum unavailable; left out of manifest");
                    continue;
                }
            }
        };
        if checksum.is_empty() {
            debug!(version = %release.version, "artifact not downloadable yet; left out of manifest");
            continue;
        }
        manifest.insert_release(release, &checksum);
    }
    if manifest.get(current.version).is_none() {
        manifest.insert_release(current, current_checksum);
    }
    manifest
}
