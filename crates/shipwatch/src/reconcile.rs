//! One reconciliation cycle: fetch, select, diff, publish.
//!
//! [`Watchdog`] owns everything that lives across cycles (publish state and
//! the checksum cache) and is the only thing that mutates it. Cycles are
//! strictly sequential; see [`crate::schedule`] for the guard that keeps
//! timer ticks from overlapping.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::catalog::Catalog;
use crate::checksum::{ChecksumCache, HttpArtifactSource};
use crate::config::WatchConfig;
use crate::error::Result;
use crate::feed::{HttpFeed, VersionFeed};
use crate::git::SystemGit;
use crate::github::GitHubClient;
use crate::labels::{self, LabeledRelease};
use crate::orchestrator::{Notifier, Orchestrator, PublishStrategy, ReleaseOutcome, WebhookNotifier};
use crate::registry::{PublishedTag, RegistryClient, TagSource};
use crate::templates::FsTemplateEditor;
use crate::tracker::{BranchFloor, PublishTracker, WorkList};
use crate::version::Version;

/// Everything a cycle decided before running any workflow.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub catalog: Catalog,
    /// Representatives dropped by the branch floor.
    pub below_floor: Vec<Version>,
    /// Stable version after the floor, if any.
    pub stable: Option<Version>,
    /// Every labeled release of this cycle, work or not.
    pub labeled: Vec<LabeledRelease>,
    pub work: WorkList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub version: Version,
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub outcome: ReleaseOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub latest: Version,
    pub stable: Option<Version>,
    pub skipped: usize,
    pub releases: Vec<ReleaseReport>,
}

impl CycleReport {
    pub fn published(&self) -> usize {
        self.count(|o| matches!(o, ReleaseOutcome::Published))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ReleaseOutcome::Unchanged))
    }

    pub fn aborted(&self) -> usize {
        self.count(|o| matches!(o, ReleaseOutcome::Aborted { .. }))
    }

    fn count(&self, pred: impl Fn(&ReleaseOutcome) -> bool) -> usize {
        self.releases.iter().filter(|r| pred(&r.outcome)).count()
    }
}

pub struct Watchdog {
    feed: Box<dyn VersionFeed + Send>,
    registry: Box<dyn TagSource + Send>,
    floor: BranchFloor,
    tracker: PublishTracker,
    cache: ChecksumCache,
    orchestrator: Orchestrator,
    cycles: u64,
}

impl Watchdog {
    pub fn new(
        feed: Box<dyn VersionFeed + Send>,
        registry: Box<dyn TagSource + Send>,
        cache: ChecksumCache,
        orchestrator: Orchestrator,
        floor: BranchFloor,
        tracker: PublishTracker,
    ) -> Self {
        Self {
            feed,
            registry,
            floor,
            tracker,
            cache,
            orchestrator,
            cycles: 0,
        }
    }

    /// Wire the HTTP, git and webhook adapters described by `config`.
    pub fn from_config(config: &WatchConfig) -> Result<Self> {
        let http_timeout = config.schedule.http_timeout;

        let feed = HttpFeed::new(&config.feed.url, &config.feed.channel, http_timeout)?;
        let registry = RegistryClient::new(&config.registry.tags_url, http_timeout)?;
        let artifacts =
            HttpArtifactSource::new(&config.artifact.url_template, config.artifact.download_timeout)?;
        let cache = ChecksumCache::new(
            &config.state.checksum_cache,
            config.artifact.hash,
            Box::new(artifacts),
        );

        let mut git = SystemGit::new(
            config.remote_url(),
            &config.repository.base_branch,
            config.repository.git_timeout,
        )
        .with_identity(config.git_identity());
        if let Some(bin) = &config.credentials.git_bin {
            git = git.with_program(bin);
        }
        let editor = FsTemplateEditor::new(config.template_paths(), config.artifact.hash)?;
        let notifier = WebhookNotifier::from_config(&config.notify)?
            .map(|n| Box::new(n) as Box<dyn Notifier + Send>);

        let mut orchestrator = Orchestrator::new(Box::new(git), Box::new(editor))
            .with_base_branch(&config.repository.base_branch)
            .with_workdir(config.repository.workdir.clone())
            .with_notifier(notifier);
        if config.publish.strategy == PublishStrategy::PullRequest {
            let pulls = GitHubClient::new(
                &config.github.api_base,
                &config.repository.owner,
                &config.repository.name,
                config.credentials.github_token.clone(),
                http_timeout,
            )?;
            orchestrator = orchestrator.with_pull_requests(Box::new(pulls));
        }

        info!(
            feed = %config.feed.url,
            registry = %config.registry.tags_url,
            strategy = ?config.publish.strategy,
            min_branch = %config.publish.min_branch,
            "watchdog configured"
        );

        Ok(Self::new(
            Box::new(feed),
            Box::new(registry),
            cache,
            orchestrator,
            config.floor(),
            PublishTracker::new(config.publish.confirm_window),
        ))
    }

    pub fn tracker(&self) -> &PublishTracker {
        &self.tracker
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Checksum for `version` through the persisted cache.
    pub fn checksum(&mut self, version: Version) -> Result<String> {
        self.cache.get_checksum(version)
    }

    /// Decide this cycle's work without running workflows, downloading
    /// artifacts or changing publish state.
    pub fn plan(&self) -> Result<Plan> {
        let survey = self.survey()?;
        let mut scratch = self.tracker.clone();
        Ok(survey.into_plan(&mut scratch))
    }

    /// Run one full cycle. An `Err` means the cycle aborted before any
    /// workflow ran (feed or registry unavailable); per-release failures are
    /// reported in the [`CycleReport`] instead.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycles += 1;
        let span = info_span!("cycle", cycle = self.cycles);
        let _enter = span.enter();

        let survey = self
            .survey()
            .inspect_err(|err| error!(error = %err, "cycle aborted"))?;
        let plan = survey.into_plan(&mut self.tracker);

        if plan.work.is_empty() {
            info!(skipped = plan.work.skipped.len(), "nothing to publish");
        }

        let mut releases = Vec::with_capacity(plan.work.releases.len());
        for release in &plan.work.releases {
            let outcome = self
                .orchestrator
                .publish(&mut self.cache, &mut self.tracker, release, &plan.labeled);
            releases.push(ReleaseReport {
                version: release.version,
                tags: release.tags.clone(),
                outcome,
            });
        }

        let report = CycleReport {
            cycle: self.cycles,
            latest: plan.catalog.latest,
            stable: plan.stable,
            skipped: plan.work.skipped.len(),
            releases,
        };
        info!(
            published = report.published(),
            unchanged = report.unchanged(),
            aborted = report.aborted(),
            skipped = report.skipped,
            "cycle finished"
        );
        Ok(report)
    }

    fn survey(&self) -> Result<Survey> {
        let records = self.feed.fetch()?;
        let catalog = Catalog::from_records(&records)?;

        let (representatives, below_floor): (Vec<Version>, Vec<Version>) = catalog
            .representatives
            .iter()
            .copied()
            .partition(|v| self.floor.admits(v));
        if !below_floor.is_empty() {
            debug!(
                below_floor = ?below_floor.iter().map(ToString::to_string).collect::<Vec<_>>(),
                min_branch = %self.floor.min,
                "dropping legacy release lines"
            );
        }

        let stable = catalog.stable.filter(|s| {
            let admitted = self.floor.admits(s);
            if !admitted {
                warn!(stable = %s, min_branch = %self.floor.min, "stable release is below the branch floor; ignoring");
            }
            admitted
        });

        let labeled = labels::derive(&representatives, stable);
        let tags = self.registry.list_tags()?;
        debug!(tags = tags.len(), "registry tags listed");

        Ok(Survey {
            catalog,
            below_floor,
            stable,
            labeled,
            tags,
        })
    }
}

/// Fetched and labeled state, before it is checked against publish memory.
struct Survey {
    catalog: Catalog,
    below_floor: Vec<Version>,
    stable: Option<Version>,
    labeled: Vec<LabeledRelease>,
    tags: Vec<PublishedTag>,
}

impl Survey {
    fn into_plan(self, tracker: &mut PublishTracker) -> Plan {
        tracker.reconcile(&self.tags, Utc::now());
        let work = tracker.work_list(&self.labeled, &self.tags, self.stable);
        info!(
            representatives = self.labeled.iter().filter(|r| !r.is_synthetic_stable()).count(),
            work = work.releases.len(),
            stable_needs_action = work.stable_needs_action,
            "work list derived"
        );

        Plan {
            catalog: self.catalog,
            below_floor: self.below_floor,
            stable: self.stable,
            labeled: self.labeled,
            work,
        }
    }
}
