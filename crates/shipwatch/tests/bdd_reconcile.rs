//! BDD tests for the reconciliation cycle.
//!
//! Each scenario wires a [`Watchdog`] to in-memory collaborators (feed,
//! registry, artifact store, git, template editor and notifier) and describes
//! the expected behavior in Given-When-Then style.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::{TempDir, tempdir};

use shipwatch::checksum::{ArtifactSource, ChecksumCache, HashAlgorithm};
use shipwatch::feed::{UpstreamRecord, VersionFeed};
use shipwatch::git::GitRepo;
use shipwatch::labels::LabeledRelease;
use shipwatch::manifest::BuildManifest;
use shipwatch::orchestrator::{Notifier, Orchestrator, ReleaseOutcome, ReleaseStage};
use shipwatch::reconcile::Watchdog;
use shipwatch::registry::{PublishedTag, TagSource};
use shipwatch::templates::TemplateEditor;
use shipwatch::tracker::{BranchFloor, FloorPolicy, PublishTracker, SkipReason};
use shipwatch::{BranchKey, Error, Result, Version};

#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("lock").push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().expect("lock").clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn clear(&self) {
        self.0.lock().expect("lock").clear();
    }
}

/// Feed whose records can be swapped between cycles; `None` is an outage.
#[derive(Clone)]
struct ScriptedFeed(Arc<Mutex<Option<Vec<UpstreamRecord>>>>);

impl ScriptedFeed {
    fn set(&self, records: Option<Vec<UpstreamRecord>>) {
        *self.0.lock().expect("lock") = records;
    }
}

impl VersionFeed for ScriptedFeed {
    fn fetch(&self) -> Result<Vec<UpstreamRecord>> {
        self.0
            .lock()
            .expect("lock")
            .clone()
            .ok_or_else(|| Error::fetch("version feed", "connection refused"))
    }
}

#[derive(Clone, Default)]
struct Registry(Arc<Mutex<Vec<String>>>);

impl Registry {
    fn publish(&self, tag: &str) {
        self.0.lock().expect("lock").push(tag.to_string());
    }
}

impl TagSource for Registry {
    fn list_tags(&self) -> Result<Vec<PublishedTag>> {
        Ok(self
            .0
            .lock()
            .expect("lock")
            .iter()
            .map(PublishedTag::new)
            .collect())
    }
}

#[derive(Clone, Default)]
struct Artifacts {
    missing: Arc<Mutex<Vec<Version>>>,
}

impl ArtifactSource for Artifacts {
    fn open(&self, version: Version) -> Result<Option<Box<dyn Read>>> {
        if self.missing.lock().expect("lock").contains(&version) {
            return Ok(None);
        }
        let bytes = format!("artifact {version}").into_bytes();
        Ok(Some(Box::new(Cursor::new(bytes))))
    }
}

#[derive(Clone, Default)]
struct FakeGit {
    journal: Journal,
    clean: Arc<Mutex<bool>>,
}

impl GitRepo for FakeGit {
    fn clone_repo(&self, _dir: &Path) -> Result<()> {
        self.journal.push("clone");
        Ok(())
    }

    fn checkout_branch(&self, _dir: &Path, branch: &str) -> Result<()> {
        self.journal.push(format!("checkout {branch}"));
        Ok(())
    }

    fn commit(&self, _dir: &Path, message: &str) -> Result<bool> {
        self.journal.push(format!("commit {message}"));
        Ok(!*self.clean.lock().expect("lock"))
    }

    fn push(&self, _dir: &Path, branch: Option<&str>) -> Result<()> {
        self.journal.push(format!("push {}", branch.unwrap_or("base")));
        Ok(())
    }

    fn tag(&self, _dir: &Path, name: &str) -> Result<()> {
        self.journal.push(format!("tag {name}"));
        Ok(())
    }
}

struct FakeEditor {
    journal: Journal,
}

impl TemplateEditor for FakeEditor {
    fn edit_dockerfile(&self, _dir: &Path, version: Version, _checksum: &str) -> Result<()> {
        self.journal.push(format!("dockerfile {version}"));
        Ok(())
    }

    fn edit_readme(&self, _dir: &Path, manifest: &BuildManifest) -> Result<()> {
        self.journal.push(format!("readme {}", manifest.len()));
        Ok(())
    }

    fn edit_manifest(&self, _dir: &Path, manifest: &BuildManifest) -> Result<()> {
        self.journal.push(format!("manifest {}", manifest.len()));
        Ok(())
    }
}

struct FakeNotifier {
    journal: Journal,
}

impl Notifier for FakeNotifier {
    fn notify(&self, release: &LabeledRelease) -> Result<()> {
        self.journal
            .push(format!("notify {} [{}]", release.version, release.tags.join(",")));
        Ok(())
    }
}

struct World {
    watchdog: Watchdog,
    feed: ScriptedFeed,
    registry: Registry,
    artifacts: Artifacts,
    git: FakeGit,
    journal: Journal,
    _state: TempDir,
}

fn v(s: &str) -> Version {
    s.parse().expect("version")
}

/// The worked example: three transitions with 1.2.5 marked stable.
fn example_feed() -> Vec<UpstreamRecord> {
    vec![
        UpstreamRecord::to("1.2.3"),
        UpstreamRecord::to("1.2.5"),
        UpstreamRecord::to("1.3.0").with_stable("1.2.5"),
    ]
}

fn world(records: Vec<UpstreamRecord>) -> World {
    let state = tempdir().expect("tempdir");
    let journal = Journal::default();
    let feed = ScriptedFeed(Arc::new(Mutex::new(Some(records))));
    let registry = Registry::default();
    let artifacts = Artifacts::default();
    let git = FakeGit {
        journal: journal.clone(),
        ..FakeGit::default()
    };

    let cache = ChecksumCache::new(
        state.path().join("checksums.json"),
        HashAlgorithm::Sha256,
        Box::new(artifacts.clone()),
    );
    let orchestrator = Orchestrator::new(
        Box::new(git.clone()),
        Box::new(FakeEditor {
            journal: journal.clone(),
        }),
    )
    .with_workdir(Some(state.path().to_path_buf()))
    .with_notifier(Some(Box::new(FakeNotifier {
        journal: journal.clone(),
    })));

    let watchdog = Watchdog::new(
        Box::new(feed.clone()),
        Box::new(registry.clone()),
        cache,
        orchestrator,
        BranchFloor::new(BranchKey::new(0, 13), FloorPolicy::Inclusive),
        PublishTracker::new(Duration::from_secs(3600)),
    );

    World {
        watchdog,
        feed,
        registry,
        artifacts,
        git,
        journal,
        _state: state,
    }
}

fn tags(strs: &[&str]) -> Vec<String> {
    strs.iter().map(|s| s.to_string()).collect()
}

mod planning {
    use super::*;

    // Scenario: Representatives and tags for the worked example
    //   Given a feed with 1.2.3, 1.2.5 and 1.3.0, stable 1.2.5
    //   And an empty registry
    //   When the cycle is planned
    //   Then 1.2.5 carries [1.2.5, 1.2, stable]
    //   And 1.3.0 carries [1.3.0, 1, 1.3, latest]
    #[test]
    fn given_example_feed_when_planned_then_each_line_gets_its_tags() {
        let world = world(example_feed());

        let plan = world.watchdog.plan().expect("plan");

        assert_eq!(plan.catalog.representatives, vec![v("1.2.5"), v("1.3.0")]);
        assert_eq!(plan.catalog.latest, v("1.3.0"));
        assert_eq!(plan.stable, Some(v("1.2.5")));
        assert!(plan.work.stable_needs_action);

        let work: Vec<_> = plan
            .work
            .releases
            .iter()
            .map(|r| (r.version, r.tags.clone()))
            .collect();
        assert_eq!(
            work,
            vec![
                (v("1.2.5"), tags(&["1.2.5", "1.2", "stable"])),
                (v("1.3.0"), tags(&["1.3.0", "1", "1.3", "latest"])),
            ]
        );
    }

    // Scenario: Planning has no side effects
    //   Given the example feed
    //   When the cycle is planned twice
    //   Then no workflow runs and the tracker stays empty
    #[test]
    fn given_example_feed_when_planned_then_nothing_is_published() {
        let world = world(example_feed());

        let first = world.watchdog.plan().expect("plan");
        let second = world.watchdog.plan().expect("plan");

        assert_eq!(first.work, second.work);
        assert!(world.watchdog.tracker().is_empty());
        assert!(world.journal.entries().is_empty());
        assert_eq!(world.watchdog.cycles(), 0);
    }

    // Scenario: Legacy lines are dropped by the floor
    //   Given a feed that also carries 0.12.9 and 0.13.4
    //   When the cycle is planned with floor 0.13 inclusive
    //   Then 0.12 is reported below the floor and 0.13 is still planned
    #[test]
    fn given_legacy_lines_when_planned_then_floor_drops_them() {
        let mut records = vec![UpstreamRecord::to("0.12.9"), UpstreamRecord::to("0.13.4")];
        records.extend(example_feed());
        let world = world(records);

        let plan = world.watchdog.plan().expect("plan");

        assert_eq!(plan.below_floor, vec![v("0.12.9")]);
        let planned: Vec<_> = plan.work.releases.iter().map(|r| r.version).collect();
        assert_eq!(planned, vec![v("0.13.4"), v("1.2.5"), v("1.3.0")]);
        let floor_line = &plan.work.releases[0];
        assert_eq!(floor_line.tags, tags(&["0.13.4", "0", "0.13"]));
    }
}

mod publishing {
    use super::*;

    // Scenario: First cycle publishes every line
    //   Given the example feed and an empty registry
    //   When one cycle runs
    //   Then both releases are committed, pushed, tagged and announced
    #[test]
    fn given_empty_registry_when_cycle_runs_then_every_line_is_published() {
        let mut world = world(example_feed());

        let report = world.watchdog.run_cycle().expect("cycle");

        assert_eq!(report.cycle, 1);
        assert_eq!(report.published(), 2);
        assert_eq!(report.aborted(), 0);
        assert_eq!(world.journal.count("push"), 2);
        assert_eq!(world.journal.count("tag 1.2.5"), 1);
        assert_eq!(world.journal.count("tag 1.3.0"), 1);
        assert!(
            world
                .journal
                .entries()
                .contains(&"notify 1.2.5 [1.2.5,1.2,stable]".to_string())
        );
        assert!(
            world
                .journal
                .entries()
                .contains(&"commit Update to version 1.3.0".to_string())
        );
    }

    // Scenario: Second cycle is a no-op
    //   Given a first cycle already published everything
    //   And the registry has not caught up yet
    //   When the next cycle runs
    //   Then no workflow runs
    #[test]
    fn given_published_cycle_when_next_cycle_runs_then_nothing_repeats() {
        let mut world = world(example_feed());
        world.watchdog.run_cycle().expect("first cycle");
        world.journal.clear();

        let report = world.watchdog.run_cycle().expect("second cycle");

        assert_eq!(report.cycle, 2);
        assert!(report.releases.is_empty());
        assert!(world.journal.entries().is_empty());
    }

    // Scenario: Registry tag present on cold start
    //   Given the registry already has 1.3.0
    //   When the first cycle runs
    //   Then only 1.2.5 is published
    #[test]
    fn given_live_tag_on_cold_start_when_cycle_runs_then_it_is_skipped() {
        let mut world = world(example_feed());
        world.registry.publish("1.3.0");

        let plan = world.watchdog.plan().expect("plan");
        assert!(
            plan.work
                .skipped
                .iter()
                .any(|s| s.version == v("1.3.0") && s.reason == SkipReason::Live)
        );

        let report = world.watchdog.run_cycle().expect("cycle");
        let versions: Vec<_> = report.releases.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![v("1.2.5")]);
        assert_eq!(world.journal.count("tag 1.3.0"), 0);
    }

    // Scenario: Nothing to commit
    //   Given the repository already holds the generated files
    //   When the cycle runs
    //   Then nothing is pushed, tagged or announced
    //   And the next cycle does not try again
    #[test]
    fn given_clean_repository_when_cycle_runs_then_push_tag_and_notify_are_skipped() {
        let mut world = world(example_feed());
        *world.git.clean.lock().expect("lock") = true;

        let report = world.watchdog.run_cycle().expect("cycle");

        assert_eq!(report.unchanged(), 2);
        assert_eq!(report.published(), 0);
        assert_eq!(world.journal.count("commit"), 2);
        assert_eq!(world.journal.count("push"), 0);
        assert_eq!(world.journal.count("tag"), 0);
        assert_eq!(world.journal.count("notify"), 0);

        world.journal.clear();
        let again = world.watchdog.run_cycle().expect("second cycle");
        assert!(again.releases.is_empty());
        assert!(world.journal.entries().is_empty());
    }

    // Scenario: A failing release does not stop its siblings
    //   Given the 1.2.5 artifact is not downloadable yet
    //   When the cycle runs
    //   Then 1.2.5 aborts before touching git and 1.3.0 is still published
    //   And 1.2.5 is retried on the next cycle
    #[test]
    fn given_missing_artifact_when_cycle_runs_then_only_that_release_aborts() {
        let mut world = world(example_feed());
        world.artifacts.missing.lock().expect("lock").push(v("1.2.5"));

        let report = world.watchdog.run_cycle().expect("cycle");

        assert_eq!(report.published(), 1);
        assert_eq!(report.aborted(), 1);
        let failed = &report.releases[0];
        assert_eq!(failed.version, v("1.2.5"));
        match &failed.outcome {
            ReleaseOutcome::Aborted { stage, error } => {
                assert_eq!(*stage, ReleaseStage::Start);
                assert!(error.contains("not downloadable"), "{error}");
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(world.journal.count("tag 1.2.5"), 0);
        assert_eq!(world.journal.count("tag 1.3.0"), 1);

        world.artifacts.missing.lock().expect("lock").clear();
        world.journal.clear();
        let retry = world.watchdog.run_cycle().expect("retry cycle");
        let versions: Vec<_> = retry.releases.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![v("1.2.5")]);
        assert_eq!(retry.published(), 1);
    }

    // Scenario: Feed outage
    //   Given the feed is unreachable
    //   When the cycle runs
    //   Then the cycle fails as a whole and no workflow runs
    //   And the next cycle recovers once the feed is back
    #[test]
    fn given_feed_outage_when_cycle_runs_then_cycle_aborts() {
        let mut world = world(example_feed());
        world.feed.set(None);

        let err = world.watchdog.run_cycle().expect_err("outage");
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(world.journal.entries().is_empty());
        assert!(world.watchdog.tracker().is_empty());

        world.feed.set(Some(example_feed()));
        let report = world.watchdog.run_cycle().expect("recovered");
        assert_eq!(report.cycle, 2);
        assert_eq!(report.published(), 2);
    }
}

mod stable_label {
    use super::*;

    // Scenario: Stable moves to an already published release
    //   Given every line was published with stable on 1.2.5
    //   When upstream marks 1.3.0 stable
    //   Then only 1.3.0 is republished, now carrying stable
    #[test]
    fn given_published_lines_when_stable_moves_then_new_carrier_is_republished() {
        let mut world = world(example_feed());
        world.watchdog.run_cycle().expect("first cycle");
        world.journal.clear();

        world.feed.set(Some(vec![
            UpstreamRecord::to("1.2.5"),
            UpstreamRecord::to("1.3.0").with_stable("1.3.0"),
        ]));
        let report = world.watchdog.run_cycle().expect("second cycle");

        assert_eq!(report.releases.len(), 1);
        let moved = &report.releases[0];
        assert_eq!(moved.version, v("1.3.0"));
        assert_eq!(moved.tags, tags(&["1.3.0", "1", "1.3", "latest", "stable"]));
        assert_eq!(moved.outcome, ReleaseOutcome::Published);

        world.journal.clear();
        let third = world.watchdog.run_cycle().expect("third cycle");
        assert!(third.releases.is_empty());
    }

    // Scenario: Stable on an older patch of a line
    //   Given upstream marks 1.2.3 stable while 1.2.5 is the line's newest
    //   When the cycle runs
    //   Then a stable-only record for 1.2.3 is published first
    //   And its Dockerfile is left alone
    #[test]
    fn given_stable_behind_its_line_when_cycle_runs_then_stable_only_record_is_published() {
        let mut world = world(vec![
            UpstreamRecord::to("1.2.3"),
            UpstreamRecord::to("1.2.5"),
            UpstreamRecord::to("1.3.0").with_stable("1.2.3"),
        ]);

        let report = world.watchdog.run_cycle().expect("cycle");

        let order: Vec<_> = report
            .releases
            .iter()
            .map(|r| (r.version, r.tags.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                (v("1.2.3"), tags(&["1.2.3", "stable"])),
                (v("1.2.5"), tags(&["1.2.5", "1.2"])),
                (v("1.3.0"), tags(&["1.3.0", "1", "1.3", "latest"])),
            ]
        );
        assert_eq!(report.published(), 3);
        assert_eq!(world.journal.count("dockerfile 1.2.3"), 0);
        assert_eq!(world.journal.count("dockerfile 1.2.5"), 1);
        // The released 1.2.3 tag keeps pointing at the tree that built it.
        assert_eq!(world.journal.count("tag 1.2.3"), 0);
        assert_eq!(world.journal.count("tag 1.2.5"), 1);
    }
}
