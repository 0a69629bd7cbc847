//! # shipwatch
//!
//! Watches an upstream release feed and keeps a downstream image repository
//! in step with it: for every release line that gained a new patch, the
//! build files are rewritten, committed, tagged and pushed (or proposed as a
//! pull request), and a notification goes out.
//!
//! ## Pipeline
//!
//! One reconciliation cycle is **fetch → select → diff → publish**:
//!
//! 1. [`feed::VersionFeed::fetch`] returns raw transition records.
//! 2. [`catalog::Catalog::from_records`] reduces them to one representative
//!    per `major.minor` line, plus the global latest and the stable marker.
//! 3. [`labels::derive`] assigns each representative its tags
//!    (`version`, `major`, `major.minor`, `latest`, `stable`).
//! 4. [`tracker::PublishTracker::work_list`] drops everything already live on
//!    the registry or already handled by this process.
//! 5. [`orchestrator::Orchestrator::publish`] runs the per-release workflow,
//!    and publish state is recorded only once it completed.
//!
//! [`reconcile::Watchdog`] owns the state across cycles and
//! [`schedule::watch`] drives it on a timer, never running two cycles at once.
//!
//! ## Example
//!
//! ```ignore
//! use shipwatch::config::WatchConfig;
//! use shipwatch::reconcile::Watchdog;
//!
//! let config = WatchConfig::load(None)?;
//! let mut watchdog = Watchdog::from_config(&config)?;
//! let report = watchdog.run_cycle()?;
//! println!("published {} releases", report.published());
//! ```
//!
//! ## Error containment
//!
//! [`Error::scope`] says how far a failure travels: feed and registry
//! failures abort the cycle, checksum, template and git failures abort only
//! the release at hand, and notification failures are logged.

/// Version feed client and raw transition records.
pub mod feed;

/// Registry tag listing.
pub mod registry;

/// Representative selection over a feed.
pub mod catalog;

/// Tag derivation, including the synthetic stable record.
pub mod labels;

/// Publish memory reconciled against the registry.
pub mod tracker;

/// Persisted artifact checksums and hash algorithms.
pub mod checksum;

/// Build manifest (`buildinfo.json`) and its README rendering.
pub mod manifest;

/// Dockerfile, README and manifest editors.
pub mod templates;

/// Git adapter.
pub mod git;

/// Pull-request creation.
pub mod github;

/// Per-release publish workflow.
pub mod orchestrator;

/// Reconciliation cycle.
pub mod reconcile;

/// Timer loop with a single-flight guard.
pub mod schedule;

/// Configuration file (`shipwatch.toml`) and environment overrides.
pub mod config;

pub mod error;
pub mod version;

mod http;
mod process;

pub use error::{Error, ErrorScope, Result};
pub use version::{BranchKey, Version};
