//! Configuration file support (`shipwatch.toml`).
//!
//! Every section has defaults, so an empty file (or no file at all) is a
//! valid configuration. Credentials are only ever taken from the
//! environment, never from the file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use shipwatch_webhook::{WebhookConfig, WebhookFormat};

use crate::checksum::HashAlgorithm;
use crate::git::{GitIdentity, github_remote_url};
use crate::github::DEFAULT_API_BASE;
use crate::orchestrator::PublishStrategy;
use crate::templates::TemplatePaths;
use crate::tracker::{BranchFloor, FloorPolicy};
use crate::version::BranchKey;

pub const DEFAULT_CONFIG_FILE: &str = "shipwatch.toml";

pub const ENV_GITHUB_USER: &str = "GITHUB_USER";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_GIT_NAME: &str = "GIT_NAME";
pub const ENV_GIT_EMAIL: &str = "GIT_EMAIL";
pub const ENV_DISCORD_WEBHOOK_URL: &str = "DISCORD_WEBHOOK_URL";
pub const ENV_GIT_BIN: &str = "SHIPWATCH_GIT_BIN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    /// Key of the record list inside the feed document
    pub channel: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "https://www.factorio.com/updater/get-available-versions?apiVersion=2".to_string(),
            channel: "core-linux_headless64".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub tags_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tags_url: "https://registry.hub.docker.com/v1/repositories/factoriotools/factorio/tags"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Download URL with a `{version}` placeholder
    pub url_template: String,
    pub hash: HashAlgorithm,
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            url_template: "https://www.factorio.com/get-download/{version}/headless/linux64"
                .to_string(),
            hash: HashAlgorithm::Sha1,
            download_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub owner: String,
    pub name: String,
    /// Explicit clone URL; derived from owner/name when unset
    pub url: Option<String>,
    pub base_branch: String,
    /// Parent directory of per-release clones (system temp dir when unset)
    pub workdir: Option<PathBuf>,
    pub dockerfile: String,
    pub readme: PathBuf,
    pub manifest: PathBuf,
    #[serde(with = "humantime_serde")]
    pub git_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        let paths = TemplatePaths::default();
        Self {
            owner: "factoriotools".to_string(),
            name: "factorio-docker".to_string(),
            url: None,
            base_branch: "master".to_string(),
            workdir: None,
            dockerfile: paths.dockerfile,
            readme: paths.readme,
            manifest: paths.manifest,
            git_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub strategy: PublishStrategy,
    /// Oldest release line that is still published
    pub min_branch: BranchKey,
    pub floor: FloorPolicy,
    /// How long a publish the registry has not shown yet suppresses re-attempts
    #[serde(with = "humantime_serde")]
    pub confirm_window: Duration,
    pub commit_author_name: Option<String>,
    pub commit_author_email: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            strategy: PublishStrategy::Direct,
            min_branch: BranchKey::new(0, 13),
            floor: FloorPolicy::Inclusive,
            confirm_window: Duration::from_secs(3600),
            commit_author_name: None,
            commit_author_email: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub checksum_cache: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            checksum_cache: PathBuf::from("checksums.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_base: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Secrets and host specifics, read from the environment only.
#[derive(Clone, Default)]
pub struct Credentials {
    pub github_user: Option<String>,
    pub github_token: Option<String>,
    pub git_bin: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("github_user", &self.github_user)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("git_bin", &self.git_bin)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub feed: FeedConfig,
    pub registry: RegistryConfig,
    pub artifact: ArtifactConfig,
    pub repository: RepositoryConfig,
    pub publish: PublishConfig,
    pub schedule: ScheduleConfig,
    pub state: StateConfig,
    pub notify: WebhookConfig,
    pub github: GitHubConfig,
    #[serde(skip)]
    pub credentials: Credentials,
}

impl WatchConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: WatchConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if given (it must exist), else `shipwatch.toml` in the
    /// current directory when present, else defaults. Environment overrides
    /// are applied and the result validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (empty values are ignored).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(user) = get(ENV_GITHUB_USER) {
            self.credentials.github_user = Some(user);
        }
        if let Some(token) = get(ENV_GITHUB_TOKEN) {
            self.credentials.github_token = Some(token);
        }
        if let Some(bin) = get(ENV_GIT_BIN) {
            self.credentials.git_bin = Some(bin);
        }
        if let Some(name) = get(ENV_GIT_NAME) {
            self.publish.commit_author_name = Some(name);
        }
        if let Some(email) = get(ENV_GIT_EMAIL) {
            self.publish.commit_author_email = Some(email);
        }
        if let Some(url) = get(ENV_DISCORD_WEBHOOK_URL) {
            self.notify.enabled = true;
            self.notify.url = Some(url);
            self.notify.format = WebhookFormat::Discord;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schedule.interval.is_zero() {
            bail!("schedule.interval must be greater than 0");
        }
        if self.schedule.http_timeout.is_zero() {
            bail!("schedule.http_timeout must be greater than 0");
        }
        if self.artifact.download_timeout.is_zero() {
            bail!("artifact.download_timeout must be greater than 0");
        }
        if self.repository.git_timeout.is_zero() {
            bail!("repository.git_timeout must be greater than 0");
        }
        if self.feed.url.is_empty() {
            bail!("feed.url cannot be empty");
        }
        if self.feed.channel.is_empty() {
            bail!("feed.channel cannot be empty");
        }
        if self.registry.tags_url.is_empty() {
            bail!("registry.tags_url cannot be empty");
        }
        if !self.artifact.url_template.contains("{version}") {
            bail!("artifact.url_template must contain a {{version}} placeholder");
        }
        if self.repository.base_branch.is_empty() {
            bail!("repository.base_branch cannot be empty");
        }
        if self.repository.url.is_none()
            && (self.repository.owner.is_empty() || self.repository.name.is_empty())
        {
            bail!("repository.owner and repository.name are required when repository.url is unset");
        }
        if self.publish.strategy == PublishStrategy::PullRequest
            && (self.repository.owner.is_empty() || self.repository.name.is_empty())
        {
            bail!("the pull_request strategy requires repository.owner and repository.name");
        }
        if self.notify.enabled && self.notify.url.as_deref().is_none_or(str::is_empty) {
            bail!("notify.url is required when notify.enabled is true");
        }
        Ok(())
    }

    /// Clone URL, with GitHub credentials embedded when they are available.
    pub fn remote_url(&self) -> String {
        match &self.repository.url {
            Some(url) => url.clone(),
            None => github_remote_url(
                &self.repository.owner,
                &self.repository.name,
                self.credentials.github_user.as_deref(),
                self.credentials.github_token.as_deref(),
            ),
        }
    }

    /// Commit identity, when both name and email are configured.
    pub fn git_identity(&self) -> Option<GitIdentity> {
        match (&self.publish.commit_author_name, &self.publish.commit_author_email) {
            (Some(name), Some(email)) => Some(GitIdentity {
                name: name.clone(),
                email: email.clone(),
            }),
            _ => None,
        }
    }

    pub fn floor(&self) -> BranchFloor {
        BranchFloor::new(self.publish.min_branch, self.publish.floor)
    }

    pub fn template_paths(&self) -> TemplatePaths {
        TemplatePaths {
            dockerfile: self.repository.dockerfile.clone(),
            readme: self.repository.readme.clone(),
            manifest: self.repository.manifest.clone(),
        }
    }

    /// Annotated starting configuration.
    pub fn default_toml_template() -> String {
        r#"# shipwatch configuration

[feed]
url = "https://www.factorio.com/updater/get-available-versions?apiVersion=2"
# Key of the record list inside the feed document
channel = "core-linux_headless64"

[registry]
# Tag listing of the published image (v1 array or v2 paginated format)
tags_url = "https://registry.hub.docker.com/v1/repositories/factoriotools/factorio/tags"

[artifact]
url_template = "https://www.factorio.com/get-download/{version}/headless/linux64"
# sha1 or sha256
hash = "sha1"
download_timeout = "5m"

[repository]
owner = "factoriotools"
name = "factorio-docker"
base_branch = "master"
dockerfile = "{major}.{minor}/Dockerfile"
readme = "README.md"
manifest = "buildinfo.json"
git_timeout = "2m"

[publish]
# direct or pull_request
strategy = "direct"
# Oldest release line that is still published
min_branch = "0.13"
# inclusive keeps min_branch itself, exclusive drops it
floor = "inclusive"
confirm_window = "1h"

[schedule]
interval = "5m"
http_timeout = "10s"

[state]
checksum_cache = "checksums.json"

[notify]
enabled = false
# discord or json
format = "discord"
timeout = "10s"

[github]
api_base = "https://api.github.com"
"#
        .to_string()
    }
}
