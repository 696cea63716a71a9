use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use procmetrics_core::{MetricDescriptor, MetricsError, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcmetricsConfig {
    pub version: u32,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub reaper: ReaperSection,

    #[serde(default)]
    pub service: ServiceSection,

    /// Extra metrics registered at startup, next to the built-in ones.
    #[serde(default)]
    pub metrics: Vec<MetricDescriptor>,
}

impl ProcmetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MetricsError::InvalidConfig(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.server.validate()?;
        self.reaper.validate()?;
        self.service.validate()?;

        let mut seen = std::collections::HashSet::new();
        for (i, d) in self.metrics.iter().enumerate() {
            d.clone()
                .validated()
                .map_err(|e| MetricsError::InvalidConfig(format!("metrics[{i}]: {e}")))?;
            if !seen.insert(d.name.as_str()) {
                return Err(MetricsError::InvalidConfig(format!(
                    "metrics[{i}]: duplicate metric {}",
                    d.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl StorageSection {
    /// Store directory; a non-empty `env_override` wins over the file.
    pub fn resolve_dir(&self, env_override: Option<String>) -> Result<PathBuf> {
        match env_override.filter(|d| !d.is_empty()) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => self.dir.clone().ok_or_else(|| {
                MetricsError::InvalidConfig(
                    "storage.dir is required unless PROCMETRICS_DIR is set".into(),
                )
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_scrape_timeout_ms")]
    pub scrape_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            scrape_timeout_ms: default_scrape_timeout_ms(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if !(100..=60000).contains(&self.scrape_timeout_ms) {
            return Err(MetricsError::InvalidConfig(
                "server.scrape_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            MetricsError::InvalidConfig(format!("server.listen {:?}: {e}", self.listen))
        })
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaperSection {
    /// 0 disables the periodic sweep; scrapes still reclaim orphans.
    #[serde(default = "default_reaper_interval_ms")]
    pub interval_ms: u64,

    /// How long the sweep leaves a dead process's store for scrapes to merge.
    /// Should exceed the scrape interval.
    #[serde(default = "default_reaper_grace_ms")]
    pub grace_ms: u64,
}

impl Default for ReaperSection {
    fn default() -> Self {
        Self {
            interval_ms: default_reaper_interval_ms(),
            grace_ms: default_reaper_grace_ms(),
        }
    }
}

impl ReaperSection {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms != 0 && !(1000..=3_600_000).contains(&self.interval_ms) {
            return Err(MetricsError::InvalidConfig(
                "reaper.interval_ms must be 0 or between 1000 and 3600000".into(),
            ));
        }
        if self.grace_ms > 86_400_000 {
            return Err(MetricsError::InvalidConfig(
                "reaper.grace_ms must be at most 86400000".into(),
            ));
        }
        Ok(())
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    /// Prefix of the built-in metric names.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub build: BuildInfo,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            build: BuildInfo::default(),
        }
    }
}

impl ServiceSection {
    pub fn validate(&self) -> Result<()> {
        let mut chars = self.namespace.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
            return Err(MetricsError::InvalidConfig(format!(
                "service.namespace {:?} is not a valid metric name prefix",
                self.namespace
            )));
        }
        Ok(())
    }
}

/// Values of the build-info gauge labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildInfo {
    #[serde(default = "no_release")]
    pub git_sha: String,
    #[serde(default = "no_release")]
    pub git_branch: String,
    #[serde(default = "no_release")]
    pub git_tag: String,
    #[serde(default = "no_release")]
    pub build_date: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            git_sha: no_release(),
            git_branch: no_release(),
            git_tag: no_release(),
            build_date: no_release(),
        }
    }
}

impl BuildInfo {
    pub fn git_short_sha(&self) -> String {
        self.git_sha.chars().take(7).collect()
    }
}

fn default_listen() -> String {
    "0.0.0.0:9090".into()
}
fn default_scrape_timeout_ms() -> u64 {
    5000
}
fn default_reaper_interval_ms() -> u64 {
    30000
}
fn default_reaper_grace_ms() -> u64 {
    120000
}
fn default_namespace() -> String {
    "app".into()
}
fn no_release() -> String {
    "no-release".into()
}
