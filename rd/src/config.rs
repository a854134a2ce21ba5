//! RouteDaemon configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::EventLogConfig;
use crate::retry::RetryPolicy;
use crate::store::CorrelationConfig;

/// Main RouteDaemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Lifetimes of per-request correlation keys
    pub correlation: CorrelationConfig,

    /// Caller-side wait settings
    pub waiter: WaiterConfig,

    /// Event log partitioning and redelivery
    #[serde(rename = "event-log")]
    pub event_log: EventLogConfig,

    /// Backoff for transient infrastructure errors
    pub retry: RetryPolicy,

    /// Long-lived proposal cache
    pub cache: CacheConfig,

    /// Response collector instances
    pub collector: CollectorConfig,

    /// Model builder instances
    pub model: ModelConfig,

    /// Provider roster
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            correlation: CorrelationConfig::default(),
            waiter: WaiterConfig::default(),
            event_log: EventLogConfig::default(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            collector: CollectorConfig::default(),
            model: ModelConfig::default(),
            providers: vec![
                ProviderConfig::fixture("provider-one"),
                ProviderConfig::fixture("provider-two"),
            ],
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .routedaemon.yml
        let local_config = PathBuf::from(".routedaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/routedaemon/routedaemon.yml
        if let Some(user_config) = user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(PathBuf::from(".routedaemon.yml"))
                .chain(user_config_path())
                .collect(),
        };
        candidates
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(&p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        debug!("Config::validate: called");
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(eyre::eyre!("Provider ids must not be empty"));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(eyre::eyre!("Duplicate provider id: {}", provider.id));
            }
            if provider.kind == ProviderKind::Http && provider.base_url.is_none() {
                return Err(eyre::eyre!("Provider {} is http but has no base-url", provider.id));
            }
        }
        if self.collector.instances == 0 {
            return Err(eyre::eyre!("collector.instances must be at least 1"));
        }
        if self.model.instances == 0 {
            return Err(eyre::eyre!("model.instances must be at least 1"));
        }
        if self.correlation.sweep_interval_secs == 0 {
            return Err(eyre::eyre!("correlation.sweep-interval-secs must be at least 1"));
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("routedaemon").join("routedaemon.yml"))
}

/// Caller-side wait settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaiterConfig {
    /// How long a caller waits for every provider before taking partial results
    #[serde(rename = "deadline-ms")]
    pub deadline_ms: u64,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self { deadline_ms: 5000 }
    }
}

/// Long-lived proposal cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database file, or ":memory:"
    pub path: PathBuf,

    /// Never return proposals whose validity deadline has passed
    #[serde(rename = "hide-expired")]
    pub hide_expired: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("routedaemon")
                .join("proposals.db"),
            hide_expired: true,
        }
    }
}

/// Response collector instances sharing one consumer group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub instances: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { instances: 2 }
    }
}

/// Model builder instances sharing one consumer group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub instances: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { instances: 1 }
    }
}

/// How a provider is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Generated proposals, no network
    #[default]
    Fixture,
    /// JSON over HTTP
    Http,
}

/// One entry of the provider roster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,

    pub kind: ProviderKind,

    /// Base URL for http providers, e.g. "http://provider-one/api/v1/"
    #[serde(rename = "base-url")]
    pub base_url: Option<String>,

    /// Per-call HTTP timeout
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Delay between availability probes
    #[serde(rename = "probe-interval-ms")]
    pub probe_interval_ms: u64,

    /// Give up on an unavailable provider after this long
    #[serde(rename = "probe-timeout-ms")]
    pub probe_timeout_ms: u64,

    /// Upper bound on generated proposals per search (fixture)
    #[serde(rename = "max-proposals")]
    pub max_proposals: usize,

    /// Simulated response time (fixture)
    #[serde(rename = "latency-ms")]
    pub latency_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: ProviderKind::Fixture,
            base_url: None,
            timeout_ms: 10_000,
            probe_interval_ms: 1000,
            probe_timeout_ms: 10_000,
            max_proposals: 3,
            latency_ms: 0,
        }
    }
}

impl ProviderConfig {
    pub fn fixture(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.correlation.pending_ttl_secs, 300);
        assert_eq!(config.correlation.responses_ttl_secs, 1800);
        assert_eq!(config.correlation.sweep_interval_secs, 60);
        assert_eq!(config.waiter.deadline_ms, 5000);
        assert_eq!(config.event_log.partitions, 4);
        assert_eq!(config.providers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rd.yml");
        fs::write(
            &path,
            r#"
log-level: DEBUG
waiter:
  deadline-ms: 2500
correlation:
  pending-ttl-secs: 60
cache:
  path: ":memory:"
providers:
  - id: p1
  - id: p2
    kind: http
    base-url: "http://p2.local/api/v1/"
    timeout-ms: 3000
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
        assert_eq!(config.waiter.deadline_ms, 2500);
        assert_eq!(config.correlation.pending_ttl_secs, 60);
        assert_eq!(config.correlation.responses_ttl_secs, 1800);
        assert_eq!(config.cache.path, PathBuf::from(":memory:"));
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].kind, ProviderKind::Fixture);
        assert_eq!(config.providers[1].kind, ProviderKind::Http);
        assert_eq!(config.providers[1].timeout_ms, 3000);
        assert_eq!(config.providers[1].probe_interval_ms, 1000);
        assert!(config.validate().is_ok());

        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let path = PathBuf::from("/nonexistent/rd.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_validate_rejects_bad_rosters() {
        let mut config = Config::default();
        config.providers.push(ProviderConfig::fixture("provider-one"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers = vec![ProviderConfig {
            id: "p".into(),
            kind: ProviderKind::Http,
            ..Default::default()
        }];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collector.instances = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.correlation.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
