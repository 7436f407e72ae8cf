//! ---
//! acct_section: "01-core-functionality"
//! acct_subsection: "module"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Shared primitives and utilities for the accounting runtime."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Backend used when nothing is configured. Mirrors a node without power metering.
pub const DEFAULT_ENERGY_BACKEND: &str = "acct_gather_energy/none";

fn default_energy_backend() -> String {
    DEFAULT_ENERGY_BACKEND.to_owned()
}

fn default_sample_frequency() -> u32 {
    30
}

fn default_profile_enabled() -> bool {
    true
}

fn default_profile_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_ticker_resolution() -> Duration {
    Duration::from_millis(250)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9817))
}

/// Primary configuration object for the accounting daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub energy: EnergyConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ACCT_GATHER_CONFIG";

    /// Load configuration from disk, respecting the `ACCT_GATHER_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Unlike a controller deployment a compute node can run on defaults, so when no
    /// candidate exists the default configuration is returned with `source: None`.
    /// An explicit `ACCT_GATHER_CONFIG` that cannot be read is still an error.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.energy.validate()?;
        self.profile.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Energy accounting settings: which backend to bind and how often to sample it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyConfig {
    /// Backend name, bare (`synthetic`) or plugin-qualified (`acct_gather_energy/synthetic`).
    #[serde(default = "default_energy_backend")]
    pub backend: String,
    /// Dynamic sampling frequency in seconds. Zero disables the background sampler.
    #[serde(default = "default_sample_frequency")]
    pub sample_frequency: u32,
    /// Optional backend configuration file (the `acct_gather` options file).
    #[serde(default)]
    pub conf_file: Option<PathBuf>,
    /// Inline backend options, used when no `conf_file` is given.
    #[serde(default)]
    pub options: toml::Table,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            backend: default_energy_backend(),
            sample_frequency: default_sample_frequency(),
            conf_file: None,
            options: toml::Table::new(),
        }
    }
}

impl EnergyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(anyhow!("energy.backend must not be empty"));
        }
        if self.conf_file.is_some() && !self.options.is_empty() {
            return Err(anyhow!(
                "energy.conf_file and energy.options are mutually exclusive"
            ));
        }
        Ok(())
    }
}

/// Profiling timer settings. Each category ticks at its own interval.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_profile_enabled")]
    pub enabled: bool,
    #[serde(default = "default_profile_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub energy_interval: Duration,
    #[serde(default = "default_profile_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub task_interval: Duration,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub filesystem_interval: Option<Duration>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub network_interval: Option<Duration>,
    /// How often the ticker thread checks for elapsed intervals.
    #[serde(default = "default_ticker_resolution")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ticker_resolution: Duration,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            enabled: default_profile_enabled(),
            energy_interval: default_profile_interval(),
            task_interval: default_profile_interval(),
            filesystem_interval: None,
            network_interval: None,
            ticker_resolution: default_ticker_resolution(),
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.energy_interval.as_secs() == 0 {
            return Err(anyhow!(
                "profile.energy_interval must be at least one second"
            ));
        }
        if self.ticker_resolution.is_zero() {
            return Err(anyhow!("profile.ticker_resolution must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub file_logging: bool,
    /// Filter directive used when neither `ACCT_GATHER_LOG` nor `RUST_LOG` is set.
    #[serde(default)]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_logging: false,
            level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
