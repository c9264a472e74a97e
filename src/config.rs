//! Configuration management for relaypath-rs.
//!
//! Configuration is applied in order: defaults → config file → environment →
//! command-line arguments, with later sources overriding earlier ones.
//!
//! # Configuration Sources
//!
//! | Source | Priority | Description |
//! |--------|----------|-------------|
//! | Defaults | Lowest | Built-in defaults |
//! | Config File | Medium | TOML file (`--config` or `RELAYPATH_CONFIG`) |
//! | Environment | High | `RELAYPATH_CONFIG`, `RELAYPATH_SNAPSHOT` |
//! | CLI Arguments | Highest | Command-line flags override all |
//!
//! # Example Configuration File
//!
//! ```toml
//! loglevel = "notice"       # debug, info, notice, warn, error
//! # logfile = "relaypath.log"
//!
//! # snapshot_file = "cached-consensus"
//! snapshot_format = "auto"  # auto, toml, network-status
//! # cache_file = "snapshot.cache"
//! cache_max_age_secs = 3600
//!
//! [path]
//! hop_count = 4
//! entry_flags = ["Fast", "Stable"]
//!
//! [retry]
//! max_attempts = 5
//! retry_delay_secs = 1.0
//! backoff = "constant"      # constant, exponential
//! max_retry_delay_secs = 30.0
//! establish_timeout_secs = 20.0
//! catalog_refresh = "every_attempt"  # every_attempt, reuse
//! stale_after_hours = 24
//! ```

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::node::{FLAG_FAST, FLAG_STABLE};
use crate::path::{DEFAULT_HOP_COUNT, MIN_HOP_COUNT};
use crate::snapshot::SnapshotFormat;

/// Log level for relaypath-rs output.
///
/// From most to least verbose: [`Debug`](LogLevel::Debug) >
/// [`Info`](LogLevel::Info) > [`Notice`](LogLevel::Notice) >
/// [`Warn`](LogLevel::Warn) > [`Error`](LogLevel::Error)
///
/// ```rust
/// use relaypath::LogLevel;
///
/// let level: LogLevel = "warning".parse().unwrap();
/// assert_eq!(level, LogLevel::Warn);
/// assert!(LogLevel::Notice < level);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Low-level debugging information.
    Debug,
    /// Informational messages about normal operation.
    Info,
    /// Notable events that may be of interest.
    #[default]
    Notice,
    /// Warning conditions that don't prevent operation.
    Warn,
    /// Error conditions.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "NOTICE" => Ok(LogLevel::Notice),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "ERR" => Ok(LogLevel::Error),
            _ => Err(Error::Config(format!("invalid log level: {}", s))),
        }
    }
}

/// Path shape settings.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `hop_count` | 4 | Relays per path (minimum 2) |
/// | `entry_flags` | Fast, Stable | Flags preferred for the entry hop |
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathConfig {
    /// Number of relays in each path.
    #[serde(default = "default_hop_count")]
    pub hop_count: usize,
    /// Flags an entry relay should carry. Entry relays without them are used
    /// only when none carry them.
    #[serde(default = "default_entry_flags")]
    pub entry_flags: Vec<String>,
}

fn default_hop_count() -> usize {
    DEFAULT_HOP_COUNT
}
fn default_entry_flags() -> Vec<String> {
    vec![FLAG_FAST.to_string(), FLAG_STABLE.to_string()]
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            hop_count: default_hop_count(),
            entry_flags: default_entry_flags(),
        }
    }
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Constant,
    /// Delay doubles after each failed attempt, up to `max_retry_delay_secs`.
    Exponential,
}

/// Where each retry attempt gets its catalog from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatalogRefresh {
    /// Ask the snapshot provider again on every attempt.
    #[default]
    EveryAttempt,
    /// Fetch once and reuse the same catalog for all attempts.
    Reuse,
}

/// Retry coordinator settings.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `max_attempts` | 5 | Attempts before giving up |
/// | `retry_delay_secs` | 1.0 | Delay before the second attempt |
/// | `backoff` | constant | `constant` or `exponential` |
/// | `max_retry_delay_secs` | 30.0 | Cap for exponential backoff |
/// | `establish_timeout_secs` | 20.0 | Timeout for one establish call |
/// | `catalog_refresh` | every_attempt | `every_attempt` or `reuse` |
/// | `stale_after_hours` | 24 | Warn for hops published longer ago |
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum attempts, counting the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    /// Delay growth strategy.
    #[serde(default)]
    pub backoff: Backoff,
    /// Upper bound for the exponential delay in seconds.
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: f64,
    /// Timeout for one establish call in seconds.
    #[serde(default = "default_establish_timeout_secs")]
    pub establish_timeout_secs: f64,
    /// Catalog refresh policy.
    #[serde(default)]
    pub catalog_refresh: CatalogRefresh,
    /// Age after which a hop's descriptor is reported as stale.
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: u32,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_retry_delay_secs() -> f64 {
    1.0
}
fn default_max_retry_delay_secs() -> f64 {
    30.0
}
fn default_establish_timeout_secs() -> f64 {
    20.0
}
fn default_stale_after_hours() -> u32 {
    24
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            backoff: Backoff::default(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            establish_timeout_secs: default_establish_timeout_secs(),
            catalog_refresh: CatalogRefresh::default(),
            stale_after_hours: default_stale_after_hours(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the delay is not representable as a
    /// [`Duration`].
    pub fn delay_after(&self, attempt: u32) -> Result<Duration> {
        let secs = match self.backoff {
            Backoff::Constant => self.retry_delay_secs,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(30) as i32;
                (self.retry_delay_secs * 2f64.powi(exponent)).min(self.max_retry_delay_secs)
            }
        };
        secs_to_duration("retry delay", secs)
    }

    /// Timeout applied to each establish call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the timeout is not representable as a
    /// [`Duration`].
    pub fn establish_timeout(&self) -> Result<Duration> {
        secs_to_duration("establish_timeout_secs", self.establish_timeout_secs)
    }

    /// Checks that the retry settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        secs_to_duration("retry_delay_secs", self.retry_delay_secs)?;
        secs_to_duration("max_retry_delay_secs", self.max_retry_delay_secs)?;
        if self.establish_timeout()?.is_zero() {
            return Err(Error::Config(
                "establish_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Converts seconds to a [`Duration`], rejecting negative, non-finite and
/// overflowing values.
fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("{} out of range ({}): {}", name, secs, e)))
}

/// Main configuration struct for relaypath-rs.
///
/// ```rust
/// use relaypath::Config;
///
/// let config = Config::default();
/// assert_eq!(config.path.hop_count, 4);
/// assert_eq!(config.retry.max_attempts, 5);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Log level for output.
    #[serde(default)]
    pub loglevel: LogLevel,
    /// Log file path. None for stdout.
    #[serde(default)]
    pub logfile: Option<String>,
    /// Snapshot file to load relays from.
    #[serde(default)]
    pub snapshot_file: Option<PathBuf>,
    /// Format of `snapshot_file`.
    #[serde(default)]
    pub snapshot_format: SnapshotFormat,
    /// On-disk snapshot cache. None disables caching.
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    /// Maximum age of the snapshot cache in seconds.
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,
    /// Path shape settings.
    #[serde(default)]
    pub path: PathConfig,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_cache_max_age_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loglevel: LogLevel::default(),
            logfile: None,
            snapshot_file: None,
            snapshot_format: SnapshotFormat::default(),
            cache_file: None,
            cache_max_age_secs: default_cache_max_age_secs(),
            path: PathConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    /// Returns [`Error::Config`] if the TOML is invalid.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.path.hop_count < MIN_HOP_COUNT {
            return Err(Error::Config(format!(
                "hop_count must be at least {}",
                MIN_HOP_COUNT
            )));
        }
        self.retry.validate()
    }

    /// Maximum snapshot cache age.
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }
}

/// Command-line arguments for relaypath-rs.
///
/// # Options
///
/// | Option | Description |
/// |--------|-------------|
/// | `--config <FILE>` | Configuration file [env: RELAYPATH_CONFIG] [default: relaypath.conf] |
/// | `--generate_config <FILE>` | Write default config to file and exit |
/// | `--snapshot <FILE>` | Relay snapshot [env: RELAYPATH_SNAPSHOT] |
/// | `--snapshot-format <FMT>` | `auto`, `toml` or `network-status` |
/// | `--cache <FILE>` | Snapshot cache file |
/// | `--hops <N>` | Relays per path |
/// | `--max-attempts <N>` | Retry budget |
/// | `--loglevel <LEVEL>` | DEBUG, INFO, NOTICE, WARN, ERROR |
/// | `--logfile <FILE>` | Log to file instead of stdout |
/// | `--classify-only` | Print pool sizes and exit |
#[derive(Parser, Debug)]
#[command(name = "relaypath-rs")]
#[command(about = "Build diversity-constrained relay paths from a network snapshot")]
#[command(version)]
pub struct CliArgs {
    /// Path to configuration file.
    #[arg(
        long = "config",
        env = "RELAYPATH_CONFIG",
        default_value = "relaypath.conf"
    )]
    pub config_file: PathBuf,

    /// Write default config to file and exit.
    #[arg(long = "generate_config")]
    pub generate_config: Option<PathBuf>,

    /// Relay snapshot to select from.
    #[arg(long = "snapshot", env = "RELAYPATH_SNAPSHOT")]
    pub snapshot_file: Option<PathBuf>,

    /// Snapshot format (auto, toml, network-status).
    #[arg(long)]
    pub snapshot_format: Option<String>,

    /// Snapshot cache file.
    #[arg(long = "cache")]
    pub cache_file: Option<PathBuf>,

    /// Number of hops in the path.
    #[arg(long = "hops")]
    pub hop_count: Option<usize>,

    /// Maximum number of build attempts.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Log verbosity (DEBUG, INFO, NOTICE, WARN, ERROR).
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Log to file instead of stdout.
    #[arg(long)]
    pub logfile: Option<String>,

    /// Classify the snapshot, print pool sizes and exit.
    #[arg(long)]
    pub classify_only: bool,
}

impl CliArgs {
    /// Apply CLI arguments to a configuration, overriding values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown log level or snapshot format.
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(ref snapshot_file) = self.snapshot_file {
            config.snapshot_file = Some(snapshot_file.clone());
        }
        if let Some(ref format) = self.snapshot_format {
            config.snapshot_format = format.parse()?;
        }
        if let Some(ref cache_file) = self.cache_file {
            config.cache_file = Some(cache_file.clone());
        }
        if let Some(hop_count) = self.hop_count {
            config.path.hop_count = hop_count;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(ref loglevel) = self.loglevel {
            config.loglevel = loglevel.parse()?;
        }
        if let Some(ref logfile) = self.logfile {
            config.logfile = Some(logfile.clone());
        }
        Ok(())
    }
}

/// Load configuration from file and CLI arguments.
///
/// # Errors
///
/// Returns [`Error::Config`] if configuration is invalid.
pub fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = Config::default();

    if args.config_file.exists() {
        config = Config::from_file(&args.config_file)?;
    }

    args.apply_to(&mut config)?;
    config.validate()?;

    Ok(config)
}
