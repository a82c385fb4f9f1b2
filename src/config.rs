use anyhow::{Context, Result};
use history_expiry::ExpiryConfig;
use history_storage::RocksOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix of environment variables overriding file settings, e.g.
/// `HISTORY__EXPIRY__EXPIRE_DAYS_THRESHOLD=30`.
pub const ENV_PREFIX: &str = "HISTORY";

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub database: DatabaseConfig,
    /// Expiration policy
    pub expiry: ExpiryConfig,
    /// Bookmark oracle configuration
    pub bookmarks: BookmarksConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Data directory holding the history and favicon stores
    pub datadir: PathBuf,
    /// Keep everything in memory instead of opening RocksDB
    pub in_memory: bool,
    /// Database cache size in MB
    pub cache_size: usize,
    /// Number of open files
    pub max_open_files: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarksConfig {
    /// File listing bookmarked URLs, one per line
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Register expiration counters
    pub enabled: bool,
    /// Metric name prefix
    pub prefix: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            datadir: default_datadir(),
            in_memory: false,
            cache_size: 64,
            max_open_files: 512,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "history".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn history_path(&self) -> PathBuf {
        self.datadir.join("History")
    }

    pub fn favicons_path(&self) -> PathBuf {
        self.datadir.join("Favicons")
    }

    pub fn rocks_options(&self) -> RocksOptions {
        RocksOptions {
            cache_size_mb: self.cache_size,
            max_open_files: self.max_open_files,
        }
    }
}

/// Platform data directory, or `./data` when none can be determined.
pub fn default_datadir() -> PathBuf {
    directories::ProjectDirs::from("org", "history-rust", "history-rust")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

impl Config {
    /// Layer defaults, an optional TOML file and `HISTORY__*` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Config::default())
                .context("Failed to build default configuration")?,
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context("Failed to read configuration file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;

        fs::write(path, content)
            .context("Failed to write configuration file")?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.expiry.validate()?;

        if !self.database.in_memory && self.database.datadir.as_os_str().is_empty() {
            anyhow::bail!("datadir must be set unless in_memory is enabled");
        }

        if self.database.max_open_files == 0 {
            anyhow::bail!("max_open_files must not be 0");
        }

        if self.metrics.enabled && self.metrics.prefix.is_empty() {
            anyhow::bail!("metrics prefix must not be empty");
        }

        Ok(())
    }
}
