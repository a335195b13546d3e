//! Launcher configuration.
//!
//! Loaded from a TOML file; every section and key is optional:
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [database]
//! path = "tweets.db"      # omitted: temporary database
//!
//! [csv]
//! path = "data/tweets.csv"
//! delimiter = ";"
//! header = true
//! fields = ["id", "user", "message"]
//!
//! [pipeline]
//! limit = 100
//! strict = false
//! commit_interval = 10
//! fetch_size = 100
//!
//! [index]
//! name = "tweets"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::tweet::TWEET_FIELDS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {}: {cause}", path.display())]
    Io {
        path: PathBuf,
        cause: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub csv: CsvConfig,
    pub pipeline: PipelineConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file. A temporary database is used when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsvConfig {
    pub path: PathBuf,
    pub delimiter: char,
    /// Whether the first line is a header to skip.
    pub header: bool,
    pub fields: Vec<String>,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/tweets.csv"),
            delimiter: ',',
            header: true,
            fields: TWEET_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl CsvConfig {
    /// Delimiter as the single byte the CSV parser expects.
    pub fn delimiter_byte(&self) -> Result<u8, ConfigError> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(|b| b.is_ascii())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "csv.delimiter must be a single ASCII character, got '{}'",
                    self.delimiter
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub limit: Option<u64>,
    pub strict: bool,
    pub commit_interval: usize,
    pub fetch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            limit: None,
            strict: false,
            commit_interval: 1,
            fetch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "tweets".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|cause| ConfigError::Io {
            path: path.to_path_buf(),
            cause,
        })?;
        debug!(path = %path.display(), "loading config");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.csv.delimiter_byte()?;

        for name in TWEET_FIELDS {
            let count = self.csv.fields.iter().filter(|f| *f == name).count();
            if count != 1 {
                return Err(ConfigError::Invalid(format!(
                    "csv.fields must name '{name}' exactly once, found {count}"
                )));
            }
        }
        if self.pipeline.commit_interval == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.commit_interval must be at least 1".to_string(),
            ));
        }
        if self.pipeline.fetch_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.fetch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
