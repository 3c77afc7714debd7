//! Engine configuration structures

use super::error::VersionError;
use super::text_diff::TextFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration, usually read from a TOML file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where and how records are persisted
    #[serde(default)]
    pub store: StoreConfig,

    /// Diff rendering configuration
    #[serde(default)]
    pub diff: DiffConfig,
}

/// sled database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database directory. Ignored when `temporary` is set.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Use a throwaway database that is removed when dropped
    #[serde(default)]
    pub temporary: bool,

    /// Page cache size in bytes
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Background flush interval. sled's own default applies when unset.
    pub flush_every_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            temporary: false,
            cache_capacity: default_cache_capacity(),
            flush_every_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Markup used for word diffs of text attributes: "html" or "ascii"
    #[serde(default)]
    pub text_format: TextFormat,
}

// Serde default functions
fn default_path() -> PathBuf {
    PathBuf::from("versions.db")
}

fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, VersionError> {
        Ok(toml::from_str(content)?)
    }

    /// Load engine config from a TOML file
    pub fn load(path: &Path) -> Result<Self, VersionError> {
        let content = std::fs::read_to_string(path).map_err(|source| VersionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

impl StoreConfig {
    pub fn open(&self) -> Result<sled::Db, VersionError> {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .flush_every_ms(self.flush_every_ms);
        config = if self.temporary {
            config.temporary(true)
        } else {
            config.path(&self.path)
        };
        Ok(config.open()?)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_every_ms.map(Duration::from_millis)
    }
}
