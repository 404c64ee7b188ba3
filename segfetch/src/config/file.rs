//! INI configuration file.
//!
//! The file lives at `<config dir>/segfetch/config.ini`:
//!
//! ```ini
//! [download]
//! directory = /home/user/Downloads
//! threads = 4
//! connect_timeout = 30
//! read_timeout = 60
//! user_agent = segfetch/0.3.0
//!
//! [store]
//! path = /home/user/.local/share/segfetch/tasks.json
//! ```
//!
//! Missing keys fall back to their defaults; a missing file is not an error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

use super::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_THREAD_COUNT};

/// Errors raised while loading, editing, or saving the config file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read or written.
    #[error("failed to access config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid INI.
    #[error("failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A key holds a value of the wrong shape.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// The key is not a known `section.key` name.
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Location of the user's config file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("segfetch").join("config.ini"))
        .unwrap_or_else(|| PathBuf::from("segfetch.ini"))
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("segfetch").join("tasks.json"))
        .unwrap_or_else(|| PathBuf::from("segfetch-tasks.json"))
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSection {
    /// Directory new downloads are saved to.
    pub directory: PathBuf,
    /// Chunk fetchers per download.
    pub threads: usize,
    /// Connect timeout in seconds.
    pub connect_timeout: u64,
    /// Read timeout in seconds.
    pub read_timeout: u64,
    /// User-Agent header.
    pub user_agent: String,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            directory: default_download_dir(),
            threads: DEFAULT_THREAD_COUNT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            read_timeout: DEFAULT_READ_TIMEOUT.as_secs(),
            user_agent: format!("segfetch/{}", crate::VERSION),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSection {
    /// JSON file holding persisted task records.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub download: DownloadSection,
    pub store: StoreSection,
}

impl ConfigFile {
    /// Load the config file from its default location.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load a config file from `path`, returning defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut config = Self::default();
        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save the config file to its default location.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save the config file to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        let io_err = |source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini.write_to_file(path).map_err(io_err)
    }
}

/// Every key that can appear in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    DownloadDirectory,
    DownloadThreads,
    DownloadConnectTimeout,
    DownloadReadTimeout,
    DownloadUserAgent,
    StorePath,
}

impl ConfigKey {
    /// All keys in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::DownloadDirectory,
            ConfigKey::DownloadThreads,
            ConfigKey::DownloadConnectTimeout,
            ConfigKey::DownloadReadTimeout,
            ConfigKey::DownloadUserAgent,
            ConfigKey::StorePath,
        ]
    }

    /// INI section this key belongs to.
    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::StorePath => "store",
            _ => "download",
        }
    }

    /// Key name within its section.
    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::DownloadDirectory => "directory",
            ConfigKey::DownloadThreads => "threads",
            ConfigKey::DownloadConnectTimeout => "connect_timeout",
            ConfigKey::DownloadReadTimeout => "read_timeout",
            ConfigKey::DownloadUserAgent => "user_agent",
            ConfigKey::StorePath => "path",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value of this key, rendered as text.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::DownloadDirectory => config.download.directory.display().to_string(),
            ConfigKey::DownloadThreads => config.download.threads.to_string(),
            ConfigKey::DownloadConnectTimeout => config.download.connect_timeout.to_string(),
            ConfigKey::DownloadReadTimeout => config.download.read_timeout.to_string(),
            ConfigKey::DownloadUserAgent => config.download.user_agent.clone(),
            ConfigKey::StorePath => config.store.path.display().to_string(),
        }
    }

    /// Parse `value` and store it under this key.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigFileError> {
        let value = value.trim();
        match self {
            ConfigKey::DownloadDirectory => config.download.directory = PathBuf::from(value),
            ConfigKey::DownloadThreads => {
                let threads = self.parse_number(value)?;
                if threads == 0 {
                    return Err(self.invalid(value, "must be at least 1"));
                }
                config.download.threads = threads as usize;
            }
            ConfigKey::DownloadConnectTimeout => {
                config.download.connect_timeout = self.parse_number(value)?
            }
            ConfigKey::DownloadReadTimeout => config.download.read_timeout = self.parse_number(value)?,
            ConfigKey::DownloadUserAgent => config.download.user_agent = value.to_string(),
            ConfigKey::StorePath => config.store.path = PathBuf::from(value),
        }
        Ok(())
    }

    fn parse_number(&self, value: &str) -> Result<u64, ConfigFileError> {
        value
            .parse::<u64>()
            .map_err(|e| self.invalid(value, &e.to_string()))
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| ConfigFileError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
