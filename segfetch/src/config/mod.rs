//! Configuration for the download engine.
//!
//! [`EngineConfig`] holds the knobs the engine itself reads. [`ConfigFile`]
//! is the user-facing INI file the CLI loads defaults from.

mod file;

pub use file::{config_file_path, ConfigFile, ConfigFileError, ConfigKey};

use std::time::Duration;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default socket read timeout (time allowed between received bytes).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Remaining size above which a download may be split across threads (1 MiB).
pub const DEFAULT_MIN_MULTI_CHUNK_SIZE: u64 = 1024 * 1024;

/// Buffer used when copying a chunk's side file into the destination (8 KiB).
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum progress advance between two published `Downloading` statuses.
pub const DEFAULT_PROGRESS_STEP: f32 = 0.01;

/// Default number of concurrent chunk fetchers per download.
pub const DEFAULT_THREAD_COUNT: usize = 4;

/// Configuration for [`DownloadEngine`](crate::download::DownloadEngine).
///
/// No overall request timeout is applied; a transfer is only bounded by the
/// connect and per-read timeouts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,

    /// Timeout for a single socket read.
    pub read_timeout: Duration,

    /// Remaining bytes must exceed this before the request is split.
    pub min_multi_chunk_size: u64,

    /// Buffer size for the side-file to destination copy.
    pub copy_buffer_size: usize,

    /// Progress delta that triggers a new `Downloading` publish.
    pub progress_step: f32,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            min_multi_chunk_size: DEFAULT_MIN_MULTI_CHUNK_SIZE,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            progress_step: DEFAULT_PROGRESS_STEP,
            user_agent: format!("segfetch/{}", crate::VERSION),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the size threshold for multi-chunk downloads.
    pub fn with_min_multi_chunk_size(mut self, bytes: u64) -> Self {
        self.min_multi_chunk_size = bytes;
        self
    }

    /// Set the copy buffer size (minimum 1 byte).
    pub fn with_copy_buffer_size(mut self, bytes: usize) -> Self {
        self.copy_buffer_size = bytes.max(1);
        self
    }

    /// Set the progress step used for publish throttling.
    pub fn with_progress_step(mut self, step: f32) -> Self {
        self.progress_step = step.max(0.0);
        self
    }

    /// Set the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build an engine configuration from the user's config file.
    pub fn from_config_file(file: &ConfigFile) -> Self {
        Self::default()
            .with_connect_timeout(Duration::from_secs(file.download.connect_timeout))
            .with_read_timeout(Duration::from_secs(file.download.read_timeout))
            .with_user_agent(file.download.user_agent.clone())
    }
}

/// Format a size in bytes as a human-readable string.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
