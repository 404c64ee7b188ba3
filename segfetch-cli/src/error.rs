//! CLI error type.

use segfetch::config::ConfigFileError;
use segfetch::store::StoreError;
use segfetch::DownloadError;

/// Errors that end a CLI command.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or configuration.
    Config(String),

    /// The engine could not be created.
    Engine(DownloadError),

    /// The download finished with an error status.
    Download(String),

    /// The download was interrupted by the user.
    Cancelled,

    /// Task records could not be read or written.
    Store(StoreError),

    /// The async runtime could not be started.
    Runtime(std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 130,
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "{}", msg),
            Self::Engine(e) => write!(f, "failed to start download engine: {}", e),
            Self::Download(msg) => write!(f, "download failed: {}", msg),
            Self::Cancelled => write!(f, "download cancelled"),
            Self::Store(e) => write!(f, "task store error: {}", e),
            Self::Runtime(e) => write!(f, "failed to start async runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        Self::Engine(e)
    }
}
