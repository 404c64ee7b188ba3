//! Error types for the download engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can end a download attempt.
///
/// `Cancelled` is not a failure: it is how a user-initiated stop travels
/// back through the fetch tasks, and the engine never turns it into an
/// error status.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The request could not be sent or its body could not be read.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a status other than 2xx / 206.
    #[error("server returned HTTP {status} for {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The response body ended before the chunk's range was filled.
    #[error("chunk {chunk} of {url} ended {missing} bytes short")]
    Incomplete {
        url: String,
        chunk: usize,
        missing: u64,
    },

    /// Reading or writing a local file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The destination could not be sized before the chunked transfer.
    #[error("failed to pre-allocate {} to {size} bytes: {source}", path.display())]
    Preallocate {
        path: PathBuf,
        size: u64,
        #[source]
        source: io::Error,
    },

    /// The finished file does not match the expected SHA-256 digest.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A fetch task panicked or was torn down unexpectedly.
    #[error("download task failed: {0}")]
    Task(String),

    /// The HTTP client could not be built.
    #[error("failed to create HTTP client: {0}")]
    Client(String),

    /// The engine was closed before this download was requested.
    #[error("download engine is closed")]
    Closed,

    /// The download was cancelled by the caller.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Build an I/O error tagged with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a request error for the given URL.
    pub fn request(url: &str, source: reqwest::Error) -> Self {
        Self::Request {
            url: url.to_string(),
            source,
        }
    }

    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let err = DownloadError::HttpStatus {
            url: "http://example.com/app.apk".to_string(),
            status: reqwest::StatusCode::NOT_FOUND,
        };
        assert_eq!(
            err.to_string(),
            "server returned HTTP 404 Not Found for http://example.com/app.apk"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;

        let err = DownloadError::io(
            "/tmp/app.apk",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/app.apk"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_only_cancelled_is_cancelled() {
        assert!(DownloadError::Cancelled.is_cancelled());
        assert!(!DownloadError::Closed.is_cancelled());
        assert!(!DownloadError::Task("boom".to_string()).is_cancelled());
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = DownloadError::ChecksumMismatch {
            path: PathBuf::from("/tmp/media.mp4"),
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(err.to_string().contains("abc123"));
        assert!(err.to_string().contains("def456"));
    }
}
