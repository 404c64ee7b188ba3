//! Observable download status.
//!
//! [`DownloadStatus`] is the single authoritative state of the engine's
//! active download. [`StatusCell`] wraps the `watch` channel that carries it
//! so that every publish, including cancellation, goes through one lock.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;

/// State of the engine's current download.
#[derive(Debug, Clone)]
pub enum DownloadStatus {
    /// No download in progress, or the last one was cancelled.
    Idle,
    /// Accepted; probing and planning, no bytes yet.
    Pending,
    /// Bytes are flowing.
    Downloading {
        /// Fraction complete in `[0.0, 1.0]`.
        progress: f32,
        downloaded_bytes: u64,
        total_bytes: u64,
        /// Human-readable throughput, e.g. `"1.5 MB/s"`.
        speed: String,
    },
    /// Reserved for pause support; the engine never produces it.
    Paused {
        downloaded_bytes: u64,
        total_bytes: u64,
    },
    /// The file is complete.
    Success { file: PathBuf },
    /// The attempt failed.
    Error {
        message: String,
        cause: Option<Arc<DownloadError>>,
    },
}

impl DownloadStatus {
    /// Build an error status from a download error.
    pub fn from_error(error: DownloadError) -> Self {
        Self::Error {
            message: error.to_string(),
            cause: Some(Arc::new(error)),
        }
    }

    /// String tag used when the status is persisted.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Downloading { .. } => "downloading",
            Self::Paused { .. } => "paused",
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this status ends an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Error { .. })
    }

    /// Whether a transfer is currently producing progress.
    pub fn is_downloading(&self) -> bool {
        matches!(self, Self::Downloading { .. })
    }

    /// Progress fraction if the status carries one.
    pub fn progress(&self) -> Option<f32> {
        match self {
            Self::Downloading { progress, .. } => Some(*progress),
            Self::Success { .. } => Some(1.0),
            _ => None,
        }
    }
}

impl PartialEq for DownloadStatus {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Idle, Self::Idle) | (Self::Pending, Self::Pending) => true,
            (
                Self::Downloading {
                    progress: p1,
                    downloaded_bytes: d1,
                    total_bytes: t1,
                    speed: s1,
                },
                Self::Downloading {
                    progress: p2,
                    downloaded_bytes: d2,
                    total_bytes: t2,
                    speed: s2,
                },
            ) => p1 == p2 && d1 == d2 && t1 == t2 && s1 == s2,
            (
                Self::Paused {
                    downloaded_bytes: d1,
                    total_bytes: t1,
                },
                Self::Paused {
                    downloaded_bytes: d2,
                    total_bytes: t2,
                },
            ) => d1 == d2 && t1 == t2,
            (Self::Success { file: f1 }, Self::Success { file: f2 }) => f1 == f2,
            // Causes are not comparable; the message is what observers see.
            (Self::Error { message: m1, .. }, Self::Error { message: m2, .. }) => m1 == m2,
            _ => false,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Downloading {
                progress,
                downloaded_bytes,
                total_bytes,
                speed,
            } => write!(
                f,
                "downloading {:.1}% ({}/{} bytes, {})",
                progress * 100.0,
                downloaded_bytes,
                total_bytes,
                speed
            ),
            Self::Paused {
                downloaded_bytes,
                total_bytes,
            } => write!(f, "paused at {}/{} bytes", downloaded_bytes, total_bytes),
            Self::Success { file } => write!(f, "complete: {}", file.display()),
            Self::Error { message, .. } => write!(f, "failed: {}", message),
        }
    }
}

/// Replay-latest cell holding the engine's current status.
///
/// Publishes that belong to a download attempt carry that attempt's
/// cancellation token and are dropped once it has been cancelled. The token
/// is checked while the channel's write lock is held, so a cancel that has
/// published `Idle` can never be overwritten by a late progress update.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<DownloadStatus>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    /// Create a cell holding `Idle`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DownloadStatus::Idle);
        Self { tx }
    }

    /// Subscribe to status changes; the current value is immediately available.
    pub fn subscribe(&self) -> watch::Receiver<DownloadStatus> {
        self.tx.subscribe()
    }

    /// Clone of the current status.
    pub fn current(&self) -> DownloadStatus {
        self.tx.borrow().clone()
    }

    /// Publish unconditionally.
    pub fn publish(&self, status: DownloadStatus) {
        self.tx.send_replace(status);
    }

    /// Publish unless `token` has been cancelled. Returns whether it was published.
    pub fn publish_for(&self, token: &CancellationToken, status: DownloadStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if token.is_cancelled() {
                return false;
            }
            *current = status;
            true
        })
    }

    /// Let `update` decide, under the write lock, whether to replace the
    /// current status. Skipped entirely once `token` is cancelled.
    pub fn update_for<F>(&self, token: &CancellationToken, update: F) -> bool
    where
        F: FnOnce(&DownloadStatus) -> Option<DownloadStatus>,
    {
        self.tx.send_if_modified(|current| {
            if token.is_cancelled() {
                return false;
            }
            match update(current) {
                Some(next) => {
                    *current = next;
                    true
                }
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(DownloadStatus::Idle.tag(), "idle");
        assert_eq!(DownloadStatus::Pending.tag(), "pending");
        assert_eq!(
            DownloadStatus::Success {
                file: PathBuf::from("/a")
            }
            .tag(),
            "success"
        );
        assert_eq!(
            DownloadStatus::from_error(DownloadError::Closed).tag(),
            "error"
        );
    }

    #[test]
    fn test_error_status_carries_message_and_cause() {
        match DownloadStatus::from_error(DownloadError::Task("panicked".to_string())) {
            DownloadStatus::Error { message, cause } => {
                assert_eq!(message, "download task failed: panicked");
                assert!(cause.is_some());
            }
            other => panic!("expected error status, got {:?}", other),
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!DownloadStatus::Idle.is_terminal());
        assert!(!DownloadStatus::Pending.is_terminal());
        assert!(DownloadStatus::Success {
            file: PathBuf::from("/a")
        }
        .is_terminal());
        assert!(DownloadStatus::from_error(DownloadError::Closed).is_terminal());
    }

    #[test]
    fn test_cell_starts_idle_and_replays_latest() {
        let cell = StatusCell::new();
        assert_eq!(cell.current(), DownloadStatus::Idle);

        cell.publish(DownloadStatus::Pending);
        let rx = cell.subscribe();
        assert_eq!(*rx.borrow(), DownloadStatus::Pending);
    }

    #[test]
    fn test_cancelled_token_blocks_publish() {
        let cell = StatusCell::new();
        let token = CancellationToken::new();

        assert!(cell.publish_for(&token, DownloadStatus::Pending));
        token.cancel();
        cell.publish(DownloadStatus::Idle);

        assert!(!cell.publish_for(
            &token,
            DownloadStatus::Success {
                file: PathBuf::from("/a")
            }
        ));
        assert!(!cell.update_for(&token, |_| Some(DownloadStatus::Pending)));
        assert_eq!(cell.current(), DownloadStatus::Idle);
    }

    #[test]
    fn test_update_for_can_decline() {
        let cell = StatusCell::new();
        let token = CancellationToken::new();

        assert!(!cell.update_for(&token, |_| None));
        assert!(cell.update_for(&token, |current| {
            assert_eq!(*current, DownloadStatus::Idle);
            Some(DownloadStatus::Pending)
        }));
        assert_eq!(cell.current(), DownloadStatus::Pending);
    }
}
