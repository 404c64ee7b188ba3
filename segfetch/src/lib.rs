//! segfetch - segmented, resumable HTTP downloads
//!
//! This library provides the download engine used to fetch application
//! packages and media: a range-aware probe, a chunk planner, concurrent
//! chunk fetchers writing into a shared pre-allocated file, throttled
//! status publication, and a small task-record store for callers that want
//! to persist what they observe.

pub mod config;
pub mod download;
pub mod error;
pub mod store;

pub use download::{DownloadEngine, DownloadRequest, DownloadStatus};
pub use error::{DownloadError, DownloadResult};

/// Library version, as declared in the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
