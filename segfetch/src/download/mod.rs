//! Segmented, resumable HTTP downloads.
//!
//! This module provides:
//! - A HEAD probe for length and range support (`probe`)
//! - Chunk planning and strategy selection (`planner`)
//! - Ranged chunk fetching through side files (`fetcher`)
//! - Throttled progress aggregation (`progress`)
//! - The observable status stream (`status`)
//! - SHA-256 verification of finished files (`checksum`)
//! - Orchestration of all of the above (`engine`)
//!
//! # Architecture
//!
//! ```text
//! DownloadEngine (orchestrator)
//!         │
//!         ├── probe ──────────► RemoteMetadata
//!         │
//!         ├── plan_transfer ──► TransferPlan
//!         │       ├── AlreadyComplete
//!         │       ├── Chunked ──► ChunkFetcher × N (JoinSet)
//!         │       └── Simple ───► stream_whole_file
//!         │
//!         ├── ProgressAggregator (atomic total + chunk cursors)
//!         │
//!         └── StatusCell (watch channel) ──► subscribers
//! ```
//!
//! # Example
//!
//! ```ignore
//! use segfetch::config::EngineConfig;
//! use segfetch::download::{DownloadEngine, DownloadRequest};
//!
//! let engine = DownloadEngine::new(EngineConfig::default())?;
//! let mut status = engine.status();
//!
//! let request = DownloadRequest::new("https://example.com/app.apk", "/tmp", "app.apk")
//!     .with_threads(4);
//! engine.start(request).await;
//!
//! println!("{}", *status.borrow_and_update());
//! ```

mod checksum;
mod engine;
mod fetcher;
mod planner;
mod probe;
mod progress;
mod status;
mod task;

pub use checksum::{file_sha256, verify_sha256};
pub use engine::DownloadEngine;
pub use fetcher::{side_path, ChunkFetcher};
pub use planner::{plan_chunks, plan_transfer, TransferPlan};
pub use probe::{probe, RemoteMetadata};
pub use progress::{format_speed, ChunkCursors, ProgressAggregator};
pub use status::{DownloadStatus, StatusCell};
pub use task::{Chunk, DownloadRequest};
