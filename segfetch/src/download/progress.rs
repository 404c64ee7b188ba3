//! Progress aggregation for concurrent chunk fetchers.
//!
//! Every fetcher reports the bytes it writes into the destination. The
//! [`ProgressAggregator`] folds those reports into one atomic total, keeps
//! a per-chunk write cursor, and publishes throttled `Downloading` statuses
//! through the engine's [`StatusCell`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::status::{DownloadStatus, StatusCell};
use super::task::Chunk;

/// Per-chunk write positions for one download.
///
/// Each cursor holds the next absolute offset its chunk will write; the
/// cursors of a finished chunk sit one past its `end`.
#[derive(Debug, Default)]
pub struct ChunkCursors {
    ranges: Vec<(u64, u64)>,
    cursors: Vec<AtomicU64>,
}

impl ChunkCursors {
    /// Create cursors positioned at each chunk's `current` offset.
    pub fn new(chunks: &[Chunk]) -> Self {
        Self {
            ranges: chunks.iter().map(|c| (c.start, c.end)).collect(),
            cursors: chunks.iter().map(|c| AtomicU64::new(c.current)).collect(),
        }
    }

    /// Number of tracked chunks.
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Whether no chunks are tracked.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Move a chunk's cursor forward.
    pub fn advance(&self, chunk_id: usize, bytes: u64) {
        if let Some(cursor) = self.cursors.get(chunk_id) {
            cursor.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    /// Current cursor of a chunk.
    pub fn position(&self, chunk_id: usize) -> Option<u64> {
        self.cursors.get(chunk_id).map(|c| c.load(Ordering::SeqCst))
    }

    /// End offset (exclusive) of the contiguous written prefix.
    ///
    /// Chunks are visited in file order; the first one that is not fully
    /// written bounds the prefix. Returns `None` when no chunks are tracked.
    pub fn resume_offset(&self) -> Option<u64> {
        let mut offset = None;
        for ((_, end), cursor) in self.ranges.iter().zip(&self.cursors) {
            let position = cursor.load(Ordering::SeqCst);
            if position <= *end {
                return Some(position);
            }
            offset = Some(end + 1);
        }
        offset
    }
}

/// Folds byte counts from all fetchers into throttled status updates.
#[derive(Debug)]
pub struct ProgressAggregator {
    downloaded: AtomicU64,
    seed: u64,
    total_length: Option<u64>,
    progress_step: f32,
    started: Instant,
    cursors: ChunkCursors,
    status: Arc<StatusCell>,
    token: CancellationToken,
}

impl ProgressAggregator {
    /// Create an aggregator seeded with bytes already on disk.
    ///
    /// # Arguments
    ///
    /// * `status` - Cell progress is published to
    /// * `token` - Cancellation token of the attempt; publishes stop once it fires
    /// * `already_downloaded` - Bytes present before this attempt
    /// * `total_length` - Total size, `None` when unknown (nothing is published)
    /// * `chunks` - Chunks whose cursors should be tracked (may be empty)
    /// * `progress_step` - Minimum progress advance between publishes
    pub fn new(
        status: Arc<StatusCell>,
        token: CancellationToken,
        already_downloaded: u64,
        total_length: Option<u64>,
        chunks: &[Chunk],
        progress_step: f32,
    ) -> Self {
        Self {
            downloaded: AtomicU64::new(already_downloaded),
            seed: already_downloaded,
            total_length,
            progress_step,
            started: Instant::now(),
            cursors: ChunkCursors::new(chunks),
            status,
            token,
        }
    }

    /// Total bytes downloaded, including the seed.
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Per-chunk cursors.
    pub fn cursors(&self) -> &ChunkCursors {
        &self.cursors
    }

    /// Record bytes written by a chunk fetcher.
    pub fn record_chunk(&self, chunk_id: usize, bytes: u64) {
        self.cursors.advance(chunk_id, bytes);
        self.record(bytes);
    }

    /// Record bytes written outside any chunk (the simple whole-file path).
    pub fn record(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::SeqCst);
        self.publish();
    }

    /// Bytes per second transferred during this attempt.
    pub fn speed(&self) -> f64 {
        let session = self.downloaded().saturating_sub(self.seed);
        let elapsed = self.started.elapsed().as_secs_f64().max(0.001);
        session as f64 / elapsed
    }

    fn publish(&self) {
        let Some(total) = self.total_length.filter(|&t| t > 0) else {
            return;
        };

        self.status.update_for(&self.token, |current| {
            // Read under the cell's lock so concurrent publishers stay ordered.
            let downloaded = self.downloaded().min(total);
            let progress = (downloaded as f64 / total as f64).clamp(0.0, 1.0) as f32;

            let significant = match current {
                DownloadStatus::Downloading {
                    progress: last,
                    downloaded_bytes: last_bytes,
                    ..
                } => {
                    // Completion is judged on bytes; the f32 ratio rounds to
                    // 1.0 before the last byte of a large file arrives.
                    downloaded >= *last_bytes
                        && (progress - last > self.progress_step
                            || (downloaded == total && *last_bytes < total))
                }
                _ => true,
            };

            significant.then(|| DownloadStatus::Downloading {
                progress,
                downloaded_bytes: downloaded,
                total_bytes: total,
                speed: format_speed(self.speed()),
            })
        });
    }
}

/// Format a throughput as `B/s`, `KB/s`, or `MB/s` with one decimal.
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;

    if bytes_per_sec >= MB {
        format!("{:.1} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.1} KB/s", bytes_per_sec / KB)
    } else {
        format!("{:.1} B/s", bytes_per_sec)
    }
}
