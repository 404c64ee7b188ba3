//! Chunk planning and transfer strategy selection.
//!
//! [`plan_chunks`] splits the remaining byte range of a download into
//! contiguous, non-overlapping chunks. [`plan_transfer`] applies the
//! engine's decision policy to pick how a download is carried out.

use super::probe::RemoteMetadata;
use super::task::Chunk;

/// How the engine will carry out a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPlan {
    /// The destination already holds at least `total` bytes; nothing to fetch.
    AlreadyComplete { total: u64 },
    /// Ranged fetches into a pre-allocated destination.
    Chunked { total: u64, chunks: Vec<Chunk> },
    /// One plain GET streamed straight into a fresh destination file.
    Simple,
}

impl TransferPlan {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TransferPlan::AlreadyComplete { .. } => "already-complete",
            TransferPlan::Chunked { chunks, .. } if chunks.len() > 1 => "multi-chunk",
            TransferPlan::Chunked { .. } => "single-chunk",
            TransferPlan::Simple => "simple",
        }
    }
}

/// Split `[already_downloaded, total_length - 1]` into chunks.
///
/// A single chunk is produced when ranges are unsupported, when one thread
/// is requested, or when the remaining size does not exceed
/// `min_multi_chunk_size`. Otherwise the range is divided into
/// `thread_count` equal pieces and the last one absorbs the remainder, so
/// the final chunk always ends at `total_length - 1`. The thread count is
/// capped at the number of remaining bytes so no piece is empty.
///
/// Returns an empty plan when nothing remains.
pub fn plan_chunks(
    total_length: u64,
    already_downloaded: u64,
    thread_count: usize,
    supports_ranges: bool,
    min_multi_chunk_size: u64,
) -> Vec<Chunk> {
    if already_downloaded >= total_length {
        return Vec::new();
    }

    let remaining = total_length - already_downloaded;
    if !supports_ranges || thread_count <= 1 || remaining <= min_multi_chunk_size {
        return vec![Chunk::new(0, already_downloaded, total_length - 1)];
    }

    let pieces = (thread_count as u64).min(remaining);
    let piece_size = remaining / pieces;

    (0..pieces)
        .map(|i| {
            let start = already_downloaded + i * piece_size;
            let end = if i == pieces - 1 {
                total_length - 1
            } else {
                start + piece_size - 1
            };
            Chunk::new(i as usize, start, end)
        })
        .filter(|chunk| chunk.start < total_length)
        .collect()
}

/// Decide how to download, in strict precedence:
///
/// 1. the file on disk is already complete;
/// 2. ranges supported, several threads, enough remaining: split it;
/// 3. ranges supported and a partial file exists: resume with one chunk;
/// 4. otherwise a plain whole-file GET.
///
/// Both chunked paths need a known length to pre-allocate against.
pub fn plan_transfer(
    existing_size: u64,
    metadata: &RemoteMetadata,
    thread_count: usize,
    min_multi_chunk_size: u64,
) -> TransferPlan {
    let Some(total) = metadata.known_length() else {
        return TransferPlan::Simple;
    };

    if existing_size >= total {
        return TransferPlan::AlreadyComplete { total };
    }

    let remaining = total - existing_size;
    let threads = if metadata.supports_ranges && thread_count > 1 && remaining > min_multi_chunk_size
    {
        thread_count
    } else if metadata.supports_ranges && existing_size > 0 {
        1
    } else {
        return TransferPlan::Simple;
    };

    TransferPlan::Chunked {
        total,
        chunks: plan_chunks(
            total,
            existing_size,
            threads,
            metadata.supports_ranges,
            min_multi_chunk_size,
        ),
    }
}
