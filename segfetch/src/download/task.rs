//! Download request and chunk types.

use std::path::PathBuf;

/// A caller's request to download one URL.
///
/// The URL identifies the download; the engine runs at most one request at
/// a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Source URL.
    pub url: String,
    /// Directory the file is written into.
    pub destination_directory: PathBuf,
    /// File name within `destination_directory`.
    pub file_name: String,
    /// Desired number of concurrent chunk fetchers.
    pub thread_count: usize,
    /// Optional lowercase hex SHA-256 the finished file must match.
    pub expected_sha256: Option<String>,
}

impl DownloadRequest {
    /// Create a request with a single fetcher and no checksum.
    pub fn new(
        url: impl Into<String>,
        destination_directory: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            destination_directory: destination_directory.into(),
            file_name: file_name.into(),
            thread_count: 1,
            expected_sha256: None,
        }
    }

    /// Set the desired number of concurrent fetchers.
    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Require the finished file to match a SHA-256 digest.
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into().to_lowercase());
        self
    }

    /// Full path of the destination file.
    pub fn destination(&self) -> PathBuf {
        self.destination_directory.join(&self.file_name)
    }

    /// Thread count with zero treated as one.
    pub fn effective_threads(&self) -> usize {
        self.thread_count.max(1)
    }
}

/// One contiguous byte range of a download, owned by a single fetcher.
///
/// `start` and `end` are inclusive absolute offsets into the target file;
/// `current` is the next offset to be written into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub id: usize,
    pub start: u64,
    pub end: u64,
    pub current: u64,
}

impl Chunk {
    /// Create a chunk with nothing written yet.
    pub fn new(id: usize, start: u64, end: u64) -> Self {
        Self {
            id,
            start,
            end,
            current: start,
        }
    }

    /// Number of bytes this chunk covers.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Bytes still to be written.
    pub fn remaining(&self) -> u64 {
        (self.end + 1).saturating_sub(self.current)
    }

    /// Whether every byte of the range has been written.
    pub fn is_complete(&self) -> bool {
        self.current > self.end
    }

    /// Value of the `Range` request header for this chunk.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}
