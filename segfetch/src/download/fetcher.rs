//! Chunk fetching.
//!
//! A [`ChunkFetcher`] downloads one byte range in two steps:
//!
//! 1. a GET (ranged when the chunk is only part of the resource) streams the
//!    body into a per-chunk side file next to the destination;
//! 2. a blocking copy moves the side file into the shared destination at
//!    the chunk's offset, reporting every buffered read to the aggregator.
//!
//! Chunks never overlap, so each fetcher writes through its own file handle
//! without any locking. [`stream_whole_file`] is the single-request path used
//! when ranges are unavailable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::progress::ProgressAggregator;
use super::task::Chunk;
use crate::error::{DownloadError, DownloadResult};

/// Fetches chunks of one download into a pre-allocated destination.
#[derive(Debug)]
pub struct ChunkFetcher {
    client: Client,
    url: String,
    destination: PathBuf,
    total_length: u64,
    buffer_size: usize,
    aggregator: Arc<ProgressAggregator>,
    token: CancellationToken,
}

impl ChunkFetcher {
    /// Create a fetcher for `url` writing into `destination`.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `url` - Source URL
    /// * `destination` - Pre-allocated destination file
    /// * `total_length` - Size of the remote resource
    /// * `buffer_size` - Copy buffer size
    /// * `aggregator` - Receives byte counts as they are written
    /// * `token` - Cancellation token of the current attempt
    pub fn new(
        client: Client,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        total_length: u64,
        buffer_size: usize,
        aggregator: Arc<ProgressAggregator>,
        token: CancellationToken,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            destination: destination.into(),
            total_length,
            buffer_size: buffer_size.max(1),
            aggregator,
            token,
        }
    }

    /// Side file holding chunk `id` between fetch and copy.
    pub fn side_path(&self, id: usize) -> PathBuf {
        side_path(&self.destination, id)
    }

    /// Fetch one chunk and copy it into the destination.
    ///
    /// The side file is removed whether or not the fetch succeeds.
    pub async fn fetch(&self, chunk: Chunk) -> DownloadResult<()> {
        let side = self.side_path(chunk.id);
        let result = self.fetch_into(chunk, &side).await;

        if let Err(e) = tokio::fs::remove_file(&side).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %side.display(), error = %e, "Failed to remove side file");
            }
        }

        result
    }

    async fn fetch_into(&self, chunk: Chunk, side: &Path) -> DownloadResult<()> {
        // Chunk 0 of a split starts at zero but must still ask for a range.
        let ranged = chunk.start > 0 || chunk.end + 1 < self.total_length;

        let mut request = self.client.get(&self.url);
        if ranged {
            request = request.header(RANGE, chunk.range_header());
        }

        debug!(url = %self.url, chunk = chunk.id, start = chunk.start, end = chunk.end, "Fetching chunk");

        let response = tokio::select! {
            _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
            sent = request.send() => sent.map_err(|e| DownloadError::request(&self.url, e))?,
        };

        let status = response.status();
        check_status(&self.url, status)?;

        // A 200 to a ranged request carries the whole resource from byte 0.
        let body_offset = if ranged && status != StatusCode::PARTIAL_CONTENT {
            debug!(url = %self.url, chunk = chunk.id, "Server ignored Range, skipping to chunk start");
            chunk.start
        } else {
            0
        };

        let wanted = body_offset + chunk.remaining();
        let written = stream_to_side_file(response, &self.url, side, wanted, &self.token).await?;
        debug!(chunk = chunk.id, bytes = written, "Chunk body received");

        let side = side.to_path_buf();
        let destination = self.destination.clone();
        let buffer_size = self.buffer_size;
        let aggregator = Arc::clone(&self.aggregator);
        let token = self.token.clone();
        let url = self.url.clone();

        tokio::task::spawn_blocking(move || {
            let copied = copy_side_file(
                &side,
                &destination,
                chunk,
                body_offset,
                buffer_size,
                &token,
                |bytes| aggregator.record_chunk(chunk.id, bytes),
            )?;

            let missing = chunk.remaining() - copied;
            if missing > 0 {
                return Err(DownloadError::Incomplete {
                    url,
                    chunk: chunk.id,
                    missing,
                });
            }
            Ok(())
        })
        .await
        .map_err(|e| DownloadError::Task(e.to_string()))?
    }
}

/// Side file path for chunk `id` of `destination`.
pub fn side_path(destination: &Path, id: usize) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.chunk{}.part", name, id))
}

/// Accept any 2xx (206 included); everything else fails the chunk.
fn check_status(url: &str, status: StatusCode) -> DownloadResult<()> {
    if status.is_success() || status == StatusCode::PARTIAL_CONTENT {
        Ok(())
    } else {
        Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status,
        })
    }
}

/// Stream a response body into `side`, stopping once `limit` bytes are stored.
async fn stream_to_side_file(
    mut response: Response,
    url: &str,
    side: &Path,
    limit: u64,
    token: &CancellationToken,
) -> DownloadResult<u64> {
    let mut file = tokio::fs::File::create(side)
        .await
        .map_err(|e| DownloadError::io(side, e))?;
    let mut written = 0u64;

    while written < limit {
        let next = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            next = response.chunk() => next.map_err(|e| DownloadError::request(url, e))?,
        };
        let Some(bytes) = next else {
            break;
        };

        file.write_all(&bytes)
            .await
            .map_err(|e| DownloadError::io(side, e))?;
        written += bytes.len() as u64;
    }

    file.flush().await.map_err(|e| DownloadError::io(side, e))?;
    Ok(written)
}

/// Copy a side file into `destination` at `chunk.current`.
///
/// Skips `body_offset` bytes of the side file first, never writes past
/// `chunk.end`, and calls `on_bytes` after each buffered write. Returns the
/// number of bytes copied.
pub fn copy_side_file<F>(
    side: &Path,
    destination: &Path,
    chunk: Chunk,
    body_offset: u64,
    buffer_size: usize,
    token: &CancellationToken,
    mut on_bytes: F,
) -> DownloadResult<u64>
where
    F: FnMut(u64),
{
    let mut source = File::open(side).map_err(|e| DownloadError::io(side, e))?;
    if body_offset > 0 {
        source
            .seek(SeekFrom::Start(body_offset))
            .map_err(|e| DownloadError::io(side, e))?;
    }

    let mut target = OpenOptions::new()
        .write(true)
        .open(destination)
        .map_err(|e| DownloadError::io(destination, e))?;
    target
        .seek(SeekFrom::Start(chunk.current))
        .map_err(|e| DownloadError::io(destination, e))?;

    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut current = chunk.current;

    while current <= chunk.end {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let want = (buffer.len() as u64).min(chunk.end + 1 - current) as usize;
        let read = source
            .read(&mut buffer[..want])
            .map_err(|e| DownloadError::io(side, e))?;
        if read == 0 {
            break;
        }

        target
            .write_all(&buffer[..read])
            .map_err(|e| DownloadError::io(destination, e))?;
        current += read as u64;
        on_bytes(read as u64);
    }

    target.flush().map_err(|e| DownloadError::io(destination, e))?;
    Ok(current - chunk.current)
}

/// Download `url` with one plain GET, truncating `destination`.
///
/// Used when the server cannot serve ranges or the length is unknown; there
/// is no resume on this path. Returns the number of bytes written.
pub async fn stream_whole_file(
    client: &Client,
    url: &str,
    destination: &Path,
    aggregator: &ProgressAggregator,
    token: &CancellationToken,
) -> DownloadResult<u64> {
    let mut response = tokio::select! {
        _ = token.cancelled() => return Err(DownloadError::Cancelled),
        sent = client.get(url).send() => sent.map_err(|e| DownloadError::request(url, e))?,
    };
    check_status(url, response.status())?;

    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| DownloadError::io(destination, e))?;
    let mut written = 0u64;

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            next = response.chunk() => next.map_err(|e| DownloadError::request(url, e))?,
        };
        let Some(bytes) = next else {
            break;
        };

        file.write_all(&bytes)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        written += bytes.len() as u64;
        aggregator.record(bytes.len() as u64);
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::io(destination, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(side_contents: &[u8], dest_len: u64) -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("app.apk");
        let side = side_path(&dest, 0);
        std::fs::write(&side, side_contents).unwrap();
        let file = File::create(&dest).unwrap();
        file.set_len(dest_len).unwrap();
        (temp, side, dest)
    }

    #[test]
    fn test_side_path_is_hidden_sibling() {
        let side = side_path(Path::new("/data/apps/game.apk"), 3);
        assert_eq!(side, PathBuf::from("/data/apps/.game.apk.chunk3.part"));
    }

    #[test]
    fn test_check_status() {
        assert!(check_status("u", StatusCode::OK).is_ok());
        assert!(check_status("u", StatusCode::PARTIAL_CONTENT).is_ok());
        assert!(matches!(
            check_status("u", StatusCode::RANGE_NOT_SATISFIABLE),
            Err(DownloadError::HttpStatus { .. })
        ));
        assert!(check_status("u", StatusCode::INTERNAL_SERVER_ERROR).is_err());
    }

    #[test]
    fn test_copy_writes_at_chunk_offset() {
        let (_temp, side, dest) = setup(b"WORLD", 10);
        let chunk = Chunk::new(1, 5, 9);
        let mut reported = Vec::new();

        let copied = copy_side_file(
            &side,
            &dest,
            chunk,
            0,
            2,
            &CancellationToken::new(),
            |n| reported.push(n),
        )
        .unwrap();

        assert_eq!(copied, 5);
        assert_eq!(reported, vec![2, 2, 1]);
        let contents = std::fs::read(&dest).unwrap();
        assert_eq!(&contents[..5], &[0u8; 5]);
        assert_eq!(&contents[5..], b"WORLD");
    }

    #[test]
    fn test_copy_stops_at_chunk_end() {
        let (_temp, side, dest) = setup(b"ABCDEFGHIJ", 10);
        let chunk = Chunk::new(0, 0, 3);

        let copied = copy_side_file(&side, &dest, chunk, 0, 8192, &CancellationToken::new(), |_| {})
            .unwrap();

        assert_eq!(copied, 4);
        let contents = std::fs::read(&dest).unwrap();
        assert_eq!(&contents[..4], b"ABCD");
        assert_eq!(&contents[4..], &[0u8; 6]);
    }

    #[test]
    fn test_copy_skips_body_offset() {
        // Full body returned for a ranged request: bytes 6..=9 are the chunk.
        let (_temp, side, dest) = setup(b"0123456789", 10);
        let chunk = Chunk::new(2, 6, 9);

        let copied = copy_side_file(&side, &dest, chunk, 6, 3, &CancellationToken::new(), |_| {})
            .unwrap();

        assert_eq!(copied, 4);
        assert_eq!(&std::fs::read(&dest).unwrap()[6..], b"6789");
    }

    #[test]
    fn test_copy_reports_short_body() {
        let (_temp, side, dest) = setup(b"AB", 10);
        let chunk = Chunk::new(0, 0, 9);

        let copied = copy_side_file(&side, &dest, chunk, 0, 8192, &CancellationToken::new(), |_| {})
            .unwrap();
        assert_eq!(copied, 2);
    }

    #[test]
    fn test_copy_respects_cancellation() {
        let (_temp, side, dest) = setup(b"ABCDEFGHIJ", 10);
        let token = CancellationToken::new();
        token.cancel();

        let result = copy_side_file(&side, &dest, Chunk::new(0, 0, 9), 0, 4, &token, |_| {});
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }

    #[test]
    fn test_copy_missing_side_file() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("app.apk");
        File::create(&dest).unwrap();

        let result = copy_side_file(
            &temp.path().join("nope"),
            &dest,
            Chunk::new(0, 0, 9),
            0,
            4,
            &CancellationToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(DownloadError::Io { .. })));
    }
}
