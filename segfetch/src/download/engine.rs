//! Download orchestration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checksum::verify_sha256;
use super::fetcher::{stream_whole_file, ChunkFetcher};
use super::planner::{plan_transfer, TransferPlan};
use super::probe::{probe, RemoteMetadata};
use super::progress::ProgressAggregator;
use super::status::{DownloadStatus, StatusCell};
use super::task::{Chunk, DownloadRequest};
use crate::config::EngineConfig;
use crate::error::{DownloadError, DownloadResult};

/// Runs one download at a time and publishes its status.
///
/// The engine owns a single HTTP client that is reused across downloads
/// until [`close`](Self::close) is called. Results are never returned from
/// [`start`](Self::start); they are observed through [`status`](Self::status).
///
/// # Example
///
/// ```ignore
/// let engine = DownloadEngine::new(EngineConfig::default())?;
/// let mut status = engine.status();
/// engine
///     .start(DownloadRequest::new(url, "/tmp", "app.apk").with_threads(4))
///     .await;
/// assert!(status.borrow_and_update().is_terminal());
/// ```
#[derive(Debug)]
pub struct DownloadEngine {
    config: EngineConfig,
    status: Arc<StatusCell>,
    client: Mutex<Option<Client>>,
    token: Mutex<CancellationToken>,
    /// Held for the whole of an attempt; the next one waits for it.
    running: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl DownloadEngine {
    /// Create an engine with its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> DownloadResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DownloadError::Client(e.to_string()))?;

        Ok(Self {
            config,
            status: Arc::new(StatusCell::new()),
            client: Mutex::new(Some(client)),
            token: Mutex::new(CancellationToken::new()),
            running: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to status changes. The latest status is available at once.
    pub fn status(&self) -> watch::Receiver<DownloadStatus> {
        self.status.subscribe()
    }

    /// The status as of now.
    pub fn current_status(&self) -> DownloadStatus {
        self.status.current()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run a download to completion, failure, or cancellation.
    ///
    /// Publishes `Pending`, then `Downloading` updates, then exactly one of
    /// `Success` or `Error`. A cancelled attempt publishes nothing after the
    /// `Idle` written by [`cancel`](Self::cancel). Starting while another
    /// download is running supersedes it; the new attempt only looks at the
    /// destination once the previous one has stopped writing and cleaned up.
    pub async fn start(&self, request: DownloadRequest) {
        let client = match self.client.lock().clone() {
            Some(client) if !self.is_closed() => client,
            _ => {
                warn!(url = %request.url, "Download requested on a closed engine");
                self.status
                    .publish(DownloadStatus::from_error(DownloadError::Closed));
                return;
            }
        };

        let token = self.begin_attempt();
        self.status.publish_for(&token, DownloadStatus::Pending);

        let _running = self.running.lock().await;

        info!(
            url = %request.url,
            destination = %request.destination().display(),
            threads = request.effective_threads(),
            "Starting download"
        );

        match self.run(&client, &request, &token).await {
            Ok(file) => {
                info!(url = %request.url, file = %file.display(), "Download complete");
                self.status
                    .publish_for(&token, DownloadStatus::Success { file });
            }
            Err(e) if e.is_cancelled() || token.is_cancelled() => {
                debug!(url = %request.url, "Download stopped after cancellation");
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Download failed");
                self.status
                    .publish_for(&token, DownloadStatus::from_error(e));
            }
        }
    }

    /// Stop the current download and publish `Idle` immediately.
    ///
    /// Fetch tasks notice the cancellation at their next read or write and
    /// stop; the partial file stays on disk for a later resume.
    pub fn cancel(&self) {
        let token = self.token.lock().clone();
        token.cancel();
        self.status.publish(DownloadStatus::Idle);
        info!("Download cancelled");
    }

    /// Cancel any running download and release the HTTP client.
    ///
    /// Later calls to [`start`](Self::start) publish an error status.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel();
        self.client.lock().take();
        debug!("Download engine closed");
    }

    /// Install a fresh token for a new attempt, cancelling any previous one.
    fn begin_attempt(&self) -> CancellationToken {
        let mut guard = self.token.lock();
        guard.cancel();
        *guard = CancellationToken::new();
        guard.clone()
    }

    async fn run(
        &self,
        client: &Client,
        request: &DownloadRequest,
        token: &CancellationToken,
    ) -> DownloadResult<PathBuf> {
        let destination = request.destination();

        tokio::fs::create_dir_all(&request.destination_directory)
            .await
            .map_err(|e| DownloadError::io(&request.destination_directory, e))?;

        let existing = existing_size(&destination).await;

        let metadata = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            metadata = probe(client, &request.url) => metadata,
        };
        if metadata.etag.is_some() || metadata.last_modified.is_some() {
            debug!(
                url = %request.url,
                etag = ?metadata.etag,
                last_modified = ?metadata.last_modified,
                "Remote validators (not checked on resume)"
            );
        }

        let plan = plan_transfer(
            existing,
            &metadata,
            request.effective_threads(),
            self.config.min_multi_chunk_size,
        );
        info!(
            url = %request.url,
            plan = plan.name(),
            existing,
            total = ?metadata.known_length(),
            "Transfer planned"
        );

        match plan {
            TransferPlan::AlreadyComplete { total } => {
                debug!(url = %request.url, total, "Destination already complete");
            }
            TransferPlan::Chunked { total, chunks } => {
                self.run_chunked(client, request, &destination, existing, total, chunks, token)
                    .await?;
            }
            TransferPlan::Simple => {
                self.run_simple(client, request, &destination, &metadata, token)
                    .await?;
            }
        }

        if let Some(expected) = request.expected_sha256.clone() {
            let path = destination.clone();
            tokio::task::spawn_blocking(move || verify_sha256(&path, &expected))
                .await
                .map_err(|e| DownloadError::Task(e.to_string()))??;
            debug!(file = %destination.display(), "Checksum verified");
        }

        Ok(destination)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_chunked(
        &self,
        client: &Client,
        request: &DownloadRequest,
        destination: &Path,
        existing: u64,
        total: u64,
        chunks: Vec<Chunk>,
        token: &CancellationToken,
    ) -> DownloadResult<()> {
        preallocate(destination, total).await?;

        let aggregator = Arc::new(ProgressAggregator::new(
            Arc::clone(&self.status),
            token.clone(),
            existing,
            Some(total),
            &chunks,
            self.config.progress_step,
        ));

        // Fetchers stop on caller cancellation or on the first sibling failure.
        let fetch_token = token.child_token();
        let fetcher = Arc::new(ChunkFetcher::new(
            client.clone(),
            request.url.clone(),
            destination,
            total,
            self.config.copy_buffer_size,
            Arc::clone(&aggregator),
            fetch_token.clone(),
        ));

        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let fetcher = Arc::clone(&fetcher);
            tasks.spawn(async move { fetcher.fetch(chunk).await });
        }

        let mut failure: Option<DownloadError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| DownloadError::Task(e.to_string()))
                .and_then(|result| result);

            if let Err(e) = outcome {
                if failure.is_none() {
                    if !e.is_cancelled() {
                        warn!(url = %request.url, error = %e, "Chunk failed, stopping siblings");
                    }
                    fetch_token.cancel();
                    failure = Some(e);
                }
            }
        }

        let Some(error) = failure else {
            return Ok(());
        };

        let offset = aggregator.cursors().resume_offset();
        Err(discard_unwritten_tail(destination, offset, error).await)
    }

    async fn run_simple(
        &self,
        client: &Client,
        request: &DownloadRequest,
        destination: &Path,
        metadata: &RemoteMetadata,
        token: &CancellationToken,
    ) -> DownloadResult<()> {
        let aggregator = ProgressAggregator::new(
            Arc::clone(&self.status),
            token.clone(),
            0,
            metadata.known_length(),
            &[],
            self.config.progress_step,
        );

        let written =
            stream_whole_file(client, &request.url, destination, &aggregator, token).await?;
        debug!(url = %request.url, bytes = written, "Whole-file transfer finished");
        Ok(())
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        self.token.lock().cancel();
    }
}

/// Size of the file at `path`, or 0 if there is none.
async fn existing_size(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => 0,
    }
}

/// Grow (or create) the destination to its final size.
async fn preallocate(path: &Path, size: u64) -> DownloadResult<()> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    file.set_len(size)
        .await
        .map_err(|source| DownloadError::Preallocate {
            path: path.to_path_buf(),
            size,
            source,
        })
}

/// Drop the tail past the first gap so the next attempt resumes from bytes
/// that were actually written. Returns `error` whether or not that works.
async fn discard_unwritten_tail(
    destination: &Path,
    offset: Option<u64>,
    error: DownloadError,
) -> DownloadError {
    if let Some(offset) = offset {
        debug!(file = %destination.display(), offset, "Truncating to written prefix");
        if let Err(e) = truncate(destination, offset).await {
            warn!(
                file = %destination.display(),
                offset,
                error = %e,
                "Could not truncate partial download"
            );
        }
    }
    error
}

async fn truncate(path: &Path, size: u64) -> DownloadResult<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.set_len(size).await.map_err(|e| DownloadError::io(path, e))
}
