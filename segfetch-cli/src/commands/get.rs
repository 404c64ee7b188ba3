//! `segfetch get`: download one URL.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use segfetch::config::{ConfigFile, EngineConfig};
use segfetch::store::{persist_transitions, JsonTaskStore, TaskStore};
use segfetch::{DownloadEngine, DownloadRequest, DownloadStatus};
use tokio::sync::watch;
use tracing::warn;

use crate::error::CliError;

/// Arguments for `get`.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// URL to download
    pub url: String,

    /// Directory to save into (default: download.directory from config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of concurrent chunk fetchers (default: download.threads from config)
    #[arg(short = 'n', long)]
    pub threads: Option<usize>,

    /// File name to save as (default: last path segment of the URL)
    #[arg(long)]
    pub name: Option<String>,

    /// Expected SHA-256 of the finished file (hex)
    #[arg(long)]
    pub sha256: Option<String>,

    /// Task record file (default: store.path from config)
    #[arg(long)]
    pub store: Option<PathBuf>,
}

/// Run the `get` command.
pub fn run(args: GetArgs) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let store_path = args.store.clone().unwrap_or_else(|| config.store.path.clone());
    let request = build_request(args, &config)?;

    let engine = Arc::new(DownloadEngine::new(EngineConfig::from_config_file(&config))?);

    let handler_engine = Arc::clone(&engine);
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling download...");
        handler_engine.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    println!("Downloading {}", request.url);
    println!("  to {}", request.destination().display());

    let status = runtime.block_on(async {
        let store: Arc<dyn TaskStore> = Arc::new(JsonTaskStore::new(store_path));
        let recorder = tokio::spawn(persist_transitions(
            engine.status(),
            store,
            request.clone(),
        ));
        let renderer = tokio::spawn(render_progress(engine.status(), progress_bar()));

        engine.start(request.clone()).await;

        match recorder.await {
            Ok(Err(e)) => warn!(error = %e, "Task record not saved"),
            Err(e) => warn!(error = %e, "Task recorder stopped unexpectedly"),
            Ok(Ok(_)) => {}
        }
        let _ = renderer.await;

        engine.current_status()
    });

    engine.close();
    outcome(status)
}

/// Turn CLI arguments and config defaults into a request.
fn build_request(args: GetArgs, config: &ConfigFile) -> Result<DownloadRequest, CliError> {
    let file_name = match args.name {
        Some(name) => name,
        None => file_name_from_url(&args.url).ok_or_else(|| {
            CliError::Config(format!(
                "Cannot derive a file name from '{}'. Use --name to set one.",
                args.url
            ))
        })?,
    };

    let directory = args
        .output
        .unwrap_or_else(|| config.download.directory.clone());
    let threads = args.threads.unwrap_or(config.download.threads);

    let mut request = DownloadRequest::new(args.url, directory, file_name).with_threads(threads);
    if let Some(digest) = args.sha256 {
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CliError::Config(format!(
                "Invalid SHA-256 '{}': expected hex digits",
                digest
            )));
        }
        request = request.with_sha256(digest);
    }
    Ok(request)
}

/// Last non-empty path segment of a URL, without query or fragment.
fn file_name_from_url(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    // The first segment is the host
    let (_, path) = path.split_once('/')?;
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╌"),
    );
    bar
}

/// Mirror status changes onto the progress bar until the attempt ends.
async fn render_progress(mut status: watch::Receiver<DownloadStatus>, bar: ProgressBar) {
    bar.set_message("connecting");

    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        match current {
            DownloadStatus::Pending => bar.set_message("connecting"),
            DownloadStatus::Downloading {
                downloaded_bytes,
                total_bytes,
                speed,
                ..
            } => {
                bar.set_length(total_bytes);
                bar.set_position(downloaded_bytes);
                bar.set_message(speed);
            }
            DownloadStatus::Paused { .. } => bar.set_message("paused"),
            DownloadStatus::Success { .. } => {
                bar.finish_with_message("done");
                return;
            }
            DownloadStatus::Error { .. } => {
                bar.abandon_with_message("failed");
                return;
            }
            DownloadStatus::Idle => {
                bar.abandon_with_message("cancelled");
                return;
            }
        }
    }
}

/// Map the final engine status to the command result.
fn outcome(status: DownloadStatus) -> Result<(), CliError> {
    match status {
        DownloadStatus::Success { file } => {
            println!("Saved {}", file.display());
            Ok(())
        }
        DownloadStatus::Error { message, .. } => Err(CliError::Download(message)),
        DownloadStatus::Idle => Err(CliError::Cancelled),
        other => Err(CliError::Download(format!(
            "download ended in unexpected state: {}",
            other
        ))),
    }
}
