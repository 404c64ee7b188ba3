//! End-to-end tests for the download engine against a mock HTTP server.
//!
//! These tests cover the full engine flow:
//! - HEAD probe → transfer plan → chunk fetchers → destination file
//! - Resume from a partial file, with and without range support
//! - Failure, cancellation, and checksum verification
//! - Status stream ordering and task record persistence
//!
//! Run with: `cargo test --test engine_integration`

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use segfetch::config::EngineConfig;
use segfetch::download::side_path;
use segfetch::store::{persist_transitions, JsonTaskStore, TaskStore};
use segfetch::{DownloadEngine, DownloadError, DownloadRequest, DownloadStatus};

// ============================================================================
// Helper Functions
// ============================================================================

/// Deterministic test payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Engine with a small multi-chunk threshold so tests stay fast.
fn engine() -> DownloadEngine {
    DownloadEngine::new(EngineConfig::default().with_min_multi_chunk_size(1024)).unwrap()
}

/// Mount a HEAD that advertises length and, optionally, byte ranges.
async fn mount_head(server: &MockServer, route: &str, len: usize, ranges: bool) {
    let mut template = ResponseTemplate::new(200).insert_header("Content-Length", len.to_string());
    if ranges {
        template = template.insert_header("Accept-Ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

/// Mount a GET that honours `Range: bytes=start-end` and counts ranged requests.
async fn mount_ranged_get(server: &MockServer, route: &str, content: Vec<u8>) -> Arc<AtomicUsize> {
    mount_delayed_ranged_get(server, route, content, Duration::ZERO).await
}

/// Like [`mount_ranged_get`], with every response held back by `delay`.
async fn mount_delayed_ranged_get(
    server: &MockServer,
    route: &str,
    content: Vec<u8>,
    delay: Duration,
) -> Arc<AtomicUsize> {
    let ranged = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ranged);

    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(move |req: &Request| match parse_range(req) {
            Some((start, end)) => {
                counter.fetch_add(1, Ordering::SeqCst);
                let end = end.min(content.len() - 1);
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {}-{}/{}", start, end, content.len()),
                    )
                    .set_body_bytes(content[start..=end].to_vec())
                    .set_delay(delay)
            }
            None => ResponseTemplate::new(200)
                .set_body_bytes(content.clone())
                .set_delay(delay),
        })
        .mount(server)
        .await;

    ranged
}

fn parse_range(req: &Request) -> Option<(usize, usize)> {
    let value = req.headers.get("Range")?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Collect every status published after `rx` was subscribed, up to a terminal one.
async fn collect_until_terminal(mut rx: watch::Receiver<DownloadStatus>) -> Vec<DownloadStatus> {
    let mut seen = Vec::new();
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        let done = status.is_terminal();
        seen.push(status);
        if done {
            break;
        }
    }
    seen
}

fn assert_success(status: &DownloadStatus, expected_file: &Path) {
    match status {
        DownloadStatus::Success { file } => assert_eq!(file, expected_file),
        other => panic!("expected success, got {other}"),
    }
}

fn error_cause(status: &DownloadStatus) -> Arc<DownloadError> {
    match status {
        DownloadStatus::Error {
            cause: Some(cause), ..
        } => Arc::clone(cause),
        other => panic!("expected error with cause, got {other}"),
    }
}

fn leftover_side_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".part"))
        .collect()
}

// ============================================================================
// Multi-chunk downloads
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_chunk_download_matches_source() {
    let server = MockServer::start().await;
    let content = payload(3 * 1024 * 1024 + 123);
    mount_head(&server, "/app.apk", content.len(), true).await;
    let ranged = mount_ranged_get(&server, "/app.apk", content.clone()).await;

    let temp = TempDir::new().unwrap();
    let engine = DownloadEngine::new(EngineConfig::default()).unwrap();
    let collector = tokio::spawn(collect_until_terminal(engine.status()));

    let request = DownloadRequest::new(format!("{}/app.apk", server.uri()), temp.path(), "app.apk")
        .with_threads(4);
    engine.start(request.clone()).await;

    let seen = collector.await.unwrap();
    assert_success(seen.last().unwrap(), &request.destination());
    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
    assert_eq!(ranged.load(Ordering::SeqCst), 4);
    assert!(leftover_side_files(temp.path()).is_empty());

    // Published progress never goes backwards
    let progress: Vec<f32> = seen
        .iter()
        .filter(|s| s.is_downloading())
        .filter_map(|s| s.progress())
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignored_range_still_assembles_file() {
    let server = MockServer::start().await;
    let content = payload(64 * 1024 + 7);
    mount_head(&server, "/video.mp4", content.len(), true).await;

    // Advertises ranges but always answers with the whole body
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(3)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine();
    let request = DownloadRequest::new(format!("{}/video.mp4", server.uri()), temp.path(), "video.mp4")
        .with_threads(3);
    engine.start(request.clone()).await;

    assert_success(&engine.current_status(), &request.destination());
    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
}

// ============================================================================
// Resume and completion
// ============================================================================

#[tokio::test]
async fn test_complete_file_succeeds_without_fetching() {
    let server = MockServer::start().await;
    let content = payload(4096);
    mount_head(&server, "/done.apk", content.len(), true).await;
    Mock::given(method("GET"))
        .and(path("/done.apk"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("done.apk"), &content).unwrap();

    let engine = engine();
    let request = DownloadRequest::new(format!("{}/done.apk", server.uri()), temp.path(), "done.apk")
        .with_threads(4);

    // Twice: completion is idempotent
    engine.start(request.clone()).await;
    assert_success(&engine.current_status(), &request.destination());
    engine.start(request.clone()).await;
    assert_success(&engine.current_status(), &request.destination());

    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
}

#[tokio::test]
async fn test_single_thread_resume_fetches_tail() {
    let server = MockServer::start().await;
    let content = payload(50_000);
    mount_head(&server, "/partial.bin", content.len(), true).await;
    Mock::given(method("GET"))
        .and(path("/partial.bin"))
        .and(header("Range", "bytes=12000-49999"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(content[12_000..].to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("partial.bin"), &content[..12_000]).unwrap();

    let engine = engine();
    let request = DownloadRequest::new(
        format!("{}/partial.bin", server.uri()),
        temp.path(),
        "partial.bin",
    );
    engine.start(request.clone()).await;

    assert_success(&engine.current_status(), &request.destination());
    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
}

#[tokio::test]
async fn test_no_range_support_restarts_from_scratch() {
    let server = MockServer::start().await;
    let content = payload(20_000);
    mount_head(&server, "/plain.bin", content.len(), false).await;
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("plain.bin"), b"stale partial bytes").unwrap();

    let engine = engine();
    let collector = tokio::spawn(collect_until_terminal(engine.status()));
    let request = DownloadRequest::new(format!("{}/plain.bin", server.uri()), temp.path(), "plain.bin")
        .with_threads(4);
    engine.start(request.clone()).await;

    let seen = collector.await.unwrap();
    assert_success(seen.last().unwrap(), &request.destination());
    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
}

#[tokio::test]
async fn test_unknown_length_uses_simple_path_without_progress() {
    let server = MockServer::start().await;
    let content = payload(10_000);
    Mock::given(method("HEAD"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine();
    let collector = tokio::spawn(collect_until_terminal(engine.status()));
    let request = DownloadRequest::new(format!("{}/stream", server.uri()), temp.path(), "stream.bin")
        .with_threads(8);
    engine.start(request.clone()).await;

    let seen = collector.await.unwrap();
    assert!(seen.iter().all(|s| !s.is_downloading()));
    assert_success(seen.last().unwrap(), &request.destination());
    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chunk_failure_reports_error_and_keeps_resumable_prefix() {
    let server = MockServer::start().await;
    let content = payload(40_000);
    mount_head(&server, "/flaky.bin", content.len(), true).await;

    // Only the first chunk is served; every later range fails.
    let body = content.clone();
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(move |req: &Request| match parse_range(req) {
            Some((0, end)) => ResponseTemplate::new(206).set_body_bytes(body[..=end].to_vec()),
            _ => ResponseTemplate::new(500),
        })
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine();
    let collector = tokio::spawn(collect_until_terminal(engine.status()));
    let request = DownloadRequest::new(format!("{}/flaky.bin", server.uri()), temp.path(), "flaky.bin")
        .with_threads(4);
    engine.start(request.clone()).await;

    let seen = collector.await.unwrap();
    let terminal: Vec<_> = seen.iter().filter(|s| s.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);

    let cause = error_cause(seen.last().unwrap());
    assert!(matches!(*cause, DownloadError::HttpStatus { status, .. } if status.as_u16() == 500));

    // Whatever survived is a prefix of the source, never past chunk 0
    let on_disk = std::fs::read(request.destination()).unwrap();
    assert!(on_disk.len() <= 10_000);
    assert_eq!(on_disk, content[..on_disk.len()]);
    assert!(leftover_side_files(temp.path()).is_empty());
}

#[tokio::test]
async fn test_checksum_mismatch_is_an_error() {
    let server = MockServer::start().await;
    let content = payload(5_000);
    mount_head(&server, "/signed.apk", content.len(), false).await;
    Mock::given(method("GET"))
        .and(path("/signed.apk"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine();
    let url = format!("{}/signed.apk", server.uri());

    engine
        .start(DownloadRequest::new(&url, temp.path(), "signed.apk").with_sha256("00ff"))
        .await;
    let cause = error_cause(&engine.current_status());
    assert!(matches!(*cause, DownloadError::ChecksumMismatch { .. }));

    let request =
        DownloadRequest::new(&url, temp.path(), "signed.apk").with_sha256(sha256_hex(&content).to_uppercase());
    engine.start(request.clone()).await;
    assert_success(&engine.current_status(), &request.destination());
}

#[tokio::test]
async fn test_unreachable_server_is_an_error() {
    let temp = TempDir::new().unwrap();
    let engine = engine();

    // Port 9 (discard) is not listening in the test environment
    engine
        .start(DownloadRequest::new("http://127.0.0.1:9/missing", temp.path(), "missing"))
        .await;

    let cause = error_cause(&engine.current_status());
    assert!(matches!(*cause, DownloadError::Request { .. }));
}

// ============================================================================
// Cancellation and lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_publishes_idle_and_no_terminal_status() {
    let server = MockServer::start().await;
    let content = payload(8_192);
    mount_head(&server, "/slow.bin", content.len(), true).await;
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(content.clone())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine());
    let mut rx = engine.status();

    let request = DownloadRequest::new(format!("{}/slow.bin", server.uri()), temp.path(), "slow.bin");
    std::fs::write(request.destination(), &content[..100]).unwrap();

    let running = {
        let engine = Arc::clone(&engine);
        let request = request.clone();
        tokio::spawn(async move { engine.start(request).await })
    };

    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == DownloadStatus::Pending))
        .await
        .unwrap()
        .unwrap();

    engine.cancel();
    assert_eq!(engine.current_status(), DownloadStatus::Idle);

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("cancelled download should stop promptly")
        .unwrap();

    assert_eq!(engine.current_status(), DownloadStatus::Idle);
    assert!(!side_path(&request.destination(), 0).exists());
    // Nothing new arrived, so the pre-allocated tail is gone again.
    assert_eq!(std::fs::metadata(request.destination()).unwrap().len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_while_running_downloads_whole_file() {
    let server = MockServer::start().await;
    let content = payload(64 * 1024);
    mount_head(&server, "/big.bin", content.len(), true).await;
    mount_delayed_ranged_get(&server, "/big.bin", content.clone(), Duration::from_millis(800))
        .await;

    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine());
    let request = DownloadRequest::new(format!("{}/big.bin", server.uri()), temp.path(), "big.bin")
        .with_threads(4);

    let first = {
        let engine = Arc::clone(&engine);
        let request = request.clone();
        tokio::spawn(async move { engine.start(request).await })
    };

    // Long enough for the first attempt to pre-allocate and send its ranges.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        std::fs::metadata(request.destination()).unwrap().len(),
        content.len() as u64
    );

    tokio::time::timeout(Duration::from_secs(10), engine.start(request.clone()))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap();

    assert_success(&engine.current_status(), &request.destination());
    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_right_after_cancel_downloads_whole_file() {
    let server = MockServer::start().await;
    let content = payload(64 * 1024);
    mount_head(&server, "/retry.bin", content.len(), true).await;
    mount_delayed_ranged_get(&server, "/retry.bin", content.clone(), Duration::from_millis(800))
        .await;

    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine());
    let request =
        DownloadRequest::new(format!("{}/retry.bin", server.uri()), temp.path(), "retry.bin")
            .with_threads(4);

    let first = {
        let engine = Arc::clone(&engine);
        let request = request.clone();
        tokio::spawn(async move { engine.start(request).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    engine.cancel();
    tokio::time::timeout(Duration::from_secs(10), engine.start(request.clone()))
        .await
        .unwrap();
    first.await.unwrap();

    assert_success(&engine.current_status(), &request.destination());
    assert_eq!(std::fs::read(request.destination()).unwrap(), content);
}

#[tokio::test]
async fn test_engine_reused_then_closed() {
    let server = MockServer::start().await;
    let first = payload(3_000);
    let second = payload(6_000);
    mount_head(&server, "/one", first.len(), true).await;
    mount_head(&server, "/two", second.len(), true).await;
    mount_ranged_get(&server, "/one", first.clone()).await;
    mount_ranged_get(&server, "/two", second.clone()).await;

    let temp = TempDir::new().unwrap();
    let engine = engine();

    for (route, content) in [("/one", &first), ("/two", &second)] {
        let name = route.trim_start_matches('/');
        let request = DownloadRequest::new(format!("{}{}", server.uri(), route), temp.path(), name)
            .with_threads(2);
        engine.start(request.clone()).await;
        assert_success(&engine.current_status(), &request.destination());
        assert_eq!(&std::fs::read(request.destination()).unwrap(), content);
    }

    engine.close();
    engine
        .start(DownloadRequest::new(format!("{}/one", server.uri()), temp.path(), "again"))
        .await;
    assert!(matches!(*error_cause(&engine.current_status()), DownloadError::Closed));
    assert!(!temp.path().join("again").exists());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_record_follows_download() {
    let server = MockServer::start().await;
    let content = payload(32 * 1024);
    mount_head(&server, "/tracked.apk", content.len(), true).await;
    mount_ranged_get(&server, "/tracked.apk", content.clone()).await;

    let temp = TempDir::new().unwrap();
    let store: Arc<dyn TaskStore> = Arc::new(JsonTaskStore::new(temp.path().join("tasks.json")));
    let engine = engine();
    let request = DownloadRequest::new(
        format!("{}/tracked.apk", server.uri()),
        temp.path().join("apps"),
        "tracked.apk",
    )
    .with_threads(4);

    let watcher = tokio::spawn(persist_transitions(
        engine.status(),
        Arc::clone(&store),
        request.clone(),
    ));
    engine.start(request.clone()).await;

    let last = watcher.await.unwrap().unwrap().unwrap();
    assert_eq!(last.status, "success");
    assert_eq!(last.downloaded_bytes, content.len() as u64);
    assert_eq!(last.total_bytes, content.len() as i64);
    assert_eq!(last.progress, 1.0);

    let stored = store.get(&request.url).unwrap().unwrap();
    assert_eq!(stored.save_path, request.destination());
    assert_eq!(stored.status, "success");
}
