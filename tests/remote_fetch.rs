//! Remote artifact fetch against a local HTTP server

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{extract::State, http::StatusCode, routing::get, Router};
use magnolia::{
    fetch::ModelFetcher,
    model::ModelLoader,
    store::{ModelSource, ModelStore},
    testing::CountingLoader,
    ErrorKind, MagnoliaError,
};

const ARTIFACT: &[u8] = b"onnx-bytes-for-testing";

#[derive(Clone, Default)]
struct ServerState {
    hits: Arc<AtomicUsize>,
}

async fn artifact_handler(State(state): State<ServerState>) -> &'static [u8] {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    ARTIFACT
}

async fn empty_handler() -> &'static [u8] {
    b""
}

async fn slow_handler() -> &'static [u8] {
    tokio::time::sleep(Duration::from_secs(10)).await;
    ARTIFACT
}

async fn spawn_server() -> (SocketAddr, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/resnet50_nilo.onnx", get(artifact_handler))
        .route("/empty.onnx", get(empty_handler))
        .route("/slow.onnx", get(slow_handler))
        .route("/forbidden.onnx", get(|| async { StatusCode::FORBIDDEN }))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_fetch_writes_served_bytes() {
    let (addr, state) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("models").join("resnet50_nilo.onnx");

    let written = ModelFetcher::new()
        .unwrap()
        .fetch(&format!("http://{addr}/resnet50_nilo.onnx"), &target)
        .await
        .unwrap();

    assert_eq!(written, ARTIFACT.len() as u64);
    assert_eq!(std::fs::read(&target).unwrap(), ARTIFACT);
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    assert_eq!(dir_entries(&dir.path().join("models")), vec!["resnet50_nilo.onnx"]);
}

#[tokio::test]
async fn test_not_found_leaves_nothing_behind() {
    let (addr, _) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("resnet50_nilo.onnx");

    let err = ModelFetcher::new()
        .unwrap()
        .fetch(&format!("http://{addr}/missing.onnx"), &target)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    assert!(!target.exists());
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_error_status_and_empty_body_rejected() {
    let (addr, _) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("m.onnx");
    let fetcher = ModelFetcher::new().unwrap();

    for path in ["forbidden.onnx", "empty.onnx"] {
        let err = fetcher
            .fetch(&format!("http://{addr}/{path}"), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, MagnoliaError::ModelUnavailable(_)), "{path}");
    }
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_unreachable_host() {
    // Bind and drop to get a port with nothing listening
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("m.onnx");

    let err = ModelFetcher::new()
        .unwrap()
        .fetch(&format!("http://127.0.0.1:{port}/m.onnx"), &target)
        .await
        .unwrap_err();
    assert!(matches!(err, MagnoliaError::ModelUnavailable(_)));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_fetch_timeout() {
    let (addr, _) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("m.onnx");

    let err = ModelFetcher::with_timeout(Duration::from_millis(200))
        .unwrap()
        .fetch(&format!("http://{addr}/slow.onnx"), &target)
        .await
        .unwrap_err();
    assert!(matches!(err, MagnoliaError::ModelUnavailable(_)));
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_start_downloads_once() {
    let (addr, state) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("resnet50_nilo.onnx");
    let loader = Arc::new(CountingLoader::fixed(0.9));

    let store = Arc::new(ModelStore::new(
        ModelSource::new(&target).with_remote_url(format!("http://{addr}/resnet50_nilo.onnx")),
        Arc::clone(&loader) as Arc<dyn ModelLoader>,
        ModelFetcher::new().unwrap(),
    ));

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get_model().await })
        })
        .collect();
    let handles: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    assert_eq!(loader.calls(), 1);
    assert_eq!(store.stats().downloads, 1);
    for h in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], h));
    }
    assert_eq!(std::fs::read(&target).unwrap(), ARTIFACT);
}

#[tokio::test]
async fn test_present_artifact_skips_download() {
    let (addr, state) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("resnet50_nilo.onnx");
    std::fs::write(&target, b"local copy").unwrap();

    let store = ModelStore::new(
        ModelSource::new(&target).with_remote_url(format!("http://{addr}/resnet50_nilo.onnx")),
        Arc::new(CountingLoader::fixed(0.9)),
        ModelFetcher::new().unwrap(),
    );
    store.ensure_available().await.unwrap();
    store.get_model().await.unwrap();

    assert_eq!(state.hits.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read(&target).unwrap(), b"local copy");
}
