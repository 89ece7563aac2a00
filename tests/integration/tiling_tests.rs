//! Tile pyramid job tests.
//!
//! Tests verify:
//! - Marker and pyramid keys derived from the source key
//! - The `pending` marker is written before submission returns
//! - Tool, download and upload failures leave an error marker
//! - Staging directories are removed on every outcome
//! - A full queue rejects jobs

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::Semaphore;

use pictor::error::ServiceError;
use pictor::storage::{MemoryProvider, ProviderCredentials, ProviderKind, StorageProvider};
use pictor::tiling::{JobState, TileJobSpec, MARKER_OK, MARKER_PENDING};

use super::test_utils::{
    dir_is_empty, jpeg_bytes, start_queue, wait_for_job, FailingProvider, FailingTiler, FakeTiler,
    MockFactory, FAKE_TILES,
};

fn spec(image_key: &str, container: &str, temp_container: &str) -> TileJobSpec {
    TileJobSpec {
        provider: ProviderKind::PrimaryBlob,
        image_key: image_key.to_string(),
        container: container.to_string(),
        temp_container: temp_container.to_string(),
        credentials: ProviderCredentials::default(),
    }
}

async fn marker(provider: &MemoryProvider, container: &str, key: &str) -> String {
    let bytes = provider.get(container, key).await.expect("marker exists");
    String::from_utf8(bytes.to_vec()).unwrap()
}

// =============================================================================
// Successful Jobs
// =============================================================================

#[tokio::test]
async fn test_job_uploads_pyramid_next_to_source_key() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);
    blobs.insert("src", "a/b/photo.tiff", jpeg_bytes(32, 32)).await;

    let tiler = Arc::new(FakeTiler::new());
    let queue = start_queue(Arc::new(factory), tiler.clone(), staging.path(), 1, 4);

    let ticket = queue.submit(spec("a/b/photo.tiff", "src", "tiles")).await.unwrap();
    assert_eq!(ticket.status_key, "a/b/photo.txt");
    assert_eq!(ticket.container, "tiles");

    let status = wait_for_job(&queue, ticket.job_id).await;
    assert_eq!(status.state, JobState::Done);
    assert_eq!(status.files, FAKE_TILES.len() + 1);
    assert!(status.error.is_none());

    assert_eq!(marker(&blobs, "tiles", "a/b/photo.txt").await, MARKER_OK);

    let mut expected = vec![
        "a/b/photo.dzi".to_string(),
        "a/b/photo.txt".to_string(),
    ];
    expected.extend(FAKE_TILES.iter().map(|t| format!("a/b/photo_files/{}", t)));
    expected.sort();
    assert_eq!(blobs.keys("tiles").await, expected);

    // Source container only holds the source image
    assert_eq!(blobs.keys("src").await, vec!["a/b/photo.tiff".to_string()]);

    // Local copy keeps the source file name
    let inputs = tiler.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].file_name().unwrap(), "photo.tiff");

    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_pending_marker_written_before_submit_returns() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);
    blobs.insert("c", "scan.jpg", jpeg_bytes(16, 16)).await;

    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(Semaphore::new(0));
    let tiler = Arc::new(FakeTiler::gated(gate.clone(), started.clone()));
    let queue = start_queue(Arc::new(factory), tiler, staging.path(), 1, 4);

    let ticket = queue.submit(spec("scan.jpg", "c", "c")).await.unwrap();
    assert_eq!(marker(&blobs, "c", "scan.txt").await, MARKER_PENDING);

    started.acquire().await.unwrap().forget();
    assert_eq!(marker(&blobs, "c", "scan.txt").await, MARKER_PENDING);
    assert_eq!(
        queue.status(ticket.job_id).await.unwrap().state,
        JobState::Downloaded
    );

    gate.add_permits(1);
    let status = wait_for_job(&queue, ticket.job_id).await;
    assert_eq!(status.state, JobState::Done);
    assert_eq!(marker(&blobs, "c", "scan.txt").await, MARKER_OK);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_tool_failure_leaves_error_marker() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);
    blobs.insert("c", "dir/photo.tiff", jpeg_bytes(16, 16)).await;

    let queue = start_queue(
        Arc::new(factory),
        Arc::new(FailingTiler),
        staging.path(),
        1,
        4,
    );

    let ticket = queue.submit(spec("dir/photo.tiff", "c", "c")).await.unwrap();
    let status = wait_for_job(&queue, ticket.job_id).await;

    assert_eq!(status.state, JobState::Failed);
    let message = marker(&blobs, "c", "dir/photo.txt").await;
    assert!(message.starts_with("dzfiles: error creating dz files"), "{}", message);
    assert_eq!(status.error.as_deref(), Some(message.as_str()));

    // Nothing but the source and the marker
    assert_eq!(
        blobs.keys("c").await,
        vec!["dir/photo.tiff".to_string(), "dir/photo.txt".to_string()]
    );
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_missing_source_leaves_error_marker() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);

    let tiler = Arc::new(FakeTiler::new());
    let queue = start_queue(Arc::new(factory), tiler.clone(), staging.path(), 1, 4);

    let ticket = queue.submit(spec("ghost.png", "c", "c")).await.unwrap();
    let status = wait_for_job(&queue, ticket.job_id).await;

    assert_eq!(status.state, JobState::Failed);
    let message = marker(&blobs, "c", "ghost.txt").await;
    assert!(message.starts_with("dzfiles: storage error"), "{}", message);
    assert_eq!(tiler.calls(), 0);
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_single_failed_upload_fails_job() {
    let staging = TempDir::new().unwrap();
    let memory = MemoryProvider::new(ProviderKind::PrimaryBlob);
    memory.insert("c", "photo.tiff", jpeg_bytes(16, 16)).await;

    let failing = Arc::new(FailingProvider::new(
        memory.clone(),
        format!("photo_files/{}", FAKE_TILES[1]),
    ));
    let provider: Arc<dyn StorageProvider> = failing.clone();
    let factory = MockFactory::new().with_provider(ProviderKind::PrimaryBlob, provider);

    let queue = start_queue(
        Arc::new(factory),
        Arc::new(FakeTiler::new()),
        staging.path(),
        1,
        4,
    );

    let ticket = queue.submit(spec("photo.tiff", "c", "c")).await.unwrap();
    let status = wait_for_job(&queue, ticket.job_id).await;

    assert_eq!(status.state, JobState::Failed);
    let message = marker(&memory, "c", "photo.txt").await;
    assert_ne!(message, MARKER_OK);
    assert!(message.contains("injected failure"), "{}", message);

    // pending marker + every upload attempted + error marker
    assert_eq!(failing.store_attempts(), 1 + FAKE_TILES.len() + 1 + 1);
    assert!(memory.get("c", "photo.dzi").await.is_some());
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_pending_marker_failure_is_reported_to_submitter() {
    let staging = TempDir::new().unwrap();
    let memory = MemoryProvider::new(ProviderKind::PrimaryBlob);
    memory.insert("c", "photo.tiff", jpeg_bytes(16, 16)).await;

    let failing = Arc::new(FailingProvider::new(memory.clone(), "photo.txt"));
    let provider: Arc<dyn StorageProvider> = failing.clone();
    let factory = MockFactory::new().with_provider(ProviderKind::PrimaryBlob, provider);

    let tiler = Arc::new(FakeTiler::new());
    let queue = start_queue(Arc::new(factory), tiler.clone(), staging.path(), 1, 4);

    let err = queue.submit(spec("photo.tiff", "c", "c")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Storage(_)), "{:?}", err);

    // Nothing was queued
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(tiler.calls(), 0);
    assert_eq!(failing.store_attempts(), 1);
    assert!(memory.get("c", "photo.txt").await.is_none());
}

#[tokio::test]
async fn test_error_marker_failure_is_not_escalated() {
    let staging = TempDir::new().unwrap();
    let memory = MemoryProvider::new(ProviderKind::PrimaryBlob);
    memory.insert("c", "good.tiff", jpeg_bytes(16, 16)).await;

    // The pending marker goes through, the error marker does not
    let failing = Arc::new(FailingProvider::after(memory.clone(), "lost.txt", 1));
    let provider: Arc<dyn StorageProvider> = failing.clone();
    let factory = MockFactory::new().with_provider(ProviderKind::PrimaryBlob, provider);

    let queue = start_queue(
        Arc::new(factory),
        Arc::new(FakeTiler::new()),
        staging.path(),
        1,
        4,
    );

    let lost = queue.submit(spec("lost.tiff", "c", "c")).await.unwrap();
    let status = wait_for_job(&queue, lost.job_id).await;
    assert_eq!(status.state, JobState::Failed);
    let error = status.error.unwrap();
    assert!(error.starts_with("dzfiles: storage error"), "{}", error);
    assert_eq!(marker(&memory, "c", "lost.txt").await, MARKER_PENDING);

    // The same worker keeps serving jobs
    let good = queue.submit(spec("good.tiff", "c", "c")).await.unwrap();
    assert_eq!(wait_for_job(&queue, good.job_id).await.state, JobState::Done);
    assert_eq!(marker(&memory, "c", "good.txt").await, MARKER_OK);
    assert!(dir_is_empty(staging.path()));
}

#[tokio::test]
async fn test_full_queue_rejects_and_marks_job() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);
    for key in ["one.jpg", "two.jpg", "three.jpg"] {
        blobs.insert("c", key, jpeg_bytes(8, 8)).await;
    }

    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(Semaphore::new(0));
    let tiler = Arc::new(FakeTiler::gated(gate.clone(), started.clone()));
    let queue = start_queue(Arc::new(factory), tiler, staging.path(), 1, 1);

    // The only worker holds the first job; the second fills the queue
    let first = queue.submit(spec("one.jpg", "c", "c")).await.unwrap();
    started.acquire().await.unwrap().forget();
    let second = queue.submit(spec("two.jpg", "c", "c")).await.unwrap();

    let err = queue.submit(spec("three.jpg", "c", "c")).await.unwrap_err();
    assert!(matches!(err, ServiceError::QueueFull));
    assert_eq!(
        marker(&blobs, "c", "three.txt").await,
        ServiceError::QueueFull.to_string()
    );

    gate.add_permits(2);
    assert_eq!(wait_for_job(&queue, first.job_id).await.state, JobState::Done);
    assert_eq!(wait_for_job(&queue, second.job_id).await.state, JobState::Done);
}

#[tokio::test]
async fn test_key_without_file_name_is_rejected() {
    let staging = TempDir::new().unwrap();
    let queue = start_queue(
        Arc::new(MockFactory::new()),
        Arc::new(FakeTiler::new()),
        staging.path(),
        1,
        4,
    );

    let mut spec = spec("photo.tiff", "c", "c");
    spec.image_key = "dir/".to_string();
    let err = queue.submit(spec).await.unwrap_err();
    assert!(matches!(err, ServiceError::MalformedRequestBody(_)));
}
