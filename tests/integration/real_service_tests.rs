//! Real service integration tests against MinIO.
//!
//! # Requirements
//!
//! A MinIO server must be reachable at `http://localhost:9000` with the
//! default `minioadmin` credentials:
//!
//! ```bash
//! docker run -d -p 9000:9000 minio/minio server /data
//! ```
//!
//! `vips` must be on the `PATH` for the tile pyramid test.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test integration real_service -- --ignored
//! ```
//!
//! These tests are marked as `#[ignore]` by default because they require external
//! services to be running.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use image::ImageFormat;
use tempfile::TempDir;
use tower::ServiceExt;

use pictor::server::{create_router, AppState, RouterConfig};
use pictor::storage::{
    BackendFactory, BackendSettings, ProviderCredentials, ProviderFactory, ProviderKind,
    StorageProvider,
};
use pictor::tiling::{JobContext, JobState, TileJobQueue, TileJobSpec, VipsTiler};
use pictor::transform::ImageEngine;

use super::test_utils::{decode_dimensions, jpeg_bytes, png_bytes, wait_for_job};

const MINIO_ENDPOINT: &str = "http://localhost:9000";
const MINIO_BUCKET: &str = "pictor-test";

/// MinIO default credentials
const MINIO_ACCESS_KEY: &str = "minioadmin";
const MINIO_SECRET_KEY: &str = "minioadmin";

/// Check if the MinIO service is reachable
async fn is_minio_available() -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };

    client
        .get(format!("{}/minio/health/live", MINIO_ENDPOINT))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

/// Create the test bucket with an admin client.
async fn ensure_bucket() {
    let creds = aws_sdk_s3::config::Credentials::new(
        MINIO_ACCESS_KEY,
        MINIO_SECRET_KEY,
        None,
        None,
        "test",
    );
    let config = aws_sdk_s3::Config::builder()
        .behavior_version_latest()
        .region(aws_sdk_s3::config::Region::new("us-east-1"))
        .endpoint_url(MINIO_ENDPOINT)
        .credentials_provider(creds)
        .force_path_style(true)
        .build();

    // Already existing is fine
    let _ = aws_sdk_s3::Client::from_conf(config)
        .create_bucket()
        .bucket(MINIO_BUCKET)
        .send()
        .await;
}

/// Production factory pointed at MinIO.
///
/// The AWS credential chain reads `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`,
/// so they are set to the MinIO defaults when absent.
fn minio_factory() -> BackendFactory {
    if std::env::var("AWS_ACCESS_KEY_ID").is_err() {
        std::env::set_var("AWS_ACCESS_KEY_ID", MINIO_ACCESS_KEY);
        std::env::set_var("AWS_SECRET_ACCESS_KEY", MINIO_SECRET_KEY);
    }

    BackendFactory::new(BackendSettings {
        s3_endpoint: Some(MINIO_ENDPOINT.to_string()),
        s3_default_region: "us-east-1".to_string(),
        ..BackendSettings::default()
    })
}

/// Helper to skip test with a message
macro_rules! skip_if {
    ($cond:expr, $msg:expr) => {
        if $cond {
            eprintln!("SKIPPED: {}", $msg);
            return;
        }
    };
}

#[tokio::test]
#[ignore]
async fn test_minio_store_then_fetch() {
    skip_if!(!is_minio_available().await, "MinIO is not available");
    ensure_bucket().await;

    let factory = minio_factory();
    let provider = factory
        .provider(ProviderKind::BucketStore, &ProviderCredentials::default())
        .await
        .unwrap();

    let data = bytes::Bytes::from(png_bytes(12, 12));
    provider
        .store(data.clone(), "roundtrip/a.png", MINIO_BUCKET)
        .await
        .unwrap();
    let fetched = provider.fetch(MINIO_BUCKET, "roundtrip/a.png").await.unwrap();
    assert_eq!(fetched, data);

    let missing = provider.fetch(MINIO_BUCKET, "roundtrip/missing.png").await;
    assert!(matches!(missing, Err(pictor::StorageError::NotFound(_))));
}

#[tokio::test]
#[ignore]
async fn test_minio_transform_round_trip() {
    skip_if!(!is_minio_available().await, "MinIO is not available");
    ensure_bucket().await;

    let factory: Arc<dyn ProviderFactory> = Arc::new(minio_factory());
    let provider = factory
        .provider(ProviderKind::BucketStore, &ProviderCredentials::default())
        .await
        .unwrap();
    provider
        .store(jpeg_bytes(120, 60).into(), "transform/in.jpg", MINIO_BUCKET)
        .await
        .unwrap();

    let staging = TempDir::new().unwrap();
    let jobs = TileJobQueue::start(
        Arc::clone(&factory),
        JobContext::new(Arc::new(VipsTiler::default())).with_staging_root(staging.path()),
        1,
        4,
    );
    let state = AppState::new(Arc::clone(&factory), Arc::new(ImageEngine::new()), jobs);
    let router = create_router(state, RouterConfig::new().with_tracing(false));

    let request = Request::builder()
        .uri(format!(
            "/resize?width=60&type=png&s3key=transform/in.jpg&s3bucket={}&s3outputkey=transform/out.png",
            MINIO_BUCKET
        ))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let output = provider
        .fetch(MINIO_BUCKET, "transform/out.png")
        .await
        .unwrap();
    assert_eq!(decode_dimensions(&output), (ImageFormat::Png, 60, 30));
}

#[tokio::test]
#[ignore]
async fn test_minio_tile_pyramid_with_vips() {
    skip_if!(!is_minio_available().await, "MinIO is not available");
    skip_if!(
        VipsTiler::default().version().await.is_err(),
        "vips is not installed"
    );
    ensure_bucket().await;

    let factory: Arc<dyn ProviderFactory> = Arc::new(minio_factory());
    let provider = factory
        .provider(ProviderKind::BucketStore, &ProviderCredentials::default())
        .await
        .unwrap();
    provider
        .store(jpeg_bytes(600, 400).into(), "dz/photo.jpg", MINIO_BUCKET)
        .await
        .unwrap();

    let staging = TempDir::new().unwrap();
    let queue = TileJobQueue::start(
        Arc::clone(&factory),
        JobContext::new(Arc::new(VipsTiler::default())).with_staging_root(staging.path()),
        1,
        4,
    );

    let ticket = queue
        .submit(TileJobSpec {
            provider: ProviderKind::BucketStore,
            image_key: "dz/photo.jpg".to_string(),
            container: MINIO_BUCKET.to_string(),
            temp_container: MINIO_BUCKET.to_string(),
            credentials: ProviderCredentials::default(),
        })
        .await
        .unwrap();

    let status = wait_for_job(&queue, ticket.job_id).await;
    assert_eq!(status.state, JobState::Done, "{:?}", status.error);

    let marker = provider.fetch(MINIO_BUCKET, "dz/photo.txt").await.unwrap();
    assert_eq!(&marker[..], b"ok");
    assert!(provider.fetch(MINIO_BUCKET, "dz/photo.dzi").await.is_ok());
    assert!(provider
        .fetch(MINIO_BUCKET, "dz/photo_files/0/0_0.jpeg")
        .await
        .is_ok());
}
