//! Storage-backed transformation tests.
//!
//! Tests verify:
//! - Backend selection from query parameters and the SAS token header
//! - Output written back to the source container
//! - Overlay assets fetched from the same container
//! - Storage errors mapped to HTTP responses

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use image::ImageFormat;
use tempfile::TempDir;
use tower::ServiceExt;

use pictor::storage::{MemoryProvider, ProviderKind, StorageProvider};

use super::test_utils::{
    decode_dimensions, overlay_png, png_bytes, test_router, FailingProvider, MockFactory,
};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// =============================================================================
// S3
// =============================================================================

#[tokio::test]
async fn test_s3_source_writes_output_to_bucket() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let bucket = factory.memory(ProviderKind::BucketStore);
    let original = png_bytes(80, 40);
    bucket.insert("photos", "in/cat.png", original.clone()).await;

    let router = test_router(factory.clone(), staging.path());
    let response = router
        .oneshot(get(
            "/resize?width=40&s3key=in/cat.png&s3bucket=photos&s3outputkey=out/cat.png&s3region=eu-west-1",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());

    let stored = bucket.get("photos", "out/cat.png").await.unwrap();
    assert_eq!(decode_dimensions(&stored), (ImageFormat::Png, 40, 20));

    // Source object is untouched
    assert_eq!(bucket.get("photos", "in/cat.png").await.unwrap(), original);

    let calls = factory.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ProviderKind::BucketStore);
    assert_eq!(calls[0].1.region.as_deref(), Some("eu-west-1"));
}

#[tokio::test]
async fn test_s3_without_output_key() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let bucket = factory.memory(ProviderKind::BucketStore);
    bucket.insert("photos", "cat.png", png_bytes(10, 10)).await;

    let router = test_router(factory.clone(), staging.path());
    let response = router
        .oneshot(get("/flip?s3key=cat.png&s3bucket=photos"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "missing_output_key");

    assert!(factory.calls().is_empty());
    assert_eq!(bucket.store_count(), 0);
}

#[tokio::test]
async fn test_bucket_key_wins_over_blob_key() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    factory
        .memory(ProviderKind::BucketStore)
        .insert("b", "k.png", png_bytes(10, 10))
        .await;

    let router = test_router(factory.clone(), staging.path());
    let response = router
        .oneshot(get(
            "/flop?s3key=k.png&s3bucket=b&s3outputkey=o.png&azureblobkey=k.png&azurecontainer=c&azureblobkeyoutput=o.png",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let kinds: Vec<_> = factory.calls().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(kinds, vec![ProviderKind::BucketStore]);
    assert!(factory
        .memory(ProviderKind::BucketStore)
        .get("b", "o.png")
        .await
        .is_some());
}

#[tokio::test]
async fn test_missing_source_object() {
    let staging = TempDir::new().unwrap();
    let router = test_router(MockFactory::new(), staging.path());

    let response = router
        .oneshot(get("/flip?s3key=nope.png&s3bucket=b&s3outputkey=o.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_output_store_failure_is_server_error() {
    let staging = TempDir::new().unwrap();
    let memory = MemoryProvider::new(ProviderKind::BucketStore);
    memory.insert("b", "in.png", png_bytes(10, 10)).await;
    let failing: Arc<dyn StorageProvider> = Arc::new(FailingProvider::new(memory, "out.png"));
    let factory = MockFactory::new().with_provider(ProviderKind::BucketStore, failing);

    let router = test_router(factory, staging.path());
    let response = router
        .oneshot(get("/flip?s3key=in.png&s3bucket=b&s3outputkey=out.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "storage_error");
}

// =============================================================================
// Azure
// =============================================================================

#[tokio::test]
async fn test_primary_blob_source() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);
    blobs.insert("images", "a.png", png_bytes(20, 10)).await;

    let router = test_router(factory.clone(), staging.path());
    let response = router
        .oneshot(get(
            "/rotate?rotate=270&azurecontainer=images&azureblobkey=a.png&azureblobkeyoutput=b.png",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stored = blobs.get("images", "b.png").await.unwrap();
    assert_eq!(decode_dimensions(&stored), (ImageFormat::Png, 10, 20));
    assert_eq!(factory.calls()[0].0, ProviderKind::PrimaryBlob);
}

#[tokio::test]
async fn test_sas_token_from_header() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::SasBlob);
    blobs.insert("images", "a.png", png_bytes(10, 10)).await;

    let router = test_router(factory.clone(), staging.path());
    let request = Request::builder()
        .uri("/flip?azurecontainer=images&azureblobkey=a.png&azureblobkeyoutput=b.png&azureaccount=acct")
        .header("x-azure-sas-token", "sv=2023&sig=abc")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(blobs.get("images", "b.png").await.is_some());

    let (kind, credentials) = factory.calls().remove(0);
    assert_eq!(kind, ProviderKind::SasBlob);
    assert_eq!(credentials.sas_token.as_deref(), Some("sv=2023&sig=abc"));
    assert_eq!(credentials.account.as_deref(), Some("acct"));
}

#[tokio::test]
async fn test_blob_key_without_container() {
    let staging = TempDir::new().unwrap();
    let router = test_router(MockFactory::new(), staging.path());

    let response = router
        .oneshot(get("/flip?azureblobkey=a.png&azureblobkeyoutput=b.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_parameters");
}

// =============================================================================
// Overlays
// =============================================================================

#[tokio::test]
async fn test_watermark_from_same_container() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);
    blobs.insert("images", "photo.png", png_bytes(50, 40)).await;
    blobs.insert("images", "logo.png", overlay_png(10, 10)).await;

    let router = test_router(factory, staging.path());
    let response = router
        .oneshot(get(
            "/watermarkimage?image=logo.png&left=5&top=5&opacity=0.5&azurecontainer=images&azureblobkey=photo.png&azureblobkeyoutput=marked.png",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stored = blobs.get("images", "marked.png").await.unwrap();
    assert_eq!(decode_dimensions(&stored), (ImageFormat::Png, 50, 40));
}

#[tokio::test]
async fn test_watermark_missing_overlay() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let blobs = factory.memory(ProviderKind::PrimaryBlob);
    blobs.insert("images", "photo.png", png_bytes(50, 40)).await;

    let router = test_router(factory, staging.path());
    let response = router
        .oneshot(get(
            "/watermarkimage?image=missing.png&azurecontainer=images&azureblobkey=photo.png&azureblobkeyoutput=marked.png",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "overlay_download_error");
    assert!(blobs.get("images", "marked.png").await.is_none());
}

#[tokio::test]
async fn test_watermark_needs_a_backend() {
    let staging = TempDir::new().unwrap();
    let router = test_router(MockFactory::new(), staging.path());

    let request = Request::builder()
        .method("POST")
        .uri("/watermarkimage?image=logo.png")
        .body(Body::from(png_bytes(20, 20)))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "missing_source");
}
