//! HTTP tests for tile job submission and status.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use std::sync::Arc;

use pictor::storage::{MemoryProvider, ProviderKind, StorageProvider};

use super::test_utils::{jpeg_bytes, test_router, FailingProvider, MockFactory};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_dzsave_rejects_other_methods() {
    let staging = TempDir::new().unwrap();
    let router = test_router(MockFactory::new(), staging.path());

    for method in ["GET", "PUT", "DELETE"] {
        let request = Request::builder()
            .method(method)
            .uri("/dzsave")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{}", method);
        let json = body_json(response).await;
        assert_eq!(json["error"], "method_not_allowed");
    }
}

#[tokio::test]
async fn test_dzsave_malformed_body() {
    let staging = TempDir::new().unwrap();
    let router = test_router(MockFactory::new(), staging.path());

    for body in [
        "{not json",
        r#"{"imageKey": "", "container": "c"}"#,
        r#"{"imageKey": "a.tiff"}"#,
        r#"{"provider": "gcs", "imageKey": "a.tiff", "container": "c"}"#,
    ] {
        let response = router
            .clone()
            .oneshot(post_json("/dzsave", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE, "{}", body);
        let json = body_json(response).await;
        assert_eq!(json["error"], "malformed_request_body");
    }
}

#[tokio::test]
async fn test_dzsave_accepts_and_reports_status() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let bucket = factory.memory(ProviderKind::BucketStore);
    bucket.insert("slides", "2024/scan.tiff", jpeg_bytes(16, 16)).await;

    let router = test_router(factory.clone(), staging.path());
    let response = router
        .clone()
        .oneshot(post_json(
            "/dzsave",
            r#"{"provider": "s3", "imageKey": "2024/scan.tiff", "container": "slides", "tempContainer": "pyramids", "containerZone": "eu-central-1"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ticket = body_json(response).await;
    assert_eq!(ticket["container"], "pyramids");
    assert_eq!(ticket["statusKey"], "2024/scan.txt");
    let job_id = ticket["jobId"].as_str().unwrap().to_string();

    // The marker exists as soon as the job is accepted
    assert!(bucket.get("pyramids", "2024/scan.txt").await.is_some());
    assert_eq!(
        factory.calls()[0].1.region.as_deref(),
        Some("eu-central-1")
    );

    let mut state = String::new();
    for _ in 0..500 {
        let request = Request::builder()
            .uri(format!("/dzsave/{}", job_id))
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status = body_json(response).await;
        assert_eq!(status["jobId"], job_id.as_str());
        state = status["state"].as_str().unwrap().to_string();
        if state == "done" || state == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(state, "done");
    let marker = bucket.get("pyramids", "2024/scan.txt").await.unwrap();
    assert_eq!(&marker[..], b"ok");
    assert!(bucket.get("pyramids", "2024/scan.dzi").await.is_some());
}

#[tokio::test]
async fn test_dzsave_defaults_to_primary_blob() {
    let staging = TempDir::new().unwrap();
    let factory = MockFactory::new();
    let router = test_router(factory.clone(), staging.path());

    let response = router
        .oneshot(post_json(
            "/dzsave",
            r#"{"imageKey": "photo.png", "container": "c"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ticket = body_json(response).await;
    assert_eq!(ticket["container"], "c");
    assert_eq!(factory.calls()[0].0, ProviderKind::PrimaryBlob);
}

#[tokio::test]
async fn test_dzsave_reports_marker_write_failure() {
    let staging = TempDir::new().unwrap();
    let memory = MemoryProvider::new(ProviderKind::BucketStore);
    memory.insert("slides", "scan.tiff", jpeg_bytes(16, 16)).await;

    let provider: Arc<dyn StorageProvider> =
        Arc::new(FailingProvider::new(memory.clone(), "scan.txt"));
    let factory = MockFactory::new().with_provider(ProviderKind::BucketStore, provider);
    let router = test_router(factory, staging.path());

    let response = router
        .oneshot(post_json(
            "/dzsave",
            r#"{"provider": "s3", "imageKey": "scan.tiff", "container": "slides"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "storage_error");
    assert!(json.get("jobId").is_none());
    assert_eq!(memory.keys("slides").await, vec!["scan.tiff".to_string()]);
}

#[tokio::test]
async fn test_job_status_unknown() {
    let staging = TempDir::new().unwrap();
    let router = test_router(MockFactory::new(), staging.path());

    for id in ["not-a-job", "7f8e3d7a-2a52-4a8b-9f7e-2f0c1b3d4e5f"] {
        let request = Request::builder()
            .uri(format!("/dzsave/{}", id))
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", id);
        let json = body_json(response).await;
        assert_eq!(json["error"], "not_found");
    }
}
