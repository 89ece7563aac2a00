use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::{BackendSettings, ProviderKind, StorageProvider};
use crate::error::StorageError;

/// S3-backed implementation of [`StorageProvider`].
///
/// The container is the bucket name. One client is bound to one region;
/// the factory builds a provider per region a request asks for.
#[derive(Clone)]
pub struct S3Provider {
    client: Client,
    region: String,
}

impl S3Provider {
    /// Create a new S3Provider for an already-configured client.
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    /// Get the region this provider's client is bound to.
    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    async fn fetch(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        debug!(bucket = container, key, region = %self.region, "Downloading object");

        let resp = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let location = format!("s3://{}/{}", container, key);

                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if is_not_found {
                    return StorageError::NotFound(location);
                }

                // Also check for 404 status code in the raw response
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);
                if status_is_404 {
                    return StorageError::NotFound(location);
                }

                // Fallback: check the error string for common patterns
                let err_str = e.to_string();
                if err_str.contains("NoSuchKey") || err_str.contains("NotFound") {
                    return StorageError::NotFound(location);
                }

                StorageError::Remote(err_str)
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    async fn store(&self, data: Bytes, key: &str, container: &str) -> Result<(), StorageError> {
        debug!(
            bucket = container,
            key,
            region = %self.region,
            bytes = data.len(),
            "Uploading object"
        );

        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;

        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::BucketStore
    }
}

/// Build the S3 client for one region from the backend settings.
///
/// The AWS credential chain is resolved from the environment. A custom
/// endpoint (MinIO and other S3-compatible services) implies path-style
/// addressing.
pub async fn create_s3_client(settings: &BackendSettings, region: &str) -> Client {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
    if let Some(endpoint) = settings.s3_endpoint.as_deref() {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;
    Client::from_conf(s3_config(&sdk_config, settings))
}

fn s3_config(sdk_config: &SdkConfig, settings: &BackendSettings) -> aws_sdk_s3::Config {
    aws_sdk_s3::config::Builder::from(sdk_config)
        .force_path_style(settings.s3_path_style())
        .build()
}
