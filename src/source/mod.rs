//! Image source resolution.
//!
//! A transform request names its input in one of four ways, checked in
//! this order:
//!
//! 1. `s3key` (+ `s3bucket`, `s3region`): an S3 object
//! 2. `azuresastoken` + `azureblobkey` (+ `azurecontainer`, `azureaccount`):
//!    an Azure blob reached through a SAS token
//! 3. `azureblobkey` (+ `azurecontainer`): an Azure blob in the service's
//!    own account
//! 4. none of the above: the request body, either the `file` field of a
//!    multipart form or the raw body
//!
//! The first match wins; an S3 key takes precedence over any Azure
//! parameters. A selected backend is also where the output is written
//! (`s3outputkey` / `azureblobkeyoutput`) and where overlay images are
//! read from.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Query};
use bytes::Bytes;
use http::{header, HeaderMap, Request, Uri};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ServiceError, StorageError};
use crate::storage::{ProviderCredentials, ProviderFactory, ProviderKind, StorageProvider, StorageRef};

/// Header that may carry the SAS token instead of the query string.
pub const SAS_TOKEN_HEADER: &str = "x-azure-sas-token";

/// Multipart field holding an uploaded image.
pub const MULTIPART_FILE_FIELD: &str = "file";

// =============================================================================
// Parameters
// =============================================================================

/// Backend-selecting query parameters of a transform request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceParams {
    pub s3key: Option<String>,
    pub s3bucket: Option<String>,
    pub s3region: Option<String>,
    pub s3outputkey: Option<String>,

    pub azurecontainer: Option<String>,
    pub azureblobkey: Option<String>,
    pub azureblobkeyoutput: Option<String>,
    pub azuresastoken: Option<String>,
    pub azureaccount: Option<String>,
}

impl SourceParams {
    /// Parse the query string, falling back to the SAS token header.
    pub fn from_parts(uri: &Uri, headers: &HeaderMap) -> Result<Self, ServiceError> {
        let Query(mut params) = Query::<SourceParams>::try_from_uri(uri)
            .map_err(|e| ServiceError::InvalidParameters(e.body_text()))?;

        if non_empty(&params.azuresastoken).is_none() {
            params.azuresastoken = headers
                .get(SAS_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }

        Ok(params)
    }

    /// Pick the backend named by these parameters, if any.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidParameters`] when the key is given without
    ///   its bucket or container
    /// - [`ServiceError::MissingOutputKey`] when no output key is given for
    ///   the selected backend
    pub fn select_backend(&self) -> Result<Option<ResolvedBackend>, ServiceError> {
        if let Some(key) = non_empty(&self.s3key) {
            let bucket = non_empty(&self.s3bucket).ok_or_else(|| {
                ServiceError::InvalidParameters("s3bucket is required with s3key".to_string())
            })?;
            let output_key = non_empty(&self.s3outputkey)
                .ok_or(ServiceError::MissingOutputKey(ProviderKind::BucketStore.as_str()))?;

            return Ok(Some(ResolvedBackend {
                kind: ProviderKind::BucketStore,
                credentials: ProviderCredentials {
                    region: non_empty(&self.s3region).map(str::to_string),
                    ..ProviderCredentials::default()
                },
                container: bucket.to_string(),
                input_key: key.to_string(),
                output_key: output_key.to_string(),
            }));
        }

        let Some(blob_key) = non_empty(&self.azureblobkey) else {
            return Ok(None);
        };

        let (kind, credentials) = match non_empty(&self.azuresastoken) {
            Some(token) => (
                ProviderKind::SasBlob,
                ProviderCredentials::sas(token, non_empty(&self.azureaccount).map(str::to_string)),
            ),
            None => (ProviderKind::PrimaryBlob, ProviderCredentials::default()),
        };

        let container = non_empty(&self.azurecontainer).ok_or_else(|| {
            ServiceError::InvalidParameters(
                "azurecontainer is required with azureblobkey".to_string(),
            )
        })?;
        let output_key = non_empty(&self.azureblobkeyoutput)
            .ok_or(ServiceError::MissingOutputKey(kind.as_str()))?;

        Ok(Some(ResolvedBackend {
            kind,
            credentials,
            container: container.to_string(),
            input_key: blob_key.to_string(),
            output_key: output_key.to_string(),
        }))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Resolved Sources
// =============================================================================

/// A storage backend selected by request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub kind: ProviderKind,
    pub credentials: ProviderCredentials,
    pub container: String,
    pub input_key: String,
    pub output_key: String,
}

impl ResolvedBackend {
    fn reference(&self, key: &str) -> StorageRef {
        StorageRef {
            kind: self.kind,
            container: self.container.clone(),
            key: key.to_string(),
            credentials: self.credentials.clone(),
        }
    }
}

/// A resolved backend bound to a provider instance.
#[derive(Clone)]
pub struct BackendSource {
    backend: ResolvedBackend,
    provider: Arc<dyn StorageProvider>,
}

impl BackendSource {
    pub fn new(backend: ResolvedBackend, provider: Arc<dyn StorageProvider>) -> Self {
        Self { backend, provider }
    }

    pub fn backend(&self) -> &ResolvedBackend {
        &self.backend
    }

    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    /// The object the input is read from.
    pub fn input_ref(&self) -> StorageRef {
        self.backend.reference(&self.backend.input_key)
    }

    /// The object the output is written to.
    pub fn output_ref(&self) -> StorageRef {
        self.backend.reference(&self.backend.output_key)
    }

    /// Fetch another object from the same container.
    pub async fn fetch_related(&self, key: &str) -> Result<Bytes, StorageError> {
        self.provider.fetch(&self.backend.container, key).await
    }
}

/// The input of a transform request.
pub struct ImageSource {
    pub data: Bytes,

    /// Set when the input came from storage
    pub backend: Option<BackendSource>,
}

// =============================================================================
// SourceResolver
// =============================================================================

/// Turns a request into input bytes and, when selected, a storage backend.
#[derive(Clone)]
pub struct SourceResolver {
    factory: Arc<dyn ProviderFactory>,
}

impl SourceResolver {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<dyn ProviderFactory> {
        &self.factory
    }

    /// Resolve the input of `request`.
    ///
    /// The body is only read when no backend is selected.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::MissingSource`] when the resolved input is
    /// empty, or a storage error when the backend fetch fails.
    pub async fn resolve(
        &self,
        params: &SourceParams,
        request: Request<Body>,
        body_limit: usize,
    ) -> Result<ImageSource, ServiceError> {
        let source = match params.select_backend()? {
            Some(backend) => {
                let provider = self
                    .factory
                    .provider(backend.kind, &backend.credentials)
                    .await?;
                let source = BackendSource::new(backend, provider);
                let input = source.input_ref();
                debug!(source = %input, "Fetching input image");

                let data = source
                    .provider()
                    .fetch(&input.container, &input.key)
                    .await?;
                ImageSource {
                    data,
                    backend: Some(source),
                }
            }
            None => ImageSource {
                data: read_inline_body(request, body_limit).await?,
                backend: None,
            },
        };

        if source.data.is_empty() {
            return Err(ServiceError::MissingSource("empty image".to_string()));
        }

        Ok(source)
    }
}

/// Read an uploaded image from the request body.
///
/// Multipart forms contribute their `file` field; any other body is taken
/// as the image itself.
pub async fn read_inline_body(request: Request<Body>, limit: usize) -> Result<Bytes, ServiceError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        return axum::body::to_bytes(request.into_body(), limit)
            .await
            .map_err(|e| ServiceError::MissingSource(format!("cannot read request body: {}", e)));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ServiceError::MissingSource(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::MissingSource(e.body_text()))?
    {
        if field.name() == Some(MULTIPART_FILE_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|e| ServiceError::MissingSource(e.body_text()));
        }
    }

    Ok(Bytes::new())
}

// =============================================================================
// Tests
// =============================================================================
