//! Runs transformations and routes their output.

use std::sync::Arc;

use tracing::{debug, info};

use super::{TransformEngine, TransformOutput, TransformRequest};
use crate::error::{ServiceError, TransformError};
use crate::source::BackendSource;
use crate::storage::StorageRef;

/// Where a successful transformation ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Written to the request's storage backend; the response has no body
    Stored(StorageRef),

    /// Returned to the caller in the response body
    Inline(TransformOutput),
}

/// Orchestrates one transformation.
///
/// The dispatcher fetches the overlay asset when the operation needs one,
/// runs the engine off the async runtime, and sends the result either to
/// the backend the input came from or back to the caller.
#[derive(Clone)]
pub struct TransformDispatcher {
    engine: Arc<dyn TransformEngine>,
}

impl TransformDispatcher {
    pub fn new(engine: Arc<dyn TransformEngine>) -> Self {
        Self { engine }
    }

    /// Get a reference to the engine.
    pub fn engine(&self) -> &Arc<dyn TransformEngine> {
        &self.engine
    }

    /// Transform `request` and route the output.
    ///
    /// # Arguments
    ///
    /// * `request` - Validated input, operation and options
    /// * `backend` - The storage backend the input was read from, if any.
    ///   Overlays are fetched from it and the output is written to it.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::OverlayDownload`] when the overlay cannot be fetched
    /// - [`ServiceError::Transform`] when the engine rejects the request
    /// - [`ServiceError::Storage`] when writing the output fails
    pub async fn dispatch(
        &self,
        mut request: TransformRequest,
        backend: Option<&BackendSource>,
    ) -> Result<DispatchOutcome, ServiceError> {
        if request.operation.requires_overlay() {
            request.overlay = Some(self.fetch_overlay(&request, backend).await?);
        }

        let operation = request.operation;
        let output = self.run(request).await?;
        debug!(
            operation = %operation,
            mime = %output.mime,
            size = output.body.len(),
            "Transformation complete"
        );

        let Some(backend) = backend else {
            return Ok(DispatchOutcome::Inline(output));
        };

        let target = backend.output_ref();
        backend
            .provider()
            .store(output.body, &target.key, &target.container)
            .await?;
        info!(target = %target, "Stored transformed image");

        Ok(DispatchOutcome::Stored(target))
    }

    /// Run the engine on the blocking thread pool.
    pub async fn run(&self, request: TransformRequest) -> Result<TransformOutput, ServiceError> {
        let engine = Arc::clone(&self.engine);
        let output = tokio::task::spawn_blocking(move || engine.run(&request))
            .await
            .map_err(|e| TransformError::Encode(format!("transform task failed: {}", e)))??;
        Ok(output)
    }

    async fn fetch_overlay(
        &self,
        request: &TransformRequest,
        backend: Option<&BackendSource>,
    ) -> Result<bytes::Bytes, ServiceError> {
        let key = request
            .options
            .image
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ServiceError::InvalidParameters("missing required param: image".to_string())
            })?;

        let backend = backend.ok_or_else(|| {
            ServiceError::MissingSource("an overlay image requires a storage backend".to_string())
        })?;

        backend
            .fetch_related(key)
            .await
            .map_err(ServiceError::OverlayDownload)
    }
}
