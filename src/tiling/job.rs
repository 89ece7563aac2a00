//! A single tile pyramid job.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use super::queue::JobStatusStore;
use super::upload::{collect_uploads, upload_all};
use super::{JobId, JobState, TileGenerator, TileJobSpec, TileKeys, MARKER_OK, MARKER_PENDING};
use crate::error::{JobError, StorageError};
use crate::storage::{ProviderFactory, StorageProvider};

/// Name prefix of every staging directory.
pub const STAGING_PREFIX: &str = "dzfiles-";

/// Resources shared by all jobs run by a worker pool.
#[derive(Clone)]
pub struct JobContext {
    pub tiler: Arc<dyn TileGenerator>,

    /// Parent of staging directories; the system temp dir when `None`
    pub staging_root: Option<PathBuf>,

    /// Maximum number of uploads in flight per job
    pub upload_concurrency: usize,
}

impl JobContext {
    pub fn new(tiler: Arc<dyn TileGenerator>) -> Self {
        Self {
            tiler,
            staging_root: None,
            upload_concurrency: 32,
        }
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency;
        self
    }

    fn create_staging_dir(&self) -> Result<TempDir, JobError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);

        let dir = match &self.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| JobError::Staging(format!("error creating tmp dir: {}", e)))?;

        Ok(dir)
    }
}

/// A staged tile job: provider built and marker set to `pending`.
pub struct TilePyramidJob {
    id: JobId,
    spec: TileJobSpec,
    keys: TileKeys,
    provider: Arc<dyn StorageProvider>,
}

impl TilePyramidJob {
    /// Build the job's provider and write the `pending` marker.
    ///
    /// This is the synchronous part of a submission; its errors are
    /// reported to the submitter.
    pub async fn stage(
        id: JobId,
        spec: TileJobSpec,
        keys: TileKeys,
        factory: &dyn ProviderFactory,
    ) -> Result<Self, StorageError> {
        let provider = factory.provider(spec.provider, &spec.credentials).await?;

        provider
            .store(
                Bytes::from_static(MARKER_PENDING.as_bytes()),
                &keys.marker_key(),
                &spec.temp_container,
            )
            .await?;

        debug!(
            job_id = %id,
            marker = %keys.marker_key(),
            container = %spec.temp_container,
            "Tile job staged"
        );

        Ok(Self {
            id,
            spec,
            keys,
            provider,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn spec(&self) -> &TileJobSpec {
        &self.spec
    }

    pub fn keys(&self) -> &TileKeys {
        &self.keys
    }

    /// Run the job to completion and record its outcome.
    pub async fn execute(self, context: &JobContext, status: &JobStatusStore) -> JobState {
        info!(
            job_id = %self.id,
            image_key = %self.spec.image_key,
            container = %self.spec.container,
            "Starting tile job"
        );

        match self.run(context, status).await {
            Ok(files) => {
                status.finish(self.id, files).await;
                info!(
                    job_id = %self.id,
                    image_key = %self.spec.image_key,
                    files,
                    "Tile job complete"
                );
                JobState::Done
            }
            Err(e) => {
                self.fail(status, &e.to_string()).await;
                JobState::Failed
            }
        }
    }

    /// Mark the job failed: overwrite the marker with `message`.
    ///
    /// A marker write failure is logged and otherwise ignored.
    pub async fn fail(&self, status: &JobStatusStore, message: &str) {
        error!(job_id = %self.id, image_key = %self.spec.image_key, error = %message, "Tile job failed");

        if let Err(e) = self
            .provider
            .store(
                Bytes::from(message.to_string()),
                &self.keys.marker_key(),
                &self.spec.temp_container,
            )
            .await
        {
            warn!(job_id = %self.id, error = %e, "Failed to write error marker");
        }

        status.fail(self.id, message.to_string()).await;
    }

    async fn run(&self, context: &JobContext, status: &JobStatusStore) -> Result<usize, JobError> {
        // Removed when dropped, on every return path
        let staging = context.create_staging_dir()?;

        let data = self
            .provider
            .fetch(&self.spec.container, &self.spec.image_key)
            .await?;
        self.transition(status, JobState::Downloaded).await;

        let input = staging.path().join(self.keys.local_file_name());
        tokio::fs::write(&input, &data)
            .await
            .map_err(|e| JobError::Staging(format!("error saving image to disk: {}", e)))?;

        let output_base = staging.path().join(&self.keys.base_name);
        context.tiler.generate(&input, &output_base).await?;
        self.transition(status, JobState::Tiled).await;

        let root = staging.path().to_path_buf();
        let keys = self.keys.clone();
        let items = tokio::task::spawn_blocking(move || collect_uploads(&root, &keys))
            .await
            .map_err(|e| JobError::Join(e.to_string()))??;

        self.transition(status, JobState::Uploading).await;
        let uploaded = upload_all(
            Arc::clone(&self.provider),
            &self.spec.temp_container,
            items,
            context.upload_concurrency,
        )
        .await?;

        self.provider
            .store(
                Bytes::from_static(MARKER_OK.as_bytes()),
                &self.keys.marker_key(),
                &self.spec.temp_container,
            )
            .await?;

        Ok(uploaded)
    }

    async fn transition(&self, status: &JobStatusStore, state: JobState) {
        debug!(job_id = %self.id, state = %state, "Tile job transition");
        status.set_state(self.id, state).await;
    }
}
