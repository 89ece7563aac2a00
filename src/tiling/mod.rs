//! Deep Zoom tile pyramid generation.
//!
//! A tile job downloads a source image, runs an external tiling tool on it
//! and uploads the produced pyramid next to the source key. Progress is
//! published as a small status marker object (`<dir>/<name>.txt`) whose body
//! is `pending`, an error message, or `ok`.
//!
//! # Architecture
//!
//! ```text
//!   POST /dzsave
//!        │
//!        ▼
//! ┌──────────────────┐  Created → Staged (marker "pending")
//! │  TileJobQueue    │──────────────────────────────────────┐
//! │  submit()        │                                      │
//! └────────┬─────────┘                                      ▼
//!          │ mpsc                                  ┌─────────────────┐
//!          ▼                                       │ JobStatusStore  │
//! ┌──────────────────┐                             └─────────────────┘
//! │  worker pool     │  Staged → Downloaded → Tiled → Uploading → Done
//! │  (tile_workers)  │                      │
//! └────────┬─────────┘                      │ any failure → Failed
//!          │                                ▼         (marker = error)
//!          ├─▶ StorageProvider::fetch   TileGenerator (vips dzsave)
//!          └─▶ upload fan-out (JoinSet, at most upload_concurrency in flight)
//! ```
//!
//! The local staging directory is a [`tempfile::TempDir`] owned by the job
//! and removed on every exit path.

mod job;
mod queue;
mod tiler;
mod upload;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::storage::{ProviderCredentials, ProviderKind};

pub use job::{JobContext, TilePyramidJob, STAGING_PREFIX};
pub use queue::{JobStatusStore, JobTicket, TileJobQueue, DEFAULT_STATUS_CAPACITY};
pub use tiler::{TileGenerator, VipsTiler, INDEX_EXTENSION, TILES_SUFFIX};
pub use upload::{collect_uploads, upload_all, UploadItem};

/// Marker body while a job is running.
pub const MARKER_PENDING: &str = "pending";

/// Marker body after every file was uploaded.
pub const MARKER_OK: &str = "ok";

// =============================================================================
// Job Submission
// =============================================================================

/// JSON body of a tile job submission, as received.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileJobRequest {
    /// `azure` (default), `azureSAS` or `s3`
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub image_key: String,

    #[serde(default)]
    pub container: String,

    /// Container receiving the pyramid and marker; defaults to `container`
    #[serde(default)]
    pub temp_container: Option<String>,

    /// S3 region
    #[serde(default)]
    pub container_zone: Option<String>,

    #[serde(default)]
    pub sas_token: Option<String>,

    #[serde(default)]
    pub account_name: Option<String>,
}

/// A validated tile job with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileJobSpec {
    pub provider: ProviderKind,
    pub image_key: String,
    pub container: String,
    pub temp_container: String,
    pub credentials: ProviderCredentials,
}

impl TileJobSpec {
    /// Apply defaults and validate a submission.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::MalformedRequestBody`] for an unknown provider,
    /// an empty image key or container, or an image key without a file name.
    pub fn normalize(request: TileJobRequest) -> Result<Self, ServiceError> {
        let provider = match request.provider.as_deref().map(str::trim) {
            None | Some("") => ProviderKind::default(),
            Some(other) => other
                .parse::<ProviderKind>()
                .map_err(|e| ServiceError::MalformedRequestBody(e.to_string()))?,
        };

        if request.image_key.trim().is_empty() {
            return Err(ServiceError::MalformedRequestBody(
                "imageKey is required".to_string(),
            ));
        }
        if request.container.trim().is_empty() {
            return Err(ServiceError::MalformedRequestBody(
                "container is required".to_string(),
            ));
        }
        TileKeys::derive(&request.image_key)?;

        let temp_container = request
            .temp_container
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| request.container.clone());

        let credentials = ProviderCredentials {
            region: request.container_zone.filter(|z| !z.is_empty()),
            account: request.account_name.filter(|a| !a.is_empty()),
            sas_token: request.sas_token.filter(|t| !t.is_empty()),
        };

        Ok(Self {
            provider,
            image_key: request.image_key,
            container: request.container,
            temp_container,
            credentials,
        })
    }

    /// Remote keys derived from the image key.
    pub fn keys(&self) -> Result<TileKeys, ServiceError> {
        TileKeys::derive(&self.image_key)
    }
}

// =============================================================================
// Key Derivation
// =============================================================================

/// Remote keys and local names derived from a source image key.
///
/// For `a/b/photo.tiff`:
///
/// | Field        | Value               |
/// |--------------|---------------------|
/// | `dir`        | `a/b/`              |
/// | `base_name`  | `photo`             |
/// | `extension`  | `.tiff`             |
/// | marker       | `a/b/photo.txt`     |
/// | index        | `a/b/photo.dzi`     |
/// | tile prefix  | `a/b/photo_files/`  |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileKeys {
    /// Directory prefix of the source key, including its trailing `/`
    pub dir: String,

    /// File name without extension
    pub base_name: String,

    /// Extension including the leading dot, or empty
    pub extension: String,
}

impl TileKeys {
    /// Split an image key into directory, base name and extension.
    pub fn derive(image_key: &str) -> Result<Self, ServiceError> {
        let (dir, file_name) = match image_key.rfind('/') {
            Some(pos) => image_key.split_at(pos + 1),
            None => ("", image_key),
        };

        let (base_name, extension) = match file_name.rfind('.') {
            Some(pos) => file_name.split_at(pos),
            None => (file_name, ""),
        };

        if base_name.is_empty() || file_name == "." || file_name == ".." {
            return Err(ServiceError::MalformedRequestBody(format!(
                "imageKey has no file name: {}",
                image_key
            )));
        }

        Ok(Self {
            dir: dir.to_string(),
            base_name: base_name.to_string(),
            extension: extension.to_string(),
        })
    }

    /// Key of the status marker.
    pub fn marker_key(&self) -> String {
        format!("{}{}.txt", self.dir, self.base_name)
    }

    /// Key of the uploaded `.dzi` index.
    pub fn index_key(&self) -> String {
        format!("{}{}{}", self.dir, self.base_name, INDEX_EXTENSION)
    }

    /// Key prefix of every uploaded tile.
    pub fn tiles_prefix(&self) -> String {
        format!("{}{}{}/", self.dir, self.base_name, TILES_SUFFIX)
    }

    /// Local file name of the downloaded source.
    pub fn local_file_name(&self) -> String {
        format!("{}{}", self.base_name, self.extension)
    }
}

// =============================================================================
// Job State
// =============================================================================

/// Identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a tile pyramid job.
///
/// `Created → Staged → Downloaded → Tiled → Uploading → Done`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Staged,
    Downloaded,
    Tiled,
    Uploading,
    Done,
    Failed,
}

impl JobState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Staged => "staged",
            JobState::Downloaded => "downloaded",
            JobState::Tiled => "tiled",
            JobState::Uploading => "uploading",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable status of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub image_key: String,
    pub container: String,
    pub status_key: String,

    /// Files uploaded so far (set when the fan-out finishes)
    pub files: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
