//! Upload fan-out for a generated pyramid.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use super::{TileKeys, INDEX_EXTENSION, TILES_SUFFIX};
use crate::error::JobError;
use crate::storage::StorageProvider;

/// One local file and the key it is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub path: PathBuf,
    pub key: String,
}

/// List the index file and every tile under the staging directory.
///
/// Tile keys mirror the file's path relative to `staging`, prefixed with
/// the source key's directory. Directories themselves are skipped.
pub fn collect_uploads(staging: &Path, keys: &TileKeys) -> Result<Vec<UploadItem>, JobError> {
    let mut items = vec![UploadItem {
        path: staging.join(format!("{}{}", keys.base_name, INDEX_EXTENSION)),
        key: keys.index_key(),
    }];

    let tiles_root = staging.join(format!("{}{}", keys.base_name, TILES_SUFFIX));
    for entry in WalkDir::new(&tiles_root).sort_by_file_name() {
        let entry =
            entry.map_err(|e| JobError::Staging(format!("error walking dir path: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| JobError::Staging(e.to_string()))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        items.push(UploadItem {
            path: entry.into_path(),
            key: format!("{}{}", keys.dir, relative),
        });
    }

    Ok(items)
}

/// Upload every item to `container`, at most `concurrency` at a time.
///
/// One task is spawned per file. A failing upload does not cancel its
/// siblings: every task runs to completion and the first error observed is
/// returned. Files uploaded before a failure stay in place.
///
/// Returns the number of uploaded files.
pub async fn upload_all(
    provider: Arc<dyn StorageProvider>,
    container: &str,
    items: Vec<UploadItem>,
    concurrency: usize,
) -> Result<usize, JobError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for item in items {
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let container = container.to_string();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| JobError::Join(e.to_string()))?;

            let data = tokio::fs::read(&item.path).await.map_err(|e| {
                JobError::Staging(format!("error reading file: {}: {}", item.path.display(), e))
            })?;
            provider
                .store(Bytes::from(data), &item.key, &container)
                .await?;
            Ok::<_, JobError>(())
        });
    }

    let mut uploaded = 0;
    let mut first_error = None;

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => uploaded += 1,
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(JobError::Join(e.to_string()));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(uploaded),
    }
}
