//! Job queue, worker pool and status store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use super::job::{JobContext, TilePyramidJob};
use super::{JobId, JobState, JobStatus, TileJobSpec};
use crate::error::ServiceError;
use crate::storage::ProviderFactory;

/// Default number of job statuses kept in memory.
pub const DEFAULT_STATUS_CAPACITY: usize = 10_000;

// =============================================================================
// Status Store
// =============================================================================

/// In-memory status of submitted jobs.
///
/// When full, the oldest finished job is evicted to make room. Running jobs
/// are never evicted.
pub struct JobStatusStore {
    inner: RwLock<StatusEntries>,
    capacity: usize,
}

#[derive(Default)]
struct StatusEntries {
    jobs: HashMap<JobId, JobStatus>,
    order: VecDeque<JobId>,
}

impl JobStatusStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StatusEntries::default()),
            capacity: capacity.max(1),
        }
    }

    pub async fn insert(&self, status: JobStatus) {
        let mut inner = self.inner.write().await;

        while inner.jobs.len() >= self.capacity {
            let evict = inner
                .order
                .iter()
                .position(|id| inner.jobs.get(id).is_some_and(|s| s.state.is_terminal()));
            let Some(id) = evict.and_then(|pos| inner.order.remove(pos)) else {
                break;
            };
            inner.jobs.remove(&id);
        }

        inner.order.push_back(status.job_id);
        inner.jobs.insert(status.job_id, status);
    }

    pub async fn get(&self, id: JobId) -> Option<JobStatus> {
        self.inner.read().await.jobs.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn set_state(&self, id: JobId, state: JobState) {
        self.update(id, |status| status.state = state).await;
    }

    pub async fn finish(&self, id: JobId, files: usize) {
        self.update(id, |status| {
            status.state = JobState::Done;
            status.files = files;
        })
        .await;
    }

    pub async fn fail(&self, id: JobId, message: String) {
        self.update(id, |status| {
            status.state = JobState::Failed;
            status.error = Some(message);
        })
        .await;
    }

    async fn update(&self, id: JobId, apply: impl FnOnce(&mut JobStatus)) {
        if let Some(status) = self.inner.write().await.jobs.get_mut(&id) {
            apply(status);
        }
    }
}

impl Default for JobStatusStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_CAPACITY)
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Acknowledgement returned for an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: JobId,

    /// Container holding the marker and the pyramid
    pub container: String,

    /// Key of the status marker
    pub status_key: String,
}

/// Bounded queue of tile jobs drained by a fixed pool of workers.
///
/// Jobs outlive the request that submitted them. Cloning the queue shares
/// the same channel and status store.
#[derive(Clone)]
pub struct TileJobQueue {
    sender: mpsc::Sender<TilePyramidJob>,
    factory: Arc<dyn ProviderFactory>,
    status: Arc<JobStatusStore>,
}

impl TileJobQueue {
    /// Spawn `workers` worker tasks and return the queue feeding them.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        factory: Arc<dyn ProviderFactory>,
        context: JobContext,
        workers: usize,
        capacity: usize,
    ) -> Self {
        Self::start_with_status(
            factory,
            context,
            workers,
            capacity,
            Arc::new(JobStatusStore::default()),
        )
    }

    pub fn start_with_status(
        factory: Arc<dyn ProviderFactory>,
        context: JobContext,
        workers: usize,
        capacity: usize,
        status: Arc<JobStatusStore>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let context = Arc::new(context);

        for index in 0..workers.max(1) {
            tokio::spawn(worker(
                index,
                Arc::clone(&receiver),
                Arc::clone(&context),
                Arc::clone(&status),
            ));
        }

        info!(workers, capacity, "Tile job workers started");

        Self {
            sender,
            factory,
            status,
        }
    }

    /// Stage a job and enqueue it.
    ///
    /// The `pending` marker is written before this returns.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::MalformedRequestBody`] when no keys can be derived
    /// - [`ServiceError::Storage`] when the provider cannot be built or the
    ///   marker cannot be written
    /// - [`ServiceError::QueueFull`] when the queue has no free slot; the
    ///   marker is then overwritten with the error
    pub async fn submit(&self, spec: TileJobSpec) -> Result<JobTicket, ServiceError> {
        let keys = spec.keys()?;
        let id = JobId::new();
        let ticket = JobTicket {
            job_id: id,
            container: spec.temp_container.clone(),
            status_key: keys.marker_key(),
        };

        self.status
            .insert(JobStatus {
                job_id: id,
                state: JobState::Created,
                image_key: spec.image_key.clone(),
                container: spec.temp_container.clone(),
                status_key: ticket.status_key.clone(),
                files: 0,
                error: None,
            })
            .await;

        let job = match TilePyramidJob::stage(id, spec, keys, self.factory.as_ref()).await {
            Ok(job) => job,
            Err(e) => {
                self.status.fail(id, e.to_string()).await;
                return Err(ServiceError::Storage(e));
            }
        };
        self.status.set_state(id, JobState::Staged).await;

        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(job_id = %id, "Tile job queued");
                Ok(ticket)
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                job.fail(&self.status, &ServiceError::QueueFull.to_string())
                    .await;
                Err(ServiceError::QueueFull)
            }
        }
    }

    /// Status of a submitted job.
    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        self.status.get(id).await
    }

    pub fn status_store(&self) -> &Arc<JobStatusStore> {
        &self.status
    }
}

async fn worker(
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<TilePyramidJob>>>,
    context: Arc<JobContext>,
    status: Arc<JobStatusStore>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker = index, "Tile job queue closed");
            break;
        };

        let state = job.execute(&context, &status).await;
        debug!(worker = index, state = %state, "Worker finished job");
    }
}
