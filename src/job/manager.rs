//! `JobManager` — the durable, concurrency-safe facade over the two-tier
//! cache and the SQLite repository (§4.1 of the job-orchestration design).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::JobManagerError;
use crate::events::bus::{EventBus, EventKind};

use super::cache::JobCache;
use super::model::Job;
use super::store::JobStore;

/// Per-job mutex map, so concurrent `Update` calls for the same job
/// serialize while updates to different jobs proceed in parallel.
struct LockTable {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, job_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(job_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

pub struct JobManager {
    store: JobStore,
    cache: JobCache,
    locks: LockTable,
    events: EventBus,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl JobManager {
    pub fn new(store: JobStore, ttl: Duration, sweep_interval: Duration, events: EventBus) -> Self {
        let cache = JobCache::new(ttl);
        let sweeper = cache.spawn_sweeper(sweep_interval);
        Self {
            store,
            cache,
            locks: LockTable::new(),
            events,
            _sweeper: sweeper,
        }
    }

    pub async fn create(
        &self,
        task_description: String,
        user_id: String,
        auto_approve: bool,
    ) -> Result<Uuid, JobManagerError> {
        if !(10..=5000).contains(&task_description.chars().count()) {
            return Err(JobManagerError::InvalidInput(
                "task_description must be between 10 and 5000 characters".into(),
            ));
        }
        if user_id.chars().count() > 128 {
            return Err(JobManagerError::InvalidInput(
                "user_id must be at most 128 characters".into(),
            ));
        }

        let job = Job::new(task_description, user_id, auto_approve);
        let job_id = job.job_id;
        self.store
            .insert(&job)
            .map_err(JobManagerError::StorageUnavailable)?;
        self.cache.put(job).await;
        Ok(job_id)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job, JobManagerError> {
        if let Some(job) = self.cache.get(job_id).await {
            return Ok(job);
        }
        let job = self
            .store
            .get(job_id)
            .map_err(JobManagerError::StorageUnavailable)?
            .ok_or(JobManagerError::NotFound(job_id))?;
        self.cache.put(job.clone()).await;
        Ok(job)
    }

    /// Apply `mutator` to the current job under the per-job lock, persist
    /// write-through (memory then database), and return the updated job.
    pub async fn update<F>(&self, job_id: Uuid, mutator: F) -> Result<Job, JobManagerError>
    where
        F: FnOnce(&mut Job),
    {
        let lock = self.locks.lock_for(job_id).await;
        let _guard = lock.lock().await;

        let mut job = self.get(job_id).await?;
        let previous_status = job.status;
        mutator(&mut job);
        job.updated_at = chrono::Utc::now();

        self.cache.put(job.clone()).await;
        self.store
            .update(&job)
            .map_err(JobManagerError::StorageUnavailable)?;

        // `Running` is excluded: the engine's own `PhaseStarted` for the
        // phase about to execute already marks this transition, and a
        // second, phase-less event here would put two `PhaseStarted`s in
        // front of every job's stream.
        if job.status != previous_status && job.status != super::model::JobStatus::Running {
            self.events
                .emit(
                    job_id,
                    EventKind::for_status(job.status),
                    serde_json::json!({ "status": job.status.to_string() }),
                )
                .await;
        }
        Ok(job)
    }

    pub async fn delete(&self, job_id: Uuid) -> Result<(), JobManagerError> {
        self.cache.evict(job_id).await;
        self.store
            .delete(job_id)
            .map_err(JobManagerError::StorageUnavailable)?;
        Ok(())
    }

    /// Jobs that must be handed back to the workflow engine on startup.
    pub fn resumable(&self) -> Result<Vec<Job>, JobManagerError> {
        self.store.resumable().map_err(JobManagerError::StorageUnavailable)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }
}
