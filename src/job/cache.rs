//! In-memory TTL cache tier for jobs, with a background sweeper.
//!
//! Mirrors the `HashMap`-backed loader-cache shape already used elsewhere in
//! this codebase (load on miss, retain in the map), generalized with a
//! per-entry expiry and a sweeper task instead of an unbounded cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::Job;

struct Entry {
    job: Job,
    expires_at: Instant,
}

/// Thread-safe TTL cache. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct JobCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl JobCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, job_id: Uuid) -> Option<Job> {
        let entries = self.entries.read().await;
        entries.get(&job_id).map(|e| e.job.clone())
    }

    /// Insert or refresh an entry's TTL.
    pub async fn put(&self, job: Job) {
        let mut entries = self.entries.write().await;
        entries.insert(
            job.job_id,
            Entry {
                job,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn evict(&self, job_id: Uuid) {
        let mut entries = self.entries.write().await;
        entries.remove(&job_id);
    }

    /// Remove every entry whose TTL has elapsed. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spawn the background sweeper. Returns its join handle so callers can
    /// abort it on shutdown.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "swept expired job cache entries");
                }
            }
        })
    }
}
