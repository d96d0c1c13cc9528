//! Record types for `Job`, `PhaseRun`, and the HITL payload embedded on a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    PendingHitl,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::PendingHitl => "pending_hitl",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Understand,
    Generate,
    Validate,
    Promote,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Understand => "understand",
            Phase::Generate => "generate",
            Phase::Validate => "validate",
            Phase::Promote => "promote",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Succeeded,
    Suspended,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

/// The HITL payload attached to a job while it is suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlPending {
    pub round: u32,
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub payload: serde_json::Value,
    pub deadline: DateTime<Utc>,
}

/// The final artifact reference set once a job completes and promotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub canonical_path: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub user_id: String,
    pub task_description: String,
    pub status: JobStatus,
    pub current_phase: Option<Phase>,
    pub progress_percent: u8,
    pub hitl: Option<HitlPending>,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub draft_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub promoted: bool,
    pub auto_approve: bool,
    /// The Understand phase's plan output, kept on the job record so a
    /// manual `/drafts/{job_id}/promote` call can reconstruct the promote
    /// input without re-running earlier phases.
    pub plan: Option<serde_json::Value>,
    /// The Generate phase's output, for the same reason as `plan`.
    pub generate_output: Option<serde_json::Value>,
    /// Whether the Validate phase's most recent run produced a passing
    /// report, so a later manual `/drafts/{job_id}/promote` call can apply
    /// the same "Completed with a passing validation report" gate (§4.4)
    /// without re-running validation.
    pub validation_passed: Option<bool>,
}

impl Job {
    pub fn new(task_description: String, user_id: String, auto_approve: bool) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            user_id,
            task_description,
            status: JobStatus::Pending,
            current_phase: None,
            progress_percent: 0,
            hitl: None,
            result: None,
            error: None,
            draft_location: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            promoted: false,
            auto_approve,
            plan: None,
            generate_output: None,
            validation_passed: None,
        }
    }

    /// Jobs in these statuses must be handed back to the engine on startup.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Pending | JobStatus::Running | JobStatus::PendingHitl
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRun {
    pub job_id: Uuid,
    pub phase: Phase,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<PhaseOutcome>,
    pub input_digest: String,
    pub output_digest: Option<String>,
}

impl PhaseRun {
    pub fn start(job_id: Uuid, phase: Phase, attempt: u32, input_digest: String) -> Self {
        Self {
            job_id,
            phase,
            attempt,
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
            input_digest,
            output_digest: None,
        }
    }
}

/// Content digest used to check phase idempotence (§8.1 invariant 8).
pub fn digest(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending_and_not_promoted() {
        let job = Job::new("do a thing".into(), "u1".into(), false);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.promoted);
        assert!(job.is_resumable());
    }

    #[test]
    fn completed_job_is_terminal_and_not_resumable() {
        let mut job = Job::new("do a thing".into(), "u1".into(), false);
        job.status = JobStatus::Completed;
        assert!(job.status.is_terminal());
        assert!(!job.is_resumable());
    }

    #[test]
    fn digest_is_stable_for_identical_input() {
        assert_eq!(digest(b"hello"), digest(b"hello"));
        assert_ne!(digest(b"hello"), digest(b"world"));
    }
}
