//! Durable repository for `Job` and `PhaseRun` rows, backed by SQLite.
//!
//! Mirrors the migration-and-row-mapping shape the rest of this codebase's
//! persistence layer already uses: `execute_batch` for schema setup,
//! `params!` for parameter binding, `query_map` for row iteration.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::model::{Job, JobStatus, Phase, PhaseOutcome, PhaseRun};

/// Thin `Arc<Mutex<_>>`-friendly wrapper; a single `rusqlite::Connection` is
/// not `Sync`, so all access is funneled through one mutex, matching the
/// single-writer assumption the rest of this store's callers already hold
/// (writes happen under the job manager's per-job lock).
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn open(database_url: &str) -> Result<Self> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory().context("failed to open in-memory database")?
        } else {
            if let Some(parent) = Path::new(database_url).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).context("failed to create database directory")?;
            }
            Connection::open(database_url).context("failed to open database")?
        };
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                task_description TEXT NOT NULL,
                status TEXT NOT NULL,
                current_phase TEXT,
                progress_percent INTEGER NOT NULL DEFAULT 0,
                hitl TEXT,
                result TEXT,
                error TEXT,
                draft_location TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                promoted INTEGER NOT NULL DEFAULT 0,
                auto_approve INTEGER NOT NULL DEFAULT 0,
                plan TEXT,
                generate_output TEXT,
                validation_passed INTEGER
            );

            CREATE TABLE IF NOT EXISTS phase_runs (
                job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
                phase TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                outcome TEXT,
                input_digest TEXT NOT NULL,
                output_digest TEXT,
                PRIMARY KEY (job_id, phase, attempt)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            ",
        )
        .context("failed to run job store migrations")?;
        Ok(())
    }

    pub fn insert(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute(
            "INSERT INTO jobs (job_id, user_id, task_description, status, current_phase,
                progress_percent, hitl, result, error, draft_location, created_at, updated_at,
                completed_at, promoted, auto_approve, plan, generate_output, validation_passed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                job.job_id.to_string(),
                job.user_id,
                job.task_description,
                job.status.to_string(),
                job.current_phase.map(|p| p.to_string()),
                job.progress_percent,
                job.hitl.as_ref().map(serde_json::to_string).transpose()?,
                job.result.as_ref().map(serde_json::to_string).transpose()?,
                job.error.as_ref().map(serde_json::to_string).transpose()?,
                job.draft_location,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.promoted,
                job.auto_approve,
                job.plan.as_ref().map(serde_json::to_string).transpose()?,
                job.generate_output.as_ref().map(serde_json::to_string).transpose()?,
                job.validation_passed,
            ],
        )
        .context("failed to insert job")?;
        Ok(())
    }

    pub fn update(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute(
            "UPDATE jobs SET status=?2, current_phase=?3, progress_percent=?4, hitl=?5,
                result=?6, error=?7, draft_location=?8, updated_at=?9, completed_at=?10,
                promoted=?11, plan=?12, generate_output=?13, validation_passed=?14 WHERE job_id=?1",
            params![
                job.job_id.to_string(),
                job.status.to_string(),
                job.current_phase.map(|p| p.to_string()),
                job.progress_percent,
                job.hitl.as_ref().map(serde_json::to_string).transpose()?,
                job.result.as_ref().map(serde_json::to_string).transpose()?,
                job.error.as_ref().map(serde_json::to_string).transpose()?,
                job.draft_location,
                job.updated_at.to_rfc3339(),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.promoted,
                job.plan.as_ref().map(serde_json::to_string).transpose()?,
                job.generate_output.as_ref().map(serde_json::to_string).transpose()?,
                job.validation_passed,
            ],
        )
        .context("failed to update job")?;
        Ok(())
    }

    pub fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.query_row(
            "SELECT job_id, user_id, task_description, status, current_phase, progress_percent,
                hitl, result, error, draft_location, created_at, updated_at, completed_at,
                promoted, auto_approve, plan, generate_output, validation_passed FROM jobs WHERE job_id = ?1",
            params![job_id.to_string()],
            row_to_job,
        )
        .optional()
        .context("failed to query job")
    }

    pub fn delete(&self, job_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id.to_string()])
            .context("failed to delete job")?;
        Ok(())
    }

    /// Jobs that must be handed back to the workflow engine on startup.
    pub fn resumable(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT job_id, user_id, task_description, status, current_phase, progress_percent,
                hitl, result, error, draft_location, created_at, updated_at, completed_at,
                promoted, auto_approve, plan, generate_output, validation_passed FROM jobs
             WHERE status IN ('pending', 'running', 'pending_hitl')",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.context("failed to read job row")?);
        }
        Ok(jobs)
    }

    pub fn insert_phase_run(&self, run: &PhaseRun) -> Result<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute(
            "INSERT INTO phase_runs (job_id, phase, attempt, started_at, ended_at, outcome,
                input_digest, output_digest) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.job_id.to_string(),
                run.phase.to_string(),
                run.attempt,
                run.started_at.to_rfc3339(),
                run.ended_at.map(|t| t.to_rfc3339()),
                run.outcome.map(outcome_to_str),
                run.input_digest,
                run.output_digest,
            ],
        )
        .context("failed to insert phase run")?;
        Ok(())
    }

    pub fn seal_phase_run(
        &self,
        job_id: Uuid,
        phase: Phase,
        attempt: u32,
        outcome: PhaseOutcome,
        output_digest: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("job store lock poisoned");
        conn.execute(
            "UPDATE phase_runs SET ended_at=?4, outcome=?5, output_digest=?6
             WHERE job_id=?1 AND phase=?2 AND attempt=?3",
            params![
                job_id.to_string(),
                phase.to_string(),
                attempt,
                Utc::now().to_rfc3339(),
                outcome_to_str(outcome),
                output_digest,
            ],
        )
        .context("failed to seal phase run")?;
        Ok(())
    }
}

fn outcome_to_str(o: PhaseOutcome) -> &'static str {
    match o {
        PhaseOutcome::Succeeded => "succeeded",
        PhaseOutcome::Suspended => "suspended",
        PhaseOutcome::Failed => "failed",
        PhaseOutcome::Cancelled => "cancelled",
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let job_id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let current_phase: Option<String> = row.get(4)?;
    let hitl: Option<String> = row.get(6)?;
    let result: Option<String> = row.get(7)?;
    let error: Option<String> = row.get(8)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;
    let completed_at: Option<String> = row.get(12)?;
    let plan: Option<String> = row.get(15)?;
    let generate_output: Option<String> = row.get(16)?;
    let validation_passed: Option<bool> = row.get(17)?;

    Ok(Job {
        job_id: Uuid::parse_str(&job_id).unwrap_or_default(),
        user_id: row.get(1)?,
        task_description: row.get(2)?,
        status: parse_status(&status),
        current_phase: current_phase.as_deref().and_then(parse_phase),
        progress_percent: row.get(5)?,
        hitl: hitl.and_then(|s| serde_json::from_str(&s).ok()),
        result: result.and_then(|s| serde_json::from_str(&s).ok()),
        error: error.and_then(|s| serde_json::from_str(&s).ok()),
        draft_location: row.get(9)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        completed_at: completed_at.map(|s| parse_ts(&s)),
        promoted: row.get(13)?,
        auto_approve: row.get(14)?,
        plan: plan.and_then(|s| serde_json::from_str(&s).ok()),
        generate_output: generate_output.and_then(|s| serde_json::from_str(&s).ok()),
        validation_passed,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "pending_hitl" => JobStatus::PendingHitl,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Failed,
    }
}

fn parse_phase(s: &str) -> Option<Phase> {
    match s {
        "understand" => Some(Phase::Understand),
        "generate" => Some(Phase::Generate),
        "validate" => Some(Phase::Validate),
        "promote" => Some(Phase::Promote),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let store = JobStore::open(":memory:").unwrap();
        let job = Job::new("write some docs".into(), "u1".into(), false);
        store.insert(&job).unwrap();
        let fetched = store.get(job.job_id).unwrap().unwrap();
        assert_eq!(fetched.job_id, job.job_id);
        assert_eq!(fetched.task_description, "write some docs");
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[test]
    fn get_missing_job_returns_none() {
        let store = JobStore::open(":memory:").unwrap();
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn update_persists_status_change() {
        let store = JobStore::open(":memory:").unwrap();
        let mut job = Job::new("task".into(), "u1".into(), false);
        store.insert(&job).unwrap();
        job.status = JobStatus::Running;
        job.current_phase = Some(Phase::Understand);
        store.update(&job).unwrap();
        let fetched = store.get(job.job_id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Running);
        assert_eq!(fetched.current_phase, Some(Phase::Understand));
    }

    #[test]
    fn resumable_excludes_terminal_jobs() {
        let store = JobStore::open(":memory:").unwrap();
        let mut running = Job::new("a".into(), "u1".into(), false);
        running.status = JobStatus::Running;
        let mut done = Job::new("b".into(), "u1".into(), false);
        done.status = JobStatus::Completed;
        store.insert(&running).unwrap();
        store.insert(&done).unwrap();
        let resumable = store.resumable().unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].job_id, running.job_id);
    }

    #[test]
    fn phase_run_insert_and_seal() {
        let store = JobStore::open(":memory:").unwrap();
        let job = Job::new("task".into(), "u1".into(), false);
        store.insert(&job).unwrap();
        let run = PhaseRun::start(job.job_id, Phase::Understand, 1, "digest1".into());
        store.insert_phase_run(&run).unwrap();
        store
            .seal_phase_run(
                job.job_id,
                Phase::Understand,
                1,
                PhaseOutcome::Succeeded,
                Some("digest2"),
            )
            .unwrap();
    }
}
