//! The three-phase pipeline engine (§4.2): drives each job through
//! Understand → Generate → Validate → Promote, parking on HITL suspension
//! points, persisting one `PhaseRun` per attempt, and emitting `PhaseStarted`
//! / `PhaseEnded` / `SkillPublished` events (status-change events other than
//! the `Running` transition are emitted for free by `JobManager::update`'s
//! status-diff check; `Running` is skipped there since this module's own
//! `PhaseStarted` already covers it).
//!
//! Grounded on `dag/executor.rs`'s worker-pool idiom: a `Semaphore` caps the
//! number of concurrently running job tasks at `WORKER_CONCURRENCY`, and each
//! job owns exactly one `tokio::spawn`ed task for its `Running` lifetime,
//! tracked in a `HashMap`-backed active-task set so a second spawn for the
//! same job (e.g. a redundant HITL-delivery wakeup) is a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::errors::HitlError;
use crate::events::{EventBus, EventKind};
use crate::hitl::{HitlAction, HitlCoordinator, HitlType};
use crate::job::model::{JobError, JobResult, PhaseOutcome, digest};
use crate::job::{Job, JobManager, JobStatus, Phase};
use crate::llm::LlmClient;
use crate::taxonomy::SkillStore;

use super::generate::GenerateStep;
use super::phase_step::{CancelToken, PhaseContext, PhaseStep, StepOutcome};
use super::promote::PromoteStep;
use super::understand::UnderstandStep;
use super::validate::ValidateStep;

/// Default grace period (§5) before a cancellation request that a running
/// task hasn't yet observed is forced through regardless.
const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(30);

enum PhaseLoopResult {
    Succeeded(Value),
    Failed { kind: String, message: String },
    Cancelled,
}

pub struct WorkflowEngine {
    jobs: Arc<JobManager>,
    hitl: Arc<HitlCoordinator>,
    taxonomy: Arc<SkillStore>,
    events: EventBus,
    llm: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
    phase_timeout: Duration,
    cancel_grace: Duration,
    running: Arc<Mutex<HashSet<Uuid>>>,
    cancel_tokens: Arc<Mutex<HashMap<Uuid, CancelToken>>>,
}

impl WorkflowEngine {
    pub fn new(
        jobs: Arc<JobManager>,
        hitl: Arc<HitlCoordinator>,
        taxonomy: Arc<SkillStore>,
        events: EventBus,
        llm: Arc<dyn LlmClient>,
        worker_concurrency: usize,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            hitl,
            taxonomy,
            events,
            llm,
            semaphore: Arc::new(Semaphore::new(worker_concurrency.max(1))),
            phase_timeout,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            running: Arc::new(Mutex::new(HashSet::new())),
            cancel_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawns the job's pipeline task if one isn't already running for it.
    /// Safe to call repeatedly: `Create` calls it once; startup recovery
    /// calls it for every resumable job; the HITL delivery handler calls it
    /// again in case the process restarted between suspension and delivery.
    pub async fn submit(self: &Arc<Self>, job_id: Uuid) {
        {
            let mut running = self.running.lock().await;
            if running.contains(&job_id) {
                return;
            }
            running.insert(job_id);
        }
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_job(job_id).await;
        });
    }

    /// Hands every non-suspended job the Job Manager considers resumable
    /// back to the engine on startup (§4.1 Recovery). A `PendingHitl` job is
    /// deliberately excluded: it stays parked until an actual response
    /// arrives, at which point `post_hitl_response` resubmits it itself.
    /// Each resumed job re-enters its pipeline at `current_phase` rather
    /// than restarting from Understand; already-completed phases are read
    /// back from the job record instead of re-run.
    pub async fn resume_all(self: &Arc<Self>) -> anyhow::Result<()> {
        for job in self.jobs.resumable()? {
            if job.status == JobStatus::PendingHitl {
                continue;
            }
            self.submit(job.job_id).await;
        }
        Ok(())
    }

    /// Spawns a periodic sweep that expires HITL interactions whose deadline
    /// has elapsed, failing their waiting phase with `HitlError::TimedOut`
    /// (§4.3, §5). Mirrors the job cache's own TTL sweeper.
    pub fn spawn_hitl_timeout_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Ok(pending) = engine.jobs.resumable() else { continue };
                for job in pending {
                    if job.status == JobStatus::PendingHitl {
                        engine.hitl.expire_if_overdue(job.job_id).await;
                    }
                }
            }
        })
    }

    /// Cancel is accepted at any non-terminal state (§4.2). If a task is
    /// already running for this job, flips its cancellation token and lets
    /// cooperative cancellation unwind it, falling back to a forced
    /// transition after `cancel_grace` if it hasn't unwound by then. If no
    /// task is running (the job never started or already returned), the
    /// transition happens immediately.
    pub async fn cancel(self: &Arc<Self>, job_id: Uuid) -> Result<Job, crate::errors::JobManagerError> {
        let job = self.jobs.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        if let Some(token) = self.cancel_tokens.lock().await.get(&job_id) {
            token.cancel();
        }
        self.hitl.cancel(job_id).await;

        let is_running = self.running.lock().await.contains(&job_id);
        if !is_running {
            return self
                .jobs
                .update(job_id, |j| {
                    j.status = JobStatus::Cancelled;
                    j.completed_at = Some(Utc::now());
                })
                .await;
        }

        let engine = self.clone();
        let grace = self.cancel_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Ok(job) = engine.jobs.get(job_id).await
                && !job.status.is_terminal()
            {
                let _ = engine
                    .jobs
                    .update(job_id, |j| {
                        j.status = JobStatus::Cancelled;
                        j.completed_at = Some(Utc::now());
                    })
                    .await;
            }
        });

        self.jobs.get(job_id).await
    }

    async fn run_job(self: Arc<Self>, job_id: Uuid) {
        let permit = self.semaphore.clone().acquire_owned().await;
        let Ok(_permit) = permit else { return };

        let cancel = CancelToken::new();
        self.cancel_tokens.lock().await.insert(job_id, cancel.clone());

        self.run_pipeline(job_id, cancel).await;

        self.cancel_tokens.lock().await.remove(&job_id);
        self.running.lock().await.remove(&job_id);
    }

    async fn run_pipeline(&self, job_id: Uuid, cancel: CancelToken) {
        let Ok(job) = self.jobs.get(job_id).await else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }

        let ctx = PhaseContext {
            job_id,
            cancel: cancel.clone(),
            llm: self.llm.clone(),
            taxonomy: self.taxonomy.clone(),
        };

        // A job resumed mid-pipeline (startup recovery, or a HITL delivery
        // that raced a restart) re-enters at the phase it last reached
        // instead of restarting from Understand, reusing whatever earlier
        // phases already wrote to the job record (§4.3 reconstitution).
        let resume_phase = job.current_phase.unwrap_or(Phase::Understand);

        let _ = self
            .jobs
            .update(job_id, |j| {
                j.status = JobStatus::Running;
                j.current_phase = Some(resume_phase);
            })
            .await;

        let plan = if resume_phase <= Phase::Understand {
            let mut understand_input = serde_json::json!({
                "task_description": job.task_description,
                "auto_approve": job.auto_approve,
            });
            if let HitlReattachment::Cancelled = self.reattach_hitl_response(&job, &mut understand_input) {
                return self.finish_cancelled(job_id).await;
            }
            let plan = match self.execute_phase(&ctx, &UnderstandStep, understand_input, true).await {
                PhaseLoopResult::Succeeded(output) => output,
                PhaseLoopResult::Cancelled => return self.finish_cancelled(job_id).await,
                PhaseLoopResult::Failed { kind, message } => {
                    return self.finish_failed(job_id, kind, message).await;
                }
            };
            let _ = self
                .jobs
                .update(job_id, |j| {
                    j.current_phase = Some(Phase::Generate);
                    j.progress_percent = 25;
                    j.plan = Some(plan.clone());
                })
                .await;
            plan
        } else {
            job.plan.clone().unwrap_or_default()
        };

        let generate = if resume_phase <= Phase::Generate {
            let mut generate_input = serde_json::json!({ "plan": plan, "auto_approve": job.auto_approve });
            if resume_phase == Phase::Generate
                && let HitlReattachment::Cancelled = self.reattach_hitl_response(&job, &mut generate_input)
            {
                return self.finish_cancelled(job_id).await;
            }
            let generate = match self.execute_phase(&ctx, &GenerateStep, generate_input, true).await {
                PhaseLoopResult::Succeeded(output) => output,
                PhaseLoopResult::Cancelled => return self.finish_cancelled(job_id).await,
                PhaseLoopResult::Failed { kind, message } => {
                    return self.finish_failed(job_id, kind, message).await;
                }
            };
            let draft_location = generate.get("draft_location").and_then(Value::as_str).map(str::to_string);
            let _ = self
                .jobs
                .update(job_id, |j| {
                    j.current_phase = Some(Phase::Validate);
                    j.progress_percent = 50;
                    j.draft_location = draft_location.clone();
                    j.generate_output = Some(generate.clone());
                })
                .await;
            generate
        } else {
            job.generate_output.clone().unwrap_or_default()
        };

        let _validation_passed = if resume_phase <= Phase::Validate {
            let mut validate_input = serde_json::json!({
                "plan": plan, "generate": generate, "auto_approve": job.auto_approve,
            });
            if resume_phase == Phase::Validate
                && let HitlReattachment::Cancelled = self.reattach_hitl_response(&job, &mut validate_input)
            {
                return self.finish_cancelled(job_id).await;
            }
            let validation = match self.execute_phase(&ctx, &ValidateStep, validate_input, true).await {
                PhaseLoopResult::Succeeded(output) => output,
                PhaseLoopResult::Cancelled => return self.finish_cancelled(job_id).await,
                PhaseLoopResult::Failed { kind, message } => {
                    return self.finish_failed(job_id, kind, message).await;
                }
            };
            let validation_passed = validation
                .get("validation_report")
                .and_then(|r| r.get("passed"))
                .and_then(Value::as_bool);
            let _ = self
                .jobs
                .update(job_id, |j| {
                    j.current_phase = Some(Phase::Promote);
                    j.progress_percent = 75;
                    j.validation_passed = validation_passed;
                })
                .await;
            validation_passed
        } else {
            job.validation_passed
        };

        // A crash between a successful taxonomy write and this job's own
        // `promoted = true` update would otherwise re-run Promote against an
        // occupied path on restart; guard the common case directly.
        let current = self.jobs.get(job_id).await.ok();
        if let Some(current) = &current
            && current.promoted
        {
            return self.finish_completed(job_id, current.result.clone()).await;
        }

        // Promote is non-interactive and never suspends; its own
        // PhaseStarted/PhaseEnded pair is not part of the documented event
        // sequence, so it runs with event emission turned off.
        let promote_input = serde_json::json!({ "plan": plan, "generate": generate, "overwrite": false });
        let promotion = match self.execute_phase(&ctx, &PromoteStep, promote_input, false).await {
            PhaseLoopResult::Succeeded(output) => output,
            PhaseLoopResult::Cancelled => return self.finish_cancelled(job_id).await,
            PhaseLoopResult::Failed { kind, message } => {
                return self.finish_failed(job_id, kind, message).await;
            }
        };

        let canonical_path = promotion
            .get("canonical_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let result = JobResult {
            canonical_path: canonical_path.clone(),
            version: "1.0.0".to_string(),
        };

        self.events
            .emit(
                job_id,
                EventKind::SkillPublished,
                serde_json::json!({ "canonical_path": canonical_path }),
            )
            .await;

        self.finish_completed(job_id, Some(result)).await;
    }

    async fn finish_completed(&self, job_id: Uuid, result: Option<JobResult>) {
        let _ = self
            .jobs
            .update(job_id, |j| {
                j.status = JobStatus::Completed;
                j.progress_percent = 100;
                j.promoted = true;
                j.result = result.clone();
                j.completed_at = Some(Utc::now());
            })
            .await;
    }

    async fn finish_failed(&self, job_id: Uuid, kind: String, message: String) {
        let _ = self
            .jobs
            .update(job_id, |j| {
                j.status = JobStatus::Failed;
                j.error = Some(JobError {
                    kind: kind.clone(),
                    message: message.clone(),
                });
                j.completed_at = Some(Utc::now());
            })
            .await;
    }

    async fn finish_cancelled(&self, job_id: Uuid) {
        let _ = self
            .jobs
            .update(job_id, |j| {
                j.status = JobStatus::Cancelled;
                j.completed_at = Some(Utc::now());
            })
            .await;
    }

    /// Drives one phase step to a terminal result, looping through any
    /// number of HITL suspensions. `Proceed` continues the same attempt
    /// in-place; `Refine`/`Revise` seal the current attempt with outcome
    /// `Suspended` and start a fresh attempt with the feedback merged in,
    /// matching §4.2's "re-runs the current phase from the top". `emit_events`
    /// gates the `PhaseStarted`/`PhaseEnded` pair; Promote runs with it off
    /// since those events aren't part of the documented stream.
    async fn execute_phase(
        &self,
        ctx: &PhaseContext,
        step: &dyn PhaseStep,
        initial_input: Value,
        emit_events: bool,
    ) -> PhaseLoopResult {
        let phase = step.phase();
        let mut input = initial_input;
        let mut attempt: u32 = 1;

        let _ = self
            .jobs
            .store()
            .insert_phase_run(&crate::job::model::PhaseRun::start(
                ctx.job_id,
                phase,
                attempt,
                input_digest(&input),
            ));
        if emit_events {
            self.events
                .emit(ctx.job_id, EventKind::PhaseStarted, serde_json::json!({ "phase": phase.to_string() }))
                .await;
        }

        loop {
            if ctx.cancel.is_cancelled() {
                self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Cancelled, None).await;
                return PhaseLoopResult::Cancelled;
            }

            let outcome = match tokio::time::timeout(self.phase_timeout, step.run(ctx, input.clone())).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Failed, None).await;
                    return PhaseLoopResult::Failed {
                        kind: "LlmTimeout".to_string(),
                        message: format!("phase {phase} timed out waiting on the LLM boundary"),
                    };
                }
            };

            match outcome {
                StepOutcome::Succeed(output) => {
                    let out_digest = output_digest(&output);
                    self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Succeeded, Some(&out_digest)).await;
                    if emit_events {
                        self.events
                            .emit(
                                ctx.job_id,
                                EventKind::PhaseEnded,
                                serde_json::json!({ "phase": phase.to_string(), "outcome": "succeeded" }),
                            )
                            .await;
                    }
                    return PhaseLoopResult::Succeeded(output);
                }
                StepOutcome::Fail { kind, message } => {
                    self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Failed, None).await;
                    if emit_events {
                        self.events
                            .emit(
                                ctx.job_id,
                                EventKind::PhaseEnded,
                                serde_json::json!({ "phase": phase.to_string(), "outcome": "failed" }),
                            )
                            .await;
                    }
                    return PhaseLoopResult::Failed { kind, message };
                }
                StepOutcome::Suspend { hitl_type, prompt } => {
                    let interaction = match self.hitl.register(ctx.job_id, hitl_type, prompt.clone()).await {
                        Ok(i) => i,
                        Err(e) => {
                            self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Failed, None).await;
                            return PhaseLoopResult::Failed {
                                kind: "hitl_error".to_string(),
                                message: e.to_string(),
                            };
                        }
                    };

                    let _ = self
                        .jobs
                        .update(ctx.job_id, |j| {
                            j.status = JobStatus::PendingHitl;
                            j.hitl = Some(crate::job::model::HitlPending {
                                round: interaction.round,
                                interaction_type: hitl_type.to_string(),
                                payload: prompt.clone(),
                                deadline: interaction.timeout_at,
                            });
                        })
                        .await;

                    let response = self.hitl.wait(interaction).await;

                    let _ = self
                        .jobs
                        .update(ctx.job_id, |j| {
                            if j.status == JobStatus::PendingHitl {
                                j.status = JobStatus::Running;
                            }
                            j.hitl = None;
                        })
                        .await;

                    match response {
                        Err(HitlError::Cancelled(_)) => {
                            self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Cancelled, None).await;
                            return PhaseLoopResult::Cancelled;
                        }
                        Err(HitlError::TimedOut { .. }) => {
                            self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Failed, None).await;
                            return PhaseLoopResult::Failed {
                                kind: "HitlTimeout".to_string(),
                                message: "the human-in-the-loop interaction timed out".to_string(),
                            };
                        }
                        Err(e) => {
                            self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Failed, None).await;
                            return PhaseLoopResult::Failed { kind: "hitl_error".to_string(), message: e.to_string() };
                        }
                        Ok(response) => {
                            if response.action == HitlAction::Cancel {
                                self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Cancelled, None).await;
                                return PhaseLoopResult::Cancelled;
                            }

                            merge_hitl_response(&mut input, hitl_type, &response);

                            if matches!(response.action, HitlAction::Refine | HitlAction::Revise) {
                                self.seal(ctx.job_id, phase, attempt, PhaseOutcome::Suspended, None).await;
                                attempt += 1;
                                let _ = self.jobs.store().insert_phase_run(&crate::job::model::PhaseRun::start(
                                    ctx.job_id,
                                    phase,
                                    attempt,
                                    input_digest(&input),
                                ));
                            }
                            // Proceed: fall through and re-run the same attempt
                            // with the newly merged-in answer.
                        }
                    }
                }
            }
        }
    }

    async fn seal(&self, job_id: Uuid, phase: Phase, attempt: u32, outcome: PhaseOutcome, output_digest: Option<&str>) {
        let _ = self.jobs.store().seal_phase_run(job_id, phase, attempt, outcome, output_digest);
    }

    /// If `job` was last suspended waiting on a HITL response and that
    /// response has since landed, folds it into `input` so the resumed
    /// phase completes on its first call instead of suspending on the same
    /// prompt again. Without this, `register` would treat the answered
    /// interaction as stale and hand out a fresh, never-to-be-answered
    /// round. A no-op when the job wasn't suspended, or its interaction is
    /// still genuinely pending.
    fn reattach_hitl_response(&self, job: &Job, input: &mut Value) -> HitlReattachment {
        let Some(pending) = &job.hitl else {
            return HitlReattachment::None;
        };
        let Some(interaction) = self.hitl.latest(job.job_id) else {
            return HitlReattachment::None;
        };
        if interaction.round != pending.round {
            return HitlReattachment::None;
        }
        match interaction.status {
            crate::hitl::InteractionStatus::Answered => {
                let response = crate::hitl::HitlResponse {
                    action: interaction.response.unwrap_or(HitlAction::Proceed),
                    response: interaction.response_payload,
                };
                if response.action == HitlAction::Cancel {
                    return HitlReattachment::Cancelled;
                }
                merge_hitl_response(input, interaction.interaction_type, &response);
                HitlReattachment::Merged
            }
            crate::hitl::InteractionStatus::Cancelled => HitlReattachment::Cancelled,
            _ => HitlReattachment::None,
        }
    }
}

/// Outcome of checking whether a resumed job's HITL interaction already has
/// an answer on file.
enum HitlReattachment {
    None,
    Merged,
    Cancelled,
}

fn input_digest(input: &Value) -> String {
    digest(serde_json::to_vec(input).unwrap_or_default().as_slice())
}

fn output_digest(output: &Value) -> String {
    digest(serde_json::to_vec(output).unwrap_or_default().as_slice())
}

/// Folds a delivered HITL response back into the phase's next input. Each
/// interaction type writes to the input slot the matching phase step reads
/// (§4.2's suspension points table).
fn merge_hitl_response(input: &mut Value, hitl_type: HitlType, response: &crate::hitl::HitlResponse) {
    let payload = response.response.clone().unwrap_or(Value::Null);
    let obj = input.as_object_mut().expect("phase input is always a JSON object");
    match hitl_type {
        HitlType::Clarify => {
            obj.insert("clarify_answers".to_string(), payload);
        }
        HitlType::StructureFix => {
            obj.insert("structure_override".to_string(), payload);
        }
        HitlType::Confirm => {
            obj.insert("confirmed".to_string(), Value::Bool(true));
            if !payload.is_null() {
                obj.insert("revision_feedback".to_string(), payload);
            }
        }
        HitlType::Preview => {
            obj.insert("previewed".to_string(), Value::Bool(true));
            let feedback = payload.get("feedback").cloned().unwrap_or(payload.clone());
            if !feedback.is_null() {
                obj.insert("feedback".to_string(), feedback);
            }
        }
        HitlType::Validate => {
            obj.insert("acknowledged".to_string(), Value::Bool(true));
            if !payload.is_null() {
                obj.insert("feedback".to_string(), payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::hitl::HitlStore;
    use crate::job::JobManager;
    use crate::job::store::JobStore;
    use crate::llm::EchoLlmClient;

    async fn engine() -> (Arc<WorkflowEngine>, Arc<JobManager>, Arc<HitlCoordinator>) {
        let jobs = Arc::new(JobManager::new(
            JobStore::open(":memory:").unwrap(),
            Duration::from_secs(60),
            Duration::from_secs(300),
            EventBus::new(),
        ));
        let hitl = Arc::new(HitlCoordinator::new(HitlStore::open(":memory:").unwrap(), Duration::from_secs(3600)));
        let dir = tempfile::tempdir().unwrap();
        let taxonomy = Arc::new(SkillStore::open(":memory:", dir.path().to_path_buf()).unwrap());
        taxonomy.run_migrations().await.unwrap();
        std::mem::forget(dir);
        let events = EventBus::new();
        let engine = Arc::new(WorkflowEngine::new(
            jobs.clone(),
            hitl.clone(),
            taxonomy,
            events,
            Arc::new(EchoLlmClient),
            4,
            Duration::from_secs(5),
        ));
        (engine, jobs, hitl)
    }

    #[tokio::test]
    async fn auto_approve_job_runs_to_completion() {
        let (engine, jobs, _hitl) = engine().await;
        let job_id = jobs
            .create(
                "Document the dependency resolver's retry policy in depth".into(),
                "u1".into(),
                true,
            )
            .await
            .unwrap();

        engine.submit(job_id).await;

        for _ in 0..200 {
            let job = jobs.get(job_id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, JobStatus::Completed);
                assert!(job.promoted);
                assert!(job.result.is_some());
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn non_auto_approve_job_suspends_for_confirm() {
        let (engine, jobs, hitl) = engine().await;
        let job_id = jobs
            .create(
                "Document the dependency resolver's retry policy in depth".into(),
                "u1".into(),
                false,
            )
            .await
            .unwrap();

        engine.submit(job_id).await;

        for _ in 0..200 {
            let job = jobs.get(job_id).await.unwrap();
            if job.status == JobStatus::PendingHitl {
                assert_eq!(job.hitl.as_ref().unwrap().interaction_type, "confirm");
                assert!(hitl.get_prompt(job_id).is_some());
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not reach PendingHitl in time");
    }

    #[tokio::test]
    async fn cancel_before_spawn_transitions_immediately() {
        let (engine, jobs, _hitl) = engine().await;
        let job_id = jobs
            .create("Document a thing that needs documenting today".into(), "u1".into(), true)
            .await
            .unwrap();
        let job = engine.cancel(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_on_already_completed_job_is_a_no_op() {
        let (engine, jobs, _hitl) = engine().await;
        let job_id = jobs
            .create("Document a thing that needs documenting today".into(), "u1".into(), true)
            .await
            .unwrap();
        jobs.update(job_id, |j| j.status = JobStatus::Completed).await.unwrap();
        let job = engine.cancel(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}
