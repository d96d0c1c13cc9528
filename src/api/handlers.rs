//! Request handlers for the skill-authoring HTTP API (§6.1).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::SharedContext;
use crate::errors::{ApiError, HitlError, TaxonomyError, WorkflowError};
use crate::hitl::{HitlAction, HitlResponse, HitlType};
use crate::job::{Job, JobResult, JobStatus};
use crate::taxonomy::{SafePath, Skill, SkillStatus};
use crate::workflow::promote::metadata_from_plan;

#[derive(Debug, Deserialize)]
pub struct CreateSkillRequest {
    pub task_description: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub auto_approve: bool,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub status: &'static str,
}

pub async fn create_skill(
    State(ctx): State<SharedContext>,
    Json(req): Json<CreateSkillRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let user_id = req.user_id.unwrap_or_else(|| "anonymous".to_string());
    let job_id = ctx.jobs.create(req.task_description, user_id, req.auto_approve).await?;
    ctx.engine.submit(job_id).await;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, status: "accepted" })))
}

pub async fn get_skill(
    State(ctx): State<SharedContext>,
    Path(identifier): Path<String>,
) -> Result<Json<Skill>, ApiError> {
    let canonical = ctx.taxonomy.resolve(&identifier).await?;
    let skill = ctx.taxonomy.get(&canonical).await?;
    Ok(Json(skill))
}

#[derive(Debug, Deserialize)]
pub struct RefineSkillRequest {
    pub feedback: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

/// Refining an active skill is just another authoring job, seeded with a
/// task description built from the feedback instead of a blank prompt.
pub async fn refine_skill(
    State(ctx): State<SharedContext>,
    Path(identifier): Path<String>,
    Json(req): Json<RefineSkillRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let identifier = identifier
        .strip_suffix("/refine")
        .ok_or_else(|| ApiError::Taxonomy(TaxonomyError::NotFound(identifier.clone())))?;
    let canonical = ctx.taxonomy.resolve(identifier).await?;
    let skill = ctx.taxonomy.get(&canonical).await?;
    if skill.status != SkillStatus::Active {
        return Err(ApiError::Taxonomy(TaxonomyError::NotRefinable(canonical)));
    }

    let mut task_description = format!(
        "Refine the existing skill '{}' at {canonical}. Feedback: {}",
        skill.metadata.name, req.feedback
    );
    if !req.focus_areas.is_empty() {
        task_description.push_str(&format!(" Focus areas: {}.", req.focus_areas.join(", ")));
    }

    let job_id = ctx.jobs.create(task_description, "anonymous".to_string(), false).await?;
    ctx.engine.submit(job_id).await;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, status: "accepted" })))
}

pub async fn get_job(
    State(ctx): State<SharedContext>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(ctx.jobs.get(job_id).await?))
}

#[derive(Debug, Serialize)]
pub struct HitlPromptResponse {
    pub has_prompt: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub interaction_type: Option<HitlType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

pub async fn get_hitl_prompt(
    State(ctx): State<SharedContext>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<HitlPromptResponse>, ApiError> {
    ctx.jobs.get(job_id).await?;
    Ok(Json(match ctx.hitl.get_prompt(job_id) {
        Some(prompt) => HitlPromptResponse {
            has_prompt: true,
            interaction_type: Some(prompt.interaction_type),
            payload: Some(prompt.payload),
        },
        None => HitlPromptResponse { has_prompt: false, interaction_type: None, payload: None },
    }))
}

#[derive(Debug, Serialize)]
pub struct HitlResponseAck {
    pub accepted: bool,
}

pub async fn post_hitl_response(
    State(ctx): State<SharedContext>,
    Path(job_id): Path<Uuid>,
    Json(response): Json<HitlResponse>,
) -> Result<Json<HitlResponseAck>, ApiError> {
    let prompt = ctx.hitl.get_prompt(job_id).ok_or(HitlError::NoPendingPrompt(job_id))?;
    validate_response_shape(prompt.interaction_type, &response)?;
    ctx.hitl.deliver(job_id, response).await?;
    // Re-submitting is a no-op if the engine task is still in-process awaiting
    // this delivery; it matters if the process restarted between suspend and
    // deliver, since the waiter would otherwise never be reattached.
    ctx.engine.submit(job_id).await;
    Ok(Json(HitlResponseAck { accepted: true }))
}

/// Rejects responses whose payload shape can't possibly satisfy the phase
/// that is waiting on them, before it ever reaches the oneshot rendezvous.
/// Only `Proceed` responses carry a payload the understand phase reads back
/// (clarify answers / a structure override); `Revise`/`Refine`/`Cancel` never
/// need one.
fn validate_response_shape(interaction_type: HitlType, response: &HitlResponse) -> Result<(), HitlError> {
    if response.action != HitlAction::Proceed {
        return Ok(());
    }
    match interaction_type {
        HitlType::Clarify => match &response.response {
            Some(v) if v.is_object() => Ok(()),
            _ => Err(HitlError::ShapeMismatch),
        },
        HitlType::StructureFix => {
            match response.response.as_ref().and_then(|v| v.get("name")).and_then(Value::as_str) {
                Some(_) => Ok(()),
                None => Err(HitlError::ShapeMismatch),
            }
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
pub struct PromoteDraftRequest {
    #[serde(default)]
    pub overwrite: bool,
    /// Administrative override (§4.4): bypasses the "job Completed with a
    /// passing validation report" gate below.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct PromoteDraftResponse {
    pub canonical_path: String,
}

/// Promotes a job's already-generated draft directly, bypassing the
/// `PromoteStep`/LLM machinery since the job's suspended HITL phases already
/// produced everything this needs.
pub async fn promote_draft(
    State(ctx): State<SharedContext>,
    Path(job_id): Path<Uuid>,
    Json(req): Json<PromoteDraftRequest>,
) -> Result<Json<PromoteDraftResponse>, ApiError> {
    let job = ctx.jobs.get(job_id).await?;
    let (Some(plan), Some(generate)) = (job.plan.as_ref(), job.generate_output.as_ref()) else {
        return Err(ApiError::Workflow(WorkflowError::NotRunnable {
            job_id,
            status: job.status.to_string(),
        }));
    };
    let passing = job.status == JobStatus::Completed || job.validation_passed == Some(true);
    if !passing && !req.force {
        return Err(ApiError::Workflow(WorkflowError::NotRunnable {
            job_id,
            status: job.status.to_string(),
        }));
    }

    let taxonomy_path = plan.get("taxonomy_path").and_then(Value::as_str).unwrap_or_default();
    let canonical_path = SafePath::parse_canonical(taxonomy_path)?;
    let skill_name = generate.get("skill_name").and_then(Value::as_str).unwrap_or_default();
    let draft_content = generate.get("draft_content").and_then(Value::as_str).unwrap_or_default().to_string();
    let metadata = metadata_from_plan(plan, skill_name);

    let canonical = ctx
        .taxonomy
        .promote(job_id, skill_name, &canonical_path, metadata, draft_content, req.overwrite)
        .await?;

    let canonical_for_update = canonical.clone();
    ctx.jobs
        .update(job_id, move |j| {
            j.promoted = true;
            j.status = JobStatus::Completed;
            j.completed_at = Some(Utc::now());
            j.result = Some(JobResult { canonical_path: canonical_for_update.clone(), version: "1.0.0".to_string() });
        })
        .await?;

    Ok(Json(PromoteDraftResponse { canonical_path: canonical }))
}

#[derive(Debug, Serialize)]
pub struct TaxonomyCategory {
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct TaxonomyTreeResponse {
    pub categories: Vec<TaxonomyCategory>,
}

pub async fn get_taxonomy_tree(State(ctx): State<SharedContext>) -> Result<Json<TaxonomyTreeResponse>, ApiError> {
    let paths = ctx.taxonomy.list_tree().await?;
    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for path in &paths {
        let top = path.split('/').next().unwrap_or(path).to_string();
        *counts.entry(top).or_insert(0) += 1;
    }
    let categories = counts.into_iter().map(|(path, count)| TaxonomyCategory { path, count }).collect();
    Ok(Json(TaxonomyTreeResponse { categories }))
}

pub async fn healthz() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
