//! Typed error hierarchy for the skill-authoring service.
//!
//! One enum per subsystem, matching the propagation policy of the job
//! orchestration design: input errors never mutate job state, infrastructure
//! errors pause or fail only the affected job, and the HTTP layer maps every
//! variant onto exactly one status code via `ApiError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors from the job manager's durable store and cache tiers.
#[derive(Debug, Error)]
pub enum JobManagerError {
    #[error("job {0} not found")]
    NotFound(uuid::Uuid),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] anyhow::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the three-phase workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("job {job_id} is not in a runnable state: {status}")]
    NotRunnable { job_id: uuid::Uuid, status: String },

    #[error("phase {phase} timed out waiting on the LLM boundary")]
    LlmTimeout { phase: String },

    #[error("phase {phase} failed: {message}")]
    LlmError { phase: String, message: String },

    #[error("job {0} was cancelled")]
    Cancelled(uuid::Uuid),

    #[error(transparent)]
    Hitl(#[from] HitlError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    JobManager(#[from] JobManagerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the human-in-the-loop rendezvous protocol.
#[derive(Debug, Error)]
pub enum HitlError {
    #[error("no pending prompt for job {0}")]
    NoPendingPrompt(uuid::Uuid),

    #[error("response does not match the outstanding prompt shape")]
    ShapeMismatch,

    #[error("interaction round {round} for job {job_id} is no longer pending")]
    ConflictingState { job_id: uuid::Uuid, round: u32 },

    #[error("interaction round {round} for job {job_id} timed out")]
    TimedOut { job_id: uuid::Uuid, round: u32 },

    #[error("job {0} has no outstanding interaction")]
    Cancelled(uuid::Uuid),
}

/// Errors from the taxonomy / draft store.
#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("path is unsafe: {0}")]
    UnsafePath(String),

    #[error("no skill resolves for identifier '{0}'")]
    NotFound(String),

    #[error("canonical path '{0}' is already occupied")]
    AlreadyExists(String),

    #[error("dependency cycle detected involving '{0}'")]
    DependencyCycle(String),

    #[error("draft for job {0} is not in a promotable state")]
    DraftNotPromotable(uuid::Uuid),

    #[error("skill '{0}' is not in a refinable state")]
    NotRefinable(String),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Errors from the rule-based validation core.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("draft at {0} could not be read")]
    UnreadableDraft(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Top-level error the HTTP binding maps onto a status code and JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    JobManager(#[from] JobManagerError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Hitl(#[from] HitlError),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::JobManager(JobManagerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::JobManager(JobManagerError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::JobManager(JobManagerError::StorageUnavailable(_))
            | ApiError::JobManager(JobManagerError::Other(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Workflow(WorkflowError::NotRunnable { .. }) => StatusCode::CONFLICT,
            ApiError::Workflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Hitl(HitlError::NoPendingPrompt(_)) => StatusCode::NOT_FOUND,
            ApiError::Hitl(HitlError::ShapeMismatch) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Hitl(HitlError::ConflictingState { .. })
            | ApiError::Hitl(HitlError::TimedOut { .. })
            | ApiError::Hitl(HitlError::Cancelled(_)) => StatusCode::CONFLICT,
            ApiError::Taxonomy(TaxonomyError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Taxonomy(TaxonomyError::UnsafePath(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Taxonomy(TaxonomyError::AlreadyExists(_))
            | ApiError::Taxonomy(TaxonomyError::DraftNotPromotable(_))
            | ApiError::Taxonomy(TaxonomyError::NotRefinable(_)) => StatusCode::CONFLICT,
            ApiError::Taxonomy(TaxonomyError::DependencyCycle(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Taxonomy(TaxonomyError::Storage(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_manager_not_found_carries_id() {
        let id = uuid::Uuid::nil();
        let err = JobManagerError::NotFound(id);
        match &err {
            JobManagerError::NotFound(found) => assert_eq!(*found, id),
            _ => panic!("expected NotFound"),
        }
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn workflow_error_converts_from_hitl_error() {
        let inner = HitlError::ShapeMismatch;
        let workflow_err: WorkflowError = inner.into();
        assert!(matches!(workflow_err, WorkflowError::Hitl(HitlError::ShapeMismatch)));
    }

    #[test]
    fn api_error_not_found_maps_to_404() {
        let err = ApiError::JobManager(JobManagerError::NotFound(uuid::Uuid::nil()));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn api_error_conflict_maps_to_409() {
        let err = ApiError::Hitl(HitlError::ConflictingState {
            job_id: uuid::Uuid::nil(),
            round: 1,
        });
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn api_error_dependency_cycle_is_422() {
        let err = ApiError::Taxonomy(TaxonomyError::DependencyCycle("x".into()));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
