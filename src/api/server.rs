//! Router assembly and the top-level serve loop (§6.1, §9).

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::context::{CoreContext, SharedContext};

use super::handlers;
use super::sse;

/// Assembles the full router over a shared context. Kept separate from
/// `serve` so tests can exercise it directly with `tower::ServiceExt::oneshot`
/// instead of binding a real socket.
pub fn build_router(ctx: SharedContext) -> Router {
    let cors = build_cors(&ctx.config.cors_origins);

    let v1 = Router::new()
        .route("/skills", post(handlers::create_skill))
        // A catch-all wildcard can't be followed by a literal segment in the
        // same matchit pattern, so `/skills/{id_or_path}/refine` (§6.1) is
        // matched here too and the `/refine` tail is split off in the
        // handler rather than by the router.
        .route("/skills/{*identifier}", get(handlers::get_skill).post(handlers::refine_skill))
        .route("/jobs/{job_id}", get(handlers::get_job))
        .route("/jobs/{job_id}/events", get(sse::job_events))
        .route("/hitl/{job_id}/prompt", get(handlers::get_hitl_prompt))
        .route("/hitl/{job_id}/response", post(handlers::post_hitl_response))
        .route("/drafts/{job_id}/promote", post(handlers::promote_draft))
        .route("/taxonomy", get(handlers::get_taxonomy_tree));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", v1)
        .layer(cors)
        .with_state(ctx)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Binds and serves the router, running until a Ctrl+C signal triggers a
/// graceful shutdown.
pub async fn serve(ctx: SharedContext) -> Result<()> {
    let bind_addr = ctx.config.bind_addr.clone();
    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    let local_addr = listener.local_addr().context("failed to read bound address")?;
    tracing::info!(%local_addr, "skillsmith listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c, shutting down");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{Config, LogFormat};
    use crate::events::EventBus;
    use crate::hitl::HitlCoordinator;
    use crate::job::JobManager;
    use crate::job::store::JobStore;
    use crate::hitl::store::HitlStore;
    use crate::llm::EchoLlmClient;
    use crate::taxonomy::SkillStore;

    fn test_context() -> (SharedContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_url: ":memory:".to_string(),
            storage_root: dir.path().to_path_buf(),
            hitl_default_timeout: Duration::from_secs(3600),
            memory_ttl: Duration::from_secs(3600),
            memory_sweep_interval: Duration::from_secs(300),
            phase_llm_timeout: Duration::from_secs(30),
            worker_concurrency: 2,
            cors_origins: vec!["*".to_string()],
            bind_addr: "127.0.0.1:0".to_string(),
            log_format: LogFormat::Pretty,
        };
        config.ensure_storage_root().unwrap();

        let events = EventBus::new();
        let job_store = JobStore::open(":memory:").unwrap();
        let jobs = Arc::new(JobManager::new(job_store, config.memory_ttl, config.memory_sweep_interval, events.clone()));
        let hitl = Arc::new(HitlCoordinator::new(HitlStore::open(":memory:").unwrap(), config.hitl_default_timeout));
        let taxonomy = Arc::new(SkillStore::open(":memory:", config.storage_root.clone()).unwrap());

        let ctx = Arc::new(CoreContext::new(config, jobs, hitl, taxonomy, events, Arc::new(EchoLlmClient)));
        (ctx, dir)
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (ctx, _dir) = test_context();
        ctx.taxonomy.run_migrations().await.unwrap();
        let app = build_router(ctx);

        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_skill_rejects_a_too_short_task_description() {
        let (ctx, _dir) = test_context();
        ctx.taxonomy.run_migrations().await.unwrap();
        let app = build_router(ctx);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/skills")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "task_description": "too short" }).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_skill_accepts_a_well_formed_request() {
        let (ctx, _dir) = test_context();
        ctx.taxonomy.run_migrations().await.unwrap();
        let app = build_router(ctx);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/skills")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "task_description": "write a skill that formats commit messages" }).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "accepted");
        assert!(body["job_id"].is_string());
    }

    #[tokio::test]
    async fn get_job_404s_for_an_unknown_id() {
        let (ctx, _dir) = test_context();
        ctx.taxonomy.run_migrations().await.unwrap();
        let app = build_router(ctx);

        let req = Request::builder()
            .uri(format!("/api/v1/jobs/{}", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
