//! `CoreContext` — the dependency-injected bundle threaded through every
//! entry point (§9: "in-process globals for the job manager ↔ explicit
//! context"). Replaces any global/singleton pattern: every HTTP handler and
//! every workflow task receives this bundle rather than reaching for a
//! process-wide static.

use std::sync::Arc;

use crate::config::Config;
use crate::events::EventBus;
use crate::hitl::HitlCoordinator;
use crate::job::JobManager;
use crate::llm::LlmClient;
use crate::taxonomy::SkillStore;
use crate::workflow::engine::WorkflowEngine;

/// Everything a request handler or a workflow task needs, grouped so tests
/// can construct an isolated instance instead of touching process state.
pub struct CoreContext {
    pub config: Config,
    pub jobs: Arc<JobManager>,
    pub hitl: Arc<HitlCoordinator>,
    pub taxonomy: Arc<SkillStore>,
    pub events: EventBus,
    pub engine: Arc<WorkflowEngine>,
    _hitl_sweeper: tokio::task::JoinHandle<()>,
}

pub type SharedContext = Arc<CoreContext>;

impl CoreContext {
    /// Assemble a full context from already-constructed subsystems. Kept
    /// separate from any one subsystem's own constructor so tests can swap
    /// in an in-memory store, a fake LLM client, or a shortened timeout
    /// without touching the others.
    pub fn new(
        config: Config,
        jobs: Arc<JobManager>,
        hitl: Arc<HitlCoordinator>,
        taxonomy: Arc<SkillStore>,
        events: EventBus,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let engine = Arc::new(WorkflowEngine::new(
            jobs.clone(),
            hitl.clone(),
            taxonomy.clone(),
            events.clone(),
            llm,
            config.worker_concurrency,
            config.phase_llm_timeout,
        ));
        let hitl_sweeper = engine.spawn_hitl_timeout_sweeper(config.memory_sweep_interval);
        Self {
            config,
            jobs,
            hitl,
            taxonomy,
            events,
            engine,
            _hitl_sweeper: hitl_sweeper,
        }
    }
}
