//! The `PhaseStep` sum-type dispatch (§4.2, §9 "dynamic dispatch of phase
//! modules ↔ tagged variant"). Each phase implements this trait; the engine
//! branches on its result and never reaches into phase-internal state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::hitl::HitlType;
use crate::job::Phase;
use crate::llm::LlmClient;
use crate::taxonomy::SkillStore;

/// A phase's outcome, branched on by the engine (§9: dynamic dispatch ↔
/// tagged variant). `Suspend` carries enough for the engine to drive the
/// HITL rendezvous itself; the phase never calls the coordinator directly.
pub enum StepOutcome {
    Succeed(Value),
    Suspend { hitl_type: HitlType, prompt: Value },
    Fail { kind: String, message: String },
}

/// Cooperative cancellation: phases must check this at every
/// suspension-capable point (§5) rather than being forcibly aborted.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a phase needs besides its input: identity, a cancellation
/// token, and the shared LLM boundary. Phases receive no direct access to
/// the job manager, taxonomy store, or HITL coordinator (§9: explicit
/// context, narrow per-phase surface).
pub struct PhaseContext {
    pub job_id: Uuid,
    pub cancel: CancelToken,
    pub llm: Arc<dyn LlmClient>,
    pub taxonomy: Arc<SkillStore>,
}

#[async_trait]
pub trait PhaseStep: Send + Sync {
    fn phase(&self) -> Phase;

    /// Run the phase against `input`, which on a retry carries the prior
    /// input merged with HITL feedback under the engine's control. Must be
    /// idempotent: identical `input` values (by their digest) must yield
    /// identical `output_digest`s on `Succeed` (§8.1 invariant 8).
    async fn run(&self, ctx: &PhaseContext, input: Value) -> StepOutcome;
}
