//! The three-phase pipeline: Understand → Generate → Validate → Promote,
//! driven by `engine::WorkflowEngine` through the `PhaseStep` dispatch.

pub mod engine;
pub mod generate;
pub mod phase_step;
pub mod promote;
pub mod understand;
pub mod validate;

pub use engine::WorkflowEngine;
pub use phase_step::{CancelToken, PhaseContext, PhaseStep, StepOutcome};
