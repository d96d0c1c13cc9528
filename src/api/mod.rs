//! HTTP binding for the skill-authoring service (§6.1). A thin seam: every
//! handler delegates to `CoreContext`'s subsystems and carries no business
//! logic of its own.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, serve};
