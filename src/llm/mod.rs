//! The abstract language-model boundary the workflow phases call through.
//!
//! Grounded on the DAG executor's injectable async boundary (phase execution
//! there is parameterized over a config and an event channel, never over a
//! concrete model client); here the boundary is made explicit as a trait so
//! tests can substitute a deterministic stand-in without reaching the network.
//! Selecting or configuring an actual model provider is out of scope (§1) —
//! this module specifies only the contract `PhaseStep` implementations use.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub phase: &'static str,
    pub job_id: uuid::Uuid,
    pub input: Value,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub output: Value,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm call timed out")]
    Timeout,
    #[error("llm call failed: {0}")]
    Failed(String),
}

/// Boundary every phase's LLM call crosses. Implementations may retry
/// internally up to their own budget (§7); the workflow engine does not
/// retry above that.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Deterministic stand-in used by tests and local runs with no model
/// provider configured: echoes a structurally plausible completion derived
/// from the request input so downstream phase logic has something to act on.
pub struct EchoLlmClient;

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse {
            output: request.input,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_client_returns_its_input() {
        let client = EchoLlmClient;
        let input = serde_json::json!({"a": 1});
        let response = client
            .complete(LlmRequest {
                phase: "understand",
                job_id: uuid::Uuid::nil(),
                input: input.clone(),
            })
            .await
            .unwrap();
        assert_eq!(response.output, input);
    }
}
