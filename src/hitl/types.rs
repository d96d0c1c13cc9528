//! Wire types for the human-in-the-loop rendezvous protocol (§4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlType {
    Clarify,
    StructureFix,
    Confirm,
    Preview,
    Validate,
}

impl std::fmt::Display for HitlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HitlType::Clarify => "clarify",
            HitlType::StructureFix => "structure_fix",
            HitlType::Confirm => "confirm",
            HitlType::Preview => "preview",
            HitlType::Validate => "validate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlAction {
    Proceed,
    Revise,
    Refine,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Pending,
    Answered,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlPrompt {
    #[serde(rename = "type")]
    pub interaction_type: HitlType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HitlResponse {
    pub action: HitlAction,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

/// One request/response cycle, persisted and re-entrant across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlInteraction {
    pub job_id: uuid::Uuid,
    pub round: u32,
    pub interaction_type: HitlType,
    pub prompt: serde_json::Value,
    pub response: Option<HitlAction>,
    pub response_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub timeout_at: DateTime<Utc>,
    pub status: InteractionStatus,
}
