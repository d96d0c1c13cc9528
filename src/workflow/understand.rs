//! Understand phase (§4.2): turns a task description into a structured
//! plan `{taxonomy_path, capabilities, dependencies, metadata}`, suspending
//! at `Clarify` (ambiguous input), `StructureFix` (invalid derived name),
//! or `Confirm` (final plan review) unless `auto_approve` is set.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::LazyLock;

use regex::Regex;

use crate::hitl::HitlType;
use crate::job::Phase;
use crate::llm::LlmRequest;

use super::phase_step::{PhaseContext, PhaseStep, StepOutcome};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]{1,64}$").unwrap());

pub struct UnderstandStep;

#[async_trait]
impl PhaseStep for UnderstandStep {
    fn phase(&self) -> Phase {
        Phase::Understand
    }

    async fn run(&self, ctx: &PhaseContext, input: Value) -> StepOutcome {
        let task_description = input
            .get("task_description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let auto_approve = input.get("auto_approve").and_then(Value::as_bool).unwrap_or(false);
        let clarify_answers = input.get("clarify_answers").cloned().filter(|v| !v.is_null());
        let structure_override = input.get("structure_override").cloned().filter(|v| !v.is_null());
        let confirmed = input.get("confirmed").and_then(Value::as_bool).unwrap_or(false);

        let word_count = task_description.split_whitespace().count();
        if word_count < 4 && clarify_answers.is_none() {
            return StepOutcome::Suspend {
                hitl_type: HitlType::Clarify,
                prompt: serde_json::json!({
                    "questions": [
                        "What taxonomy path (e.g. coding/rust/testing) should this skill live under?",
                        "Should this skill declare any dependencies on existing skills?",
                    ],
                }),
            };
        }

        let completion = match ctx
            .llm
            .complete(LlmRequest {
                phase: "understand",
                job_id: ctx.job_id,
                input: input.clone(),
            })
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return StepOutcome::Fail {
                    kind: "llm_error".into(),
                    message: e.to_string(),
                };
            }
        };

        let name = structure_override
            .as_ref()
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| slugify(&task_description));

        if !NAME_RE.is_match(&name) && structure_override.is_none() {
            return StepOutcome::Suspend {
                hitl_type: HitlType::StructureFix,
                prompt: serde_json::json!({
                    "proposed_name": name,
                    "reason": "derived skill name is not kebab-case or exceeds 64 characters",
                }),
            };
        }

        let taxonomy_path = clarify_answers
            .as_ref()
            .and_then(|v| v.get("taxonomy_path"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("general/{name}"));

        let dependencies: Vec<String> = clarify_answers
            .as_ref()
            .and_then(|v| v.get("dependencies"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let capabilities: Vec<String> = completion
            .output
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let description = truncate(&task_description, 1024);

        let plan = serde_json::json!({
            "taxonomy_path": taxonomy_path,
            "skill_name": name,
            "capabilities": capabilities,
            "dependencies": dependencies,
            "metadata": { "name": name, "description": description },
        });

        if !auto_approve && !confirmed {
            return StepOutcome::Suspend {
                hitl_type: HitlType::Confirm,
                prompt: serde_json::json!({ "plan": plan }),
            };
        }

        StepOutcome::Succeed(plan)
    }
}

fn slugify(task_description: &str) -> String {
    let words: Vec<String> = task_description
        .split_whitespace()
        .take(5)
        .map(|w| w.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    let joined = words.join("-");
    if joined.is_empty() {
        "untitled-skill".to_string()
    } else {
        joined.chars().take(64).collect()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoLlmClient;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx() -> PhaseContext {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::taxonomy::SkillStore::open(":memory:", dir.path().to_path_buf()).unwrap();
        std::mem::forget(dir);
        PhaseContext {
            job_id: Uuid::new_v4(),
            cancel: super::super::phase_step::CancelToken::new(),
            llm: Arc::new(EchoLlmClient),
            taxonomy: Arc::new(store),
        }
    }

    #[tokio::test]
    async fn short_task_description_suspends_for_clarification() {
        let step = UnderstandStep;
        let input = serde_json::json!({ "task_description": "fix it", "auto_approve": true });
        match step.run(&ctx(), input).await {
            StepOutcome::Suspend { hitl_type, .. } => assert_eq!(hitl_type, HitlType::Clarify),
            _ => panic!("expected Suspend"),
        }
    }

    #[tokio::test]
    async fn auto_approve_skips_confirm_and_succeeds() {
        let step = UnderstandStep;
        let input = serde_json::json!({
            "task_description": "Document the dependency resolver's retry policy in depth",
            "auto_approve": true,
        });
        match step.run(&ctx(), input).await {
            StepOutcome::Succeed(plan) => {
                assert!(plan.get("skill_name").is_some());
                assert!(plan["taxonomy_path"].as_str().unwrap().starts_with("general/document-the-dependency"));
            }
            _ => panic!("expected Succeed"),
        }
    }

    #[tokio::test]
    async fn without_auto_approve_suspends_for_confirm() {
        let step = UnderstandStep;
        let input = serde_json::json!({
            "task_description": "Document the dependency resolver's retry policy in depth",
            "auto_approve": false,
        });
        match step.run(&ctx(), input).await {
            StepOutcome::Suspend { hitl_type, .. } => assert_eq!(hitl_type, HitlType::Confirm),
            _ => panic!("expected Suspend"),
        }
    }

    #[tokio::test]
    async fn confirmed_flag_allows_completion_without_auto_approve() {
        let step = UnderstandStep;
        let input = serde_json::json!({
            "task_description": "Document the dependency resolver's retry policy in depth",
            "auto_approve": false,
            "confirmed": true,
        });
        match step.run(&ctx(), input).await {
            StepOutcome::Succeed(_) => {}
            _ => panic!("expected Succeed"),
        }
    }
}
