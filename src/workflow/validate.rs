//! Validate phase (§4.2, §4.5): runs the rule-based validation core against
//! the drafted `SKILL.md`, suspending at `Validate` unless the report passes
//! and `auto_approve` is set.

use async_trait::async_trait;
use serde_json::Value;

use crate::hitl::HitlType;
use crate::job::Phase;
use crate::taxonomy::SkillMetadata;
use crate::validation::{DefaultScorer, validate_draft};

use super::phase_step::{PhaseContext, PhaseStep, StepOutcome};

pub struct ValidateStep;

#[async_trait]
impl PhaseStep for ValidateStep {
    fn phase(&self) -> Phase {
        Phase::Validate
    }

    async fn run(&self, ctx: &PhaseContext, input: Value) -> StepOutcome {
        let (Some(plan), Some(generate)) = (input.get("plan"), input.get("generate")) else {
            return StepOutcome::Fail {
                kind: "invalid_input".into(),
                message: "validate phase requires a plan and a generate output".into(),
            };
        };
        let auto_approve = input.get("auto_approve").and_then(Value::as_bool).unwrap_or(false);
        let acknowledged = input.get("acknowledged").and_then(Value::as_bool).unwrap_or(false);

        let skill_name = generate.get("skill_name").and_then(Value::as_str).unwrap_or("untitled-skill");
        let draft_content = generate.get("draft_content").and_then(Value::as_str).unwrap_or_default();

        let metadata = SkillMetadata {
            name: plan
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .unwrap_or(skill_name)
                .to_string(),
            description: plan
                .get("metadata")
                .and_then(|m| m.get("description"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            skill_type: None,
            weight: None,
            load_priority: None,
            dependencies: plan
                .get("dependencies")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            capabilities: plan
                .get("capabilities")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
        };

        let skill_dir = ctx.taxonomy.drafts().location(ctx.job_id, skill_name);
        let report = validate_draft(&skill_dir, &metadata, draft_content, &DefaultScorer);
        let report_json = match serde_json::to_value(&report) {
            Ok(v) => v,
            Err(e) => {
                return StepOutcome::Fail {
                    kind: "internal_error".into(),
                    message: e.to_string(),
                };
            }
        };

        if report.passed && auto_approve {
            return StepOutcome::Succeed(serde_json::json!({ "validation_report": report_json }));
        }
        if acknowledged {
            return StepOutcome::Succeed(serde_json::json!({ "validation_report": report_json, "forced": !report.passed }));
        }

        StepOutcome::Suspend {
            hitl_type: HitlType::Validate,
            prompt: serde_json::json!({ "validation_report": report_json }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoLlmClient;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx_with_draft(job_id: uuid::Uuid, skill_name: &str, content: &str) -> PhaseContext {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::taxonomy::SkillStore::open(":memory:", dir.path().to_path_buf()).unwrap();
        store.drafts().write(job_id, skill_name, content).unwrap();
        std::mem::forget(dir);
        PhaseContext {
            job_id,
            cancel: super::super::phase_step::CancelToken::new(),
            llm: Arc::new(EchoLlmClient),
            taxonomy: Arc::new(store),
        }
    }

    fn plan() -> Value {
        serde_json::json!({
            "metadata": { "name": "example-skill", "description": "An example skill." },
            "dependencies": [],
            "capabilities": [],
        })
    }

    fn good_draft() -> String {
        let mut body = "## When To Use\n".to_string();
        body.push_str(&"word ".repeat(520));
        body.push_str("\n```rust\nfn main() {}\n```\n");
        body
    }

    #[tokio::test]
    async fn missing_inputs_fail() {
        let job_id = Uuid::new_v4();
        let ctx = ctx_with_draft(job_id, "example-skill", &good_draft());
        match ValidateStep.run(&ctx, serde_json::json!({})).await {
            StepOutcome::Fail { kind, .. } => assert_eq!(kind, "invalid_input"),
            _ => panic!("expected Fail"),
        }
    }

    #[tokio::test]
    async fn passing_report_with_auto_approve_succeeds() {
        let job_id = Uuid::new_v4();
        let content = good_draft();
        let ctx = ctx_with_draft(job_id, "example-skill", &content);
        let input = serde_json::json!({
            "plan": plan(),
            "generate": { "skill_name": "example-skill", "draft_content": content },
            "auto_approve": true,
        });
        match ValidateStep.run(&ctx, input).await {
            StepOutcome::Succeed(output) => assert!(output["validation_report"]["passed"].as_bool().unwrap()),
            _ => panic!("expected Succeed"),
        }
    }

    #[tokio::test]
    async fn without_auto_approve_suspends_for_review() {
        let job_id = Uuid::new_v4();
        let content = good_draft();
        let ctx = ctx_with_draft(job_id, "example-skill", &content);
        let input = serde_json::json!({
            "plan": plan(),
            "generate": { "skill_name": "example-skill", "draft_content": content },
            "auto_approve": false,
        });
        match ValidateStep.run(&ctx, input).await {
            StepOutcome::Suspend { hitl_type, .. } => assert_eq!(hitl_type, HitlType::Validate),
            _ => panic!("expected Suspend"),
        }
    }

    #[tokio::test]
    async fn acknowledged_flag_forces_completion_after_failure() {
        let job_id = Uuid::new_v4();
        let ctx = ctx_with_draft(job_id, "example-skill", "too short");
        let input = serde_json::json!({
            "plan": plan(),
            "generate": { "skill_name": "example-skill", "draft_content": "too short" },
            "auto_approve": false,
            "acknowledged": true,
        });
        match ValidateStep.run(&ctx, input).await {
            StepOutcome::Succeed(output) => assert!(output["forced"].as_bool().unwrap()),
            _ => panic!("expected Succeed"),
        }
    }
}
