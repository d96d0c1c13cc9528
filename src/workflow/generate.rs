//! Generate phase (§4.2): turns an Understand plan into draft `SKILL.md`
//! content, suspending at `Preview` unless `auto_approve` is set.

use async_trait::async_trait;
use serde_json::Value;

use crate::hitl::HitlType;
use crate::job::Phase;
use crate::llm::LlmRequest;

use super::phase_step::{PhaseContext, PhaseStep, StepOutcome};

pub struct GenerateStep;

#[async_trait]
impl PhaseStep for GenerateStep {
    fn phase(&self) -> Phase {
        Phase::Generate
    }

    async fn run(&self, ctx: &PhaseContext, input: Value) -> StepOutcome {
        let Some(plan) = input.get("plan").cloned() else {
            return StepOutcome::Fail {
                kind: "invalid_input".into(),
                message: "generate phase requires a plan from understand".into(),
            };
        };
        let auto_approve = input.get("auto_approve").and_then(Value::as_bool).unwrap_or(false);
        let previewed = input.get("previewed").and_then(Value::as_bool).unwrap_or(false);
        let feedback = input.get("feedback").and_then(Value::as_str);

        let completion = match ctx
            .llm
            .complete(LlmRequest {
                phase: "generate",
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

        let name = plan.get("skill_name").and_then(Value::as_str).unwrap_or("untitled-skill");
        let description = plan
            .get("metadata")
            .and_then(|m| m.get("description"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let capabilities: Vec<&str> = plan
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let draft_content = render_draft(name, description, &capabilities, feedback, &completion.output);
        let highlights = vec![
            format!("Drafted SKILL.md for '{name}'"),
            format!("{} capabilities documented", capabilities.len()),
        ];

        if !auto_approve && !previewed {
            return StepOutcome::Suspend {
                hitl_type: HitlType::Preview,
                prompt: serde_json::json!({ "draft_content": draft_content, "highlights": highlights }),
            };
        }

        // Drafts are written atomically (content then sentinel) at the end
        // of a successful Generate run, before the phase hands off (§4.4).
        if let Err(e) = ctx.taxonomy.drafts().write(ctx.job_id, name, &draft_content) {
            return StepOutcome::Fail {
                kind: "storage_error".into(),
                message: e.to_string(),
            };
        }

        let output = serde_json::json!({
            "draft_content": draft_content,
            "draft_location": ctx.taxonomy.drafts().location(ctx.job_id, name).to_string_lossy(),
            "highlights": highlights,
            "skill_name": name,
        });

        StepOutcome::Succeed(output)
    }
}

fn render_draft(name: &str, description: &str, capabilities: &[&str], feedback: Option<&str>, llm_notes: &Value) -> String {
    let mut body = String::new();
    body.push_str("---\n");
    body.push_str(&format!("name: {name}\n"));
    body.push_str(&format!("description: {description}\n"));
    body.push_str("---\n\n");
    body.push_str(&format!("# {name}\n\n"));
    body.push_str("## When To Use\n\n");
    body.push_str(description);
    body.push_str("\n\n");
    if !capabilities.is_empty() {
        body.push_str("## Capabilities\n\n");
        for cap in capabilities {
            body.push_str(&format!("- {cap}\n"));
        }
        body.push('\n');
    }
    if let Some(notes) = llm_notes.get("notes").and_then(Value::as_str) {
        body.push_str("## Notes\n\n");
        body.push_str(notes);
        body.push_str("\n\n");
    }
    if let Some(fb) = feedback {
        body.push_str("## Refinement Notes\n\n");
        body.push_str(fb);
        body.push_str("\n\n");
    }
    body.push_str("## Example\n\n```text\n");
    body.push_str(&format!("# example usage of {name}\n"));
    body.push_str("```\n");
    body
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

    fn plan() -> Value {
        serde_json::json!({
            "taxonomy_path": "general/example-skill",
            "skill_name": "example-skill",
            "capabilities": ["explains things"],
            "dependencies": [],
            "metadata": { "name": "example-skill", "description": "An example skill." },
        })
    }

    #[tokio::test]
    async fn missing_plan_fails() {
        let step = GenerateStep;
        match step.run(&ctx(), serde_json::json!({})).await {
            StepOutcome::Fail { kind, .. } => assert_eq!(kind, "invalid_input"),
            _ => panic!("expected Fail"),
        }
    }

    #[tokio::test]
    async fn without_auto_approve_suspends_for_preview() {
        let step = GenerateStep;
        let input = serde_json::json!({ "plan": plan(), "auto_approve": false });
        match step.run(&ctx(), input).await {
            StepOutcome::Suspend { hitl_type, .. } => assert_eq!(hitl_type, HitlType::Preview),
            _ => panic!("expected Suspend"),
        }
    }

    #[tokio::test]
    async fn auto_approve_produces_draft_content() {
        let step = GenerateStep;
        let input = serde_json::json!({ "plan": plan(), "auto_approve": true });
        match step.run(&ctx(), input).await {
            StepOutcome::Succeed(output) => {
                let content = output["draft_content"].as_str().unwrap();
                assert!(content.contains("name: example-skill"));
                assert!(content.contains("When To Use"));
            }
            _ => panic!("expected Succeed"),
        }
    }
}
