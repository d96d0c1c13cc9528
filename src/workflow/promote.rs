//! Promote phase (§4.2, §4.4): the non-LLM phase that atomically moves a
//! validated draft into the canonical taxonomy. Never suspends.

use async_trait::async_trait;
use serde_json::Value;

use crate::job::Phase;
use crate::taxonomy::{SafePath, SkillMetadata};

use super::phase_step::{PhaseContext, PhaseStep, StepOutcome};

/// Builds the taxonomy metadata a promotion writes from an Understand plan,
/// falling back to `default_name` if the plan carries none. Shared between
/// the automatic `PromoteStep` and the manual promote HTTP handler, which
/// both promote from the same `{plan, generate}` shape.
pub(crate) fn metadata_from_plan(plan: &Value, default_name: &str) -> SkillMetadata {
    SkillMetadata {
        name: plan
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(default_name)
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
    }
}

pub struct PromoteStep;

#[async_trait]
impl PhaseStep for PromoteStep {
    fn phase(&self) -> Phase {
        Phase::Promote
    }

    async fn run(&self, ctx: &PhaseContext, input: Value) -> StepOutcome {
        let (Some(plan), Some(generate)) = (input.get("plan"), input.get("generate")) else {
            return StepOutcome::Fail {
                kind: "invalid_input".into(),
                message: "promote phase requires a plan and a generate output".into(),
            };
        };
        let overwrite = input.get("overwrite").and_then(Value::as_bool).unwrap_or(false);

        let taxonomy_path = plan.get("taxonomy_path").and_then(Value::as_str).unwrap_or_default();
        let canonical_path = match SafePath::parse_canonical(taxonomy_path) {
            Ok(p) => p,
            Err(e) => {
                return StepOutcome::Fail {
                    kind: "path_unsafe".into(),
                    message: e.to_string(),
                };
            }
        };

        let skill_name = generate.get("skill_name").and_then(Value::as_str).unwrap_or_default();
        let draft_content = generate.get("draft_content").and_then(Value::as_str).unwrap_or_default().to_string();
        let metadata = metadata_from_plan(plan, skill_name);

        match ctx
            .taxonomy
            .promote(ctx.job_id, skill_name, &canonical_path, metadata, draft_content, overwrite)
            .await
        {
            Ok(canonical) => StepOutcome::Succeed(serde_json::json!({ "canonical_path": canonical })),
            Err(e) => StepOutcome::Fail {
                kind: "taxonomy_error".into(),
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoLlmClient;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn promotes_a_written_draft_to_its_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::taxonomy::SkillStore::open(":memory:", dir.path().to_path_buf()).unwrap();
        store.run_migrations().await.unwrap();
        let job_id = Uuid::new_v4();
        store.drafts().write(job_id, "example-skill", "# doc").unwrap();
        std::mem::forget(dir);

        let ctx = PhaseContext {
            job_id,
            cancel: super::super::phase_step::CancelToken::new(),
            llm: Arc::new(EchoLlmClient),
            taxonomy: Arc::new(store),
        };
        let input = serde_json::json!({
            "plan": {
                "taxonomy_path": "general/example-skill",
                "metadata": { "name": "example-skill", "description": "An example." },
                "dependencies": [],
                "capabilities": [],
            },
            "generate": { "skill_name": "example-skill", "draft_content": "# doc" },
        });
        match PromoteStep.run(&ctx, input).await {
            StepOutcome::Succeed(output) => assert_eq!(output["canonical_path"], "general/example-skill"),
            StepOutcome::Fail { message, .. } => panic!("expected Succeed, got Fail: {message}"),
            StepOutcome::Suspend { .. } => panic!("expected Succeed, got Suspend"),
        }
    }
}
