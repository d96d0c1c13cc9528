//! Aggregates rule-layer findings into the `{passed, score, errors, warnings}`
//! outcome (§4.5). `passed` follows the `Fail > Warn > Pass` precedence this
//! codebase's own review aggregation already uses: any error blocks passage.

use serde::{Deserialize, Serialize};

use crate::taxonomy::SkillMetadata;

use super::rules::{
    Finding, Severity, check_documentation, check_metadata, check_quality, check_structure,
    check_subdirectories,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub score: f64,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

/// A pluggable scoring strategy. The default weighs every layer equally;
/// callers may supply their own (SPEC_FULL.md §9 leaves the exact weights
/// as an open question, resolved here with a documented default).
pub trait Scorer: Send + Sync {
    fn score(&self, findings: &[Finding]) -> f64;
}

pub struct DefaultScorer;

const LAYERS: &[&str] = &["structure", "metadata", "documentation", "subdirectories", "quality"];

impl Scorer for DefaultScorer {
    fn score(&self, findings: &[Finding]) -> f64 {
        let mut layer_scores = Vec::new();
        for layer in LAYERS {
            let layer_findings: Vec<&Finding> = findings.iter().filter(|f| f.layer == *layer).collect();
            let has_error = layer_findings.iter().any(|f| f.severity.is_critical());
            let has_warning = layer_findings.iter().any(|f| f.severity == Severity::Warning);
            let layer_score = if has_error {
                0.0
            } else if has_warning {
                0.7
            } else {
                1.0
            };
            layer_scores.push(layer_score);
        }
        layer_scores.iter().sum::<f64>() / layer_scores.len() as f64
    }
}

pub fn validate_draft(
    skill_dir: &std::path::Path,
    metadata: &SkillMetadata,
    body: &str,
    scorer: &dyn Scorer,
) -> ValidationReport {
    let mut findings = Vec::new();
    findings.extend(check_structure(skill_dir));
    findings.extend(check_metadata(metadata));
    findings.extend(check_documentation(body));
    findings.extend(check_subdirectories(skill_dir));
    findings.extend(check_quality(body));

    let score = scorer.score(&findings);
    let errors: Vec<Finding> = findings.iter().filter(|f| f.severity.is_critical()).cloned().collect();
    let warnings: Vec<Finding> = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .cloned()
        .collect();
    let passed = errors.is_empty();

    ValidationReport {
        passed,
        score,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_metadata() -> SkillMetadata {
        SkillMetadata {
            name: "rust-error-handling".into(),
            description: "How this codebase handles errors.".into(),
            skill_type: None,
            weight: None,
            load_priority: None,
            dependencies: vec![],
            capabilities: vec![],
        }
    }

    fn good_body() -> String {
        let mut body = "## When To Use\n".to_string();
        body.push_str(&"word ".repeat(520));
        body.push_str("\n```rust\nfn main() {}\n```\n");
        body
    }

    #[test]
    fn a_complete_well_formed_draft_passes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SKILL.md"), good_body()).unwrap();
        let report = validate_draft(dir.path(), &good_metadata(), &good_body(), &DefaultScorer);
        assert!(report.passed);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn missing_skill_md_fails_and_scores_zero_on_structure() {
        let dir = tempfile::tempdir().unwrap();
        let report = validate_draft(dir.path(), &good_metadata(), &good_body(), &DefaultScorer);
        assert!(!report.passed);
        assert!(report.errors.iter().any(|f| f.code == "STRUCT_MISSING_SKILL_MD"));
        assert!(report.score < 1.0);
    }

    #[test]
    fn warnings_do_not_block_passage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SKILL.md"), "x").unwrap();
        let short_but_valid = {
            let mut body = "## When To Use\n".to_string();
            body.push_str(&"word ".repeat(10));
            body
        };
        let report = validate_draft(dir.path(), &good_metadata(), &short_but_valid, &DefaultScorer);
        // word count is low (warning) but no error-level findings.
        assert!(report.passed);
        assert!(!report.warnings.is_empty());
    }
}
