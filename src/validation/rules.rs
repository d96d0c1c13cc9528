//! Rule-based structural, metadata, and documentation checks applied to a
//! draft before promotion (§4.5).
//!
//! The severity model and aggregation precedence are grounded on this
//! codebase's own review-findings module: four ordered severities, a
//! three-way verdict, and `Fail > Warn > Pass` aggregation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::taxonomy::SkillMetadata;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]{1,64}$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Note,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn is_critical(self) -> bool {
        matches!(self, Severity::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub layer: &'static str,
}

impl Finding {
    fn new(layer: &'static str, code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity,
            message: message.into(),
            layer,
        }
    }
}

const ALLOWED_SUBDIRS: &[&str] = &["references", "guides", "templates", "scripts", "examples", "assets"];
const LEGACY_SUBDIRS: &[&str] = &["docs", "resources"];

/// Layer 1: required files, no symlinks, safe path components.
pub fn check_structure(skill_dir: &std::path::Path) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !skill_dir.join("SKILL.md").exists() {
        findings.push(Finding::new(
            "structure",
            "STRUCT_MISSING_SKILL_MD",
            Severity::Error,
            "draft is missing the required SKILL.md file",
        ));
    }
    if let Ok(entries) = std::fs::read_dir(skill_dir) {
        for entry in entries.flatten() {
            if entry.path().is_symlink() {
                findings.push(Finding::new(
                    "structure",
                    "STRUCT_SYMLINK",
                    Severity::Error,
                    format!("{} is a symlink, which is not allowed in a draft", entry.path().display()),
                ));
            }
        }
    }
    findings
}

/// Layer 2: frontmatter metadata shape.
pub fn check_metadata(metadata: &SkillMetadata) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !NAME_RE.is_match(&metadata.name) {
        findings.push(Finding::new(
            "metadata",
            "META_BAD_NAME",
            Severity::Error,
            format!("name '{}' must be kebab-case and at most 64 characters", metadata.name),
        ));
    }
    let desc_len = metadata.description.chars().count();
    if !(1..=1024).contains(&desc_len) {
        findings.push(Finding::new(
            "metadata",
            "META_BAD_DESCRIPTION",
            Severity::Error,
            "description must be between 1 and 1024 characters",
        ));
    }
    findings
}

/// Layer 3: body documentation checks.
pub fn check_documentation(body: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    if body.chars().count() < 100 {
        findings.push(Finding::new(
            "documentation",
            "DOC_TOO_SHORT",
            Severity::Error,
            "body must be at least 100 characters",
        ));
    }
    if !body.to_lowercase().contains("when to use") {
        findings.push(Finding::new(
            "documentation",
            "DOC_MISSING_WHEN_TO_USE",
            Severity::Error,
            "body must contain a 'When to Use' heading",
        ));
    }
    if !body.contains("```") {
        findings.push(Finding::new(
            "documentation",
            "DOC_NO_CODE_BLOCK",
            Severity::Warning,
            "no fenced code block found; consider adding an example",
        ));
    }
    findings
}

/// Layer 4: only allowlisted subdirectories; legacy names warn instead of fail.
pub fn check_subdirectories(skill_dir: &std::path::Path) -> Vec<Finding> {
    let mut findings = Vec::new();
    let Ok(entries) = std::fs::read_dir(skill_dir) else {
        return findings;
    };
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if ALLOWED_SUBDIRS.contains(&name.as_str()) {
            continue;
        }
        if LEGACY_SUBDIRS.contains(&name.as_str()) {
            findings.push(Finding::new(
                "subdirectories",
                "SUBDIR_LEGACY_NAME",
                Severity::Warning,
                format!("'{name}' is a deprecated subdirectory name"),
            ));
        } else {
            findings.push(Finding::new(
                "subdirectories",
                "SUBDIR_NOT_ALLOWED",
                Severity::Error,
                format!("'{name}' is not an allowlisted subdirectory"),
            ));
        }
    }
    findings
}

/// Layer 5: quality heuristics (word count band, verbosity).
pub fn check_quality(body: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let word_count = body.split_whitespace().count();
    if word_count < 500 || word_count > 5000 {
        findings.push(Finding::new(
            "quality",
            "QUALITY_WORD_COUNT",
            Severity::Warning,
            format!("word count {word_count} is outside the recommended 500..5000 band"),
        ));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_check_flags_missing_skill_md() {
        let dir = tempfile::tempdir().unwrap();
        let findings = check_structure(dir.path());
        assert!(findings.iter().any(|f| f.code == "STRUCT_MISSING_SKILL_MD"));
    }

    #[test]
    fn metadata_check_flags_uppercase_name() {
        let metadata = SkillMetadata {
            name: "Bad-Name".into(),
            description: "A valid description.".into(),
            skill_type: None,
            weight: None,
            load_priority: None,
            dependencies: vec![],
            capabilities: vec![],
        };
        let findings = check_metadata(&metadata);
        assert!(findings.iter().any(|f| f.code == "META_BAD_NAME"));
    }

    #[test]
    fn documentation_check_requires_when_to_use_heading() {
        let body = "x".repeat(150);
        let findings = check_documentation(&body);
        assert!(findings.iter().any(|f| f.code == "DOC_MISSING_WHEN_TO_USE"));
    }

    #[test]
    fn documentation_check_passes_with_heading_and_code_block() {
        let mut body = "## When To Use\n".to_string();
        body.push_str(&"word ".repeat(30));
        body.push_str("\n```rust\nfn main() {}\n```\n");
        let findings = check_documentation(&body);
        assert!(!findings.iter().any(|f| f.severity == Severity::Error));
    }

    #[test]
    fn subdirectory_check_allows_references_and_flags_unknown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("references")).unwrap();
        std::fs::create_dir(dir.path().join("scratch")).unwrap();
        let findings = check_subdirectories(dir.path());
        assert!(!findings.iter().any(|f| f.code == "SUBDIR_NOT_ALLOWED" && f.message.contains("references")));
        assert!(findings.iter().any(|f| f.code == "SUBDIR_NOT_ALLOWED" && f.message.contains("scratch")));
    }
}
