//! `SafePath` — the dedicated path abstraction named in the re-architecture
//! notes: never operate on untrusted strings directly; construct a
//! `SafePath` through the sanitizer and constrain filesystem calls to it.

use std::path::{Path, PathBuf};

use regex::Regex;
use std::sync::LazyLock;

use crate::errors::TaxonomyError;

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").unwrap());
static ALIAS_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_.-]+$").unwrap());

const MAX_SEGMENTS: usize = 8;
const MAX_PATH_LEN: usize = 512;

/// A validated, slash-separated canonical path. Construction is the only
/// way to obtain one; every segment has already been checked against the
/// naming rule and the whole path against traversal/absolute-path/null
/// byte attacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafePath {
    segments: Vec<String>,
}

impl SafePath {
    /// Parse and validate a canonical path (strict segment rule, §4.4).
    pub fn parse_canonical(raw: &str) -> Result<Self, TaxonomyError> {
        Self::parse_with(raw, &SEGMENT_RE)
    }

    /// Parse and validate an alias path (looser segment rule).
    pub fn parse_alias(raw: &str) -> Result<Self, TaxonomyError> {
        Self::parse_with(raw, &ALIAS_SEGMENT_RE)
    }

    fn parse_with(raw: &str, segment_re: &Regex) -> Result<Self, TaxonomyError> {
        if raw.len() > MAX_PATH_LEN {
            return Err(TaxonomyError::UnsafePath(format!(
                "path exceeds {MAX_PATH_LEN} characters"
            )));
        }
        if raw.contains('\0') {
            return Err(TaxonomyError::UnsafePath("path contains a null byte".into()));
        }
        if raw.starts_with('/') || raw.starts_with('\\') {
            return Err(TaxonomyError::UnsafePath("absolute paths are not allowed".into()));
        }

        let segments: Vec<String> = raw.split('/').map(str::to_string).collect();
        if segments.is_empty() || segments.len() > MAX_SEGMENTS {
            return Err(TaxonomyError::UnsafePath(format!(
                "path must have 1..{MAX_SEGMENTS} segments"
            )));
        }
        for segment in &segments {
            if segment == ".." || segment == "." || segment.is_empty() {
                return Err(TaxonomyError::UnsafePath(format!(
                    "invalid path segment '{segment}'"
                )));
            }
            if !segment_re.is_match(segment) {
                return Err(TaxonomyError::UnsafePath(format!(
                    "segment '{segment}' does not match the allowed naming pattern"
                )));
            }
        }

        Ok(Self { segments })
    }

    pub fn as_canonical_string(&self) -> String {
        self.segments.join("/")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolve to a filesystem location rooted at `root`, verifying the
    /// result is still contained within `root` (defense in depth against a
    /// symlink planted after construction-time validation).
    pub fn resolve_under(&self, root: &Path) -> Result<PathBuf, TaxonomyError> {
        let mut resolved = root.to_path_buf();
        for segment in &self.segments {
            resolved.push(segment);
        }

        let root_canon = root
            .canonicalize()
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        let parent = resolved.parent().unwrap_or(&resolved);
        let parent_canon = if parent.exists() {
            parent
                .canonicalize()
                .map_err(|e| TaxonomyError::Storage(e.into()))?
        } else {
            root_canon.clone()
        };
        if !parent_canon.starts_with(&root_canon) {
            return Err(TaxonomyError::UnsafePath(
                "resolved path escapes the storage root".into(),
            ));
        }

        Ok(resolved)
    }
}

impl std::fmt::Display for SafePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_canonical_path() {
        let path = SafePath::parse_canonical("coding/rust/error-handling").unwrap();
        assert_eq!(path.as_canonical_string(), "coding/rust/error-handling");
    }

    #[test]
    fn rejects_traversal_segments() {
        let result = SafePath::parse_canonical("coding/../etc/passwd");
        assert!(matches!(result, Err(TaxonomyError::UnsafePath(_))));
    }

    #[test]
    fn rejects_absolute_paths() {
        let result = SafePath::parse_canonical("/etc/passwd");
        assert!(matches!(result, Err(TaxonomyError::UnsafePath(_))));
    }

    #[test]
    fn rejects_null_bytes() {
        let result = SafePath::parse_canonical("coding/\0evil");
        assert!(matches!(result, Err(TaxonomyError::UnsafePath(_))));
    }

    #[test]
    fn rejects_uppercase_segments() {
        let result = SafePath::parse_canonical("Coding/Rust");
        assert!(matches!(result, Err(TaxonomyError::UnsafePath(_))));
    }

    #[test]
    fn rejects_more_than_eight_segments() {
        let raw = (0..9).map(|i| format!("seg{i}")).collect::<Vec<_>>().join("/");
        let result = SafePath::parse_canonical(&raw);
        assert!(matches!(result, Err(TaxonomyError::UnsafePath(_))));
    }

    #[test]
    fn resolve_under_stays_within_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = SafePath::parse_canonical("a/b").unwrap();
        let resolved = path.resolve_under(dir.path()).unwrap();
        assert!(resolved.starts_with(dir.path()));
    }
}
