//! Resolution, aliasing, dependency closure, and atomic promotion (§4.4).
//!
//! Grounded on this codebase's own skill loader (flat directory + frontmatter
//! parsing), generalized into a path-namespaced taxonomy with aliases and a
//! materialized dependency closure table so reachability queries never walk
//! the graph at request time.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::TaxonomyError;

use super::draft::DraftWriter;
use super::path::SafePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    Draft,
    Active,
    Deprecated,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub skill_type: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub load_priority: Option<i64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub skill_id: String,
    pub canonical_path: String,
    pub version: String,
    pub metadata: SkillMetadata,
    pub content: String,
    pub status: SkillStatus,
}

pub struct SkillStore {
    conn: Mutex<Connection>,
    drafts: DraftWriter,
    storage_root: PathBuf,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SkillStore {
    pub fn open(database_url: &str, storage_root: PathBuf) -> anyhow::Result<Self> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(database_url)?
        };
        let store = Self {
            conn: Mutex::new(conn),
            drafts: DraftWriter::new(&storage_root),
            storage_root,
            path_locks: Mutex::new(HashMap::new()),
        };
        Ok(store)
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS skills (
                skill_id TEXT PRIMARY KEY,
                canonical_path TEXT NOT NULL,
                version TEXT NOT NULL,
                metadata TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                parent_version_id TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_skills_canonical_active
                ON skills(canonical_path) WHERE status != 'archived';

            CREATE TABLE IF NOT EXISTS aliases (
                alias_path TEXT PRIMARY KEY,
                skill_id TEXT NOT NULL REFERENCES skills(skill_id)
            );

            CREATE TABLE IF NOT EXISTS dependencies (
                skill_id TEXT NOT NULL,
                depends_on_path TEXT NOT NULL,
                PRIMARY KEY (skill_id, depends_on_path)
            );

            CREATE TABLE IF NOT EXISTS closure (
                ancestor TEXT NOT NULL,
                descendant TEXT NOT NULL,
                depth INTEGER NOT NULL,
                PRIMARY KEY (ancestor, descendant)
            );
            ",
        )
        .context("failed to run taxonomy migrations")?;
        Ok(())
    }

    pub fn drafts(&self) -> &DraftWriter {
        &self.drafts
    }

    async fn lock_for(&self, canonical_path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().await;
        locks
            .entry(canonical_path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolution order per §4.4: exact canonical match, then alias, then
    /// legacy direct/`.json`-suffixed lookup, else `NotFound`.
    pub async fn resolve(&self, identifier: &str) -> Result<String, TaxonomyError> {
        let conn = self.conn.lock().await;

        let canonical: Option<String> = conn
            .query_row(
                "SELECT canonical_path FROM skills WHERE canonical_path = ?1 AND status != 'archived'",
                params![identifier],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        if let Some(path) = canonical {
            return Ok(path);
        }

        let via_alias: Option<String> = conn
            .query_row(
                "SELECT s.canonical_path FROM aliases a JOIN skills s ON s.skill_id = a.skill_id
                 WHERE a.alias_path = ?1 AND s.status != 'archived'",
                params![identifier],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        if let Some(path) = via_alias {
            return Ok(path);
        }

        let legacy_json = format!("{identifier}.json");
        let via_legacy: Option<String> = conn
            .query_row(
                "SELECT canonical_path FROM skills WHERE canonical_path = ?1 AND status != 'archived'",
                params![legacy_json],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        if let Some(path) = via_legacy {
            return Ok(path);
        }

        Err(TaxonomyError::NotFound(identifier.to_string()))
    }

    pub async fn get(&self, canonical_path: &str) -> Result<Skill, TaxonomyError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT skill_id, canonical_path, version, metadata, content, status
             FROM skills WHERE canonical_path = ?1 AND status != 'archived'",
            params![canonical_path],
            row_to_skill,
        )
        .optional()
        .map_err(|e| TaxonomyError::Storage(e.into()))?
        .ok_or_else(|| TaxonomyError::NotFound(canonical_path.to_string()))
    }

    /// Detects whether adding `skill_path -> dependency` would create a
    /// cycle, using the materialized closure table (O(1) membership check
    /// instead of a runtime graph walk).
    async fn would_cycle(&self, skill_path: &str, dependency: &str) -> Result<bool, TaxonomyError> {
        if skill_path == dependency {
            return Ok(true);
        }
        let conn = self.conn.lock().await;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM closure WHERE ancestor = ?1 AND descendant = ?2",
                params![dependency, skill_path],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        Ok(exists.is_some())
    }

    async fn insert_closure_edges(&self, skill_path: &str, dependency: &str) -> Result<(), TaxonomyError> {
        let conn = self.conn.lock().await;
        // self-edge, direct edge, and transitive edges through both sides.
        conn.execute(
            "INSERT OR IGNORE INTO closure (ancestor, descendant, depth) VALUES (?1, ?1, 0), (?2, ?2, 0)",
            params![skill_path, dependency],
        )
        .map_err(|e| TaxonomyError::Storage(e.into()))?;
        conn.execute(
            "INSERT OR IGNORE INTO closure (ancestor, descendant, depth) VALUES (?1, ?2, 1)",
            params![skill_path, dependency],
        )
        .map_err(|e| TaxonomyError::Storage(e.into()))?;

        // skill_path inherits every ancestor-of(skill_path) -> dependency edge,
        // and every descendant-of(dependency) becomes reachable from skill_path
        // and from every ancestor of skill_path.
        conn.execute(
            "INSERT OR IGNORE INTO closure (ancestor, descendant, depth)
             SELECT c1.ancestor, c2.descendant, c1.depth + c2.depth + 1
             FROM closure c1, closure c2
             WHERE c1.descendant = ?1 AND c2.ancestor = ?2",
            params![skill_path, dependency],
        )
        .map_err(|e| TaxonomyError::Storage(e.into()))?;
        Ok(())
    }

    /// Promote a draft to a canonical skill. Validates dependencies resolve
    /// and are acyclic, then writes the draft content into place and
    /// updates the index atomically under the per-path lock (§4.4).
    #[allow(clippy::too_many_arguments)]
    pub async fn promote(
        &self,
        job_id: Uuid,
        draft_skill_name: &str,
        canonical_path: &SafePath,
        metadata: SkillMetadata,
        content: String,
        overwrite: bool,
    ) -> Result<String, TaxonomyError> {
        let canonical = canonical_path.as_canonical_string();
        let lock = self.lock_for(&canonical).await;
        let _guard = lock.lock().await;

        if !overwrite {
            let conn = self.conn.lock().await;
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM skills WHERE canonical_path = ?1 AND status != 'archived'",
                    params![canonical],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| TaxonomyError::Storage(e.into()))?;
            if exists.is_some() {
                return Err(TaxonomyError::AlreadyExists(canonical));
            }
        }

        for dep in &metadata.dependencies {
            if self.resolve(dep).await.is_err() {
                return Err(TaxonomyError::NotFound(dep.clone()));
            }
            if self.would_cycle(&canonical, dep).await? {
                return Err(TaxonomyError::DependencyCycle(dep.clone()));
            }
        }

        if !self.drafts.is_complete(job_id, draft_skill_name) {
            return Err(TaxonomyError::DraftNotPromotable(job_id));
        }

        let skill_id = Uuid::new_v4().to_string();
        let skill = Skill {
            skill_id: skill_id.clone(),
            canonical_path: canonical.clone(),
            version: "1.0.0".to_string(),
            metadata: metadata.clone(),
            content,
            status: SkillStatus::Active,
        };

        {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO skills (skill_id, canonical_path, version, metadata, content, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(canonical_path) DO UPDATE SET
                    version=excluded.version, metadata=excluded.metadata,
                    content=excluded.content, status=excluded.status",
                params![
                    skill.skill_id,
                    skill.canonical_path,
                    skill.version,
                    serde_json::to_string(&skill.metadata).map_err(|e| TaxonomyError::Storage(e.into()))?,
                    skill.content,
                    "active",
                ],
            )
            .map_err(|e| TaxonomyError::Storage(e.into()))?;

            conn.execute(
                "INSERT OR IGNORE INTO closure (ancestor, descendant, depth) VALUES (?1, ?1, 0)",
                params![canonical],
            )
            .map_err(|e| TaxonomyError::Storage(e.into()))?;

            for dep in &metadata.dependencies {
                conn.execute(
                    "INSERT OR IGNORE INTO dependencies (skill_id, depends_on_path) VALUES (?1, ?2)",
                    params![skill_id, dep],
                )
                .map_err(|e| TaxonomyError::Storage(e.into()))?;
            }
        }

        for dep in &metadata.dependencies {
            self.insert_closure_edges(&canonical, dep).await?;
        }

        Ok(canonical)
    }

    /// Adds `(alias_path -> skill_id)`. Rejected if `alias_path` collides
    /// with any non-archived skill's canonical path (§3.2 invariant: aliases
    /// must not collide with any canonical path).
    pub async fn add_alias(&self, alias: &SafePath, skill_id: &str) -> Result<(), TaxonomyError> {
        let alias_path = alias.as_canonical_string();
        let conn = self.conn.lock().await;
        let collides: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM skills WHERE canonical_path = ?1 AND status != 'archived'",
                params![alias_path],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        if collides.is_some() {
            return Err(TaxonomyError::AlreadyExists(alias_path));
        }
        conn.execute(
            "INSERT OR REPLACE INTO aliases (alias_path, skill_id) VALUES (?1, ?2)",
            params![alias_path, skill_id],
        )
        .map_err(|e| TaxonomyError::Storage(e.into()))?;
        Ok(())
    }

    pub fn storage_root(&self) -> &PathBuf {
        &self.storage_root
    }

    /// Eagerly scans the reserved always-loaded subtrees (§4.4) on startup
    /// and indexes any `SKILL.md` found there as an `Active` skill, so they
    /// resolve immediately rather than waiting on a lazy `Resolve` miss.
    /// Every other subtree under the storage root loads lazily.
    pub async fn load_always_loaded(&self) -> Result<usize, TaxonomyError> {
        const ALWAYS_LOADED: &[&str] = &["_core", "mcp_capabilities", "memory_blocks"];
        let mut loaded = 0;
        for subtree in ALWAYS_LOADED {
            let root = self.storage_root.join(subtree);
            if !root.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(Result::ok) {
                if entry.file_name() != "SKILL.md" {
                    continue;
                }
                let skill_dir = entry.path().parent().unwrap_or(&root);
                let Ok(relative) = skill_dir.strip_prefix(&self.storage_root) else {
                    continue;
                };
                let canonical_raw = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                let Ok(canonical_path) = SafePath::parse_canonical(&canonical_raw) else {
                    tracing::warn!(path = %canonical_raw, "always-loaded skill has an unsafe canonical path, skipping");
                    continue;
                };
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                let metadata = parse_frontmatter(&content).unwrap_or_else(|| SkillMetadata {
                    name: skill_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
                    description: String::new(),
                    skill_type: None,
                    weight: None,
                    load_priority: None,
                    dependencies: Vec::new(),
                    capabilities: Vec::new(),
                });

                let canonical = canonical_path.as_canonical_string();
                let conn = self.conn.lock().await;
                let skill_id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO skills (skill_id, canonical_path, version, metadata, content, status)
                     VALUES (?1, ?2, '1.0.0', ?3, ?4, 'active')
                     ON CONFLICT(canonical_path) DO NOTHING",
                    params![
                        skill_id,
                        canonical,
                        serde_json::to_string(&metadata).map_err(|e| TaxonomyError::Storage(e.into()))?,
                        content,
                    ],
                )
                .map_err(|e| TaxonomyError::Storage(e.into()))?;
                conn.execute(
                    "INSERT OR IGNORE INTO closure (ancestor, descendant, depth) VALUES (?1, ?1, 0)",
                    params![canonical],
                )
                .map_err(|e| TaxonomyError::Storage(e.into()))?;
                drop(conn);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub async fn list_tree(&self) -> Result<Vec<String>, TaxonomyError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT canonical_path FROM skills WHERE status != 'archived' ORDER BY canonical_path")
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| TaxonomyError::Storage(e.into()))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row.map_err(|e| TaxonomyError::Storage(e.into()))?);
        }
        Ok(paths)
    }
}

/// Extracts YAML frontmatter (`---\n ... \n---`) from a `SKILL.md` body, if
/// present, and decodes it into `SkillMetadata`. Returns `None` on anything
/// that isn't a well-formed frontmatter block; callers fall back to a
/// minimal metadata record derived from the directory name.
fn parse_frontmatter(content: &str) -> Option<SkillMetadata> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let yaml = &rest[..end];
    serde_yaml::from_str(yaml).ok()
}

fn row_to_skill(row: &rusqlite::Row) -> rusqlite::Result<Skill> {
    let metadata: String = row.get(3)?;
    let status: String = row.get(5)?;
    Ok(Skill {
        skill_id: row.get(0)?,
        canonical_path: row.get(1)?,
        version: row.get(2)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(SkillMetadata {
            name: String::new(),
            description: String::new(),
            skill_type: None,
            weight: None,
            load_priority: None,
            dependencies: Vec::new(),
            capabilities: Vec::new(),
        }),
        content: row.get(4)?,
        status: match status.as_str() {
            "draft" => SkillStatus::Draft,
            "deprecated" => SkillStatus::Deprecated,
            "archived" => SkillStatus::Archived,
            _ => SkillStatus::Active,
        },
    })
}

/// Depth-first cycle check used by unit tests directly against an explicit
/// adjacency map, independent of the closure table's incremental upkeep.
#[allow(dead_code)]
fn has_cycle(adjacency: &HashMap<String, Vec<String>>, start: &str) -> bool {
    fn visit(
        node: &str,
        adjacency: &HashMap<String, Vec<String>>,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
    ) -> bool {
        if done.contains(node) {
            return false;
        }
        if !visiting.insert(node.to_string()) {
            return true;
        }
        if let Some(deps) = adjacency.get(node) {
            for dep in deps {
                if visit(dep, adjacency, visiting, done) {
                    return true;
                }
            }
        }
        visiting.remove(node);
        done.insert(node.to_string());
        false
    }
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    visit(start, adjacency, &mut visiting, &mut done)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(deps: Vec<&str>) -> SkillMetadata {
        SkillMetadata {
            name: "rust-error-handling".into(),
            description: "How this codebase handles errors.".into(),
            skill_type: None,
            weight: None,
            load_priority: None,
            dependencies: deps.into_iter().map(String::from).collect(),
            capabilities: vec![],
        }
    }

    async fn store() -> SkillStore {
        let dir = tempfile::tempdir().unwrap();
        let store = SkillStore::open(":memory:", dir.path().to_path_buf()).unwrap();
        store.run_migrations().await.unwrap();
        // Keep the tempdir alive for the store's lifetime in tests by leaking it;
        // acceptable in a test-only helper.
        std::mem::forget(dir);
        store
    }

    #[tokio::test]
    async fn resolve_missing_skill_errors() {
        let store = store().await;
        let result = store.resolve("does/not-exist").await;
        assert!(matches!(result, Err(TaxonomyError::NotFound(_))));
    }

    #[tokio::test]
    async fn promote_without_dependencies_succeeds() {
        let store = store().await;
        let job_id = Uuid::new_v4();
        store.drafts().write(job_id, "rust-error-handling", "# doc").unwrap();
        let path = SafePath::parse_canonical("coding/rust/error-handling").unwrap();
        let canonical = store
            .promote(job_id, "rust-error-handling", &path, metadata(vec![]), "# doc".into(), false)
            .await
            .unwrap();
        assert_eq!(canonical, "coding/rust/error-handling");
        assert_eq!(store.resolve("coding/rust/error-handling").await.unwrap(), canonical);
    }

    #[tokio::test]
    async fn promote_conflict_without_overwrite_fails() {
        let store = store().await;
        let path = SafePath::parse_canonical("a/b").unwrap();

        let job1 = Uuid::new_v4();
        store.drafts().write(job1, "s1", "# one").unwrap();
        store.promote(job1, "s1", &path, metadata(vec![]), "# one".into(), false).await.unwrap();

        let job2 = Uuid::new_v4();
        store.drafts().write(job2, "s2", "# two").unwrap();
        let result = store.promote(job2, "s2", &path, metadata(vec![]), "# two".into(), false).await;
        assert!(matches!(result, Err(TaxonomyError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn promote_rejects_unresolvable_dependency() {
        let store = store().await;
        let job_id = Uuid::new_v4();
        store.drafts().write(job_id, "s", "# doc").unwrap();
        let path = SafePath::parse_canonical("a/b").unwrap();
        let result = store
            .promote(job_id, "s", &path, metadata(vec!["nope/nope"]), "# doc".into(), false)
            .await;
        assert!(matches!(result, Err(TaxonomyError::NotFound(_))));
    }

    #[tokio::test]
    async fn promote_rejects_cyclic_dependency() {
        let store = store().await;

        let job1 = Uuid::new_v4();
        store.drafts().write(job1, "y", "# y").unwrap();
        let path_y = SafePath::parse_canonical("y").unwrap();
        store.promote(job1, "y", &path_y, metadata(vec![]), "# y".into(), false).await.unwrap();

        let job2 = Uuid::new_v4();
        store.drafts().write(job2, "x", "# x").unwrap();
        let path_x = SafePath::parse_canonical("x").unwrap();
        store.promote(job2, "x", &path_x, metadata(vec!["y"]), "# x".into(), false).await.unwrap();

        // y now (re-)promoted depending on x would close a cycle x -> y -> x.
        let job3 = Uuid::new_v4();
        store.drafts().write(job3, "y2", "# y2").unwrap();
        let result = store
            .promote(job3, "y2", &path_y, metadata(vec!["x"]), "# y2".into(), true)
            .await;
        assert!(matches!(result, Err(TaxonomyError::DependencyCycle(_))));
    }

    #[tokio::test]
    async fn add_alias_rejects_collision_with_an_existing_canonical_path() {
        let store = store().await;
        let job_id = Uuid::new_v4();
        store.drafts().write(job_id, "s", "# doc").unwrap();
        let path = SafePath::parse_canonical("coding/rust/error-handling").unwrap();
        store.promote(job_id, "s", &path, metadata(vec![]), "# doc".into(), false).await.unwrap();

        let alias = SafePath::parse_canonical("coding/rust/error-handling").unwrap();
        let result = store.add_alias(&alias, "some-other-skill-id").await;
        assert!(matches!(result, Err(TaxonomyError::AlreadyExists(_))));
    }

    #[test]
    fn has_cycle_detects_a_simple_cycle() {
        let mut adjacency = HashMap::new();
        adjacency.insert("a".to_string(), vec!["b".to_string()]);
        adjacency.insert("b".to_string(), vec!["a".to_string()]);
        assert!(has_cycle(&adjacency, "a"));
    }

    #[test]
    fn has_cycle_returns_false_for_a_dag() {
        let mut adjacency = HashMap::new();
        adjacency.insert("a".to_string(), vec!["b".to_string()]);
        adjacency.insert("b".to_string(), vec![]);
        assert!(!has_cycle(&adjacency, "a"));
    }
}
