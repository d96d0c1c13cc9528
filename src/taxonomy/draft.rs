//! Draft storage (§6.3): `_drafts/<job_id>/<skill-name>/SKILL.md` plus an
//! atomically-last-written `.complete` sentinel.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

const SENTINEL: &str = ".complete";

pub struct DraftWriter {
    root: PathBuf,
}

impl DraftWriter {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            root: storage_root.join("_drafts"),
        }
    }

    fn draft_dir(&self, job_id: Uuid, skill_name: &str) -> PathBuf {
        self.root.join(job_id.to_string()).join(skill_name)
    }

    /// Write every file, then the sentinel last, so a reader never observes
    /// a partially-written draft.
    pub fn write(&self, job_id: Uuid, skill_name: &str, content: &str) -> Result<PathBuf> {
        let dir = self.draft_dir(job_id, skill_name);
        std::fs::create_dir_all(&dir).context("failed to create draft directory")?;
        std::fs::write(dir.join("SKILL.md"), content).context("failed to write SKILL.md")?;
        std::fs::write(dir.join(SENTINEL), "").context("failed to write draft sentinel")?;
        Ok(dir)
    }

    pub fn is_complete(&self, job_id: Uuid, skill_name: &str) -> bool {
        self.draft_dir(job_id, skill_name).join(SENTINEL).exists()
    }

    pub fn read_content(&self, job_id: Uuid, skill_name: &str) -> Result<String> {
        let dir = self.draft_dir(job_id, skill_name);
        std::fs::read_to_string(dir.join("SKILL.md")).context("failed to read draft SKILL.md")
    }

    pub fn location(&self, job_id: Uuid, skill_name: &str) -> PathBuf {
        self.draft_dir(job_id, skill_name)
    }
}
