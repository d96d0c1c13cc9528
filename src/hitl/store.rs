//! Durable repository for `HitlInteraction` rows.

use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::types::{HitlInteraction, HitlType, InteractionStatus};

pub struct HitlStore {
    conn: Mutex<Connection>,
}

impl HitlStore {
    pub fn open(database_url: &str) -> Result<Self> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory().context("failed to open in-memory database")?
        } else {
            Connection::open(database_url).context("failed to open database")?
        };
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().expect("hitl store lock poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS hitl_interactions (
                job_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                interaction_type TEXT NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT,
                response_payload TEXT,
                created_at TEXT NOT NULL,
                responded_at TEXT,
                timeout_at TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (job_id, round)
            );",
        )
        .context("failed to run hitl store migrations")?;
        Ok(())
    }

    pub fn insert(&self, interaction: &HitlInteraction) -> Result<()> {
        let conn = self.conn.lock().expect("hitl store lock poisoned");
        conn.execute(
            "INSERT INTO hitl_interactions (job_id, round, interaction_type, prompt, response,
                response_payload, created_at, responded_at, timeout_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                interaction.job_id.to_string(),
                interaction.round,
                type_to_str(interaction.interaction_type),
                interaction.prompt.to_string(),
                interaction.response.map(action_to_str),
                interaction
                    .response_payload
                    .as_ref()
                    .map(|v| v.to_string()),
                interaction.created_at.to_rfc3339(),
                interaction.responded_at.map(|t| t.to_rfc3339()),
                interaction.timeout_at.to_rfc3339(),
                status_to_str(interaction.status),
            ],
        )
        .context("failed to insert hitl interaction")?;
        Ok(())
    }

    pub fn update(&self, interaction: &HitlInteraction) -> Result<()> {
        let conn = self.conn.lock().expect("hitl store lock poisoned");
        conn.execute(
            "UPDATE hitl_interactions SET response=?3, response_payload=?4, responded_at=?5,
                status=?6 WHERE job_id=?1 AND round=?2",
            params![
                interaction.job_id.to_string(),
                interaction.round,
                interaction.response.map(action_to_str),
                interaction
                    .response_payload
                    .as_ref()
                    .map(|v| v.to_string()),
                interaction.responded_at.map(|t| t.to_rfc3339()),
                status_to_str(interaction.status),
            ],
        )
        .context("failed to update hitl interaction")?;
        Ok(())
    }

    /// The current pending (or most recent) interaction for a job, if any.
    pub fn latest(&self, job_id: Uuid) -> Result<Option<HitlInteraction>> {
        let conn = self.conn.lock().expect("hitl store lock poisoned");
        conn.query_row(
            "SELECT job_id, round, interaction_type, prompt, response, response_payload,
                created_at, responded_at, timeout_at, status FROM hitl_interactions
             WHERE job_id = ?1 ORDER BY round DESC LIMIT 1",
            params![job_id.to_string()],
            row_to_interaction,
        )
        .optional()
        .context("failed to query latest hitl interaction")
    }

    pub fn next_round(&self, job_id: Uuid) -> Result<u32> {
        Ok(self.latest(job_id)?.map(|i| i.round + 1).unwrap_or(1))
    }
}

fn type_to_str(t: HitlType) -> &'static str {
    match t {
        HitlType::Clarify => "clarify",
        HitlType::StructureFix => "structure_fix",
        HitlType::Confirm => "confirm",
        HitlType::Preview => "preview",
        HitlType::Validate => "validate",
    }
}

fn parse_type(s: &str) -> HitlType {
    match s {
        "structure_fix" => HitlType::StructureFix,
        "confirm" => HitlType::Confirm,
        "preview" => HitlType::Preview,
        "validate" => HitlType::Validate,
        _ => HitlType::Clarify,
    }
}

fn action_to_str(a: super::types::HitlAction) -> &'static str {
    use super::types::HitlAction::*;
    match a {
        Proceed => "proceed",
        Revise => "revise",
        Refine => "refine",
        Cancel => "cancel",
    }
}

fn parse_action(s: &str) -> super::types::HitlAction {
    use super::types::HitlAction::*;
    match s {
        "revise" => Revise,
        "refine" => Refine,
        "cancel" => Cancel,
        _ => Proceed,
    }
}

fn status_to_str(s: InteractionStatus) -> &'static str {
    match s {
        InteractionStatus::Pending => "pending",
        InteractionStatus::Answered => "answered",
        InteractionStatus::TimedOut => "timed_out",
        InteractionStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> InteractionStatus {
    match s {
        "answered" => InteractionStatus::Answered,
        "timed_out" => InteractionStatus::TimedOut,
        "cancelled" => InteractionStatus::Cancelled,
        _ => InteractionStatus::Pending,
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_interaction(row: &rusqlite::Row) -> rusqlite::Result<HitlInteraction> {
    let job_id: String = row.get(0)?;
    let interaction_type: String = row.get(2)?;
    let prompt: String = row.get(3)?;
    let response: Option<String> = row.get(4)?;
    let response_payload: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    let responded_at: Option<String> = row.get(7)?;
    let timeout_at: String = row.get(8)?;
    let status: String = row.get(9)?;

    Ok(HitlInteraction {
        job_id: Uuid::parse_str(&job_id).unwrap_or_default(),
        round: row.get(1)?,
        interaction_type: parse_type(&interaction_type),
        prompt: serde_json::from_str(&prompt).unwrap_or(serde_json::Value::Null),
        response: response.as_deref().map(parse_action),
        response_payload: response_payload.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&created_at),
        responded_at: responded_at.map(|s| parse_ts(&s)),
        timeout_at: parse_ts(&timeout_at),
        status: parse_status(&status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(job_id: Uuid, round: u32) -> HitlInteraction {
        HitlInteraction {
            job_id,
            round,
            interaction_type: HitlType::Clarify,
            prompt: serde_json::json!({"questions": ["why?"]}),
            response: None,
            response_payload: None,
            created_at: Utc::now(),
            responded_at: None,
            timeout_at: Utc::now() + chrono::Duration::hours(1),
            status: InteractionStatus::Pending,
        }
    }

    #[test]
    fn insert_then_latest_round_trips() {
        let store = HitlStore::open(":memory:").unwrap();
        let job_id = Uuid::new_v4();
        store.insert(&sample(job_id, 1)).unwrap();
        let latest = store.latest(job_id).unwrap().unwrap();
        assert_eq!(latest.round, 1);
        assert_eq!(latest.status, InteractionStatus::Pending);
    }

    #[test]
    fn next_round_increments() {
        let store = HitlStore::open(":memory:").unwrap();
        let job_id = Uuid::new_v4();
        assert_eq!(store.next_round(job_id).unwrap(), 1);
        store.insert(&sample(job_id, 1)).unwrap();
        assert_eq!(store.next_round(job_id).unwrap(), 2);
    }

    #[test]
    fn update_persists_answered_status() {
        let store = HitlStore::open(":memory:").unwrap();
        let job_id = Uuid::new_v4();
        let mut interaction = sample(job_id, 1);
        store.insert(&interaction).unwrap();
        interaction.status = InteractionStatus::Answered;
        interaction.response = Some(super::super::types::HitlAction::Proceed);
        interaction.responded_at = Some(Utc::now());
        store.update(&interaction).unwrap();
        let latest = store.latest(job_id).unwrap().unwrap();
        assert_eq!(latest.status, InteractionStatus::Answered);
    }
}
