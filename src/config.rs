//! Runtime configuration for the skill-authoring service.
//!
//! Loaded once at startup from the process environment (`.env` is consulted
//! first, via `dotenvy`, then real environment variables take precedence).
//! Every option in this struct corresponds to one of the recognized
//! environment variables; missing required values fail fast rather than
//! falling back to a silently wrong default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

/// Fully resolved configuration for one process run.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub storage_root: PathBuf,
    pub hitl_default_timeout: Duration,
    pub memory_ttl: Duration,
    pub memory_sweep_interval: Duration,
    pub phase_llm_timeout: Duration,
    pub worker_concurrency: usize,
    pub cors_origins: Vec<String>,
    pub bind_addr: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from the environment, failing fast on anything
    /// malformed. `DATABASE_URL` has no default: callers must set it, even
    /// to `:memory:` for a throwaway run.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set (use ':memory:' for an ephemeral database)")?;

        let storage_root = std::env::var("STORAGE_ROOT")
            .unwrap_or_else(|_| "./skills".to_string())
            .into();

        let hitl_default_timeout =
            Duration::from_secs(parse_secs("HITL_DEFAULT_TIMEOUT_SECONDS", 3600)?);
        let memory_ttl = Duration::from_secs(parse_secs("MEMORY_TTL_SECONDS", 3600)?);
        let memory_sweep_interval = Duration::from_secs(parse_secs("MEMORY_SWEEP_SECONDS", 300)?);
        let phase_llm_timeout = Duration::from_secs(parse_secs("PHASE_LLM_TIMEOUT_SECONDS", 300)?);

        let worker_concurrency = match std::env::var("WORKER_CONCURRENCY") {
            Ok(v) => v
                .parse::<usize>()
                .with_context(|| format!("WORKER_CONCURRENCY must be a positive integer, got '{v}'"))?,
            Err(_) => std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4),
        };
        if worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") => LogFormat::Pretty,
            Ok(other) => return Err(anyhow!("LOG_FORMAT must be 'pretty' or 'json', got '{other}'")),
            Err(_) => LogFormat::Pretty,
        };

        Ok(Self {
            database_url,
            storage_root,
            hitl_default_timeout,
            memory_ttl,
            memory_sweep_interval,
            phase_llm_timeout,
            worker_concurrency,
            cors_origins,
            bind_addr,
            log_format,
        })
    }

    pub fn ensure_storage_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage_root).context("failed to create storage root")?;
        std::fs::create_dir_all(self.storage_root.join("_drafts"))
            .context("failed to create drafts directory")?;
        Ok(())
    }
}

fn parse_secs(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{v}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "STORAGE_ROOT",
            "HITL_DEFAULT_TIMEOUT_SECONDS",
            "MEMORY_TTL_SECONDS",
            "MEMORY_SWEEP_SECONDS",
            "PHASE_LLM_TIMEOUT_SECONDS",
            "WORKER_CONCURRENCY",
            "CORS_ORIGINS",
            "BIND_ADDR",
            "LOG_FORMAT",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn missing_database_url_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn defaults_are_applied_when_only_database_url_is_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("DATABASE_URL", ":memory:") };
        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, ":memory:");
        assert_eq!(config.memory_ttl, Duration::from_secs(3600));
        assert_eq!(config.memory_sweep_interval, Duration::from_secs(300));
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert!(config.worker_concurrency >= 1);
        clear_env();
    }

    #[test]
    fn malformed_log_format_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("DATABASE_URL", ":memory:") };
        unsafe { std::env::set_var("LOG_FORMAT", "xml") };
        let result = Config::from_env();
        assert!(result.is_err());
        clear_env();
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("DATABASE_URL", ":memory:") };
        unsafe { std::env::set_var("CORS_ORIGINS", "https://a.test, https://b.test") };
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.cors_origins,
            vec!["https://a.test".to_string(), "https://b.test".to_string()]
        );
        clear_env();
    }
}
