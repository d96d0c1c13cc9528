use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use skillsmith::config::{Config, LogFormat};
use skillsmith::context::CoreContext;
use skillsmith::events::EventBus;
use skillsmith::hitl::HitlCoordinator;
use skillsmith::hitl::store::HitlStore;
use skillsmith::job::JobManager;
use skillsmith::job::store::JobStore;
use skillsmith::llm::EchoLlmClient;
use skillsmith::taxonomy::SkillStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(config.log_format);
    config.ensure_storage_root().context("failed to prepare storage root")?;

    let events = EventBus::new();
    let job_store = JobStore::open(&config.database_url).context("failed to open job store")?;
    let jobs = Arc::new(JobManager::new(
        job_store,
        config.memory_ttl,
        config.memory_sweep_interval,
        events.clone(),
    ));

    let hitl_store = HitlStore::open(&config.database_url).context("failed to open hitl store")?;
    let hitl = Arc::new(HitlCoordinator::new(hitl_store, config.hitl_default_timeout));

    let taxonomy = Arc::new(
        SkillStore::open(&config.database_url, config.storage_root.clone())
            .context("failed to open taxonomy store")?,
    );
    taxonomy.run_migrations().await.context("failed to run taxonomy migrations")?;
    taxonomy.load_always_loaded().await.context("failed to preload always-loaded skills")?;

    // The LLM client and prompting layer are an external collaborator
    // (spec §1); a real deployment wires a concrete `LlmClient` in here.
    let llm = Arc::new(EchoLlmClient);

    let ctx = Arc::new(CoreContext::new(config, jobs.clone(), hitl, taxonomy, events, llm));

    ctx.engine.resume_all().await.context("failed to resume in-flight jobs")?;

    skillsmith::api::server::serve(ctx).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}
