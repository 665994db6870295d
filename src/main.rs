//! Scanforge master daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use scanforge::adapters::http::HttpAgentChannel;
use scanforge::adapters::sqlite::{
    create_pool, migrate, PoolConfig, SqliteAgentRegistry, SqlitePolicyRuleRepository, SqliteProjectRepository,
    SqliteStageResultRepository, SqliteTaskRepository, SqliteWorkflowRepository,
};
use scanforge::domain::models::Config;
use scanforge::domain::ports::NullTagService;
use scanforge::infrastructure::config::ConfigLoader;
use scanforge::infrastructure::logging;
use scanforge::services::{
    ApiProvider, DatabaseProvider, FileProvider, ManualProvider, PolicyEnforcer, PreviousStageProvider,
    ProjectTargetProvider, ProviderRegistry, ResourceAllocator, Scheduler, TargetProviderService, TaskDispatcher,
};

#[derive(Parser)]
#[command(name = "scanforge", about = "Distributed security-scan orchestrator (master)", version)]
struct Cli {
    /// Path to the configuration file (defaults to ./scanforge.yaml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon.
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Validate the configuration and exit.
    CheckConfig,
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("Failed to load configuration")?;

    if matches!(cli.command, Commands::CheckConfig) {
        println!("configuration ok");
        return Ok(());
    }

    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    let pool = create_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await
    .context("Failed to open database")?;

    let applied = migrate(&pool).await.context("Failed to run migrations")?;
    if applied > 0 {
        info!(applied, "database migrations applied");
    }
    if matches!(cli.command, Commands::Migrate) {
        println!("database schema is up to date");
        return Ok(());
    }

    // Repositories.
    let projects = Arc::new(SqliteProjectRepository::new(pool.clone()));
    let workflows = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
    let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let results = Arc::new(SqliteStageResultRepository::new(pool.clone()));
    let agents = Arc::new(SqliteAgentRegistry::new(pool.clone()));
    let rules = Arc::new(SqlitePolicyRuleRepository::new(pool.clone()));

    // Target source providers.
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(Arc::new(ManualProvider));
    registry.register(Arc::new(ProjectTargetProvider));
    registry.register(Arc::new(FileProvider));
    registry.register(Arc::new(ApiProvider));
    registry.register(Arc::new(DatabaseProvider::new(pool.clone())));
    registry.register(Arc::new(PreviousStageProvider::new(
        workflows.clone(),
        tasks.clone(),
        results.clone(),
    )));
    let provider = Arc::new(TargetProviderService::new(registry));

    // Dispatch pipeline.
    let enforcer = Arc::new(PolicyEnforcer::new(rules));
    let allocator = Arc::new(ResourceAllocator::new(Arc::new(NullTagService)));
    let channel = Arc::new(
        HttpAgentChannel::new(
            config.dispatch.agent_base_url.clone(),
            Duration::from_secs(config.dispatch.request_timeout_secs.max(1)),
        )
        .context("Failed to build agent channel")?,
    );
    let dispatcher = Arc::new(
        TaskDispatcher::new(enforcer, allocator, agents.clone(), tasks.clone(), channel)
            .with_rate_limit(config.dispatch.rate_per_second)
            .with_concurrency(config.dispatch.concurrency),
    );

    let scheduler = Scheduler::new(projects, workflows, tasks, provider, dispatcher, config.scheduler.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    scheduler.run(shutdown_rx).await;
    info!("scanforge master stopped");
    Ok(())
}
