use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_classifier::{Classifier, LocalProcessRunner};
use vigil_connector::DefaultConnectorFactory;
use vigil_core::config::VigilConfig;
use vigil_engine::{Orchestrator, SqliteStore};
use vigil_scheduler::{SchedulerEngine, SchedulerHandle};

mod app;
mod http;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "vigil-gateway",
    version,
    about = "Compliance check execution and scheduling server"
)]
struct Cli {
    /// Config file. Defaults to $VIGIL_CONFIG, then ~/.vigil/vigil.toml.
    #[arg(long)]
    config: Option<String>,

    /// Override `gateway.port`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vigil_gateway=info,vigil_engine=info,vigil_scheduler=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit flag > VIGIL_CONFIG env > ~/.vigil/vigil.toml
    let config_path = cli.config.or_else(|| std::env::var("VIGIL_CONFIG").ok());
    let mut config = VigilConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        VigilConfig::default()
    });
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    // one SQLite file, one connection per subsystem
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    vigil_engine::init_db(&db)?;
    vigil_scheduler::db::init_db(&db)?;
    drop(db);
    info!("database migrations complete");

    let store = Arc::new(SqliteStore::new(Connection::open(&db_path)?)?);
    let classifier = Classifier::new(Arc::new(LocalProcessRunner::new(&config.classifier)));
    let orchestrator = Orchestrator::from_config(
        &config.connector,
        Arc::new(DefaultConnectorFactory::new(config.connector.clone())),
        store.clone(),
        store,
        classifier,
    );

    let scheduler_handle = SchedulerHandle::new(Connection::open(&db_path)?)?;
    let scheduler = SchedulerEngine::new(
        scheduler_handle,
        Arc::new(orchestrator.clone()),
        &config.scheduler,
    );

    let cancel = CancellationToken::new();
    let scheduler_task = if config.scheduler.enabled {
        Some(tokio::spawn(scheduler.clone().run(cancel.child_token())))
    } else {
        info!("scheduler disabled by config");
        None
    };
    let grace = Duration::from_secs(config.scheduler.shutdown_grace_secs);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, orchestrator, scheduler));
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Vigil gateway listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown::signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Some(task) = scheduler_task {
        shutdown::join_with_grace("scheduler", task, grace).await;
    }
    info!("Vigil gateway stopped");
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
