use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reportd_core::config::ReportdConfig;
use reportd_ledger::Ledger;
use reportd_mail::SmtpMailer;
use reportd_render::HttpRenderer;
use reportd_scheduler::{
    ArtifactStore, ConcurrencyGate, Dispatcher, RetentionSweeper, RunExecutor, ScheduleService,
    SchedulerEngine, SettingsCache,
};
use tracing::info;

mod app;
mod http;

/// Scheduled dashboard report service.
#[derive(Debug, Parser)]
#[command(name = "reportd", version, about)]
struct Cli {
    /// Config file (overrides REPORTD_CONFIG and ~/.reportd/reportd.toml).
    #[arg(short, long)]
    config: Option<String>,

    /// Listen port (overrides `[server] port`).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "reportd=info,reportd_gateway=info,reportd_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > REPORTD_CONFIG env > ~/.reportd/reportd.toml
    let mut config = ReportdConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        ReportdConfig::default()
    });
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    let ledger = Arc::new(Ledger::new(db)?);
    info!("database migrations complete");

    std::fs::create_dir_all(&config.artifacts.dir)?;
    let store = Arc::new(ArtifactStore::new(&config.artifacts.dir));
    let settings = Arc::new(SettingsCache::new(ledger.clone()));
    let gate = Arc::new(ConcurrencyGate::new(Duration::from_secs(
        config.scheduler.gate_timeout_secs,
    )));

    let renderer = Arc::new(HttpRenderer::new(&config.renderer)?);
    let mailer = Arc::new(SmtpMailer::default());
    let executor = Arc::new(RunExecutor::new(
        ledger.clone(),
        store.clone(),
        renderer,
        mailer,
        settings.clone(),
        gate.clone(),
        config.smtp.clone(),
    ));

    // Run tickets: engine + manual triggers -> worker pool
    let (dispatcher, tickets) = Dispatcher::channel(config.scheduler.dispatch_queue);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let workers = tokio::spawn(reportd_scheduler::run_workers(
        executor,
        tickets,
        shutdown_rx.clone(),
    ));

    let engine = SchedulerEngine::new(
        ledger.clone(),
        dispatcher.clone(),
        Duration::from_secs(config.scheduler.tick_secs),
    );
    tokio::spawn(engine.run(shutdown_rx.clone()));

    let sweeper = RetentionSweeper::new(
        ledger.clone(),
        store.clone(),
        settings.clone(),
        Duration::from_secs(config.scheduler.sweep_interval_secs),
    );
    tokio::spawn(sweeper.run(shutdown_rx));

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let schedules = ScheduleService::new(ledger, store, settings.clone(), dispatcher);
    let state = Arc::new(app::AppState::new(config, schedules, settings, gate));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("reportd listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop the engine and sweeper, then let in-flight runs reach a terminal state
    let _ = shutdown_tx.send(true);
    if let Err(e) = workers.await {
        tracing::error!("dispatch workers ended abnormally: {e}");
    }
    info!("reportd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
