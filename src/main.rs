use actix_web::{App, HttpServer, web};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, filter::LevelFilter};
mod api;
use crate::api::{
    health::health_config,
    job::{handlers::job_config, JobService},
    validation,
};
mod config;
mod db;
mod error;
mod shutdown;
mod sync;
mod worker;
use crate::db::{JobRepository, MemoryProgressStore, ProgressStore};
use crate::shutdown::ShutdownCoordinator;
use crate::sync::{mapper::FieldMapper, simulated, JobOrchestrator, OrchestratorSettings};
use crate::worker::ResumeSweeper;

/// Chunked synchronization of source profiles into destination lists
#[derive(Parser)]
#[command(name = "list-sync", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
}

/// Daily-rotating file per level plus console output.
/// Files are created as: logs/info.log.2024-12-22, logs/error.log.2024-12-22, etc.
fn init_logging(log_dir: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    let info_file = tracing_appender::rolling::daily(log_dir, "info.log");
    let warn_file = tracing_appender::rolling::daily(log_dir, "warn.log");
    let error_file = tracing_appender::rolling::daily(log_dir, "error.log");
    let debug_file = tracing_appender::rolling::daily(log_dir, "debug.log");

    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .with(debug_layer)
        .init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let config = config::Config::from_env()
        .expect("Failed to load configuration");

    std::fs::create_dir_all(&config.log_dir)
        .expect("Failed to create logs directory");
    init_logging(&config.log_dir);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => migrate(&config).await,
        Command::Serve => serve(config).await,
    }
}

async fn migrate(config: &config::Config) -> std::io::Result<()> {
    let Some(database_url) = &config.database_url else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "DATABASE_URL must be set to run migrations",
        ));
    };

    let pool = db::connection::get_connection(database_url, config.max_db_connections).await
        .expect("Failed to connect to database");
    db::migrations::run_migrations(&pool).await
        .expect("Failed to run database migrations");
    pool.close().await;
    Ok(())
}

async fn serve(config: config::Config) -> std::io::Result<()> {
    info!("Starting list-sync");
    info!("Configuration loaded successfully:");
    info!("  - Max payload size: {} bytes", config.max_payload_size);
    info!("  - Max concurrent chunks: {}", config.max_concurrent_jobs);
    info!("  - Chunk size: {}", config.chunk_size);
    info!(
        "  - Poll: every {:?}, up to {} attempts",
        config.poll_delay, config.poll_max_attempts
    );
    info!("  - Contact key: {}", config.contact_key);

    let store: Arc<dyn ProgressStore> = match &config.database_url {
        Some(database_url) => {
            let pool = db::connection::get_connection(database_url, config.max_db_connections).await
                .expect("Failed to connect to database");
            info!(
                "Database connection pool established (max {} connections)",
                config.max_db_connections
            );

            // Auto-migrate when starting the server
            db::migrations::run_migrations(&pool).await
                .expect("Failed to run database migrations");
            Arc::new(JobRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, progress is kept in memory and lost on restart");
            Arc::new(MemoryProgressStore::new())
        }
    };

    let orchestrator = JobOrchestrator::new(
        store.clone(),
        simulated::collaborators(config.simulated_profiles),
        FieldMapper::new(config.contact_key.clone(), config.contact_fallbacks.clone()),
        OrchestratorSettings {
            chunk_size: config.chunk_size,
            max_concurrent_chunks: config.max_concurrent_jobs,
            poll: config.poll_settings(),
        },
    );

    // watch channel allows multiple receivers to get the same value
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut worker_handles = Vec::new();

    if config.sweep_interval.is_zero() {
        info!("Resume sweeper disabled; jobs advance on demand");
    } else {
        let sweeper = ResumeSweeper::new(orchestrator.clone(), config.sweep_interval);
        let sweeper_shutdown_rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(async move {
            sweeper.run(sweeper_shutdown_rx).await;
        }));
        info!("Spawned resume sweeper");
    }

    let job_service = web::Data::new(JobService::new(orchestrator.clone()));
    let store_data = web::Data::from(store.clone());
    let max_payload_size = config.max_payload_size;

    let server = HttpServer::new(move || {
        let payload_config = web::PayloadConfig::default()
            .limit(max_payload_size);

        App::new()
            .app_data(store_data.clone()) // Share the progress store for health checks
            .app_data(job_service.clone())
            .app_data(payload_config) // Global payload size limit
            .app_data(validation::json_config().limit(max_payload_size)) // Global validation config
            .configure(health_config) // Health check endpoints
            .configure(job_config)
    });

    info!("Server starting on http://{}:{}", config.bind_addr, config.port);

    let server = server
        .bind((config.bind_addr.as_str(), config.port))?
        .run();

    // Get server handle for graceful shutdown
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let coordinator = ShutdownCoordinator::new(
        server_handle,
        server_task,
        worker_handles,
        shutdown_tx,
        orchestrator,
        store,
    );

    coordinator.wait_for_shutdown().await
}
