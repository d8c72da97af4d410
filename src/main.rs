use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parcel_service::api;
use parcel_service::config::{Config, StoreBackend};
use parcel_service::error::AppError;
use parcel_service::state::AppState;
use parcel_service::store::memory::InMemoryStore;

#[derive(Parser)]
#[command(name = "parcel-service", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Server {
        /// Keep all data in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Command::Server { in_memory } => {
            let backend = if in_memory {
                StoreBackend::Memory
            } else {
                config.store_backend
            };
            serve(&config, backend).await
        }
        Command::Migrate => migrate(&config).await,
    }
}

async fn serve(config: &Config, backend: StoreBackend) -> Result<(), AppError> {
    let state = match backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; data is lost on shutdown");
            let max_connections = config.database.max_open_conn() as usize;
            let store = InMemoryStore::with_max_connections(max_connections);
            AppState::new(
                Arc::new(store.clone()),
                Arc::new(store),
                config.assign_timeout,
            )
        }
        StoreBackend::Postgres => postgres_state(config).await?,
    };

    let app = api::rest::router(Arc::new(state));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, ?backend, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    tracing::info!("http server stopped");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn postgres_state(config: &Config) -> Result<AppState, AppError> {
    use parcel_service::store::postgres::PgStore;

    let store = PgStore::connect(&config.database)
        .await
        .map_err(|err| AppError::Internal(format!("failed to connect to postgres: {err}")))?;

    Ok(AppState::new(
        Arc::new(store.clone()),
        Arc::new(store),
        config.assign_timeout,
    ))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_state(_config: &Config) -> Result<AppState, AppError> {
    Err(AppError::Internal(
        "built without the postgres feature; use --in-memory".to_string(),
    ))
}

#[cfg(feature = "postgres")]
async fn migrate(config: &Config) -> Result<(), AppError> {
    use parcel_service::store::postgres::PgStore;

    let store = PgStore::connect(&config.database)
        .await
        .map_err(|err| AppError::Internal(format!("failed to connect to postgres: {err}")))?;
    store
        .migrate()
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;

    tracing::info!(database = %config.database.name, "migrations applied");
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn migrate(_config: &Config) -> Result<(), AppError> {
    Err(AppError::Internal(
        "built without the postgres feature".to_string(),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
