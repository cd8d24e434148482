use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypoint_api::background::{client_data_retention, event_persistence};
use waypoint_api::config::{ServerConfig, StoreBackend};
use waypoint_api::router::{build_app_router, invalid_cors_origins};
use waypoint_api::state::AppState;
use waypoint_api::store::{MemoryStore, Stores};
use waypoint_api::ws;

/// Attempts of the startup database health ping.
const DB_HEALTH_ATTEMPTS: u32 = 5;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waypoint_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => fatal(e.code(), &e),
    };
    let invalid = invalid_cors_origins(&config);
    if !invalid.is_empty() {
        fatal("INVALID_ENV", &format!("invalid CORS origins: {invalid:?}"));
    }
    tracing::info!(
        host = %config.host,
        port = %config.port,
        store_backend = ?config.store_backend,
        "Loaded server configuration",
    );

    // --- Stores ---
    let (pool, stores) = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config.database_url.as_deref().unwrap_or_default();
            let pool = match waypoint_db::create_pool(database_url).await {
                Ok(pool) => pool,
                Err(e) => fatal("DB_CONNECT", &e),
            };
            tracing::info!("Database connection pool created");

            if let Err(e) = waypoint_db::wait_until_healthy(&pool, DB_HEALTH_ATTEMPTS).await {
                fatal("DB_UNHEALTHY", &e);
            }
            tracing::info!("Database health check passed");

            if let Err(e) = waypoint_db::run_migrations(&pool).await {
                fatal("DB_MIGRATE", &e);
            }
            tracing::info!("Database migrations applied");

            (Some(pool.clone()), Stores::postgres(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store backend, state is lost on restart");
            (None, Stores::memory(Arc::new(MemoryStore::default())))
        }
    };

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let cancel = CancellationToken::new();

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), cancel.child_token());

    // --- Event bus ---
    let event_bus = Arc::new(waypoint_events::EventBus::default());
    // Cancelled separately so buffered events are drained first.
    let persistence_cancel = CancellationToken::new();
    let mut persistence_handle = tokio::spawn(event_persistence::run(
        Arc::clone(&stores.biz),
        event_bus.subscribe(),
        persistence_cancel.clone(),
    ));

    // --- Client data retention ---
    let retention_handle = tokio::spawn(client_data_retention::run(
        Arc::clone(&stores.client_data),
        client_data_retention::CLEANUP_INTERVAL,
        cancel.child_token(),
    ));
    tracing::info!("Background services started (heartbeat, event persistence, retention)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        event_bus: Arc::clone(&event_bus),
        stores,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = match config.host.parse() {
        Ok(host) => host,
        Err(e) => fatal("INVALID_ENV", &e),
    };
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => fatal("BIND", &e),
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    cancel.cancel();
    let _ = tokio::time::timeout(timeout, heartbeat_handle).await;
    let _ = tokio::time::timeout(timeout, retention_handle).await;
    drop(event_bus);
    if tokio::time::timeout(timeout, &mut persistence_handle).await.is_err() {
        tracing::warn!("Event persistence did not drain in time, cancelling");
        persistence_cancel.cancel();
        let _ = persistence_handle.await;
    }
    tracing::info!("Background services stopped");

    tracing::info!("Graceful shutdown complete");
}

fn fatal(code: &str, error: &dyn std::fmt::Display) -> ! {
    tracing::error!(code, error = %error, "Fatal startup error");
    std::process::exit(1);
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
