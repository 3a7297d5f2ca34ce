use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tns_api::{
    presence::ConnectionRegistry,
    push,
    routes,
    scheduler::AvailabilityScheduler,
    store::{PgPresenceStore, PresenceStore},
    AppState, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize database
    let pool = tns_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    tns_shared::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn PresenceStore> = Arc::new(PgPresenceStore::new(pool));
    let push = push::from_config(&config)
        .await
        .context("Failed to initialize push gateway")?;
    let state = AppState::new(config, store.clone(), push);

    let mut cron = if state.config.scheduler_enabled {
        let scheduler = Arc::new(AvailabilityScheduler::new(
            store,
            state.dispatcher.clone(),
            state.config.school_timezone,
            state.config.pre_alert_minutes,
        ));
        Some(scheduler.start().await.context("Failed to start scheduler")?)
    } else {
        tracing::warn!("SCHEDULER_ENABLED=false, availability will not follow the timetable");
        None
    };

    let addr: SocketAddr = state
        .config
        .bind_address
        .parse()
        .context("Invalid BIND_ADDRESS")?;
    let registry = state.registry.clone();
    let router = routes::create_router(state);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("TNS API listening on http://{}", addr);

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .context("Server error")?;

    if let Some(cron) = cron.as_mut() {
        if let Err(e) = cron.shutdown().await {
            tracing::warn!("Scheduler shutdown failed: {:?}", e);
        }
    }

    tracing::info!("TNS API stopped");
    Ok(())
}

/// `RUST_LOG` filters; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tns_api=info,tns_shared=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve on Ctrl-C or SIGTERM, then close every open event stream so the
/// server can drain
async fn shutdown_signal(registry: Arc<ConnectionRegistry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received, closing event streams");
    registry.close_all();
}
