use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use payroll_ledger_api::{
    app,
    background::BackgroundScheduler,
    database,
    services::{notifications, tasks, BestEffort, FlutterwaveClient},
    store::PgStore,
    AppState, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = Arc::new(Config::from_env()?);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "payroll_ledger_api=debug,tower_http=debug".into());
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("Starting Payroll Ledger API server...");

    let db_pool = database::new_pool(&config.database_url, config.database_max_connections).await?;
    info!("Database connection pool created");
    database::migrate(&db_pool).await?;

    let store = PgStore::new(db_pool.clone());
    let gateway = Arc::new(FlutterwaveClient::new(config.gateway.clone())?);
    if config.gateway.secret_hash.is_none() {
        tracing::warn!("FLW_SECRET_HASH not set; webhooks are accepted unauthenticated");
    }
    let notifier = notifications::notifier_from_config(&config.smtp)?;

    let (best_effort, failures) = BestEffort::new();
    let failure_logger = tasks::log_failures(failures);

    let app_state = AppState::new(config.clone(), store, gateway, notifier, best_effort);

    let scheduler = BackgroundScheduler::new(app_state.ledger.clone(), &config.ledger_audit_cron).await?;

    let router = app(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    // Graceful shutdown
    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down gracefully...");
        }
    }

    scheduler.shutdown().await;
    failure_logger.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
