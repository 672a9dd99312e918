use nodeflow_ai::HttpBackendFactory;
use nodeflow_core::Result;
use nodeflow_nodes::{NodeServices, default_registry};
use nodeflow_server::db::{
    PgCredentialStore, PgEntitlements, PgExecutionStore, PgWorkflowRepository,
};
use nodeflow_server::{AppState, ServerConfig, StartupError, router};
use nodeflow_workflow::{BroadcastStatusPublisher, StepJournal, WorkflowOrchestrator};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    let llm = HttpBackendFactory::new(config.providers.clone(), config.http_timeout())
        .map_err(|e| StartupError::Providers {
            details: e.to_string(),
        })?;
    let services = NodeServices::new(
        Arc::new(PgCredentialStore::new(db_pool.clone())),
        Arc::new(llm),
    );

    let status = BroadcastStatusPublisher::new(config.status_buffer);
    let orchestrator = WorkflowOrchestrator::new(
        Arc::new(PgWorkflowRepository::new(db_pool.clone())),
        Arc::new(PgExecutionStore::new(db_pool.clone())),
        Arc::new(default_registry(&services)),
    )
    .with_entitlements(Arc::new(PgEntitlements::new(db_pool)))
    .with_steps(Arc::new(StepJournal::new(config.engine.retry_policy())))
    .with_status_publisher(Arc::new(status.clone()))
    .with_quota(config.engine.quota_policy());

    let app = router(AppState::new(Arc::new(orchestrator), status));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| StartupError::Serve {
            details: format!("failed to bind to {}: {e}", config.bind_addr),
        })?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
