//! # Server Configuration
//!
//! Router assembly and process lifecycle for the operator API, including the
//! background executor and scheduler.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::queue::DbWorkQueue;
use crate::scheduler::SyncScheduler;
use crate::sync_executor::SyncExecutor;
use crate::sync_orchestrator::SyncOrchestrator;
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl AppState {
    /// Builds state with a database-backed queue when the worker is enabled,
    /// so triggered syncs are enqueued instead of run inline.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        let mut orchestrator = SyncOrchestrator::new(db.clone(), &config);
        if config.worker.enabled {
            orchestrator = orchestrator.with_queue(Arc::new(DbWorkQueue::new(db.clone())));
        }
        Self {
            config,
            db,
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/districts/{district_id}/syncs",
            post(handlers::syncs::trigger_sync).get(handlers::syncs::list_syncs),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::health::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Starts the API plus background workers and serves until `shutdown` fires.
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config), db.clone());
    let queue = Arc::new(
        DbWorkQueue::new(db.clone())
            .with_stale_after(Duration::from_secs(config.sync.lease_ttl_seconds)),
    );

    let mut background = Vec::new();
    if config.worker.enabled {
        let executor = SyncExecutor::new(
            Arc::clone(&state.orchestrator),
            Arc::clone(&queue),
            config.worker.clone(),
        );
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { executor.run(token).await }));
    } else {
        tracing::info!("Sync worker disabled; triggered syncs run inline");
    }

    if config.scheduler.enabled {
        let scheduler = SyncScheduler::new(Arc::clone(&config), db.clone(), Arc::clone(&queue));
        if let Err(err) = scheduler.register_all().await {
            tracing::error!(error = %err, "Failed to register incremental syncs");
        }
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { scheduler.run(token).await }));
    }

    let app = create_app(state);
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await?;

    shutdown.cancel();
    for handle in background {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task ended abnormally");
        }
    }
    tracing::info!("Server stopped");

    Ok(())
}

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health::healthz,
        crate::handlers::syncs::trigger_sync,
        crate::handlers::syncs::list_syncs,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::health::HealthResponse,
            crate::handlers::syncs::TriggerSyncRequest,
            crate::handlers::syncs::SyncEnqueuedResponse,
            crate::handlers::syncs::SyncRunInfo,
            crate::handlers::syncs::SyncRunsResponse,
            crate::sync_orchestrator::SyncType,
            crate::connectors::SyncResult,
            crate::connectors::SyncStats,
            crate::connectors::SyncError,
            crate::error::ApiError,
        )
    ),
    modifiers(&BearerSecurity),
    info(
        title = "SIS Sync API",
        description = "Operator API for triggering and inspecting SIS directory syncs",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
