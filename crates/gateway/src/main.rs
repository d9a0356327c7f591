//! Rinkside API Gateway
//!
//! The entry point for all external requests. Handles:
//! - Session token authentication
//! - Rate limiting
//! - The query endpoint and health probes
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::Request,
    middleware::Next,
    routing::{get, post},
    Router,
};
use rinkside_common::{auth::AccessGuard, config::AppConfig, metrics as app_metrics};
use rinkside_engine::tools::{
    InMemoryIndex, InMemoryTableStore, KnowledgeChunk, KnowledgeIndex, StatRecord, TableStore,
};
use rinkside_engine::{fixtures, QueryEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<QueryEngine>,
    pub guard: Arc<AccessGuard>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration before tracing so log settings apply
    let config = Arc::new(AppConfig::load()?);

    init_tracing(&config);
    info!("Starting rinkside gateway v{}", rinkside_common::VERSION);

    // Initialize metrics
    app_metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("Prometheus exporter listening on {}", addr);
    }

    // Session guard; the token issuer is the external auth service
    let secret = match &config.auth.session_secret {
        Some(secret) => secret.clone(),
        None => {
            warn!("auth.session_secret not set; using a development-only secret");
            "rinkside-dev-secret".to_string()
        }
    };
    let guard = Arc::new(AccessGuard::new(
        &secret,
        config.auth.session_expiration_secs,
    ));

    // Data snapshots: collaborator exports when configured, built-in
    // fixtures otherwise
    let index = load_index(&config)?;
    let store = load_table(&config)?;

    let engine = Arc::new(QueryEngine::new(config.clone(), index, store));

    let state = AppState {
        config: config.clone(),
        engine,
        guard,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));

    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn load_index(config: &AppConfig) -> anyhow::Result<Arc<dyn KnowledgeIndex>> {
    match &config.retrieval.index_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let chunks: Vec<KnowledgeChunk> = serde_json::from_str(&raw)?;
            info!(path = %path, chunks = chunks.len(), "Loaded knowledge index export");
            Ok(Arc::new(InMemoryIndex::from_chunks(chunks)))
        }
        None => {
            warn!("retrieval.index_path not set; serving built-in fixture chunks");
            Ok(Arc::new(InMemoryIndex::from_chunks(
                fixtures::knowledge_chunks(),
            )))
        }
    }
}

fn load_table(config: &AppConfig) -> anyhow::Result<Arc<dyn TableStore>> {
    match &config.analytics.table_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let rows: Vec<StatRecord> = serde_json::from_str(&raw)?;
            info!(path = %path, rows = rows.len(), "Loaded stats snapshot");
            Ok(Arc::new(InMemoryTableStore::from_rows(rows)))
        }
        None => {
            warn!("analytics.table_path not set; serving built-in fixture rows");
            Ok(Arc::new(InMemoryTableStore::from_rows(
                fixtures::stat_records(),
            )))
        }
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let limiter = middleware::rate_limit::create_rate_limiter(
        state.config.rate_limit.requests_per_second,
        state.config.rate_limit.burst,
    );
    let rate_limited = state.config.rate_limit.enabled;

    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Query endpoint
        .route("/v1/query", post(handlers::query::process_query));

    let mut app = Router::new()
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id);

    if rate_limited {
        app = app.layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            let limiter = limiter.clone();
            async move { middleware::rate_limit::rate_limit_middleware(req, next, limiter).await }
        }));
    }

    app.with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
