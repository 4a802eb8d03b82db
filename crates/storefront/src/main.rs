//! Shopfront Storefront - Public e-commerce site.
//!
//! This binary serves the public-facing storefront on port 3000.
//!
//! # Architecture
//!
//! - Axum web framework, askama templates rendered server-side
//! - Hosted Postgres backend reached over its REST API for catalog, orders
//!   and accounts, with a TTL cache kept fresh by the realtime change feed
//! - `PostgreSQL` connection used only for the session store
//!
//! # Security
//!
//! This binary only holds the backend's anon key. Every account request
//! carries the visitor's own access token, so row-level policies decide
//! what they can read and write. The service-role key is never loaded here.

#![cfg_attr(not(test), forbid(unsafe_code))]

use axum::extract::State;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Router, middleware::from_fn, middleware::from_fn_with_state, routing::get};
use sentry::integrations::tracing as sentry_tracing;
use shopfront_backend::realtime::CATALOG_TABLES;
use shopfront_backend::{BackendError, ConfigError, RealtimeConnection};
use shopfront_storefront::config::StorefrontConfig;
use shopfront_storefront::state::AppState;
use shopfront_storefront::{db, middleware, routes};
use thiserror::Error;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Failures that stop the server from starting.
#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend client: {0}")]
    Backend(#[from] BackendError),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Initialize tracing with `EnvFilter`, JSON or text output, and Sentry.
fn init_tracing(config: &StorefrontConfig) {
    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "shopfront_storefront=info,shopfront_backend=info,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter));

    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "Storefront failed to start");
        sentry::capture_error(&e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    // Load configuration from environment (needed for Sentry init)
    let config = StorefrontConfig::from_env()?;

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing(&config);

    let pool = db::create_pool(&config.database_url).await?;
    let session_store = db::prepare_session_store(&pool).await?;
    tracing::info!("Session store ready");

    let state = AppState::new(config.clone(), pool)?;

    // Keep the catalog cache in step with backend changes.
    let _invalidation = state
        .relay()
        .attach_cache(state.cache().clone(), config.backend.realtime_debounce);
    let _realtime = RealtimeConnection::new(&config.backend, CATALOG_TABLES)
        .spawn(state.relay().clone(), state.shutdown_token().clone());

    let session_layer = middleware::create_session_layer(session_store, state.config());

    let app = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes())
        .nest_service("/static", ServeDir::new("crates/storefront/static"))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::security_headers_middleware,
        ))
        .layer(from_fn(middleware::csp_nonce_middleware))
        .layer(session_layer)
        .layer(from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state.clone())
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("storefront listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Checks the session database and the hosted backend. Returns 503 Service
/// Unavailable if either is unreachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    let database = sqlx::query("SELECT 1").fetch_one(state.pool()).await;
    let backend = state.client().ping().await;

    match (database, backend) {
        (Ok(_), Ok(())) => StatusCode::OK,
        (database, backend) => {
            if let Err(e) = database {
                tracing::warn!(error = %e, "Readiness: database unavailable");
            }
            if let Err(e) = backend {
                tracing::warn!(error = %e, "Readiness: backend unavailable");
            }
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM), then stop background tasks.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
    state.shutdown_token().cancel();
}
