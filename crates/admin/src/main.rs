//! Shopfront Admin - JSON API for store administration.
//!
//! This binary serves the admin API on port 3001.
//!
//! # Security
//!
//! **This binary holds the backend's service-role key.** Bind it to a
//! private interface or put it behind a VPN; only the admin console should
//! reach it.
//!
//! # Architecture
//!
//! - Axum JSON API, optional TLS through `axum-server`
//! - Hosted backend reached over REST with the service-role key
//! - Realtime change feed relayed to the console as server-sent events
//! - `PostgreSQL` connection used only for the session store

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, StatusCode, header};
use axum::{Router, middleware::from_fn, routing::get};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use shopfront_admin::config::AdminConfig;
use shopfront_admin::state::AppState;
use shopfront_admin::{db, middleware, routes};
use shopfront_backend::realtime::CATALOG_TABLES;
use shopfront_backend::{BackendError, ConfigError, RealtimeConnection};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tables relayed to the console in addition to the catalog.
const ADMIN_TABLES: &[&str] = &["orders", "order_items", "profiles"];

/// Grace period for in-flight requests at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Failures that stop the server from starting.
#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend client: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid ADMIN_CORS_ORIGIN: {0}")]
    Cors(#[from] header::InvalidHeaderValue),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &AdminConfig) -> Option<sentry::ClientInitGuard> {
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
            send_default_pii: true, // Admin API can include PII for debugging
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
fn init_tracing(config: &AdminConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "shopfront_admin=info,shopfront_backend=info,tower_http=debug".into()
    });

    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!config.log_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

/// CORS for the admin console, when it is served from another origin.
fn cors_layer(origin: &str) -> Result<CorsLayer, header::InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin(HeaderValue::from_str(origin)?)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]))
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (must be done before any TLS operations)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Admin failed to start");
        sentry::capture_error(&e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    // Load configuration from environment (needed for Sentry init)
    let config = AdminConfig::from_env()?;

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing(&config);

    let pool = db::create_pool(&config.database_url).await?;
    let session_store = db::prepare_session_store(&pool).await?;
    tracing::info!("Session store ready");

    let state = AppState::new(config.clone(), pool)?;

    // Admin writes invalidate the cache directly; the feed covers changes
    // made elsewhere and drives the console's event stream.
    let _invalidation = state
        .relay()
        .attach_cache(state.cache().clone(), config.backend.realtime_debounce);
    let tables: Vec<&str> = CATALOG_TABLES.iter().chain(ADMIN_TABLES).copied().collect();
    let mut connection = RealtimeConnection::new(&config.backend, &tables);
    if let Some(key) = &config.backend.service_role_key {
        connection = connection.with_access_token(key.clone());
    }
    let _realtime = connection.spawn(state.relay().clone(), state.shutdown_token().clone());

    let session_layer = middleware::create_session_layer(session_store, state.config());

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes(state.config()))
        .layer(session_layer);
    if let Some(origin) = &config.cors_origin {
        app = app.layer(cors_layer(origin)?);
    }

    let app = app
        .layer(from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state.clone())
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Peer addresses feed the sign-in rate limiter.
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = config.socket_addr();

    if let Some(tls_config) = &config.tls {
        let rustls_config = RustlsConfig::from_pem(
            tls_config.cert_pem.as_bytes().to_vec(),
            tls_config.key_pem.expose_secret().as_bytes().to_vec(),
        )
        .await?;

        tracing::info!("admin listening on https://{}", addr);

        let handle = Handle::new();
        let shutdown_handle = handle.clone();
        let shutdown_state = state.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown_state).await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(service)
            .await?;
    } else {
        tracing::info!("admin listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal(state))
            .await?;
    }

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
/// Checks the session database and the hosted backend with the service-role
/// key. Returns 503 Service Unavailable if either is unreachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    let database = sqlx::query("SELECT 1").fetch_one(state.pool()).await;
    let backend = state.service().ping().await;

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

/// Wait for shutdown signal (Ctrl+C or SIGTERM), then stop background tasks
/// and close open event streams.
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
