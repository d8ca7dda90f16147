//! HTTP API for the registration service.

mod handlers;
mod middleware;
mod types;
mod validate;

pub use handlers::*;
pub use middleware::{
    logging_middleware, rate_limit_middleware, registration_rate_limit_middleware, RateLimitState,
};
pub use types::*;
pub use validate::validate_registration;

use crate::config::Config;
use crate::service::RegistrationService;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::warn;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
    style-src 'self' 'unsafe-inline' https://fonts.googleapis.com; \
    font-src 'self' https://fonts.gstatic.com; \
    script-src 'self'; \
    img-src 'self' data: https:";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Registration service
    pub service: Arc<RegistrationService>,
    /// Process start, reported as uptime
    pub started_at: Instant,
}

impl AppState {
    /// Create new application state.
    pub fn new(service: RegistrationService) -> Self {
        Self {
            service: Arc::new(service),
            started_at: Instant::now(),
        }
    }
}

/// Router settings that do not belong in the shared state.
#[derive(Clone)]
pub struct ApiOptions {
    /// Origin allowed by CORS
    pub frontend_url: String,
    /// Include panic messages in 500 responses
    pub expose_error_details: bool,
    /// Directory served for non-API paths
    pub static_dir: Option<PathBuf>,
    pub rate_limit: RateLimitState,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:3000".to_string(),
            expose_error_details: false,
            static_dir: None,
            rate_limit: RateLimitState::permissive(),
        }
    }
}

impl ApiOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frontend_url: config.server.frontend_url.clone(),
            expose_error_details: config.server.is_development(),
            static_dir: config.server.static_dir.clone(),
            rate_limit: RateLimitState::new(&config.rate_limit),
        }
    }
}

/// Create the API router.
pub fn create_router(state: AppState, options: ApiOptions) -> Router {
    let rate_limit = options.rate_limit;

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/register",
            post(handlers::register).route_layer(axum_middleware::from_fn_with_state(
                rate_limit.clone(),
                registration_rate_limit_middleware,
            )),
        )
        .route("/registration/:id", get(handlers::get_registration))
        .route("/admin/registrations", get(handlers::list_registrations))
        .route(
            "/admin/registrations/:id/deliveries",
            get(handlers::list_deliveries),
        )
        .fallback(handlers::api_not_found);

    let router = Router::new().nest("/api", api);

    // Everything outside /api is the frontend
    let router = match options.static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            router.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => router.fallback(handlers::api_not_found),
    };

    let expose = options.expose_error_details;

    router
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
            handlers::panic_response(expose, panic)
        }))
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(security_header(header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
        .layer(security_header(header::X_FRAME_OPTIONS, "SAMEORIGIN"))
        .layer(security_header(header::REFERRER_POLICY, "no-referrer"))
        .layer(security_header(
            header::CONTENT_SECURITY_POLICY,
            CONTENT_SECURITY_POLICY,
        ))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&options.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn security_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value))
}

/// CORS for the configured frontend origin, with credentials.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            warn!(frontend_url, error = %e, "Invalid frontend URL, cross-origin requests disabled");
            cors
        }
    }
}
