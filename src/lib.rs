//! Sessiongate - session-based OpenID Connect authentication for web apps
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Request pipeline (Axum/Tower)                │
//! │  - TraceLayer, CatchPanicLayer                              │
//! │  - attach_session: parse/refresh session cookie             │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  Auth handler            │   │  require_session guard        │
//! │  /api/auth/*path         │   │  302 to provider when absent  │
//! │  (GET + POST)            │   │  CurrentUser when present     │
//! └──────────────────────────┘   └──────────────────────────────┘
//!            │                                   │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Auth service                                │
//! │  - Generic OIDC providers (openidconnect)                   │
//! │  - HMAC-signed session and state cookies                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: Application routes behind the guard
//! - `auth`: Sessions, providers, hooks and the auth handler
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// This struct is cloned for each request.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Authentication service
    pub auth: Arc<auth::Auth>,
}

impl AppState {
    /// Initialize application state
    ///
    /// Identity providers are registered but not contacted; discovery
    /// runs on the first sign-in.
    ///
    /// # Errors
    /// Returns error if the auth configuration cannot be turned into
    /// providers (bad issuer or redirect URLs)
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let auth = auth::Auth::new(&config)?;
        tracing::info!(
            providers = config.auth.providers.len(),
            guard_provider = %config.auth.guard_provider,
            "Auth service initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware};
    use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

    let app_routes = api::app_router().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_session,
    ));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router(&state.config.auth.base_path))
        .merge(app_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::attach_session,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Log a panicking handler and answer 500
fn handle_panic(panic: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    use axum::response::IntoResponse;

    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "Handler panicked");

    (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({ "error": "Internal server error" })),
    )
        .into_response()
}

async fn health_check() -> &'static str {
    "OK"
}
