//! Trail API - session and credential lifecycle server
//!
//! Issues short-lived access tokens and rotating, single-use refresh tokens
//! for the travel map. Refresh tokens are persisted only as digests and are
//! delivered in a path-scoped HttpOnly cookie.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use crate::state::AppState;
use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
#[cfg(any(test, feature = "test-utils"))]
use trail_core::AppConfig;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::google_login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::logout_all_handler,
        handlers::auth::me_handler,
    ),
    components(schemas(
        error::ApiError,
        auth::UserPublic,
        handlers::auth::RegisterRequest,
        handlers::auth::LoginRequest,
        handlers::auth::GoogleLoginRequest,
        handlers::auth::AuthResponse,
        handlers::auth::RefreshResponse,
        handlers::auth::LogoutResponse,
        handlers::auth::LogoutAllResponse,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Sign-in, session refresh and logout"),
        (name = "health", description = "Liveness and readiness probes"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the application router over `state`
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::security_headers_middleware,
        ))
        .with_state(state)
}

/// Router over fresh in-memory storage with cheap password hashing
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_router(Arc::new(test_state(AppConfig::default())))
}

/// In-memory state for tests
#[cfg(any(test, feature = "test-utils"))]
pub fn test_state(config: AppConfig) -> AppState {
    AppState::in_memory(config, auth::PasswordConfig::fast_for_tests())
        .expect("test configuration must be valid")
}
