//! API route definitions

use crate::auth::auth_middleware;
use crate::handlers::auth;
use crate::middleware::no_store_middleware;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
///
/// The session routes share the refresh cookie's path scope
/// (`/api/v1/auth/session`), so the cookie reaches them and nothing else.
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no access token required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/google", post(auth::google_login_handler))
        .route("/auth/session/refresh", post(auth::refresh_handler))
        .route("/auth/session/logout", post(auth::logout_handler));

    // Protected routes (Bearer access token required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/logout-all", post(auth::logout_all_handler))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .route_layer(middleware::from_fn(no_store_middleware))
}
