//! Route definitions for the pre-sale billing service

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - pre-sale editing
        .nest("/preventas", preventa_routes(state.clone()))
        // Protected routes - document series
        .nest("/series", series_routes(state))
}

/// Pre-sale routes (protected)
fn preventa_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/:preventa_id",
            get(handlers::get_preventa).put(handlers::update_preventa),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Document series routes (protected)
fn series_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_series))
        .route("/allocate", post(handlers::allocate_number))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
