use axum::Router;
use tower_http::trace::TraceLayer;

use super::{AppState, GatewayError, api::api_router};

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(api_router(state.clone()))
        .fallback(|| async { GatewayError::NotFound })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
