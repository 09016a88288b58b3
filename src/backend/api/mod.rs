use axum::{Router, middleware, routing::post};

use super::{AppState, rate_limit::rate_limit};

pub mod download;

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/download", post(download::start_download))
        .route_layer(middleware::from_fn_with_state(state, rate_limit))
}
