//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::middleware::sync_point::sync_point_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/convert/{input}/{output}",
            get(routes::convert::convert_uri).post(routes::convert::convert_data),
        )
        .route("/task/{id}", get(routes::task::get_task))
        .route("/hash/{hash}", get(routes::hash::get_by_hash))
        .route("/formats", get(routes::formats::list_formats))
        .route("/tools", get(routes::formats::list_tools))
        .route("/debug/tasks", get(routes::debug::list_tasks))
        .layer(middleware::from_fn_with_state(ctx.clone(), sync_point_middleware));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(ctx.config.server.max_body_bytes))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
