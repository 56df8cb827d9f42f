//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, head, options, post};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let account_routes = Router::new()
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/account", delete(handlers::delete_account))
        // Health check (unauthenticated for load balancer probes)
        .route("/health", get(handlers::health_check));

    let file_routes = Router::new()
        .route("/files", get(handlers::list_files))
        .route("/files/", get(handlers::list_files))
        .route(
            "/files/{upload_id}",
            get(handlers::get_file).delete(handlers::delete_file),
        );

    let tus_routes = Router::new()
        .route(
            "/tus",
            options(handlers::tus_options).post(handlers::create_upload),
        )
        .route(
            "/tus/",
            options(handlers::tus_options).post(handlers::create_upload),
        )
        .route(
            "/tus/{upload_id}",
            head(handlers::head_upload)
                .patch(handlers::patch_upload)
                .delete(handlers::delete_file),
        )
        .layer(middleware::from_fn(handlers::tus_resumable_header));

    let mut router = Router::new()
        .merge(account_routes)
        .merge(file_routes)
        .merge(tus_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> timeout -> Auth -> Handler
    let mut router = router.layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));
    if let Some(timeout) = state.config.server.request_timeout() {
        router = router.layer(TimeoutLayer::new(timeout));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
