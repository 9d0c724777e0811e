use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::handlers::{diagnostics, health_check, ready_check};
use crate::routes::auth_middleware::auth_middleware;
use crate::ws::hub::CollabHub;

/// Create API routes
pub fn create_api_routes(hub: Arc<CollabHub>) -> Router {
    let protected = Router::<Arc<CollabHub>>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn(auth_middleware)); // Applies to all routes added above

    Router::<Arc<CollabHub>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(protected)
        .with_state(hub)
}
