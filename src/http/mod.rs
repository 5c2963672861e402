//! Management HTTP API, served on the broker's listener.
//!
//! # Routes
//! ```text
//! GET    /health                 broker liveness
//! GET    /health/services        on-demand health snapshot
//! GET    /services               list
//! POST   /services               register (replaces an existing id)
//! GET    /services/{id}
//! PATCH  /services/{id}          partial update / status report
//! DELETE /services/{id}
//! POST   /services/{id}/check    probe one service now
//! GET    /clients                connected broker clients
//! ```

pub mod error;
pub mod handlers;

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;

pub use error::ApiError;
pub use handlers::ApiState;

/// Headroom over the probe timeout for handlers that probe.
const REQUEST_HEADROOM: Duration = Duration::from_secs(5);

pub fn api_router(state: ApiState) -> Router {
    let request_timeout = state.registry.config().timeout() + REQUEST_HEADROOM;

    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/health/services", get(handlers::get_services_health))
        .route(
            "/services",
            get(handlers::list_services).post(handlers::register_service),
        )
        .route(
            "/services/{id}",
            get(handlers::get_service)
                .patch(handlers::update_service)
                .delete(handlers::deregister_service),
        )
        .route("/services/{id}/check", post(handlers::check_service))
        .route("/clients", get(handlers::list_clients))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
