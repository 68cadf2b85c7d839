use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::api::{acquire_lock, get_lock, list_locks, release_lock};
use crate::handlers::install::{install_handler, oauth_redirect_handler};
use crate::handlers::slack::events_handler;
use crate::handlers::{health_handler, AppState};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/teams/{team}/channels/{channel}/locks",
            get(list_locks).post(acquire_lock),
        )
        .route(
            "/teams/{team}/channels/{channel}/locks/{lock}",
            get(get_lock).delete(release_lock),
        );

    let slack = Router::new()
        .route("/events", post(events_handler))
        .route("/install", get(install_handler))
        .route("/oauth_redirect", get(oauth_redirect_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .nest("/slack", slack)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
