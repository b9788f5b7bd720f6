pub mod graphql;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

async fn health() -> &'static str {
    "ok"
}

/// The whole HTTP surface. Only the configured web origin may call the API
/// with credentials.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let origin: HeaderValue = state.config.web.origin.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Ok(Router::new()
        .route("/health", get(health))
        .merge(graphql::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
