use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::auth::session;
use crate::graphql::{RequestContext, SessionChange, SessionState};
use crate::state::AppState;

/// GraphQL endpoint handler. Each request gets fresh loaders; logins and
/// logouts made by resolvers come back as a `Set-Cookie` header.
async fn graphql_handler(
    State(state): State<AppState>,
    caller: SessionState,
    Json(req): Json<async_graphql::Request>,
) -> Response {
    let context = RequestContext::from_state(&state, caller.clone());
    let response = state.graphql_schema.execute(req.data(context)).await;

    let auth = &state.config.auth;
    let cookie = match caller.take_change() {
        Some(SessionChange::Started(token)) => Some(session::session_cookie(
            &auth.cookie_name,
            &token,
            auth.session_hours,
        )),
        Some(SessionChange::Ended) => Some(session::clear_session_cookie(&auth.cookie_name)),
        None => None,
    };

    let mut res = Json(response).into_response();
    if let Some(cookie) = cookie {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                res.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Invalid session cookie header: {}", e),
        }
    }
    res
}

/// GraphQL Playground UI (development tool)
async fn graphql_playground() -> impl IntoResponse {
    Html(playground_source(GraphQLPlaygroundConfig::new("/graphql")))
}

/// GraphQL router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/graphql", post(graphql_handler))
        .route("/graphql/playground", get(graphql_playground))
}
