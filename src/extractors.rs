use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::auth::session;
use crate::db;
use crate::error::AppError;
use crate::graphql::SessionState;
use crate::state::AppState;

/// Resolves the session cookie to a user. A missing, unknown or expired
/// cookie gives an anonymous session rather than a rejection: most of the
/// API is readable without logging in.
impl FromRequestParts<AppState> for SessionState {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = extract_session_token(parts, &state.config.auth.cookie_name) else {
            return Ok(SessionState::anonymous());
        };
        let token = token.to_string();

        let lookup = token.clone();
        let user_id = db::with_conn(&state.db, move |conn| {
            session::user_for_session(conn, &lookup).map_err(AppError::from)
        })
        .await?;

        Ok(match user_id {
            Some(user_id) => SessionState::authenticated(user_id, token),
            None => {
                tracing::debug!("Ignoring unknown or expired session cookie");
                SessionState::anonymous()
            }
        })
    }
}

fn extract_session_token<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let (key, val) = cookie.split_once('=')?;
            (key.trim() == cookie_name && !val.trim().is_empty()).then(|| val.trim())
        })
}
