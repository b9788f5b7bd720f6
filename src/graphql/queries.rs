use async_graphql::*;
use chrono::{DateTime, Utc};

use crate::db::{self, posts};
use crate::error::{gql_error, AppError};
use crate::graphql::context::request_context;
use crate::graphql::types::{PaginatedPosts, Post, User};

const MAX_PAGE_SIZE: i32 = 50;

/// Accepts epoch milliseconds or an RFC 3339 timestamp and returns it in the
/// stored timestamp format.
fn parse_cursor(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    let parsed = if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        raw.parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    } else {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    };

    parsed
        .map(|dt| db::format_timestamp(&dt))
        .ok_or_else(|| AppError::BadRequest(format!("Invalid cursor: {}", raw)))
}

/// GraphQL Query root
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Newest posts first. Pass the `createdAt` of the last post seen as
    /// `cursor` to get the next page.
    async fn posts(
        &self,
        ctx: &Context<'_>,
        limit: i32,
        cursor: Option<String>,
    ) -> Result<PaginatedPosts> {
        let rc = request_context(ctx)?;
        let limit = limit.clamp(1, MAX_PAGE_SIZE) as usize;
        let before = cursor.as_deref().map(parse_cursor).transpose().map_err(gql_error)?;

        // one extra row tells us whether another page exists
        let mut rows = db::with_conn(&rc.db, move |conn| {
            posts::list_posts(conn, limit + 1, before.as_deref()).map_err(AppError::from)
        })
        .await
        .map_err(gql_error)?;

        let has_more = rows.len() > limit;
        rows.truncate(limit);

        Ok(PaginatedPosts {
            posts: rows.into_iter().map(Post::from).collect(),
            has_more,
        })
    }

    async fn post(&self, ctx: &Context<'_>, id: i64) -> Result<Option<Post>> {
        let rc = request_context(ctx)?;
        let post = db::with_conn(&rc.db, move |conn| {
            posts::find_post(conn, id).map_err(AppError::from)
        })
        .await
        .map_err(gql_error)?;
        Ok(post.map(Post::from))
    }

    /// The logged in user, or null
    async fn me(&self, ctx: &Context<'_>) -> Result<Option<User>> {
        let rc = request_context(ctx)?;
        let Some(user_id) = rc.session.user_id() else {
            return Ok(None);
        };
        let user = rc.loaders.users.load(user_id).await.map_err(gql_error)?;
        Ok(user.map(User::from))
    }
}
