use async_graphql::*;
use chrono::{DateTime, Utc};

use crate::db::models;
use crate::error::{gql_error, AppError};
use crate::graphql::context::request_context;
use crate::loader::VoteKey;

const SNIPPET_CHARS: usize = 50;

/// A forum post
#[derive(Clone, Debug, SimpleObject)]
#[graphql(complex)]
pub struct Post {
    pub id: i64,

    pub title: String,

    pub text: String,

    /// Sum of all votes on this post
    pub points: i64,

    pub creator_id: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl From<models::Post> for Post {
    fn from(p: models::Post) -> Self {
        Self {
            id: p.id,
            title: p.title,
            text: p.text,
            points: p.points,
            creator_id: p.creator_id,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[ComplexObject]
impl Post {
    /// The first 50 characters of the text
    async fn text_snippet(&self) -> String {
        self.text.chars().take(SNIPPET_CHARS).collect()
    }

    /// Author of the post, batched per request
    async fn creator(&self, ctx: &Context<'_>) -> Result<User> {
        let rc = request_context(ctx)?;
        rc.loaders
            .users
            .load(self.creator_id)
            .await
            .map_err(gql_error)?
            .map(User::from)
            .ok_or_else(|| gql_error(AppError::NotFound))
    }

    /// The current user's vote on this post: 1, -1, or null
    async fn vote_status(&self, ctx: &Context<'_>) -> Result<Option<i32>> {
        let rc = request_context(ctx)?;
        let Some(user_id) = rc.session.user_id() else {
            return Ok(None);
        };

        let vote = rc
            .loaders
            .votes
            .load(VoteKey {
                post_id: self.id,
                user_id,
            })
            .await
            .map_err(gql_error)?;
        Ok(vote.map(|v| v.value))
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(complex)]
pub struct User {
    pub id: i64,

    pub username: String,

    #[graphql(skip)]
    pub email: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl From<models::User> for User {
    fn from(u: models::User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[ComplexObject]
impl User {
    /// Only shown to the user themselves; empty for everyone else
    async fn email(&self, ctx: &Context<'_>) -> Result<String> {
        let rc = request_context(ctx)?;
        if rc.session.user_id() == Some(self.id) {
            Ok(self.email.clone())
        } else {
            Ok(String::new())
        }
    }
}

/// One page of posts, newest first
#[derive(SimpleObject)]
pub struct PaginatedPosts {
    pub posts: Vec<Post>,

    /// Whether older posts exist beyond this page
    pub has_more: bool,
}

/// A problem with one input field
#[derive(Clone, Debug, PartialEq, Eq, SimpleObject)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result of the account mutations: either errors or a user
#[derive(Default, SimpleObject)]
pub struct UserResponse {
    pub errors: Option<Vec<FieldError>>,
    pub user: Option<User>,
}

impl UserResponse {
    pub fn failed(error: FieldError) -> Self {
        Self {
            errors: Some(vec![error]),
            user: None,
        }
    }

    pub fn succeeded(user: User) -> Self {
        Self {
            errors: None,
            user: Some(user),
        }
    }
}

/// Registration details
#[derive(InputObject)]
pub struct UsernamePasswordInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(InputObject)]
pub struct PostInput {
    pub title: String,
    pub text: String,
}
