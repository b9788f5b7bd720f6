use async_graphql::*;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::{reset, session};
use crate::db::{self, models, posts, users};
use crate::error::{gql_error, AppError};
use crate::graphql::context::request_context;
use crate::graphql::types::{
    FieldError, Post, PostInput, User, UserResponse, UsernamePasswordInput,
};
use crate::graphql::validate;
use crate::loader::VoteKey;
use crate::mail;

/// A user and their new session token, or the field that stopped it.
type LoggedIn = Result<(models::User, String), FieldError>;

fn require_title(title: &str) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::BadRequest("Title must not be empty".to_string()));
    }
    Ok(())
}

/// GraphQL Mutation root
pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Up-vote (1) or down-vote (-1) a post as the current user
    async fn vote(&self, ctx: &Context<'_>, post_id: i64, value: i32) -> Result<bool> {
        let rc = request_context(ctx)?;
        let user_id = rc.session.user_id();

        rc.ledger
            .cast(post_id, user_id, value)
            .await
            .map_err(gql_error)?;

        // later voteStatus reads in this request must see the new vote
        if let Some(user_id) = user_id {
            rc.loaders.votes.clear(&VoteKey { post_id, user_id });
        }
        Ok(true)
    }

    async fn create_post(&self, ctx: &Context<'_>, input: PostInput) -> Result<Post> {
        let rc = request_context(ctx)?;
        let user_id = rc.session.require_user().map_err(gql_error)?;
        require_title(&input.title).map_err(gql_error)?;

        let post = db::with_conn(&rc.db, move |conn| {
            posts::insert_post(conn, user_id, &input.title, &input.text).map_err(AppError::from)
        })
        .await
        .map_err(gql_error)?;

        tracing::info!(post_id = post.id, user_id, "Post created");
        Ok(post.into())
    }

    /// Edit a post. Returns null unless the caller created it.
    async fn update_post(
        &self,
        ctx: &Context<'_>,
        id: i64,
        title: String,
        text: String,
    ) -> Result<Option<Post>> {
        let rc = request_context(ctx)?;
        let user_id = rc.session.require_user().map_err(gql_error)?;
        require_title(&title).map_err(gql_error)?;

        let post = db::with_conn(&rc.db, move |conn| {
            posts::update_post(conn, id, user_id, &title, &text).map_err(AppError::from)
        })
        .await
        .map_err(gql_error)?;
        Ok(post.map(Post::from))
    }

    /// Delete a post and its votes. Returns false unless the caller created it.
    async fn delete_post(&self, ctx: &Context<'_>, id: i64) -> Result<bool> {
        let rc = request_context(ctx)?;
        let user_id = rc.session.require_user().map_err(gql_error)?;

        let deleted = db::with_conn(&rc.db, move |conn| {
            posts::delete_post(conn, id, user_id).map_err(AppError::from)
        })
        .await
        .map_err(gql_error)?;

        if deleted {
            tracing::info!(post_id = id, user_id, "Post deleted");
        }
        Ok(deleted)
    }

    /// Create an account and log in as it
    async fn register(
        &self,
        ctx: &Context<'_>,
        options: UsernamePasswordInput,
    ) -> Result<UserResponse> {
        let rc = request_context(ctx)?;
        if let Some(error) = validate::check_register(&options) {
            return Ok(UserResponse::failed(error));
        }

        let hash = hash_password(options.password, rc.config.auth.bcrypt_cost)
            .await
            .map_err(gql_error)?;
        let session_hours = rc.config.auth.session_hours;
        let (username, email) = (options.username, options.email);

        let created = db::with_conn(&rc.db, move |conn| -> Result<LoggedIn, AppError> {
            let user = match users::insert_user(conn, &username, &email, &hash) {
                Ok(user) => user,
                Err(e) => {
                    return match users::duplicate_field(&e) {
                        Some("email") => Ok(Err(FieldError::new("email", "Email already taken"))),
                        Some(field) => Ok(Err(FieldError::new(field, "Username already taken"))),
                        None => Err(AppError::from(e)),
                    }
                }
            };
            let token = session::create_session(conn, user.id, session_hours)?;
            Ok(Ok((user, token)))
        })
        .await
        .map_err(gql_error)?;

        match created {
            Ok((user, token)) => {
                tracing::info!(user_id = user.id, "User registered");
                rc.session.start(user.id, token);
                Ok(UserResponse::succeeded(User::from(user)))
            }
            Err(error) => Ok(UserResponse::failed(error)),
        }
    }

    async fn login(
        &self,
        ctx: &Context<'_>,
        username_or_email: String,
        password: String,
    ) -> Result<UserResponse> {
        let rc = request_context(ctx)?;

        let by_email = validate::is_email(&username_or_email);
        let user = db::with_conn(&rc.db, move |conn| {
            let found = if by_email {
                users::find_by_email(conn, &username_or_email)
            } else {
                users::find_by_username(conn, &username_or_email)
            };
            found.map_err(AppError::from)
        })
        .await
        .map_err(gql_error)?;

        let Some(user) = user else {
            return Ok(UserResponse::failed(FieldError::new(
                "usernameOrEmail",
                "Invalid credentials",
            )));
        };

        if !verify_password(password, user.password_hash.clone())
            .await
            .map_err(gql_error)?
        {
            return Ok(UserResponse::failed(FieldError::new(
                "password",
                "Invalid credentials",
            )));
        }

        let (user_id, session_hours) = (user.id, rc.config.auth.session_hours);
        let token = db::with_conn(&rc.db, move |conn| {
            session::create_session(conn, user_id, session_hours).map_err(AppError::from)
        })
        .await
        .map_err(gql_error)?;

        tracing::info!(user_id, "User logged in");
        rc.session.start(user_id, token);
        Ok(UserResponse::succeeded(User::from(user)))
    }

    /// End the current session. The cookie is cleared even when the stored
    /// session cannot be removed, in which case this returns false.
    async fn logout(&self, ctx: &Context<'_>) -> Result<bool> {
        let rc = request_context(ctx)?;
        let Some(token) = rc.session.end() else {
            return Ok(true);
        };

        let removed = db::with_conn(&rc.db, move |conn| {
            session::delete_session(conn, &token).map_err(AppError::from)
        })
        .await;

        match removed {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!("Failed to remove session: {}", e);
                Ok(false)
            }
        }
    }

    /// Email a password reset link. Always true, so callers cannot probe
    /// which addresses have accounts.
    async fn forgot_password(&self, ctx: &Context<'_>, email: String) -> Result<bool> {
        let rc = request_context(ctx)?;
        let reset_hours = rc.config.auth.reset_token_hours;

        let lookup = email.clone();
        let issued = db::with_conn(&rc.db, move |conn| -> Result<Option<(i64, String)>, AppError> {
            let Some(user) = users::find_by_email(conn, &lookup)? else {
                return Ok(None);
            };
            let token = reset::issue_reset_token(conn, user.id, reset_hours)?;
            Ok(Some((user.id, token)))
        })
        .await
        .map_err(gql_error)?;

        let Some((user_id, token)) = issued else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(true);
        };

        let body = mail::reset_password_email(&rc.config.web.origin, &token);
        if let Err(e) = rc.mailer.send(&email, "Reset your password", &body).await {
            tracing::error!(user_id, "Failed to send reset email: {:#}", e);
        }
        Ok(true)
    }

    /// Set a new password with a reset token. The token is single use; on
    /// success the caller is logged in.
    async fn change_password(
        &self,
        ctx: &Context<'_>,
        token: String,
        new_password: String,
    ) -> Result<UserResponse> {
        let rc = request_context(ctx)?;
        if let Some(error) = validate::check_password("newPassword", &new_password) {
            return Ok(UserResponse::failed(error));
        }

        let hash = hash_password(new_password, rc.config.auth.bcrypt_cost)
            .await
            .map_err(gql_error)?;
        let session_hours = rc.config.auth.session_hours;

        let changed = db::with_conn(&rc.db, move |conn| -> Result<LoggedIn, AppError> {
            // autocommit: a dead token is deleted even on the error returns below
            let Some(user_id) = reset::consume_reset_token(conn, &token)? else {
                return Ok(Err(FieldError::new("token", "Token expired")));
            };
            let tx = conn.transaction()?;
            let Some(user) = users::find_by_id(&tx, user_id)? else {
                return Ok(Err(FieldError::new("token", "User no longer exists")));
            };
            users::update_password(&tx, user.id, &hash)?;
            let session_token = session::create_session(&tx, user.id, session_hours)?;
            tx.commit()?;
            Ok(Ok((user, session_token)))
        })
        .await
        .map_err(gql_error)?;

        match changed {
            Ok((user, session_token)) => {
                tracing::info!(user_id = user.id, "Password changed");
                rc.session.start(user.id, session_token);
                Ok(UserResponse::succeeded(User::from(user)))
            }
            Err(error) => Ok(UserResponse::failed(error)),
        }
    }
}
