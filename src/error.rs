use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::loader::LoadError;
use crate::vote::VoteError;

/// Failures of the backing store: SQL, connection pool, or the blocking task
/// that ran the query.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Store(e.into())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::Store(e.into())
    }
}

impl From<VoteError> for AppError {
    fn from(e: VoteError) -> Self {
        match e {
            VoteError::Unauthenticated => AppError::Unauthorized,
            VoteError::InvalidValue(_) => AppError::BadRequest(e.to_string()),
            VoteError::PostNotFound(_) => AppError::NotFound,
            VoteError::Storage(e) => AppError::Store(e),
        }
    }
}

impl AppError {
    /// Machine readable code, exposed as `extensions.code` on GraphQL errors.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "NOT_FOUND",
            AppError::Unauthorized => "UNAUTHENTICATED",
            AppError::BadRequest(_) => "BAD_USER_INPUT",
            AppError::Store(_) | AppError::Load(_) | AppError::Internal(_) => "INTERNAL",
        }
    }

    /// Message safe to show to a client. Internal details are logged instead.
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound | AppError::Unauthorized | AppError::BadRequest(_) => {
                self.to_string()
            }
            AppError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Load(e) => {
                tracing::error!("Loader error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        }
    }
}

impl async_graphql::ErrorExtensions for AppError {
    fn extend(&self) -> async_graphql::Error {
        let code = self.code();
        async_graphql::Error::new(self.public_message()).extend_with(|_, ext| ext.set("code", code))
    }
}

/// Convert anything that maps onto [`AppError`] into a GraphQL error.
pub fn gql_error(e: impl Into<AppError>) -> async_graphql::Error {
    use async_graphql::ErrorExtensions;
    e.into().extend()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Load(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.public_message()).into_response()
    }
}
