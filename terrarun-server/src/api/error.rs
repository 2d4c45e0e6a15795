//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::RepositoryError;
use crate::service::dispatch::DispatchError;
use crate::service::pool::PoolError;
use crate::service::registry::RegistryError;
use crate::service::scope::ScopeError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    DatabaseError(sqlx::Error),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(err) => ApiError::DatabaseError(err),
            RepositoryError::Conflict(msg) => ApiError::Conflict(msg),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidToken => ApiError::Unauthorized(err.to_string()),
            RegistryError::UnknownAgent(_)
            | RegistryError::PoolNotFound(_)
            | RegistryError::TokenNotFound(_) => ApiError::NotFound(err.to_string()),
            RegistryError::ValidationError(msg) => ApiError::BadRequest(msg),
            RegistryError::Repository(err) => err.into(),
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotFound(_)
            | PoolError::WorkspaceNotFound(_)
            | PoolError::ScopeNotAssociated(_) => ApiError::NotFound(err.to_string()),
            PoolError::NameTaken { .. } => ApiError::Conflict(err.to_string()),
            PoolError::ValidationError(msg) => ApiError::BadRequest(msg),
            PoolError::Repository(err) => err.into(),
        }
    }
}

impl From<ScopeError> for ApiError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::WorkspaceNotFound(_)
            | ScopeError::ProjectNotFound(_)
            | ScopeError::EnvironmentNotFound(_) => ApiError::NotFound(err.to_string()),
            ScopeError::ValidationError(msg) => ApiError::BadRequest(msg),
            ScopeError::Repository(err) => err.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownAgent(_)
            | DispatchError::WorkspaceNotFound(_)
            | DispatchError::RunNotFound(_) => ApiError::NotFound(err.to_string()),
            DispatchError::Conflict(msg) => ApiError::Conflict(msg),
            DispatchError::ValidationError(msg) => ApiError::BadRequest(msg),
            DispatchError::Repository(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
