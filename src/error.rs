use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    /// A business rule such as the duration cap or poll expiry.
    #[error("{0}")]
    PolicyViolation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid email or password")]
    LoginFail,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("password hashing error: {0}")]
    PasswordHash(argon2::password_hash::Error),

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(inner: argon2::password_hash::Error) -> Self {
        AppError::PasswordHash(inner)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        AppError::PolicyViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::PolicyViolation(_) => "policy_violation",
            AppError::Conflict(_) => "conflict",
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized(_) | AppError::LoginFail => "unauthorized",
            AppError::Sqlx(e) if is_unique_violation(e) => "conflict",
            AppError::Sqlx(_) => "database_error",
            AppError::PasswordHash(_) | AppError::Jwt(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) | AppError::PolicyViolation(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::LoginFail => StatusCode::UNAUTHORIZED,
            AppError::Sqlx(e) if is_unique_violation(e) => StatusCode::CONFLICT,
            AppError::Sqlx(_) | AppError::PasswordHash(_) | AppError::Jwt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::Sqlx(e) if is_unique_violation(e) => "Resource already exists".to_string(),
            AppError::Sqlx(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::PasswordHash(e) => {
                tracing::error!("Password hashing error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Jwt(e) => {
                tracing::error!("Token error: {}", e);
                "Internal server error".to_string()
            }
            other => {
                tracing::warn!(kind = other.kind(), "Request rejected: {}", other);
                other.to_string()
            }
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
        }));

        (status, body).into_response()
    }
}
