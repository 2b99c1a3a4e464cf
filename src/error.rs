use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Why a decision token could not be used.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("the link is malformed")]
    Malformed,
    #[error("the link has expired")]
    Expired,
    #[error("the link signature does not match")]
    SignatureMismatch,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password. One message for both.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Account not found")]
    AccountNotFound,

    #[error("There is no pending login request for this account")]
    NoPendingRequest,

    #[error("Decision link is unusable: {0}")]
    Token(#[from] TokenError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountDeactivated => "account_deactivated",
            AuthError::AccountNotFound => "account_not_found",
            AuthError::NoPendingRequest => "no_pending_request",
            AuthError::Token(TokenError::Malformed) => "token_malformed",
            AuthError::Token(TokenError::Expired) => "token_expired",
            AuthError::Token(TokenError::SignatureMismatch) => "token_signature_mismatch",
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::Validation(_) => "validation",
            AuthError::Conflict(_) => "conflict",
            AuthError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountDeactivated
            | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::AccountNotFound => StatusCode::NOT_FOUND,
            AuthError::NoPendingRequest | AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::Token(_) | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AuthError::Internal(e) => {
                error!(error = ?e, "internal error");
                "Server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: message,
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
