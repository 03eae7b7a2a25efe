use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::ratelimit::RateLimitStatus;
use crate::types::ApiResponse;

/// Why an authentication attempt was rejected.
///
/// Kept for logs only; the HTTP layer renders all of these except
/// `AddressMismatch` as the same 401 body.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("missing bearer token")]
    MissingToken,
    #[error("session token invalid")]
    TokenInvalid,
    #[error("session token expired")]
    TokenExpired,
    #[error("session subject does not match target address")]
    AddressMismatch,
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(AuthFailure),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited")]
    RateLimited(RateLimitStatus),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccountError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AccountError::Validation(_) => StatusCode::BAD_REQUEST,
            AccountError::Conflict(_) => StatusCode::CONFLICT,
            AccountError::NotFound(_) => StatusCode::NOT_FOUND,
            AccountError::Unauthorized(AuthFailure::AddressMismatch) => StatusCode::FORBIDDEN,
            AccountError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AccountError::Forbidden(_) => StatusCode::FORBIDDEN,
            AccountError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AccountError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut headers = HeaderMap::new();

        let (message, hint) = match &self {
            AccountError::Validation(msg) => (msg.clone(), None),
            AccountError::Conflict(msg) => (
                msg.clone(),
                Some("This public key is already registered"),
            ),
            AccountError::NotFound(msg) => (msg.clone(), None),
            AccountError::Unauthorized(AuthFailure::AddressMismatch) => (
                "Token does not grant access to this account".to_string(),
                None,
            ),
            AccountError::Unauthorized(_) => (
                "Authentication failed".to_string(),
                Some("Request a new challenge and sign the decoded nonce bytes"),
            ),
            AccountError::Forbidden(msg) => (msg.clone(), None),
            AccountError::RateLimited(limit) => {
                limit.write_headers(&mut headers);
                if let Ok(v) = HeaderValue::from_str(&limit.retry_after_secs.to_string()) {
                    headers.insert(header::RETRY_AFTER, v);
                }
                (
                    "Rate limit exceeded".to_string(),
                    Some("Wait before making more requests"),
                )
            }
            AccountError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    "Internal error".to_string(),
                    Some("Please try again later"),
                )
            }
        };

        let body = if let Some(h) = hint {
            ApiResponse::<()>::error_with_hint(message, h)
        } else {
            ApiResponse::<()>::error(message)
        };

        (status, headers, Json(body)).into_response()
    }
}

pub type AccountResult<T> = Result<T, AccountError>;
