use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;

/// Coarse grouping a client can branch on: retry, re-request, or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Expired,
    Conflict,
    Mismatch,
    SignatureInvalid,
    NotClaimed,
    InvalidInput,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown claim token")]
    TokenInvalid,
    #[error("claim token expired")]
    TokenExpired,
    #[error("claim token already consumed")]
    TokenAlreadyConsumed,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("no session for device {0}")]
    SessionNotFound(String),
    #[error("mac address does not match registration")]
    MacMismatch,
    #[error("hashed device id does not match")]
    HashedIdMismatch,
    #[error("device {0} is already bound")]
    AlreadyBound(String),
    #[error("device {0} is already claimed")]
    AlreadyClaimed(String),
    #[error("device {0} has not been claimed")]
    DeviceNotClaimed(String),
    #[error("credential signature invalid")]
    SignatureInvalid,
    #[error("credential expired")]
    CredentialExpired,
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("failed to sign credential: {0}")]
    Signing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TokenInvalid | Self::DeviceNotFound(_) | Self::SessionNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::TokenExpired | Self::CredentialExpired => ErrorKind::Expired,
            Self::TokenAlreadyConsumed | Self::AlreadyBound(_) | Self::AlreadyClaimed(_) => {
                ErrorKind::Conflict
            }
            Self::MacMismatch | Self::HashedIdMismatch => ErrorKind::Mismatch,
            Self::SignatureInvalid => ErrorKind::SignatureInvalid,
            Self::DeviceNotClaimed(_) => ErrorKind::NotClaimed,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Signing(_) | Self::Store(_) => ErrorKind::Unavailable,
        }
    }

    /// Stable wire identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenInvalid => "token_invalid",
            Self::TokenExpired => "token_expired",
            Self::TokenAlreadyConsumed => "token_already_consumed",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::SessionNotFound(_) => "session_not_found",
            Self::MacMismatch => "mac_mismatch",
            Self::HashedIdMismatch => "hashed_id_mismatch",
            Self::AlreadyBound(_) => "already_bound",
            Self::AlreadyClaimed(_) => "already_claimed",
            Self::DeviceNotClaimed(_) => "device_not_claimed",
            Self::SignatureInvalid => "signature_invalid",
            Self::CredentialExpired => "credential_expired",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Signing(_) => "signing_failed",
            Self::Store(_) => "store_unavailable",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Expired | ErrorKind::Unavailable)
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Expired => StatusCode::GONE,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Mismatch | ErrorKind::NotClaimed => StatusCode::FORBIDDEN,
            ErrorKind::SignatureInvalid => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Store(_) | Self::Signing(_) => "temporarily unavailable".to_string(),
            other => other.to_string(),
        };
        let body = json!({
            "error": self.code(),
            "message": message,
            "retryable": self.retryable(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn state_violations_share_conflict_kind() {
        for err in [
            AuthError::TokenAlreadyConsumed,
            AuthError::AlreadyBound("d".into()),
            AuthError::AlreadyClaimed("d".into()),
        ] {
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert!(!err.retryable());
        }
    }

    #[test]
    fn store_outage_is_transient_not_domain() {
        let err = AuthError::from(StoreError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.retryable());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn mismatch_and_signature_are_never_retryable() {
        assert!(!AuthError::MacMismatch.retryable());
        assert!(!AuthError::HashedIdMismatch.retryable());
        assert!(!AuthError::SignatureInvalid.retryable());
        assert_eq!(AuthError::CredentialExpired.kind(), ErrorKind::Expired);
    }
}
