use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use anchorchat_chain::{ChainError, WalletError};
use anchorchat_types::api::ErrorBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    WalletMissing,
    UserRejected,
    ConnectFailed,
    ChainUnavailable,
    SubmitRejected,
    PersistFailed,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WalletMissing => "wallet_missing",
            Self::UserRejected => "user_rejected",
            Self::ConnectFailed => "connect_failed",
            Self::ChainUnavailable => "chain_unavailable",
            Self::SubmitRejected => "submit_rejected",
            Self::PersistFailed => "persist_failed",
            Self::InvalidInput => "invalid_input",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::WalletMissing => StatusCode::PRECONDITION_FAILED,
            Self::UserRejected => StatusCode::FORBIDDEN,
            Self::ConnectFailed | Self::ChainUnavailable => StatusCode::BAD_GATEWAY,
            Self::SubmitRejected => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PersistFailed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn persist(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::PersistFailed, format!("store write failed: {err}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Only store failures are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::PersistFailed
    }
}

impl From<ChainError> for Error {
    fn from(err: ChainError) -> Self {
        let kind = match err {
            ChainError::Rejected(_) => ErrorKind::SubmitRejected,
            ChainError::Unavailable(_) | ChainError::NotFound(_) | ChainError::Decode(_) => {
                ErrorKind::ChainUnavailable
            }
        };
        Self::new(kind, err.to_string())
    }
}

impl From<WalletError> for Error {
    fn from(err: WalletError) -> Self {
        let kind = if err.is_user_rejection() {
            ErrorKind::UserRejected
        } else {
            ErrorKind::ConnectFailed
        };
        Self::new(kind, err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message.clone(),
            kind: self.kind.as_str().to_string(),
            retryable: self.is_retryable(),
        };
        (self.kind.status(), Json(body)).into_response()
    }
}
