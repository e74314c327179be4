use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{policy::VoteError, store::StoreError};

/// Everything a request can fail with. Each failure is scoped to the one
/// attempted operation; the stores always reflect their last successful
/// write.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Not found")]
    NotFound,

    #[error("Sign in required")]
    Unauthorized,

    #[error("Admin role required")]
    Forbidden,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Poll is no longer active")]
    PollInactive,

    #[error("Unknown candidate")]
    UnknownCandidate,

    #[error("You have already voted in this poll")]
    AlreadyVoted,

    #[error("An approved payment is required to vote")]
    PaymentRequired,

    #[error("A payment is already {0}")]
    DuplicatePayment(&'static str),

    #[error("Could not record the vote, please try again")]
    ConflictRetryExhausted,

    #[error("Internal error: {0}")]
    ExternalService(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::EmailTaken
            | AppError::AlreadyVoted
            | AppError::PollInactive
            | AppError::DuplicatePayment(_) => StatusCode::CONFLICT,
            AppError::UnknownCandidate => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            AppError::ConflictRetryExhausted => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExternalService(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            // A conflict that escapes the retry loops is a bug surfaced
            // as a server error, not a user-facing decision.
            StoreError::Conflict => AppError::ExternalService("unexpected version conflict".into()),
            StoreError::Backend(msg) => AppError::ExternalService(msg),
        }
    }
}

impl From<VoteError> for AppError {
    fn from(e: VoteError) -> Self {
        match e {
            VoteError::PollInactive => AppError::PollInactive,
            VoteError::UnknownCandidate => AppError::UnknownCandidate,
            VoteError::AlreadyVoted => AppError::AlreadyVoted,
            VoteError::PaymentRequired => AppError::PaymentRequired,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::ExternalService(format!("document encoding: {e}"))
    }
}
