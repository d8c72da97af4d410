use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::api::rest::response::{Envelope, ErrorDetail};

/// Failure of the carrier-assignment transaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transaction failure: {0}")]
    TransactionFailure(String),

    #[error("store error: {0}")]
    Generic(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("carrier {carrier_id} already requested parcel {parcel_id}")]
    Duplicate { parcel_id: i64, carrier_id: i64 },

    #[error("parcel {0} not found")]
    ParcelNotFound(i64),

    #[error("parcel {0} no longer accepts carrier requests")]
    ParcelClosed(i64),

    #[error("store error: {0}")]
    Generic(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParcelError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unprocessable entity: {0}")]
    Unprocessable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AssignmentError> for AppError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::InvalidState(msg) => AppError::BadRequest(msg),
            AssignmentError::NotFound(msg) => AppError::NotFound(msg),
            AssignmentError::TransactionFailure(_) | AssignmentError::Generic(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Duplicate { .. } | RequestError::ParcelClosed(_) => {
                AppError::BadRequest(err.to_string())
            }
            RequestError::ParcelNotFound(_) => AppError::NotFound(err.to_string()),
            RequestError::Generic(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<ParcelError> for AppError {
    fn from(err: ParcelError) -> Self {
        match err {
            ParcelError::NotFound(msg) => AppError::NotFound(msg),
            ParcelError::Invalid(msg) => AppError::BadRequest(msg),
            ParcelError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, title, message) = match &self {
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "Not Found", msg.clone())
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID", "Invalid Input", msg.clone())
            }
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID",
                "Decode Error",
                msg.clone(),
            ),
            AppError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal Server Error",
                    "internal server error".to_string(),
                )
            }
        };

        let body: Envelope<()> = Envelope::failure(ErrorDetail::new(code, title, message));
        (status, Json(body)).into_response()
    }
}
