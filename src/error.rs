//! Error types for the lending server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Numeric error codes carried in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    DbFailure = 3,
    NoSuchUser = 4,
    NoSuchBook = 5,
    BookNotAvailable = 7,
    Duplicate = 8,
    BadValue = 18,
    NoSuchData = 20,
    NoSuchLoan = 22,
    LoanAlreadyReturned = 23,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("User with id {0} not found")]
    UserNotFound(Uuid),

    #[error("Book with id {0} not found")]
    BookNotFound(Uuid),

    #[error("Loan with id {0} not found")]
    LoanNotFound(Uuid),

    #[error("No copies of book {0} are available")]
    BookUnavailable(Uuid),

    #[error("Loan {0} has already been returned")]
    AlreadyReturned(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Missing referenced entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::UserNotFound(_)
                | AppError::BookNotFound(_)
                | AppError::LoanNotFound(_)
                | AppError::NotFound(_)
        )
    }

    /// Valid entity, invalid state for the requested transition
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, AppError::BookUnavailable(_) | AppError::AlreadyReturned(_))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, code, message) = match &self {
            AppError::UserNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchUser, message),
            AppError::BookNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchBook, message),
            AppError::LoanNotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchLoan, message),
            AppError::BookUnavailable(_) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BookNotAvailable, message)
            }
            AppError::AlreadyReturned(_) => {
                (StatusCode::BAD_REQUEST, ErrorCode::LoanAlreadyReturned, message)
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone())
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
