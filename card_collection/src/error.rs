//! Error types for card_collection

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Unified error type for collection operations
#[derive(Debug, Error)]
pub enum CollectionError {
    /// Uploaded bytes could not be decoded as a still image
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    /// The classifier recognised no card in the image
    #[error("No card detected")]
    NoDetection,
    /// A required request field was missing or blank
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    /// Multipart body could not be read
    #[error("Malformed upload: {0}")]
    Multipart(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Card not found")]
    CardNotFound,
    #[error("User does not own this card")]
    NotOwned,
    /// Inference endpoint failed or returned garbage
    #[error("Classifier error: {0}")]
    Classifier(String),
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Blocking task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl CollectionError {
    /// HTTP status surfaced to the caller
    pub fn status(&self) -> StatusCode {
        match self {
            CollectionError::InvalidImage(_)
            | CollectionError::NoDetection
            | CollectionError::MissingField(_)
            | CollectionError::Multipart(_) => StatusCode::BAD_REQUEST,
            CollectionError::UserNotFound
            | CollectionError::CardNotFound
            | CollectionError::NotOwned => StatusCode::NOT_FOUND,
            CollectionError::Classifier(_) => StatusCode::BAD_GATEWAY,
            CollectionError::Database(_) | CollectionError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<tokio::task::JoinError> for CollectionError {
    fn from(err: tokio::task::JoinError) -> Self {
        CollectionError::Task(err.to_string())
    }
}

/// JSON error body: `{"detail": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for CollectionError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        } else {
            log::debug!("Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Failure modes of the external price lookup.
///
/// These never reach HTTP callers; the workflow collapses them to a zero price.
#[derive(Debug, Error)]
pub enum LookupError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP error status code
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),
    /// Failed to parse JSON response
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// The API returned no card for the name
    #[error("No card named {0:?}")]
    NoMatch(String),
    /// Card found but carries no usable market price
    #[error("No market price for {0:?}")]
    NoPrice(String),
}

/// Result alias for collection operations
pub type Result<T> = std::result::Result<T, CollectionError>;
