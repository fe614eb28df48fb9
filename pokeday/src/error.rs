//! Error types for pokeday

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DayError {
    /// The dataset never loaded (file missing, corrupt or empty)
    #[error("Service unavailable: Pokémon data file '{path}' is missing or empty.")]
    ServiceUnavailable { path: String },
    /// Loaded dataset has no entry for the key
    #[error("No Pokémon data found for day {0}.")]
    NotFound(String),
    /// Reading or parsing the dataset file failed
    #[error("Failed to load '{path}': {reason}")]
    Load { path: String, reason: String },
}

impl DayError {
    pub fn status(&self) -> StatusCode {
        match self {
            DayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DayError::NotFound(_) => StatusCode::NOT_FOUND,
            DayError::Load { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for DayError {
    fn into_response(self) -> Response {
        log::warn!("{}", self);
        (
            self.status(),
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, DayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_api_contract() {
        let unavailable = DayError::ServiceUnavailable {
            path: "data_gen/pokemon_cleaned.json".to_string(),
        };
        assert_eq!(
            unavailable.to_string(),
            "Service unavailable: Pokémon data file 'data_gen/pokemon_cleaned.json' is missing or empty."
        );
        assert_eq!(
            DayError::NotFound("42".to_string()).to_string(),
            "No Pokémon data found for day 42."
        );
    }

    #[test]
    fn status_codes() {
        let unavailable = DayError::ServiceUnavailable {
            path: String::new(),
        };
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            DayError::NotFound("1".to_string()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
