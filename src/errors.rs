use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

use crate::models::booking::{BookingAction, BookingStatus};

/// Error taxonomy of the booking/loyalty engine.
///
/// Every variant is returned synchronously to the caller; no failure path
/// leaves partial state behind (mutations run inside a single transaction
/// that rolls back on error).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested slot overlaps an existing non-cancelled booking
    /// for the same staff member.
    #[error("requested slot conflicts with an existing booking")]
    Conflict,

    /// The state machine has no edge for this (status, action) pair.
    #[error("cannot apply {action:?} to a booking in status {from:?}")]
    InvalidTransition {
        from: BookingStatus,
        action: BookingAction,
    },

    /// Completion was already recorded. Surfaced distinctly so callers can
    /// treat a retried `complete` as harmless rather than as a hard failure.
    #[error("booking is already completed")]
    AlreadyCompleted,

    /// Redemption or adjustment would drive the balance negative.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    /// A ledger operation was attempted for a merchant with no active
    /// loyalty program.
    #[error("merchant has no active loyalty program")]
    ProgramNotConfigured,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// Short machine-readable code included in the JSON body so clients can
    /// branch without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Conflict => "CONFLICT",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::AlreadyCompleted => "ALREADY_COMPLETED",
            EngineError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            EngineError::ProgramNotConfigured => "PROGRAM_NOT_CONFIGURED",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Validation(_) => "VALIDATION",
            EngineError::Database(_) => "DATABASE",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Conflict | EngineError::AlreadyCompleted => StatusCode::CONFLICT,
            EngineError::InvalidTransition { .. }
            | EngineError::InsufficientBalance { .. }
            | EngineError::ProgramNotConfigured => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        if let EngineError::Database(ref e) = self {
            tracing::error!("database error: {:?}", e);
        }
        let message = match self {
            // Never leak driver details to the client.
            EngineError::Database(_) => "internal database error".to_string(),
            ref other => other.to_string(),
        };
        let body = Json(json!({
            "success": false,
            "code": self.code(),
            "message": message,
        }));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_duplicate_completion_map_to_409() {
        assert_eq!(EngineError::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(EngineError::AlreadyCompleted.status_code(), StatusCode::CONFLICT);
        // Distinct codes let a retrying caller tell them apart.
        assert_ne!(EngineError::Conflict.code(), EngineError::AlreadyCompleted.code());
    }

    #[test]
    fn business_rule_failures_map_to_422() {
        let err = EngineError::InsufficientBalance { available: 1, requested: 5 };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            EngineError::ProgramNotConfigured.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
