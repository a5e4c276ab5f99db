use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{box_controller::BoxError, item_store::ItemError};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ItemError> for AppError {
    fn from(err: ItemError) -> Self {
        let status = match &err {
            ItemError::NotFound(_) => StatusCode::NOT_FOUND,
            ItemError::DuplicateFilename(_)
            | ItemError::AlreadyClaimed(_)
            | ItemError::NotClaimHolder { .. } => StatusCode::CONFLICT,
            ItemError::InvalidFilename(_)
            | ItemError::InvalidEmbedding(_)
            | ItemError::InvalidThreshold(_) => StatusCode::BAD_REQUEST,
            ItemError::ClaimWindowOutOfRange(_)
            | ItemError::CorruptEmbedding(_)
            | ItemError::Sqlx(_) => {
                tracing::error!(error = %err, "item operation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<BoxError> for AppError {
    fn from(err: BoxError) -> Self {
        let status = match &err {
            BoxError::BoxNotFound(_) => StatusCode::NOT_FOUND,
            BoxError::BoxAlreadyExists(_) | BoxError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            BoxError::InvalidBoxId(_)
            | BoxError::InvalidCapacity(_)
            | BoxError::StaleDeposit { .. } => StatusCode::BAD_REQUEST,
            BoxError::CorruptRow(_) | BoxError::Sqlx(_) => {
                tracing::error!(error = %err, "box storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}
