//! API Error Handling
//!
//! Structured error responses with request tracking. Engine errors map onto
//! HTTP by how the player should see them: a specific rejection (400), "too
//! late" (409), still resolving (202) or a blocking banner (423).

use crate::errors::{EngineError, ErrorClass};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// VALIDATION, NOT_FOUND, CONFLICT, PENDING, PAUSED, FAIRNESS_VIOLATION, ...
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    BadRequest(String),
    NotFound(String),
    Unauthorized,
    Engine(EngineError),
}

impl ApiError {
    pub fn bad_request(request_id: String, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message.into()),
            request_id,
        }
    }

    pub fn not_found(request_id: String, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message.into()),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            request_id,
        }
    }

    pub fn engine(request_id: String, error: EngineError) -> Self {
        Self {
            kind: ApiErrorKind::Engine(error),
            request_id,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.kind {
            ApiErrorKind::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiErrorKind::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiErrorKind::Engine(error) => match (error.class(), error) {
                (_, EngineError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                (ErrorClass::Validation, _) => (StatusCode::BAD_REQUEST, "VALIDATION"),
                (ErrorClass::Conflict, _) => (StatusCode::CONFLICT, "CONFLICT"),
                (ErrorClass::Pending, _) => (StatusCode::ACCEPTED, "PENDING"),
                (ErrorClass::Blocking, EngineError::FairnessViolation(_)) => {
                    (StatusCode::LOCKED, "FAIRNESS_VIOLATION")
                }
                (ErrorClass::Blocking, _) => (StatusCode::LOCKED, "PAUSED"),
                (ErrorClass::Internal, _) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }

    fn message(&self) -> String {
        match &self.kind {
            ApiErrorKind::BadRequest(msg) | ApiErrorKind::NotFound(msg) => msg.clone(),
            ApiErrorKind::Unauthorized => "missing or invalid operator key".to_string(),
            ApiErrorKind::Engine(error) => error.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, code) = self.status_and_code();
        write!(f, "[{}] {}: {}", self.request_id, code, self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(request_id = %self.request_id, error = %self.message(), "Request failed");
        }
        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message: self.message(),
            },
        });

        (status, body).into_response()
    }
}
