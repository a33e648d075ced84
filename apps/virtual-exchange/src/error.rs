//! HTTP-facing error adapter.
//!
//! Domain errors carry stable SCREAMING_SNAKE_CASE reason codes; this
//! module maps them onto HTTP statuses and a structured rejection body so
//! every endpoint rejects the same way.

use std::collections::HashMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::data::DataError;
use crate::exchange::ExchangeError;
use crate::orchestrator::RunError;
use crate::persistence::PersistenceError;
use crate::runner::RunnerError;

/// Structured rejection body returned to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Additional context.
    pub details: HashMap<String, String>,
}

/// An API error: a status code plus the structured body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: HttpErrorResponse,
}

impl ApiError {
    /// Create an error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: HttpErrorResponse {
                code: code.to_string(),
                message: message.into(),
                details: HashMap::new(),
            },
        }
    }

    /// Add a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.details.insert(key.into(), value.into());
        self
    }

    /// Bad request with a free-form message.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    /// Resource not found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// The HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The stable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.body.code
    }
}

impl From<ExchangeError> for ApiError {
    fn from(error: ExchangeError) -> Self {
        let status = match &error {
            ExchangeError::InvalidOrder(_)
            | ExchangeError::UnknownSymbol(_)
            | ExchangeError::NotModifiable(_) => StatusCode::BAD_REQUEST,
            ExchangeError::InsufficientFunds { .. } => StatusCode::PRECONDITION_FAILED,
            ExchangeError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::AlreadyTerminal(_) => StatusCode::CONFLICT,
            ExchangeError::MalformedCandle(_) | ExchangeError::Invariant(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, error.reason(), error.to_string())
    }
}

impl From<RunnerError> for ApiError {
    fn from(error: RunnerError) -> Self {
        let (status, code) = match &error {
            RunnerError::ClockRegression { .. } => (StatusCode::CONFLICT, "CLOCK_REGRESSION"),
            RunnerError::UnknownSymbol(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_SYMBOL"),
        };
        Self::new(status, code, error.to_string())
    }
}

impl From<DataError> for ApiError {
    fn from(error: DataError) -> Self {
        let (status, code) = match &error {
            DataError::Malformed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "MALFORMED_CANDLE"),
            _ => (StatusCode::UNPROCESSABLE_ENTITY, "DATA_GAP"),
        };
        Self::new(status, code, error.to_string())
    }
}

impl From<PersistenceError> for ApiError {
    fn from(error: PersistenceError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "PERSISTENCE",
            error.to_string(),
        )
    }
}

impl From<RunError> for ApiError {
    fn from(error: RunError) -> Self {
        match error {
            RunError::InvalidRun(message) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_RUN", message)
            }
            RunError::Data(inner) => inner.into(),
            RunError::Runner(inner) => inner.into(),
            RunError::Exchange(inner) => inner.into(),
            RunError::Strategy(inner) => {
                let status = match inner {
                    crate::orchestrator::StrategyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                let code = if status == StatusCode::GATEWAY_TIMEOUT {
                    "STRATEGY_TIMEOUT"
                } else {
                    "STRATEGY_UNAVAILABLE"
                };
                Self::new(status, code, inner.to_string())
            }
            RunError::Persistence(message) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE", message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}
