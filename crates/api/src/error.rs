//! Error responses.
//!
//! Every failure is rendered as `{ "error": <code>, "message": <text> }`
//! with the status the error itself reports.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use kopa_core::ledger::LedgerError;
use kopa_shared::AppError;

/// A failed request.
#[derive(Debug)]
pub enum ApiError {
    /// Engine failure.
    Ledger(LedgerError),
    /// Request-level failure (bad query, task failure).
    App(AppError),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl ApiError {
    /// HTTP status of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        let code = match self {
            Self::Ledger(err) => err.http_status_code(),
            Self::App(err) => err.status_code(),
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ledger(err) => err.error_code(),
            Self::App(err) => err.error_code(),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Ledger(err) => err.to_string(),
            Self::App(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && !matches!(self, Self::Ledger(LedgerError::LockTimeout { .. }))
        {
            error!(code = self.code(), error = %self.message(), "Request failed");
        }
        (
            status,
            Json(json!({
                "error": self.code(),
                "message": self.message(),
            })),
        )
            .into_response()
    }
}
