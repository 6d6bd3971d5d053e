use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::usecases::{billing::BillingError, seats::SeatError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,
}

/// API-facing error. Built from use-case errors so handlers can `?`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    trial_ends_at: Option<DateTime<Utc>>,
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let message = match &err {
            // Don't leak internal error detail to client
            BillingError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let trial_ends_at = match &err {
            BillingError::BillingRequired { trial_ends_at, .. } => *trial_ends_at,
            _ => None,
        };
        Self {
            status: err.status_code(),
            code: err.code(),
            message,
            trial_ends_at,
        }
    }
}

impl From<SeatError> for ApiError {
    fn from(err: SeatError) -> Self {
        let message = match &err {
            SeatError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        Self {
            status: err.status_code(),
            code: err.code(),
            message,
            trial_ends_at: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            ok: false,
            code: self.code,
            message: self.message,
            trial_ends_at: self.trial_ends_at,
        });

        (self.status, body).into_response()
    }
}
